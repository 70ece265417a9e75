//! Integration tests for the entity-replication core
//!
//! These tests wire several `Networking` instances together as simulated
//! participants, shuttling frames between them by hand, and validate the
//! cross-component guarantees: collision-free allocation, ownership
//! arbitration, quota enforcement and snapshot convergence.

use assert_approx_eq::assert_approx_eq;
use peerlink::dispatch::Networking;
use peerlink::entity::{EntityKind, Registry};
use peerlink::kinds::{Avatar, Bullet, Mob, Plushie};
use peerlink::store::POOL_COUNT;
use peerlink::wire::{decode_frame, encode_frame, PacketKind};
use peerlink::{Vec3, SNAPSHOT_RATE_HZ, TICK_RATE_HZ};
use std::collections::HashSet;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(EntityKind::Player, Avatar::supply);
    registry.register(EntityKind::Enemy, Mob::supply_enemy);
    registry.register(EntityKind::BigEnemy, Mob::supply_big_enemy);
    registry.register(EntityKind::Item, Mob::supply_item);
    registry.register(EntityKind::Plushie, Plushie::supply);
    registry.register(EntityKind::EntityBullet, Bullet::supply);
    registry
}

fn participant(account: u32, roster: &[u32]) -> Networking {
    let mut net = Networking::new(account, registry());
    net.set_roster(roster.to_vec(), 0.0);
    net
}

/// Emits every pool once and delivers the frames to a peer.
fn sync(from: &mut Networking, to: &mut Networking, now: f64) {
    for _ in 0..POOL_COUNT {
        for out in from.emit_snapshots() {
            to.handle_payload(from.local_account(), &out.bytes, now);
        }
    }
}

/// IDENTIFIER ALLOCATION TESTS
mod allocation_tests {
    use super::*;

    /// Participants allocating independently, before ever
    /// seeing each other's entities, never collide.
    #[test]
    fn independent_allocations_never_collide() {
        init_logging();
        let roster = [100u32, 200, 300, 4_000_000_000];
        let mut all_ids: HashSet<u32> = HashSet::new();

        for &account in &roster {
            let mut net = participant(account, &roster);
            for _ in 0..10 {
                let id = net.spawn_local(EntityKind::Enemy, 0.0).unwrap();
                assert!(all_ids.insert(id), "id {} allocated by two peers", id);
                // Stay under the spawned quota.
                net.kill_entity(id);
            }
        }
    }

    /// A roster change moves the allocator to a fresh starting region
    /// when a higher account crowds into the same sector.
    #[test]
    fn roster_change_rederives_starting_point() {
        init_logging();
        let mut net = participant(100, &[100]);
        let before = net.spawn_local(EntityKind::Enemy, 0.0).unwrap();

        net.set_roster(vec![100, 150], 1.0);
        let after = net.spawn_local(EntityKind::Enemy, 1.0).unwrap();

        // Account 150 shares sector 0 and outranks 100, so the fresh
        // starting point leaves sector 0 entirely.
        assert_eq!(before >> 29, 0);
        assert_eq!(after >> 29, 1);
    }
}

/// OWNERSHIP ARBITRATION TESTS
mod ownership_tests {
    use super::*;

    /// A plushie thrown by one participant and caught by another changes
    /// owner exactly once, and the old owner stops broadcasting it.
    #[test]
    fn plushie_handoff_between_peers() {
        init_logging();
        let roster = [100u32, 200];
        let mut alice = participant(100, &roster);
        let mut bob = participant(200, &roster);

        let id = alice.spawn_local(EntityKind::Plushie, 0.0).unwrap();
        sync(&mut alice, &mut bob, 0.1);
        assert_eq!(bob.pools().get(id).unwrap().owner(), 100);

        // Bob catches it well past the debounce window.
        let caught = bob
            .pools_mut()
            .get_mut(id)
            .unwrap()
            .as_any_mut()
            .downcast_mut::<Plushie>()
            .unwrap()
            .claim(200, 2.0);
        assert!(caught);

        // Bob now owns and broadcasts it; Alice accepts the transfer.
        sync(&mut bob, &mut alice, 2.1);
        assert_eq!(alice.pools().get(id).unwrap().owner(), 200);

        // Alice no longer emits the plushie she lost.
        let mut alice_frames = 0;
        for _ in 0..POOL_COUNT {
            alice_frames += alice.emit_snapshots().len();
        }
        assert_eq!(alice_frames, 0);
    }

    /// Near-simultaneous claims resolve to exactly one transfer: the
    /// second claim lands inside the debounce window and is dropped.
    #[test]
    fn racing_claims_debounced() {
        init_logging();
        let roster = [100u32, 200, 300];
        let mut alice = participant(100, &roster);

        let id = alice.spawn_local(EntityKind::Plushie, 0.0).unwrap();

        // Two claims arrive off the wire close together, long after
        // creation.
        let mut bob_claim = Plushie::new(id, 200, 5.0);
        bob_claim.set_transform(Vec3::new(1.0, 0.0, 0.0), 0.0);
        let mut carol_claim = Plushie::new(id, 300, 5.0);
        carol_claim.set_transform(Vec3::new(2.0, 0.0, 0.0), 0.0);

        use peerlink::{Entity, SnapshotWriter};
        let frame_for = |plushie: &Plushie| {
            let mut sink = SnapshotWriter::default();
            sink.write_u8(EntityKind::Plushie as u8);
            plushie.write(&mut sink).unwrap();
            encode_frame(PacketKind::Snapshot, id, sink.as_bytes())
        };

        alice.handle_payload(200, &frame_for(&bob_claim), 5.0);
        alice.handle_payload(300, &frame_for(&carol_claim), 5.3);

        // Bob won; Carol's claim was inside the window.
        assert_eq!(alice.pools().get(id).unwrap().owner(), 200);

        // Carol's claim is accepted once the window has elapsed.
        alice.handle_payload(300, &frame_for(&carol_claim), 6.5);
        assert_eq!(alice.pools().get(id).unwrap().owner(), 300);
    }
}

/// ADMISSION CONTROL TESTS
mod admission_tests {
    use super::*;

    /// The 17th heavyweight creation for one owner evicts
    /// exactly the first one, leaving 16 live.
    #[test]
    fn heavyweight_quota_evicts_oldest_across_the_wire() {
        init_logging();
        let roster = [100u32, 200];
        let mut alice = participant(100, &roster);
        let mut spammer = participant(200, &roster);

        let mut ids = Vec::new();
        for _ in 0..17 {
            ids.push(spammer.spawn_local(EntityKind::Enemy, 0.0).unwrap());
            sync(&mut spammer, &mut alice, 0.0);
        }

        // The spammer's own store already enforced its quota, and the
        // mirror agrees: 16 live, the first id gone.
        assert_eq!(alice.pools().len(), 16);
        assert!(!alice.pools().contains(ids[0]));
        assert!(alice.pools().contains(ids[16]));
    }

    /// A second big enemy from the same owner clears every heavyweight
    /// that owner had.
    #[test]
    fn big_enemy_exclusivity_end_to_end() {
        init_logging();
        let mut net = participant(100, &[100]);

        let minions: Vec<u32> = (0..4)
            .map(|_| net.spawn_local(EntityKind::Enemy, 0.0).unwrap())
            .collect();
        let first_boss = net.spawn_local(EntityKind::BigEnemy, 0.0).unwrap();
        let second_boss = net.spawn_local(EntityKind::BigEnemy, 1.0).unwrap();

        for id in minions {
            assert!(!net.pools().contains(id));
        }
        assert!(!net.pools().contains(first_boss));
        assert!(net.pools().contains(second_boss));
        // The dead boss left its id pinned.
        assert!(net.pools().occupied(first_boss));
    }

    /// 13 common-bullet requests in one second yield
    /// exactly one rejection, and the counter resets next second.
    #[test]
    fn common_bullet_rate_cap_and_reset() {
        init_logging();
        let mut net = participant(100, &[100]);

        let granted: usize = (0..13).filter(|_| net.request_common_bullet(10.2)).count();
        assert_eq!(granted, 12);

        let granted_next: usize = (0..12).filter(|_| net.request_common_bullet(11.0)).count();
        assert_eq!(granted_next, 12);
    }

    /// A banned participant's creations are refused by every peer that
    /// saw the notice, without the banner and the peer comparing notes.
    #[test]
    fn ban_notice_propagates_refusal() {
        init_logging();
        let roster = [100u32, 200, 300];
        let mut alice = participant(100, &roster);
        let mut bob = participant(200, &roster);
        let mut mallory = participant(300, &roster);

        let notice = alice.ban(300, "item duplication");
        bob.handle_payload(100, &notice.bytes, 0.0);

        mallory.spawn_local(EntityKind::Enemy, 0.0).unwrap();
        sync(&mut mallory, &mut alice, 0.1);
        sync(&mut mallory, &mut bob, 0.1);

        assert!(alice.pools().is_empty());
        assert!(bob.pools().is_empty());
    }
}

/// LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Two death notifications for the same entity produce one death;
    /// the second is a no-op on an id that is already gone.
    #[test]
    fn repeated_death_frames_are_idempotent() {
        init_logging();
        let roster = [100u32, 200];
        let mut alice = participant(100, &roster);
        let mut bob = participant(200, &roster);

        let id = alice.spawn_local(EntityKind::BigEnemy, 0.0).unwrap();
        sync(&mut alice, &mut bob, 0.0);

        let death = encode_frame(PacketKind::Death, id, &[]);
        bob.handle_payload(100, &death, 1.0);
        bob.handle_payload(100, &death, 1.1);

        assert!(!bob.pools().contains(id));
        assert!(bob.pools().occupied(id));
    }

    /// Killing an entity locally notifies peers, and the id of a
    /// non-tombstoning kind becomes reusable on both sides.
    #[test]
    fn death_notification_reaches_peers() {
        init_logging();
        let roster = [100u32, 200];
        let mut alice = participant(100, &roster);
        let mut bob = participant(200, &roster);

        let id = alice.spawn_local(EntityKind::Enemy, 0.0).unwrap();
        sync(&mut alice, &mut bob, 0.0);
        assert!(bob.pools().contains(id));

        let death = alice.kill_entity(id).unwrap();
        bob.handle_payload(100, &death.bytes, 1.0);

        assert!(!alice.pools().occupied(id));
        assert!(!bob.pools().occupied(id));
    }

    /// Damage frames route to the addressed entity and a lethal one
    /// retires it everywhere.
    #[test]
    fn damage_routes_and_kills() {
        init_logging();
        let roster = [100u32, 200];
        let mut alice = participant(100, &roster);
        let mut bob = participant(200, &roster);

        let id = alice.spawn_local(EntityKind::Enemy, 0.0).unwrap();
        sync(&mut alice, &mut bob, 0.0);

        let hit = alice.deal_damage(id, 150.0).unwrap();
        bob.handle_payload(100, &hit.bytes, 1.0);

        assert!(!alice.pools().contains(id));
        assert!(!bob.pools().contains(id));
    }
}

/// SNAPSHOT CONVERGENCE TESTS
mod convergence_tests {
    use super::*;

    /// A replica's interpolated position is monotonically
    /// non-decreasing between two snapshots and lands on the target
    /// after one snapshot interval.
    #[test]
    fn replica_interpolation_is_monotonic() {
        init_logging();
        let roster = [100u32, 200];
        let mut alice = participant(100, &roster);
        let mut bob = participant(200, &roster);

        let id = alice.spawn_local(EntityKind::Player, 0.0).unwrap();
        sync(&mut alice, &mut bob, 0.0);

        alice
            .pools_mut()
            .get_mut(id)
            .unwrap()
            .as_any_mut()
            .downcast_mut::<Avatar>()
            .unwrap()
            .set_transform(Vec3::new(10.0, 0.0, 0.0), 0.0);
        sync(&mut alice, &mut bob, 0.1);

        let dt = 1.0 / TICK_RATE_HZ;
        let ticks = (TICK_RATE_HZ / SNAPSHOT_RATE_HZ) as usize;
        let mut last = f32::MIN;
        for _ in 0..ticks {
            bob.tick(dt);
            let x = bob
                .pools()
                .get(id)
                .unwrap()
                .as_any()
                .downcast_ref::<Avatar>()
                .unwrap()
                .position()
                .x;
            assert!(x >= last, "replica moved backward: {} < {}", x, last);
            last = x;
        }
        assert_approx_eq!(last, 10.0, 1e-3);
    }

    /// Every participant's avatar ends up mirrored on every other
    /// participant, and nobody re-broadcasts somebody else's entity.
    #[test]
    fn full_mesh_avatar_sync() {
        init_logging();
        let roster = [100u32, 200, 300];
        let mut peers: Vec<Networking> = roster.iter().map(|&a| participant(a, &roster)).collect();

        let mut avatar_ids = Vec::new();
        for peer in peers.iter_mut() {
            avatar_ids.push(peer.spawn_local(EntityKind::Player, 0.0).unwrap());
        }

        // One full snapshot round, delivered all-to-all.
        for sender in 0..peers.len() {
            let mut frames = Vec::new();
            for _ in 0..POOL_COUNT {
                frames.extend(peers[sender].emit_snapshots());
            }
            let sender_account = peers[sender].local_account();
            for (receiver, peer) in peers.iter_mut().enumerate() {
                if receiver == sender {
                    continue;
                }
                for out in &frames {
                    peer.handle_payload(sender_account, &out.bytes, 0.1);
                }
            }
        }

        for peer in &peers {
            assert_eq!(peer.pools().len(), 3);
            for (&account, &id) in roster.iter().zip(avatar_ids.iter()) {
                assert_eq!(peer.avatar_of(account), Some(id));
            }
        }
    }

    /// Frames produced by one build decode on another instance byte for
    /// byte: the envelope is stable.
    #[test]
    fn frame_envelope_is_stable() {
        init_logging();
        let mut net = participant(100, &[100]);
        let id = net.spawn_local(EntityKind::Enemy, 0.0).unwrap();

        let mut found = false;
        for _ in 0..POOL_COUNT {
            for out in net.emit_snapshots() {
                let (kind, frame_id, body) = decode_frame(&out.bytes).unwrap();
                assert_eq!(kind, PacketKind::Snapshot);
                assert_eq!(frame_id, id);
                assert_eq!(body[0], EntityKind::Enemy as u8);
                found = true;
            }
        }
        assert!(found);
    }
}
