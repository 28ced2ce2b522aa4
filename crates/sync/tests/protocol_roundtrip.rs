use glam::{Mat3, Vec3};
use latentsync::net::{decode, encode, HEADER_LEN, MAX_BATCH_ENTITIES};
use latentsync::{EntityId, EntityKind, EntityUpdate, Message, MessageKind, Transform};
use proptest::prelude::*;
use proptest::strategy::ValueTree;

fn entity_id() -> impl Strategy<Value = EntityId> {
    any::<[u8; 16]>().prop_map(EntityId::from_bytes)
}

fn coord() -> impl Strategy<Value = f32> {
    -10_000.0f32..10_000.0f32
}

fn vec3() -> impl Strategy<Value = Vec3> {
    (coord(), coord(), coord()).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn transform() -> impl Strategy<Value = Transform> {
    (vec3(), vec3(), vec3(), vec3())
        .prop_map(|(x, y, z, t)| Transform::new(Mat3::from_cols(x, y, z), t))
}

fn entity_update() -> impl Strategy<Value = EntityUpdate> {
    (entity_id(), transform()).prop_map(|(id, transform)| EntityUpdate { id, transform })
}

fn state_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (any::<u32>(), prop::collection::vec(entity_update(), 0..8))
            .prop_map(|(frame, updates)| Message::BatchEntityUpdate { frame, updates }),
        (any::<u32>(), entity_id(), any::<u8>()).prop_map(|(frame, id, kind)| {
            Message::CreateEntity {
                frame,
                id,
                kind: EntityKind::from(kind),
            }
        }),
        (any::<u32>(), entity_id()).prop_map(|(frame, id)| Message::DestroyEntity { frame, id }),
        (any::<u32>(), transform())
            .prop_map(|(frame, transform)| Message::MoveClient { frame, transform }),
        (any::<u32>(), vec3(), coord()).prop_map(|(frame, position, heading)| {
            Message::SetSpawn {
                frame,
                position,
                heading,
            }
        }),
        (any::<u32>(), any::<u8>(), entity_id()).prop_map(|(frame, action, actor)| {
            Message::PlayerInteract {
                frame,
                action,
                actor,
            }
        }),
        (any::<u32>(), entity_id(), entity_id()).prop_map(|(frame, shot, shooter)| {
            Message::ReportHit {
                frame,
                shot,
                shooter,
            }
        }),
    ]
}

fn link_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (any::<u32>(), entity_id(), any::<u16>())
            .prop_map(|(frame, id, port)| Message::RegisterClient { frame, id, port }),
        (any::<u32>(), entity_id(), any::<u8>())
            .prop_map(|(frame, id, status)| Message::RegistrationReply { frame, id, status }),
        any::<u32>().prop_map(|frame| Message::Handshake { frame }),
        any::<u32>().prop_map(|frame| Message::HandshakeReply { frame }),
        (any::<u32>(), any::<u32>())
            .prop_map(|(frame, points)| Message::AddPoints { frame, points }),
        (any::<u32>(), any::<u32>(), 0.0f32..1.0f32, any::<bool>()).prop_map(
            |(frame, latency_ms, progress, respawn)| Message::PlayerConfig {
                frame,
                latency_ms,
                progress,
                respawn,
            }
        ),
    ]
}

fn round_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        any::<u32>().prop_map(|frame| Message::Respawn { frame }),
        any::<u32>().prop_map(|frame| Message::ReadyUp { frame }),
        any::<u32>().prop_map(|frame| Message::StartSession { frame }),
        any::<u32>().prop_map(|frame| Message::RoundTimeout { frame }),
        any::<u32>().prop_map(|frame| Message::FeedbackStart { frame }),
        any::<u32>().prop_map(|frame| Message::FeedbackSubmitted { frame }),
        any::<u32>().prop_map(|frame| Message::ResetRound { frame }),
        any::<u32>().prop_map(|frame| Message::SessionEnd { frame }),
    ]
}

fn message() -> impl Strategy<Value = Message> {
    prop_oneof![state_message(), link_message(), round_message()]
}

proptest! {
    #[test]
    fn test_roundtrip_preserves_message(message in message()) {
        let bytes = encode(&message).unwrap();
        prop_assert_eq!(bytes[0], message.kind().tag());
        prop_assert_eq!(&bytes[1..HEADER_LEN], &message.frame().to_be_bytes()[..]);
        prop_assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_decode_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        if let Ok(decoded) = decode(&bytes) {
            prop_assert_eq!(encode(&decoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_decoded_bytes_reencode_exactly(
        message in message(),
        index in any::<prop::sample::Index>(),
        byte in any::<u8>(),
    ) {
        let mut bytes = encode(&message).unwrap();
        let at = index.index(bytes.len());
        bytes[at] = byte;

        if let Ok(decoded) = decode(&bytes) {
            prop_assert_eq!(encode(&decoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_truncated_message_is_rejected(message in message(), cut in 1usize..64) {
        let bytes = encode(&message).unwrap();
        let keep = bytes.len().saturating_sub(cut);
        prop_assert!(decode(&bytes[..keep]).is_err());
    }

    #[test]
    fn test_unknown_tag_is_rejected(tag in (MessageKind::ALL.len() as u8)..=u8::MAX, frame in any::<u32>()) {
        let mut bytes = vec![tag];
        bytes.extend_from_slice(&frame.to_be_bytes());
        prop_assert!(decode(&bytes).is_err());
    }
}

#[test]
fn test_every_kind_is_covered() {
    let mut runner = proptest::test_runner::TestRunner::deterministic();
    let strategy = message();
    let mut seen = std::collections::HashSet::new();

    for _ in 0..2_000 {
        let value = strategy.new_tree(&mut runner).unwrap().current();
        seen.insert(value.kind());
    }
    for kind in MessageKind::ALL {
        assert!(seen.contains(&kind), "{} never generated", kind);
    }
}

#[test]
fn test_full_batch_roundtrip() {
    let updates: Vec<EntityUpdate> = (0..MAX_BATCH_ENTITIES)
        .map(|i| EntityUpdate {
            id: EntityId::from_bytes([i as u8; 16]),
            transform: Transform::from_translation(Vec3::splat(i as f32)),
        })
        .collect();
    let message = Message::BatchEntityUpdate { frame: 7, updates };

    let bytes = encode(&message).unwrap();
    assert_eq!(bytes.len(), HEADER_LEN + 1 + MAX_BATCH_ENTITIES * 64);
    assert_eq!(decode(&bytes).unwrap(), message);
}
