use std::fmt;

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use super::wire::{WireReader, WireWriter};

/// Upper bound for a single datagram: header plus a full batch of 255 entity
/// updates.
pub const MAX_PACKET_SIZE: usize = 16_384;
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_PING_PORT: u16 = 12355;
pub const DEFAULT_TICK_RATE: u32 = 60;
pub const MAX_BATCH_ENTITIES: usize = u8::MAX as usize;

pub const ENTITY_ID_LEN: usize = 16;
pub const TRANSFORM_LEN: usize = 48;
pub const HEADER_LEN: usize = 5;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("truncated message: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("batch count {count} does not fit {remaining} remaining bytes")]
    BadCount { count: usize, remaining: usize },
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("batch of {0} entities exceeds the limit of 255")]
    TooManyEntities(usize),
    #[error("flag byte {0} is neither 0 nor 1")]
    InvalidFlag(u8),
    #[error("empty datagram")]
    Empty,
    #[error("{kind} is not allowed on the {channel} channel")]
    WrongChannel { kind: MessageKind, channel: Channel },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Reliable,
    Unreliable,
}

impl Channel {
    pub fn is_reliable(self) -> bool {
        matches!(self, Channel::Reliable)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Reliable => f.write_str("reliable"),
            Channel::Unreliable => f.write_str("unreliable"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EntityId([u8; ENTITY_ID_LEN]);

impl EntityId {
    pub const NIL: EntityId = EntityId([0; ENTITY_ID_LEN]);

    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn from_bytes(bytes: [u8; ENTITY_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ENTITY_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self)
    }
}

/// Rotation and translation of an entity. Rotation stays a raw 3x3 matrix so
/// that extrapolated headings can be combined additively.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub rotation: Mat3,
    pub translation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        rotation: Mat3::IDENTITY,
        translation: Vec3::ZERO,
    };

    pub fn new(rotation: Mat3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            rotation: Mat3::IDENTITY,
            translation,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.rotation.is_finite() && self.translation.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Player,
    Target,
    Other(u8),
}

impl From<u8> for EntityKind {
    fn from(value: u8) -> Self {
        match value {
            0 => EntityKind::Player,
            1 => EntityKind::Target,
            other => EntityKind::Other(other),
        }
    }
}

impl From<EntityKind> for u8 {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Player => 0,
            EntityKind::Target => 1,
            EntityKind::Other(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub id: EntityId,
    pub transform: Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    BatchEntityUpdate = 0,
    CreateEntity = 1,
    DestroyEntity = 2,
    MoveClient = 3,
    RegisterClient = 4,
    RegistrationReply = 5,
    Handshake = 6,
    HandshakeReply = 7,
    ReportHit = 8,
    SetSpawn = 9,
    Respawn = 10,
    ReadyUp = 11,
    StartSession = 12,
    PlayerInteract = 13,
    RoundTimeout = 14,
    FeedbackStart = 15,
    FeedbackSubmitted = 16,
    ResetRound = 17,
    SessionEnd = 18,
    AddPoints = 19,
    PlayerConfig = 20,
}

impl MessageKind {
    pub const ALL: [MessageKind; 21] = [
        MessageKind::BatchEntityUpdate,
        MessageKind::CreateEntity,
        MessageKind::DestroyEntity,
        MessageKind::MoveClient,
        MessageKind::RegisterClient,
        MessageKind::RegistrationReply,
        MessageKind::Handshake,
        MessageKind::HandshakeReply,
        MessageKind::ReportHit,
        MessageKind::SetSpawn,
        MessageKind::Respawn,
        MessageKind::ReadyUp,
        MessageKind::StartSession,
        MessageKind::PlayerInteract,
        MessageKind::RoundTimeout,
        MessageKind::FeedbackStart,
        MessageKind::FeedbackSubmitted,
        MessageKind::ResetRound,
        MessageKind::SessionEnd,
        MessageKind::AddPoints,
        MessageKind::PlayerConfig,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// The only channel a message of this kind may travel on.
    pub fn channel(self) -> Channel {
        match self {
            MessageKind::BatchEntityUpdate
            | MessageKind::Handshake
            | MessageKind::HandshakeReply
            | MessageKind::PlayerInteract => Channel::Unreliable,
            _ => Channel::Reliable,
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        MessageKind::ALL
            .get(tag as usize)
            .copied()
            .ok_or(ProtocolError::UnknownType(tag))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    BatchEntityUpdate {
        frame: u32,
        updates: Vec<EntityUpdate>,
    },
    CreateEntity {
        frame: u32,
        id: EntityId,
        kind: EntityKind,
    },
    DestroyEntity {
        frame: u32,
        id: EntityId,
    },
    MoveClient {
        frame: u32,
        transform: Transform,
    },
    RegisterClient {
        frame: u32,
        id: EntityId,
        port: u16,
    },
    RegistrationReply {
        frame: u32,
        id: EntityId,
        status: u8,
    },
    Handshake {
        frame: u32,
    },
    HandshakeReply {
        frame: u32,
    },
    ReportHit {
        frame: u32,
        shot: EntityId,
        shooter: EntityId,
    },
    SetSpawn {
        frame: u32,
        position: Vec3,
        heading: f32,
    },
    Respawn {
        frame: u32,
    },
    ReadyUp {
        frame: u32,
    },
    StartSession {
        frame: u32,
    },
    PlayerInteract {
        frame: u32,
        action: u8,
        actor: EntityId,
    },
    RoundTimeout {
        frame: u32,
    },
    FeedbackStart {
        frame: u32,
    },
    FeedbackSubmitted {
        frame: u32,
    },
    ResetRound {
        frame: u32,
    },
    SessionEnd {
        frame: u32,
    },
    AddPoints {
        frame: u32,
        points: u32,
    },
    PlayerConfig {
        frame: u32,
        latency_ms: u32,
        progress: f32,
        respawn: bool,
    },
}

pub const REGISTRATION_ACCEPTED: u8 = 0;

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::BatchEntityUpdate { .. } => MessageKind::BatchEntityUpdate,
            Message::CreateEntity { .. } => MessageKind::CreateEntity,
            Message::DestroyEntity { .. } => MessageKind::DestroyEntity,
            Message::MoveClient { .. } => MessageKind::MoveClient,
            Message::RegisterClient { .. } => MessageKind::RegisterClient,
            Message::RegistrationReply { .. } => MessageKind::RegistrationReply,
            Message::Handshake { .. } => MessageKind::Handshake,
            Message::HandshakeReply { .. } => MessageKind::HandshakeReply,
            Message::ReportHit { .. } => MessageKind::ReportHit,
            Message::SetSpawn { .. } => MessageKind::SetSpawn,
            Message::Respawn { .. } => MessageKind::Respawn,
            Message::ReadyUp { .. } => MessageKind::ReadyUp,
            Message::StartSession { .. } => MessageKind::StartSession,
            Message::PlayerInteract { .. } => MessageKind::PlayerInteract,
            Message::RoundTimeout { .. } => MessageKind::RoundTimeout,
            Message::FeedbackStart { .. } => MessageKind::FeedbackStart,
            Message::FeedbackSubmitted { .. } => MessageKind::FeedbackSubmitted,
            Message::ResetRound { .. } => MessageKind::ResetRound,
            Message::SessionEnd { .. } => MessageKind::SessionEnd,
            Message::AddPoints { .. } => MessageKind::AddPoints,
            Message::PlayerConfig { .. } => MessageKind::PlayerConfig,
        }
    }

    pub fn frame(&self) -> u32 {
        match *self {
            Message::BatchEntityUpdate { frame, .. }
            | Message::CreateEntity { frame, .. }
            | Message::DestroyEntity { frame, .. }
            | Message::MoveClient { frame, .. }
            | Message::RegisterClient { frame, .. }
            | Message::RegistrationReply { frame, .. }
            | Message::Handshake { frame }
            | Message::HandshakeReply { frame }
            | Message::ReportHit { frame, .. }
            | Message::SetSpawn { frame, .. }
            | Message::Respawn { frame }
            | Message::ReadyUp { frame }
            | Message::StartSession { frame }
            | Message::PlayerInteract { frame, .. }
            | Message::RoundTimeout { frame }
            | Message::FeedbackStart { frame }
            | Message::FeedbackSubmitted { frame }
            | Message::ResetRound { frame }
            | Message::SessionEnd { frame }
            | Message::AddPoints { frame, .. }
            | Message::PlayerConfig { frame, .. } => frame,
        }
    }

    pub fn channel(&self) -> Channel {
        self.kind().channel()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        decode(data)
    }
}

pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut out = WireWriter::with_capacity(HEADER_LEN + 2 * ENTITY_ID_LEN);
    out.put_u8(message.kind().tag());
    out.put_u32(message.frame());

    match message {
        Message::BatchEntityUpdate { updates, .. } => {
            if updates.len() > MAX_BATCH_ENTITIES {
                return Err(ProtocolError::TooManyEntities(updates.len()));
            }
            out.put_u8(updates.len() as u8);
            for update in updates {
                out.put_id(&update.id);
                out.put_transform(&update.transform);
            }
        }
        Message::CreateEntity { id, kind, .. } => {
            out.put_id(id);
            out.put_u8((*kind).into());
        }
        Message::DestroyEntity { id, .. } => out.put_id(id),
        Message::MoveClient { transform, .. } => out.put_transform(transform),
        Message::RegisterClient { id, port, .. } => {
            out.put_id(id);
            out.put_u16(*port);
        }
        Message::RegistrationReply { id, status, .. } => {
            out.put_id(id);
            out.put_u8(*status);
        }
        Message::ReportHit { shot, shooter, .. } => {
            out.put_id(shot);
            out.put_id(shooter);
        }
        Message::SetSpawn {
            position, heading, ..
        } => {
            out.put_vec3(*position);
            out.put_f32(*heading);
        }
        Message::PlayerInteract { action, actor, .. } => {
            out.put_u8(*action);
            out.put_id(actor);
        }
        Message::AddPoints { points, .. } => out.put_u32(*points),
        Message::PlayerConfig {
            latency_ms,
            progress,
            respawn,
            ..
        } => {
            out.put_u32(*latency_ms);
            out.put_f32(*progress);
            out.put_u8(u8::from(*respawn));
        }
        Message::Handshake { .. }
        | Message::HandshakeReply { .. }
        | Message::Respawn { .. }
        | Message::ReadyUp { .. }
        | Message::StartSession { .. }
        | Message::RoundTimeout { .. }
        | Message::FeedbackStart { .. }
        | Message::FeedbackSubmitted { .. }
        | Message::ResetRound { .. }
        | Message::SessionEnd { .. } => {}
    }

    Ok(out.into_bytes())
}

pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    let mut input = WireReader::new(data);
    if input.is_exhausted() {
        return Err(ProtocolError::Empty);
    }

    let kind = MessageKind::try_from(input.u8()?)?;
    let frame = input.u32()?;

    let message = match kind {
        MessageKind::BatchEntityUpdate => {
            let count = input.u8()? as usize;
            let needed = count * (ENTITY_ID_LEN + TRANSFORM_LEN);
            if needed != input.remaining() {
                return Err(ProtocolError::BadCount {
                    count,
                    remaining: input.remaining(),
                });
            }
            let mut updates = Vec::with_capacity(count);
            for _ in 0..count {
                let id = input.id()?;
                let transform = input.transform()?;
                updates.push(EntityUpdate { id, transform });
            }
            Message::BatchEntityUpdate { frame, updates }
        }
        MessageKind::CreateEntity => Message::CreateEntity {
            frame,
            id: input.id()?,
            kind: EntityKind::from(input.u8()?),
        },
        MessageKind::DestroyEntity => Message::DestroyEntity {
            frame,
            id: input.id()?,
        },
        MessageKind::MoveClient => Message::MoveClient {
            frame,
            transform: input.transform()?,
        },
        MessageKind::RegisterClient => Message::RegisterClient {
            frame,
            id: input.id()?,
            port: input.u16()?,
        },
        MessageKind::RegistrationReply => Message::RegistrationReply {
            frame,
            id: input.id()?,
            status: input.u8()?,
        },
        MessageKind::Handshake => Message::Handshake { frame },
        MessageKind::HandshakeReply => Message::HandshakeReply { frame },
        MessageKind::ReportHit => Message::ReportHit {
            frame,
            shot: input.id()?,
            shooter: input.id()?,
        },
        MessageKind::SetSpawn => Message::SetSpawn {
            frame,
            position: input.vec3()?,
            heading: input.f32()?,
        },
        MessageKind::Respawn => Message::Respawn { frame },
        MessageKind::ReadyUp => Message::ReadyUp { frame },
        MessageKind::StartSession => Message::StartSession { frame },
        MessageKind::PlayerInteract => Message::PlayerInteract {
            frame,
            action: input.u8()?,
            actor: input.id()?,
        },
        MessageKind::RoundTimeout => Message::RoundTimeout { frame },
        MessageKind::FeedbackStart => Message::FeedbackStart { frame },
        MessageKind::FeedbackSubmitted => Message::FeedbackSubmitted { frame },
        MessageKind::ResetRound => Message::ResetRound { frame },
        MessageKind::SessionEnd => Message::SessionEnd { frame },
        MessageKind::AddPoints => Message::AddPoints {
            frame,
            points: input.u32()?,
        },
        MessageKind::PlayerConfig => Message::PlayerConfig {
            frame,
            latency_ms: input.u32()?,
            progress: input.f32()?,
            respawn: match input.u8()? {
                0 => false,
                1 => true,
                other => return Err(ProtocolError::InvalidFlag(other)),
            },
        },
    };

    if !input.is_exhausted() {
        return Err(ProtocolError::TrailingBytes(input.remaining()));
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id(seed: u8) -> EntityId {
        EntityId::from_bytes([seed; ENTITY_ID_LEN])
    }

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(&Message::StartSession { frame: 42 }).unwrap();
        assert_eq!(bytes, vec![12, 0, 0, 0, 42]);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let bytes = [0xEE, 0, 0, 0, 1, 9, 9, 9];
        assert_eq!(decode(&bytes), Err(ProtocolError::UnknownType(0xEE)));
    }

    #[test]
    fn test_empty_datagram() {
        assert_eq!(decode(&[]), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_batch_count_mismatch() {
        let message = Message::BatchEntityUpdate {
            frame: 7,
            updates: vec![EntityUpdate {
                id: sample_id(1),
                transform: Transform::from_translation(Vec3::X),
            }],
        };
        let mut bytes = encode(&message).unwrap();
        bytes[5] = 2;

        match decode(&bytes) {
            Err(ProtocolError::BadCount { count, remaining }) => {
                assert_eq!(count, 2);
                assert_eq!(remaining, ENTITY_ID_LEN + TRANSFORM_LEN);
            }
            other => panic!("expected BadCount, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_too_large() {
        let updates = vec![
            EntityUpdate {
                id: sample_id(3),
                transform: Transform::IDENTITY,
            };
            256
        ];
        let message = Message::BatchEntityUpdate { frame: 0, updates };
        assert_eq!(encode(&message), Err(ProtocolError::TooManyEntities(256)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&Message::ReadyUp { frame: 3 }).unwrap();
        bytes.push(0);
        assert_eq!(decode(&bytes), Err(ProtocolError::TrailingBytes(1)));
    }

    #[test]
    fn test_respawn_flag_must_be_boolean() {
        let mut bytes = vec![MessageKind::PlayerConfig.tag(), 0, 0, 0, 1];
        bytes.extend_from_slice(&5u32.to_be_bytes());
        bytes.extend_from_slice(&0.5f32.to_be_bytes());
        bytes.push(2);
        assert_eq!(decode(&bytes), Err(ProtocolError::InvalidFlag(2)));

        *bytes.last_mut().unwrap() = 1;
        let decoded = decode(&bytes).unwrap();
        assert_eq!(encode(&decoded).unwrap(), bytes);
    }

    #[test]
    fn test_nan_transform_is_encoded() {
        let transform = Transform::from_translation(Vec3::new(f32::NAN, 0.0, 0.0));
        let message = Message::MoveClient {
            frame: 1,
            transform,
        };
        let decoded = decode(&encode(&message).unwrap()).unwrap();
        match decoded {
            Message::MoveClient { transform, .. } => {
                assert!(transform.translation.x.is_nan());
                assert!(!transform.is_finite());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_channel_assignment() {
        assert_eq!(MessageKind::Handshake.channel(), Channel::Unreliable);
        assert_eq!(MessageKind::BatchEntityUpdate.channel(), Channel::Unreliable);
        assert_eq!(MessageKind::RegisterClient.channel(), Channel::Reliable);
        assert_eq!(MessageKind::ReportHit.channel(), Channel::Reliable);
    }

    #[test]
    fn test_tags_match_table() {
        for (index, kind) in MessageKind::ALL.iter().enumerate() {
            assert_eq!(kind.tag() as usize, index);
            assert_eq!(MessageKind::try_from(kind.tag()), Ok(*kind));
        }
    }

    #[test]
    fn test_entity_kind_roundtrip() {
        for raw in [0u8, 1, 2, 200] {
            assert_eq!(u8::from(EntityKind::from(raw)), raw);
        }
    }
}
