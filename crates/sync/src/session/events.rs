use std::collections::HashMap;
use std::net::SocketAddr;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::net::{EntityId, EntityKind, PeerId, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerAction {
    None,
    Aim,
    Miss,
    Hit,
    Destroy,
    Other(u8),
}

impl From<u8> for PlayerAction {
    fn from(value: u8) -> Self {
        match value {
            0 => PlayerAction::None,
            1 => PlayerAction::Aim,
            2 => PlayerAction::Miss,
            3 => PlayerAction::Hit,
            4 => PlayerAction::Destroy,
            other => PlayerAction::Other(other),
        }
    }
}

impl From<PlayerAction> for u8 {
    fn from(action: PlayerAction) -> Self {
        match action {
            PlayerAction::None => 0,
            PlayerAction::Aim => 1,
            PlayerAction::Miss => 2,
            PlayerAction::Hit => 3,
            PlayerAction::Destroy => 4,
            PlayerAction::Other(value) => value,
        }
    }
}

/// An action performed by another participant, as handed to the results
/// logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAction {
    /// Frame stamped by the sender.
    pub frame: u32,
    /// Local frame when the action was received.
    pub local_frame: u32,
    pub action: PlayerAction,
    pub actor: EntityId,
    pub affected: Option<EntityId>,
    pub position: Option<Vec3>,
}

/// One participant's input for a frame, collected so a simulation step can
/// wait until every client has reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub action: PlayerAction,
    pub affected: Option<EntityId>,
}

/// Receives entity side effects from the session layer.
pub trait EntitySink {
    fn apply_transform(&mut self, id: EntityId, transform: Transform);
    fn create_entity(&mut self, id: EntityId, kind: EntityKind);
    fn destroy_entity(&mut self, id: EntityId);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedEntity {
    pub kind: EntityKind,
    pub transform: Transform,
    pub updates: u64,
}

/// In-memory entity table for headless participants.
#[derive(Debug, Default)]
pub struct EntityTable {
    entities: HashMap<EntityId, TrackedEntity>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &EntityId) -> Option<&TrackedEntity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &TrackedEntity)> {
        self.entities.iter()
    }
}

impl EntitySink for EntityTable {
    fn apply_transform(&mut self, id: EntityId, transform: Transform) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.transform = transform;
            entity.updates += 1;
        }
    }

    fn create_entity(&mut self, id: EntityId, kind: EntityKind) {
        self.entities.entry(id).or_insert(TrackedEntity {
            kind,
            transform: Transform::IDENTITY,
            updates: 0,
        });
    }

    fn destroy_entity(&mut self, id: EntityId) {
        self.entities.remove(&id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PeerConnected {
        peer: PeerId,
        addr: SocketAddr,
    },
    ClientRegistered {
        id: EntityId,
        unreliable_addr: SocketAddr,
        replaced: bool,
    },
    ClientRemoved {
        id: EntityId,
        kicked: bool,
    },
    ClientReady {
        id: EntityId,
        ready: usize,
        expected: usize,
    },
    SessionStarted {
        frame: u32,
    },
    PlayerHit {
        shooter: EntityId,
        target: EntityId,
        health: f32,
        killed: bool,
    },
    RoundCompleted {
        rounds_played: u32,
        progress: f32,
    },
    FeedbackReceived {
        id: EntityId,
        submitted: usize,
    },
    RoundReset,
    SessionEnded {
        rounds_played: u32,
    },
    Remote(RemoteAction),
    InputsComplete {
        frame: u32,
        inputs: usize,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged {
        from: super::ClientState,
        to: super::ClientState,
    },
    Registered {
        id: EntityId,
    },
    RegistrationRefused {
        status: u8,
    },
    SessionStarted {
        frame: u32,
    },
    EntityCreated {
        id: EntityId,
        kind: EntityKind,
    },
    EntityDestroyed {
        id: EntityId,
    },
    MoveTo {
        transform: Transform,
    },
    SpawnChanged {
        position: Vec3,
        heading: f32,
    },
    Respawn,
    PointsAwarded {
        points: u32,
        total: u32,
    },
    ConfigReceived {
        latency_ms: u32,
        progress: f32,
        respawn: bool,
    },
    Remote(RemoteAction),
    Disconnected,
}
