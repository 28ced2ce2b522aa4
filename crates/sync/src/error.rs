use std::io;
use std::net::SocketAddr;

use crate::net::{EntityId, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("stale update for frame {frame} (current frame {current})")]
    StaleUpdate { frame: u32, current: u32 },
    #[error("client {0} registered twice")]
    DuplicateRegistration(EntityId),
    #[error("update for unknown entity {0}")]
    UnaffiliatedUpdate(EntityId),
    #[error("update for {id} sent from {from}, which is not its registered address")]
    ForeignUpdate { id: EntityId, from: SocketAddr },
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
}

pub type NetResult<T> = Result<T, NetError>;
