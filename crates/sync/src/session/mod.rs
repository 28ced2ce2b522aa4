mod client;
mod events;
mod registry;
mod server;

pub use client::{ClientSession, ClientState, LinkFlags, ServerAddrs};
pub use events::{
    ClientEvent, EntitySink, EntityTable, PlayerAction, PlayerInput, RemoteAction, ServerEvent,
    TrackedEntity,
};
pub use registry::{ClientRegistry, ConnectedClient, Registration, SlotId, FULL_HEALTH};
pub use server::{ServerSession, ALTERNATE_SPAWN, ALTERNATE_SPAWN_HEADING};
