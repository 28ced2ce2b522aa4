pub mod config;
pub mod error;
pub mod history;
pub mod input_buffer;
pub mod net;
pub mod prediction;
pub mod session;

pub use config::{PortLayout, PredictionMode, SessionParams};
pub use error::{NetError, NetResult};
pub use history::{FrameHistory, HistorySlot};
pub use input_buffer::InputFrameBuffer;
pub use net::{
    Channel, Destination, EntityId, EntityKind, EntityUpdate, IncomingEvent, LatencyTable,
    Message, MessageKind, NetworkStats, ProtocolError, Source, Transform, Transport,
    DEFAULT_PORT, DEFAULT_TICK_RATE,
};
pub use prediction::{PredictionState, Predictor};
pub use session::{
    ClientEvent, ClientSession, ClientState, EntitySink, EntityTable, LinkFlags, PlayerAction,
    PlayerInput, RemoteAction, ServerEvent, ServerSession,
};
