mod endpoint;
mod latency;
mod ping;
mod protocol;
mod reliable;
mod stats;
mod tracking;
mod transport;
mod wire;

pub use endpoint::UnreliableEndpoint;
pub use latency::{Dispatch, INJECTOR_TICK, LatencyInjector, LatencyTable, SocketPair};
pub use ping::{PingClient, PingResponder, PingStatistics, DEFAULT_SMA_WINDOW, decode_ping, encode_ping};
pub use protocol::{decode, encode, sequence_greater_than};
pub use protocol::{
    Channel, EntityId, EntityKind, EntityUpdate, Message, MessageKind, ProtocolError, Transform,
    DEFAULT_PING_PORT, DEFAULT_PORT, DEFAULT_TICK_RATE, HEADER_LEN, MAX_BATCH_ENTITIES,
    MAX_PACKET_SIZE, REGISTRATION_ACCEPTED,
};
pub use reliable::{PeerId, PeerState, ReliableEvent, ReliableHost, DEFAULT_PEER_TIMEOUT};
pub use stats::NetworkStats;
pub use tracking::{ReceiveWindow, RttEstimator, SendWindow};
pub use transport::{Destination, IncomingEvent, Source, Transport};
pub use wire::{WireReader, WireWriter};
