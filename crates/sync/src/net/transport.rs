use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crate::error::NetError;

use super::endpoint::UnreliableEndpoint;
use super::latency::{Dispatch, LatencyInjector, LatencyTable, SocketPair};
use super::protocol::{Channel, Message, ProtocolError};
use super::reliable::{PeerId, ReliableEvent, ReliableHost};
use super::stats::NetworkStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Reliable(PeerId),
    Unreliable(SocketAddr),
}

impl Destination {
    pub fn channel(&self) -> Channel {
        match self {
            Destination::Reliable(_) => Channel::Reliable,
            Destination::Unreliable(_) => Channel::Unreliable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Reliable { peer: PeerId, addr: SocketAddr },
    Unreliable { addr: SocketAddr },
}

impl Source {
    pub fn channel(&self) -> Channel {
        match self {
            Source::Reliable { .. } => Channel::Reliable,
            Source::Unreliable { .. } => Channel::Unreliable,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        match *self {
            Source::Reliable { addr, .. } | Source::Unreliable { addr } => addr,
        }
    }

    pub fn peer(&self) -> Option<PeerId> {
        match *self {
            Source::Reliable { peer, .. } => Some(peer),
            Source::Unreliable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncomingEvent {
    Connected { peer: PeerId, addr: SocketAddr },
    Disconnected { peer: PeerId, addr: SocketAddr },
    Received { from: Source, message: Message },
}

/// Both channels plus the latency injector that every outbound datagram goes
/// through.
pub struct Transport {
    unreliable: UnreliableEndpoint,
    reliable: ReliableHost,
    injector: LatencyInjector,
    pending: VecDeque<IncomingEvent>,
    stats: NetworkStats,
}

impl Transport {
    pub fn bind(
        reliable_addr: SocketAddr,
        unreliable_addr: SocketAddr,
        accept_incoming: bool,
        latency: LatencyTable,
    ) -> io::Result<Self> {
        let reliable = ReliableHost::bind(reliable_addr, accept_incoming)?;
        let unreliable = UnreliableEndpoint::bind(unreliable_addr)?;

        let sockets = SocketPair::new(reliable.try_clone_socket()?, unreliable.try_clone_socket()?);
        let injector = LatencyInjector::spawn(sockets, latency)?;

        log::debug!(
            "transport bound: reliable {}, unreliable {}",
            reliable.local_addr(),
            unreliable.local_addr()
        );

        Ok(Self {
            unreliable,
            reliable,
            injector,
            pending: VecDeque::new(),
            stats: NetworkStats::default(),
        })
    }

    /// Server side: reliable on `base`, unreliable on `base + 1`.
    pub fn listen(ip: IpAddr, base_port: u16, latency: LatencyTable) -> io::Result<Self> {
        Self::bind(
            SocketAddr::new(ip, base_port),
            SocketAddr::new(ip, base_port.wrapping_add(1)),
            true,
            latency,
        )
    }

    /// Client side: an ephemeral reliable port and the given unreliable
    /// listening port (0 for ephemeral).
    pub fn client(ip: IpAddr, unreliable_port: u16, latency: LatencyTable) -> io::Result<Self> {
        Self::bind(
            SocketAddr::new(ip, 0),
            SocketAddr::new(ip, unreliable_port),
            false,
            latency,
        )
    }

    pub fn reliable_addr(&self) -> SocketAddr {
        self.reliable.local_addr()
    }

    pub fn unreliable_addr(&self) -> SocketAddr {
        self.unreliable.local_addr()
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.reliable.peer_addr(peer)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.reliable.connected_peers()
    }

    pub fn latency(&self) -> &LatencyTable {
        self.injector.table()
    }

    pub fn latency_mut(&mut self) -> &mut LatencyTable {
        self.injector.table_mut()
    }

    pub fn set_peer_timeout(&mut self, timeout: Duration) {
        self.reliable.set_peer_timeout(timeout);
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = self.stats.clone();
        stats.retransmissions = self.reliable.retransmissions();
        stats.protocol_violations += self.reliable.rejected_frames();
        if let Some((rtt, variance)) = self.reliable.mean_rtt_ms() {
            stats.rtt_ms = rtt;
            stats.rtt_variance = variance;
        }
        stats
    }

    pub fn connect(&mut self, addr: SocketAddr) -> PeerId {
        let peer = self.reliable.connect(addr);
        self.flush_reliable();
        peer
    }

    pub fn disconnect(&mut self, peer: PeerId) {
        self.reliable.disconnect(peer);
        self.flush_reliable();
    }

    pub fn send(&mut self, message: &Message, destination: Destination) -> Result<(), NetError> {
        if message.channel() != destination.channel() {
            return Err(ProtocolError::WrongChannel {
                kind: message.kind(),
                channel: destination.channel(),
            }
            .into());
        }

        let bytes = message.encode()?;
        log::trace!("send {:?} frame {} to {:?}", message.kind(), message.frame(), destination);

        match destination {
            Destination::Unreliable(addr) => {
                self.dispatch(bytes, addr, Channel::Unreliable)?;
            }
            Destination::Reliable(peer) => {
                self.reliable.send(peer, &bytes)?;
                self.flush_reliable();
            }
        }

        Ok(())
    }

    pub fn broadcast_reliable(&mut self, message: &Message) -> Result<(), NetError> {
        for peer in self.reliable.connected_peers() {
            self.send(message, Destination::Reliable(peer))?;
        }
        Ok(())
    }

    pub fn broadcast_unreliable(
        &mut self,
        message: &Message,
        destinations: &[SocketAddr],
    ) -> Result<(), NetError> {
        for &addr in destinations {
            if let Err(e) = self.send(message, Destination::Unreliable(addr)) {
                match e {
                    NetError::Transport(e) => log::debug!("unreliable send to {} failed: {}", addr, e),
                    other => return Err(other),
                }
            }
        }
        Ok(())
    }

    /// Next inbound event, or `None` once both channels are drained.
    pub fn poll(&mut self) -> Option<IncomingEvent> {
        if self.pending.is_empty() {
            self.pump();
        }
        self.pending.pop_front()
    }

    /// Retransmissions, keepalives and connect retries without reading.
    pub fn service(&mut self) {
        self.reliable.service(Instant::now());
        self.flush_reliable();
    }

    pub fn shutdown(&mut self) {
        for peer in self.reliable.connected_peers() {
            self.reliable.disconnect(peer);
        }
        // Goodbyes skip the injector so they are not lost with its queue.
        for (addr, datagram) in self.reliable.drain_outbox().collect::<Vec<_>>() {
            let _ = self
                .injector
                .enqueue_with_delay(datagram, addr, Channel::Reliable, Duration::ZERO);
        }
        self.injector.shutdown();
    }

    fn pump(&mut self) {
        match self.unreliable.receive() {
            Ok(datagrams) => {
                for (bytes, addr) in datagrams {
                    self.stats.record_received(bytes.len());
                    self.accept(&bytes, Source::Unreliable { addr });
                }
            }
            Err(e) => log::warn!("unreliable receive failed: {}", e),
        }

        if let Err(e) = self.reliable.receive() {
            log::warn!("reliable receive failed: {}", e);
        }
        self.reliable.service(Instant::now());
        self.flush_reliable();

        while let Some(event) = self.reliable.poll_event() {
            match event {
                ReliableEvent::Connected { peer, addr } => {
                    log::debug!("{} connected from {}", peer, addr);
                    self.pending
                        .push_back(IncomingEvent::Connected { peer, addr });
                }
                ReliableEvent::Disconnected { peer, addr } => {
                    log::debug!("{} at {} disconnected", peer, addr);
                    self.pending
                        .push_back(IncomingEvent::Disconnected { peer, addr });
                }
                ReliableEvent::Received {
                    peer,
                    addr,
                    payload,
                } => {
                    self.stats.record_received(payload.len());
                    self.accept(&payload, Source::Reliable { peer, addr });
                }
            }
        }
    }

    fn accept(&mut self, bytes: &[u8], from: Source) {
        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                self.stats.protocol_violations += 1;
                log::warn!("dropping malformed datagram from {}: {}", from.addr(), e);
                return;
            }
        };

        if message.channel() != from.channel() {
            self.stats.protocol_violations += 1;
            log::warn!(
                "protocol violation: {:?} from {} arrived on the {} channel",
                message.kind(),
                from.addr(),
                from.channel()
            );
            return;
        }

        self.pending
            .push_back(IncomingEvent::Received { from, message });
    }

    fn flush_reliable(&mut self) {
        let outgoing: Vec<(SocketAddr, Vec<u8>)> = self.reliable.drain_outbox().collect();
        for (addr, datagram) in outgoing {
            if let Err(e) = self.dispatch(datagram, addr, Channel::Reliable) {
                log::debug!("reliable datagram to {} failed: {}", addr, e);
            }
        }
    }

    fn dispatch(&mut self, bytes: Vec<u8>, addr: SocketAddr, channel: Channel) -> io::Result<()> {
        let len = bytes.len();
        match self.injector.enqueue(bytes, addr, channel)? {
            Dispatch::Sent(_) => {}
            Dispatch::Queued(_) => self.stats.packets_delayed += 1,
        }
        self.stats.record_sent(len);
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.injector.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn drain(transport: &mut Transport) -> Vec<IncomingEvent> {
        std::iter::from_fn(|| transport.poll()).collect()
    }

    fn wait_for<F>(transport: &mut Transport, timeout_ms: u64, mut predicate: F) -> Option<IncomingEvent>
    where
        F: FnMut(&IncomingEvent) -> bool,
    {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            while let Some(event) = transport.poll() {
                if predicate(&event) {
                    return Some(event);
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_send_rejects_wrong_channel() {
        let mut transport = Transport::client(LOCALHOST, 0, LatencyTable::default()).unwrap();
        let result = transport.send(
            &Message::ReadyUp { frame: 1 },
            Destination::Unreliable("127.0.0.1:9".parse().unwrap()),
        );
        assert!(matches!(
            result,
            Err(NetError::Protocol(ProtocolError::WrongChannel { .. }))
        ));
    }

    #[test]
    fn test_unreliable_roundtrip() {
        let mut a = Transport::client(LOCALHOST, 0, LatencyTable::default()).unwrap();
        let mut b = Transport::client(LOCALHOST, 0, LatencyTable::default()).unwrap();

        a.send(&Message::Handshake { frame: 3 }, Destination::Unreliable(b.unreliable_addr()))
            .unwrap();

        let event = wait_for(&mut b, 500, |e| matches!(e, IncomingEvent::Received { .. }))
            .expect("no datagram");
        match event {
            IncomingEvent::Received { from, message } => {
                assert_eq!(message, Message::Handshake { frame: 3 });
                assert_eq!(from, Source::Unreliable { addr: a.unreliable_addr() });
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reliable_tag_on_unreliable_channel_is_dropped() {
        let mut b = Transport::client(LOCALHOST, 0, LatencyTable::default()).unwrap();
        let raw = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();

        let bytes = Message::RegisterClient {
            frame: 0,
            id: crate::net::EntityId::random(),
            port: 1,
        }
        .encode()
        .unwrap();
        raw.send_to(&bytes, b.unreliable_addr()).unwrap();
        raw.send_to(&[0xFF, 0, 0, 0, 0], b.unreliable_addr()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(drain(&mut b).is_empty());
        assert_eq!(b.stats().protocol_violations, 2);
    }

    #[test]
    fn test_reliable_connect_and_message() {
        let mut server = Transport::bind(
            SocketAddr::new(LOCALHOST, 0),
            SocketAddr::new(LOCALHOST, 0),
            true,
            LatencyTable::default(),
        )
        .unwrap();
        let mut client = Transport::client(LOCALHOST, 0, LatencyTable::default()).unwrap();

        let peer = client.connect(server.reliable_addr());
        wait_for(&mut server, 500, |e| matches!(e, IncomingEvent::Connected { .. }))
            .expect("server never saw the connection");
        wait_for(&mut client, 500, |e| matches!(e, IncomingEvent::Connected { .. }))
            .expect("client never saw the accept");

        client
            .send(&Message::ReadyUp { frame: 9 }, Destination::Reliable(peer))
            .unwrap();

        let event = wait_for(&mut server, 500, |e| matches!(e, IncomingEvent::Received { .. }))
            .expect("no reliable message");
        match event {
            IncomingEvent::Received { from, message } => {
                assert_eq!(message, Message::ReadyUp { frame: 9 });
                assert_eq!(from.channel(), Channel::Reliable);
                assert_eq!(from.addr(), client.reliable_addr());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_delayed_send_counts() {
        let mut a = Transport::client(LOCALHOST, 0, LatencyTable::new(20)).unwrap();
        let mut b = Transport::client(LOCALHOST, 0, LatencyTable::default()).unwrap();

        a.send(&Message::Handshake { frame: 1 }, Destination::Unreliable(b.unreliable_addr()))
            .unwrap();
        assert_eq!(a.stats().packets_delayed, 1);

        assert!(wait_for(&mut b, 500, |_| true).is_some());
    }
}
