use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use super::protocol::MAX_PACKET_SIZE;
use super::tracking::{ReceiveWindow, RttEstimator, SendWindow};
use super::wire::{WireReader, WireWriter};

const FRAME_CONNECT: u8 = 1;
const FRAME_ACCEPT: u8 = 2;
const FRAME_DATA: u8 = 3;
const FRAME_ACK: u8 = 4;
const FRAME_DISCONNECT: u8 = 5;
const FRAME_KEEPALIVE: u8 = 6;

const CONNECT_RETRY: Duration = Duration::from_millis(250);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u32);

impl PeerId {
    pub fn raw(self) -> u32 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReliableEvent {
    Connected { peer: PeerId, addr: SocketAddr },
    Disconnected { peer: PeerId, addr: SocketAddr },
    Received { peer: PeerId, addr: SocketAddr, payload: Vec<u8> },
}

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    state: PeerState,
    token: u32,
    send_sequence: u32,
    send_window: SendWindow,
    receive_window: ReceiveWindow,
    rtt: RttEstimator,
    last_heard: Instant,
    last_sent: Instant,
}

impl Peer {
    fn new(addr: SocketAddr, state: PeerState, token: u32, now: Instant) -> Self {
        Self {
            addr,
            state,
            token,
            send_sequence: 0,
            send_window: SendWindow::new(),
            receive_window: ReceiveWindow::new(),
            rtt: RttEstimator::default(),
            last_heard: now,
            last_sent: now,
        }
    }
}

/// Connection-oriented, ordered, retransmitting channel on top of a
/// non-blocking UDP socket.
///
/// The host never writes to the socket itself: every outgoing datagram is
/// placed in an outbox and the owner routes it (through the latency injector
/// in practice). Reads happen in `receive`.
#[derive(Debug)]
pub struct ReliableHost {
    socket: UdpSocket,
    local_addr: SocketAddr,
    accept_incoming: bool,
    peers: HashMap<PeerId, Peer>,
    peers_by_addr: HashMap<SocketAddr, PeerId>,
    next_peer_id: u32,
    events: VecDeque<ReliableEvent>,
    outbox: Vec<(SocketAddr, Vec<u8>)>,
    recv_buffer: Box<[u8]>,
    peer_timeout: Duration,
    retransmissions: u64,
    rejected_frames: u64,
}

impl ReliableHost {
    pub fn bind<A: ToSocketAddrs>(addr: A, accept_incoming: bool) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            accept_incoming,
            peers: HashMap::new(),
            peers_by_addr: HashMap::new(),
            next_peer_id: 1,
            events: VecDeque::new(),
            outbox: Vec::new(),
            recv_buffer: vec![0u8; MAX_PACKET_SIZE + 16].into_boxed_slice(),
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            retransmissions: 0,
            rejected_frames: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn try_clone_socket(&self) -> io::Result<UdpSocket> {
        self.socket.try_clone()
    }

    pub fn set_peer_timeout(&mut self, timeout: Duration) {
        self.peer_timeout = timeout;
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    pub fn rejected_frames(&self) -> u64 {
        self.rejected_frames
    }

    pub fn connect(&mut self, addr: SocketAddr) -> PeerId {
        if let Some(&existing) = self.peers_by_addr.get(&addr) {
            return existing;
        }

        let now = Instant::now();
        let token = rand::random::<u32>();
        let peer = self.insert_peer(Peer::new(addr, PeerState::Connecting, token, now));
        log::debug!("connecting to {} as {}", addr, peer);
        self.push_control(addr, FRAME_CONNECT, Some(token));
        peer
    }

    pub fn send(&mut self, peer_id: PeerId, payload: &[u8]) -> io::Result<()> {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("unknown {}", peer_id),
            ));
        };
        if peer.state != PeerState::Connected {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is still connecting", peer_id),
            ));
        }

        let sequence = peer.send_sequence;
        peer.send_sequence = peer.send_sequence.wrapping_add(1);

        let mut frame = WireWriter::with_capacity(payload.len() + 5);
        frame.put_u8(FRAME_DATA);
        frame.put_u32(sequence);
        frame.put_bytes(payload);
        let datagram = frame.into_bytes();

        let now = Instant::now();
        peer.send_window.track(sequence, datagram.clone(), now);
        peer.last_sent = now;
        self.outbox.push((peer.addr, datagram));

        Ok(())
    }

    /// Tells the remote side to drop the connection and forgets the peer
    /// locally. No `Disconnected` event is raised for a local disconnect.
    pub fn disconnect(&mut self, peer_id: PeerId) {
        if let Some(peer) = self.remove_peer(peer_id) {
            self.push_control(peer.addr, FRAME_DISCONNECT, None);
        }
    }

    pub fn peer_addr(&self, peer_id: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer_id).map(|peer| peer.addr)
    }

    pub fn peer_state(&self, peer_id: PeerId) -> Option<PeerState> {
        self.peers.get(&peer_id).map(|peer| peer.state)
    }

    pub fn peer_rtt_ms(&self, peer_id: PeerId) -> Option<f32> {
        self.peers.get(&peer_id).map(|peer| peer.rtt.srtt())
    }

    /// Mean smoothed RTT and RTT variance over connected peers, in ms.
    pub fn mean_rtt_ms(&self) -> Option<(f32, f32)> {
        let connected: Vec<&Peer> = self
            .peers
            .values()
            .filter(|peer| peer.state == PeerState::Connected)
            .collect();
        if connected.is_empty() {
            return None;
        }

        let count = connected.len() as f32;
        let srtt = connected.iter().map(|peer| peer.rtt.srtt()).sum::<f32>() / count;
        let variance = connected.iter().map(|peer| peer.rtt.rtt_var()).sum::<f32>() / count;
        Some((srtt, variance))
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.state == PeerState::Connected)
            .map(|(&id, _)| id)
            .collect();
        peers.sort();
        peers
    }

    pub fn poll_event(&mut self) -> Option<ReliableEvent> {
        self.events.pop_front()
    }

    pub fn drain_outbox(&mut self) -> std::vec::Drain<'_, (SocketAddr, Vec<u8>)> {
        self.outbox.drain(..)
    }

    /// Reads every pending datagram and turns it into events.
    pub fn receive(&mut self) -> io::Result<usize> {
        let mut received = 0;
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    received += 1;
                    let datagram = self.recv_buffer[..size].to_vec();
                    self.handle_datagram(&datagram, addr);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from a vanished peer surfaces here on
                // some platforms.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(received)
    }

    /// Connect retries, retransmissions, keepalives and liveness timeouts.
    pub fn service(&mut self, now: Instant) {
        let mut expired = Vec::new();
        let mut resend = Vec::new();

        for (&id, peer) in &mut self.peers {
            // Connect attempts retry until answered.
            if peer.state == PeerState::Connected
                && now.duration_since(peer.last_heard) > self.peer_timeout
            {
                expired.push(id);
                continue;
            }

            match peer.state {
                PeerState::Connecting => {
                    if now.duration_since(peer.last_sent) >= CONNECT_RETRY {
                        peer.last_sent = now;
                        resend.push((peer.addr, control_frame(FRAME_CONNECT, Some(peer.token))));
                    }
                }
                PeerState::Connected => {
                    let due = peer.send_window.due_for_retransmit(now, peer.rtt.rto());
                    if !due.is_empty() {
                        self.retransmissions += due.len() as u64;
                        peer.last_sent = now;
                        resend.extend(due.into_iter().map(|datagram| (peer.addr, datagram)));
                    } else if now.duration_since(peer.last_sent) >= KEEPALIVE_INTERVAL {
                        peer.last_sent = now;
                        resend.push((peer.addr, control_frame(FRAME_KEEPALIVE, None)));
                    }
                }
            }
        }

        self.outbox.extend(resend);

        for id in expired {
            if let Some(peer) = self.remove_peer(id) {
                log::info!("{} at {} timed out", id, peer.addr);
                if peer.state == PeerState::Connected {
                    self.events.push_back(ReliableEvent::Disconnected {
                        peer: id,
                        addr: peer.addr,
                    });
                }
            }
        }
    }

    fn handle_datagram(&mut self, datagram: &[u8], addr: SocketAddr) {
        let mut input = WireReader::new(datagram);
        let Ok(frame_type) = input.u8() else {
            self.rejected_frames += 1;
            return;
        };

        let now = Instant::now();
        if let Some(peer) = self
            .peers_by_addr
            .get(&addr)
            .and_then(|id| self.peers.get_mut(id))
        {
            peer.last_heard = now;
        }

        match frame_type {
            FRAME_CONNECT => match input.u32() {
                Ok(token) => self.handle_connect(addr, token, now),
                Err(_) => self.rejected_frames += 1,
            },
            FRAME_ACCEPT => match input.u32() {
                Ok(token) => self.handle_accept(addr, token),
                Err(_) => self.rejected_frames += 1,
            },
            FRAME_DATA => match input.u32() {
                Ok(sequence) => {
                    let payload = input.rest().to_vec();
                    self.handle_data(addr, sequence, payload);
                }
                Err(_) => self.rejected_frames += 1,
            },
            FRAME_ACK => match input.u32() {
                Ok(sequence) => self.handle_ack(addr, sequence, now),
                Err(_) => self.rejected_frames += 1,
            },
            FRAME_DISCONNECT => {
                if let Some(&id) = self.peers_by_addr.get(&addr) {
                    if let Some(peer) = self.remove_peer(id) {
                        log::debug!("{} at {} disconnected", id, addr);
                        if peer.state == PeerState::Connected {
                            self.events
                                .push_back(ReliableEvent::Disconnected { peer: id, addr });
                        }
                    }
                }
            }
            FRAME_KEEPALIVE => {}
            other => {
                log::debug!("unknown reliable frame type {} from {}", other, addr);
                self.rejected_frames += 1;
            }
        }
    }

    fn handle_connect(&mut self, addr: SocketAddr, token: u32, now: Instant) {
        if let Some(&existing) = self.peers_by_addr.get(&addr) {
            let same_session = self
                .peers
                .get(&existing)
                .is_some_and(|peer| peer.token == token);
            if same_session {
                // Our ACCEPT was lost; answer again.
                self.push_control(addr, FRAME_ACCEPT, Some(token));
                return;
            }

            if let Some(old) = self.remove_peer(existing) {
                log::info!("{} reconnected from {}, dropping stale session", existing, addr);
                if old.state == PeerState::Connected {
                    self.events.push_back(ReliableEvent::Disconnected {
                        peer: existing,
                        addr,
                    });
                }
            }
        }

        if !self.accept_incoming {
            log::debug!("ignoring connection attempt from {}", addr);
            return;
        }

        let peer = self.insert_peer(Peer::new(addr, PeerState::Connected, token, now));
        self.push_control(addr, FRAME_ACCEPT, Some(token));
        self.events
            .push_back(ReliableEvent::Connected { peer, addr });
    }

    fn handle_accept(&mut self, addr: SocketAddr, token: u32) {
        let Some(&id) = self.peers_by_addr.get(&addr) else {
            return;
        };
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if peer.token != token || peer.state == PeerState::Connected {
            return;
        }

        peer.state = PeerState::Connected;
        self.events
            .push_back(ReliableEvent::Connected { peer: id, addr });
    }

    fn handle_data(&mut self, addr: SocketAddr, sequence: u32, payload: Vec<u8>) {
        let Some(&id) = self.peers_by_addr.get(&addr) else {
            self.rejected_frames += 1;
            return;
        };
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if peer.state != PeerState::Connected {
            self.rejected_frames += 1;
            return;
        }

        let mut ack = WireWriter::with_capacity(5);
        ack.put_u8(FRAME_ACK);
        ack.put_u32(sequence);
        self.outbox.push((addr, ack.into_bytes()));

        let mut ready = Vec::new();
        peer.receive_window.accept(sequence, payload, &mut ready);
        for payload in ready {
            self.events.push_back(ReliableEvent::Received {
                peer: id,
                addr,
                payload,
            });
        }
    }

    fn handle_ack(&mut self, addr: SocketAddr, sequence: u32, now: Instant) {
        let Some(peer) = self
            .peers_by_addr
            .get(&addr)
            .and_then(|id| self.peers.get_mut(id))
        else {
            return;
        };

        if let Some(sample) = peer.send_window.acknowledge(sequence, now) {
            peer.rtt.update(sample);
        }
    }

    fn insert_peer(&mut self, peer: Peer) -> PeerId {
        let id = PeerId(self.next_peer_id);
        self.next_peer_id = self.next_peer_id.wrapping_add(1);
        self.peers_by_addr.insert(peer.addr, id);
        self.peers.insert(id, peer);
        id
    }

    fn remove_peer(&mut self, id: PeerId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        self.peers_by_addr.remove(&peer.addr);
        Some(peer)
    }

    fn push_control(&mut self, addr: SocketAddr, frame_type: u8, token: Option<u32>) {
        self.outbox.push((addr, control_frame(frame_type, token)));
    }
}

fn control_frame(frame_type: u8, token: Option<u32>) -> Vec<u8> {
    let mut frame = WireWriter::with_capacity(5);
    frame.put_u8(frame_type);
    if let Some(token) = token {
        frame.put_u32(token);
    }
    frame.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Delivers every queued datagram directly, without delay.
    fn flush(host: &mut ReliableHost) {
        let socket = host.try_clone_socket().unwrap();
        for (addr, datagram) in host.drain_outbox() {
            socket.send_to(&datagram, addr).unwrap();
        }
    }

    fn pump(a: &mut ReliableHost, b: &mut ReliableHost) {
        for _ in 0..50 {
            flush(a);
            flush(b);
            std::thread::sleep(Duration::from_millis(2));
            a.receive().unwrap();
            b.receive().unwrap();
        }
        flush(a);
        flush(b);
    }

    fn events(host: &mut ReliableHost) -> Vec<ReliableEvent> {
        std::iter::from_fn(|| host.poll_event()).collect()
    }

    #[test]
    fn test_connect_and_deliver_in_order() {
        let mut server = ReliableHost::bind("127.0.0.1:0", true).unwrap();
        let mut client = ReliableHost::bind("127.0.0.1:0", false).unwrap();

        let peer = client.connect(server.local_addr());
        assert_eq!(client.peer_state(peer), Some(PeerState::Connecting));
        pump(&mut client, &mut server);

        assert_eq!(client.peer_state(peer), Some(PeerState::Connected));
        let server_events = events(&mut server);
        assert!(matches!(server_events[0], ReliableEvent::Connected { .. }));
        assert!(matches!(
            events(&mut client)[0],
            ReliableEvent::Connected { .. }
        ));

        for i in 0..5u8 {
            client.send(peer, &[i]).unwrap();
        }
        pump(&mut client, &mut server);

        let payloads: Vec<Vec<u8>> = events(&mut server)
            .into_iter()
            .filter_map(|event| match event {
                ReliableEvent::Received { payload, .. } => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn test_client_does_not_accept_incoming() {
        let mut a = ReliableHost::bind("127.0.0.1:0", false).unwrap();
        let mut b = ReliableHost::bind("127.0.0.1:0", false).unwrap();

        a.connect(b.local_addr());
        pump(&mut a, &mut b);

        assert!(events(&mut b).is_empty());
        assert!(b.connected_peers().is_empty());
    }

    #[test]
    fn test_send_before_connected_fails() {
        let mut client = ReliableHost::bind("127.0.0.1:0", false).unwrap();
        let peer = client.connect("127.0.0.1:9".parse().unwrap());
        assert!(client.send(peer, &[1]).is_err());
    }

    #[test]
    fn test_lost_data_is_retransmitted() {
        let mut server = ReliableHost::bind("127.0.0.1:0", true).unwrap();
        let mut client = ReliableHost::bind("127.0.0.1:0", false).unwrap();
        let peer = client.connect(server.local_addr());
        pump(&mut client, &mut server);
        events(&mut server);

        client.send(peer, &[42]).unwrap();
        // Drop the first transmission on the floor.
        client.drain_outbox().for_each(drop);

        client.service(Instant::now() + Duration::from_secs(3));
        assert_eq!(client.retransmissions(), 1);
        pump(&mut client, &mut server);

        assert!(events(&mut server).iter().any(|event| matches!(
            event,
            ReliableEvent::Received { payload, .. } if payload == &vec![42]
        )));
    }

    #[test]
    fn test_remote_disconnect_raises_event() {
        let mut server = ReliableHost::bind("127.0.0.1:0", true).unwrap();
        let mut client = ReliableHost::bind("127.0.0.1:0", false).unwrap();
        let peer = client.connect(server.local_addr());
        pump(&mut client, &mut server);
        events(&mut server);

        client.disconnect(peer);
        pump(&mut client, &mut server);

        assert!(matches!(
            events(&mut server)[..],
            [ReliableEvent::Disconnected { .. }]
        ));
        assert!(server.connected_peers().is_empty());
    }

    #[test]
    fn test_silent_peer_times_out() {
        let mut server = ReliableHost::bind("127.0.0.1:0", true).unwrap();
        let mut client = ReliableHost::bind("127.0.0.1:0", false).unwrap();
        client.connect(server.local_addr());
        pump(&mut client, &mut server);
        events(&mut server);

        server.set_peer_timeout(Duration::from_millis(10));
        server.service(Instant::now() + Duration::from_millis(50));

        assert!(matches!(
            events(&mut server)[..],
            [ReliableEvent::Disconnected { .. }]
        ));
    }
}
