use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use glam::Vec3;

use crate::config::{PortLayout, PredictionMode, SessionParams};
use crate::error::{NetError, NetResult};
use crate::net::{
    Destination, EntityId, EntityUpdate, IncomingEvent, LatencyTable, Message, NetworkStats,
    PeerId, Source, Transform, Transport, REGISTRATION_ACCEPTED,
};
use crate::prediction::Predictor;

use super::events::{ClientEvent, EntitySink, PlayerAction, RemoteAction};

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct LinkFlags: u8 {
        const SOCKET_CONNECTED = 0b0000_0001;
        const RELIABLE_REGISTERED = 0b0000_0010;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Disconnected,
    HandshakingUnreliable,
    ConnectingReliable,
    Registered,
    Ready,
    InRound,
    RoundFeedback,
    RoundTimeout,
    SessionEnded,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAddrs {
    pub reliable: SocketAddr,
    pub unreliable: SocketAddr,
}

impl ServerAddrs {
    pub fn from_layout(ip: IpAddr, ports: &PortLayout) -> Self {
        Self {
            reliable: SocketAddr::new(ip, ports.reliable()),
            unreliable: SocketAddr::new(ip, ports.unreliable()),
        }
    }
}

/// Client half of the session: handshake, registration and the round state
/// machine, plus dead-reckoning of remote entities.
pub struct ClientSession {
    transport: Transport,
    id: EntityId,
    server: ServerAddrs,
    server_peer: Option<PeerId>,
    state: ClientState,
    flags: LinkFlags,
    params: SessionParams,
    frame: u32,
    last_handshake: Option<Instant>,
    auto_ready: bool,
    predictor: Predictor,
    remote: HashMap<EntityId, Transform>,
    updated_this_frame: HashSet<EntityId>,
    spawn: Option<(Vec3, f32)>,
    points: u32,
    progress: f32,
    pending_events: VecDeque<ClientEvent>,
}

impl ClientSession {
    pub fn new(
        transport: Transport,
        id: EntityId,
        server: ServerAddrs,
        params: SessionParams,
        prediction: PredictionMode,
    ) -> Self {
        Self {
            transport,
            id,
            server,
            server_peer: None,
            state: ClientState::Disconnected,
            flags: LinkFlags::empty(),
            params,
            frame: 0,
            last_handshake: None,
            auto_ready: true,
            predictor: Predictor::new(prediction),
            remote: HashMap::new(),
            updated_this_frame: HashSet::new(),
            spawn: None,
            points: 0,
            progress: 0.0,
            pending_events: VecDeque::new(),
        }
    }

    /// Binds the client's unreliable listening port from `ports` and an
    /// ephemeral reliable port.
    pub fn bind(
        bind_ip: IpAddr,
        server_ip: IpAddr,
        ports: &PortLayout,
        params: SessionParams,
        prediction: PredictionMode,
    ) -> NetResult<Self> {
        let transport = Transport::client(bind_ip, ports.client(), LatencyTable::default())?;
        Ok(Self::new(
            transport,
            EntityId::random(),
            ServerAddrs::from_layout(server_ip, ports),
            params,
            prediction,
        ))
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn flags(&self) -> LinkFlags {
        self.flags
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn points(&self) -> u32 {
        self.points
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn spawn(&self) -> Option<(Vec3, f32)> {
        self.spawn
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn stats(&self) -> NetworkStats {
        self.transport.stats()
    }

    pub fn set_auto_ready(&mut self, auto_ready: bool) {
        self.auto_ready = auto_ready;
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn is_linked(&self) -> bool {
        self.flags
            .contains(LinkFlags::SOCKET_CONNECTED | LinkFlags::RELIABLE_REGISTERED)
    }

    /// Starts the unreliable handshake.
    pub fn start(&mut self) -> NetResult<()> {
        if self.state != ClientState::Disconnected {
            return Ok(());
        }
        self.set_state(ClientState::HandshakingUnreliable);
        self.send_handshake()
    }

    fn send_handshake(&mut self) -> NetResult<()> {
        self.last_handshake = Some(Instant::now());
        self.transport.send(
            &Message::Handshake { frame: self.frame },
            Destination::Unreliable(self.server.unreliable),
        )
    }

    fn set_state(&mut self, to: ClientState) {
        if self.state == to {
            return;
        }
        log::debug!("client state {} -> {}", self.state, to);
        self.pending_events.push_back(ClientEvent::StateChanged {
            from: self.state,
            to,
        });
        self.state = to;
    }

    fn send_reliable(&mut self, message: &Message) -> NetResult<()> {
        let peer = self.server_peer.ok_or_else(|| {
            NetError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no reliable connection to the server",
            ))
        })?;
        self.transport.send(message, Destination::Reliable(peer))
    }

    /// Handles everything that arrived since the last call and retries the
    /// handshake when it is due.
    pub fn poll_network<S: EntitySink + ?Sized>(&mut self, sink: &mut S) {
        if self.state == ClientState::HandshakingUnreliable {
            let due = self
                .last_handshake
                .is_none_or(|sent| sent.elapsed() >= self.params.handshake_interval());
            if due {
                if let Err(e) = self.send_handshake() {
                    log::debug!("handshake send failed: {}", e);
                }
            }
        }

        while let Some(event) = self.transport.poll() {
            if let Err(e) = self.handle_event(event, sink) {
                match e {
                    NetError::StaleUpdate { .. } | NetError::UnaffiliatedUpdate(_) => {
                        log::debug!("{}", e)
                    }
                    other => log::warn!("{}", other),
                }
            }
        }
    }

    /// Sends the local transform stamped with the current frame, extrapolates
    /// every remote entity that had no update this frame, then advances the
    /// local frame.
    pub fn step<S: EntitySink + ?Sized>(&mut self, sink: &mut S, local: Option<Transform>) {
        if let Some(transform) = local {
            if let Err(e) = self.send_local_transform(transform) {
                log::debug!("local transform not sent: {}", e);
            }
        }

        if self.predictor.is_enabled() {
            for (id, transform) in self.remote.iter_mut() {
                if self.updated_this_frame.contains(id) {
                    continue;
                }
                *transform = self.predictor.predict(id, transform);
                sink.apply_transform(*id, *transform);
            }
        }
        self.updated_this_frame.clear();
        self.frame = self.frame.wrapping_add(1);
        self.transport.service();
    }

    pub fn send_local_transform(&mut self, transform: Transform) -> NetResult<()> {
        if !self.is_linked() {
            return Ok(());
        }
        self.transport.send(
            &Message::BatchEntityUpdate {
                frame: self.frame,
                updates: vec![EntityUpdate {
                    id: self.id,
                    transform,
                }],
            },
            Destination::Unreliable(self.server.unreliable),
        )
    }

    pub fn ready_up(&mut self) -> NetResult<()> {
        if !self.is_linked() || self.state != ClientState::Registered {
            return Ok(());
        }
        self.send_reliable(&Message::ReadyUp { frame: self.frame })?;
        self.set_state(ClientState::Ready);
        Ok(())
    }

    pub fn report_hit(&mut self, shot: EntityId) -> NetResult<()> {
        self.send_reliable(&Message::ReportHit {
            frame: self.frame,
            shot,
            shooter: self.id,
        })
    }

    pub fn send_interact(&mut self, action: PlayerAction) -> NetResult<()> {
        self.transport.send(
            &Message::PlayerInteract {
                frame: self.frame,
                action: action.into(),
                actor: self.id,
            },
            Destination::Unreliable(self.server.unreliable),
        )
    }

    pub fn round_timeout(&mut self) -> NetResult<()> {
        if self.state != ClientState::InRound {
            return Ok(());
        }
        self.send_reliable(&Message::RoundTimeout { frame: self.frame })?;
        self.set_state(ClientState::RoundTimeout);
        Ok(())
    }

    pub fn submit_feedback(&mut self) -> NetResult<()> {
        if self.state != ClientState::RoundFeedback {
            return Ok(());
        }
        self.send_reliable(&Message::FeedbackSubmitted { frame: self.frame })
    }

    pub fn disconnect(&mut self) {
        if let Some(peer) = self.server_peer.take() {
            self.transport.disconnect(peer);
        }
        self.flags = LinkFlags::empty();
        self.set_state(ClientState::Disconnected);
    }

    fn handle_event<S: EntitySink + ?Sized>(&mut self, event: IncomingEvent, sink: &mut S) -> NetResult<()> {
        match event {
            IncomingEvent::Connected { peer, addr } => {
                if Some(peer) != self.server_peer {
                    return Ok(());
                }
                log::info!("reliable channel to {} open, registering", addr);
                let port = self.transport.unreliable_addr().port();
                self.send_reliable(&Message::RegisterClient {
                    frame: self.frame,
                    id: self.id,
                    port,
                })
            }
            IncomingEvent::Disconnected { peer, addr } => {
                if Some(peer) == self.server_peer {
                    log::warn!("lost connection to server at {}", addr);
                    self.server_peer = None;
                    self.flags = LinkFlags::empty();
                    self.set_state(ClientState::Disconnected);
                    self.pending_events.push_back(ClientEvent::Disconnected);
                }
                Ok(())
            }
            IncomingEvent::Received { from, message } => match from {
                Source::Unreliable { .. } => self.handle_unreliable(message, sink),
                Source::Reliable { peer, .. } if Some(peer) == self.server_peer => {
                    self.handle_reliable(message, sink)
                }
                Source::Reliable { addr, .. } => {
                    log::debug!("ignoring {} from unknown peer {}", message.kind(), addr);
                    Ok(())
                }
            },
        }
    }

    fn handle_unreliable<S: EntitySink + ?Sized>(&mut self, message: Message, sink: &mut S) -> NetResult<()> {
        match message {
            Message::HandshakeReply { .. } => {
                if self.flags.contains(LinkFlags::SOCKET_CONNECTED) {
                    return Ok(());
                }
                self.flags.insert(LinkFlags::SOCKET_CONNECTED);
                log::info!("handshake answered, connecting to {}", self.server.reliable);
                self.set_state(ClientState::ConnectingReliable);
                self.server_peer = Some(self.transport.connect(self.server.reliable));
                Ok(())
            }
            Message::BatchEntityUpdate { frame, updates } => {
                for update in updates {
                    if update.id == self.id {
                        continue;
                    }
                    if let Err(e) = self.apply_remote(frame, update, sink) {
                        log::debug!("{}", e);
                    }
                }
                Ok(())
            }
            Message::PlayerInteract {
                frame,
                action,
                actor,
            } => {
                let position = self.remote.get(&actor).map(|transform| transform.translation);
                self.pending_events
                    .push_back(ClientEvent::Remote(RemoteAction {
                        frame,
                        local_frame: self.frame,
                        action: PlayerAction::from(action),
                        actor,
                        affected: None,
                        position,
                    }));
                Ok(())
            }
            other => {
                log::debug!("unexpected unreliable {}", other.kind());
                Ok(())
            }
        }
    }

    fn apply_remote<S: EntitySink + ?Sized>(
        &mut self,
        packet_frame: u32,
        update: EntityUpdate,
        sink: &mut S,
    ) -> NetResult<()> {
        if !update.transform.is_finite() {
            log::warn!("discarding non-finite transform for {}", update.id);
            return Ok(());
        }
        let Some(current) = self.remote.get_mut(&update.id) else {
            return Err(NetError::UnaffiliatedUpdate(update.id));
        };

        let transform = if self.predictor.is_enabled() {
            self.predictor
                .update(update.id, update.transform, self.frame, packet_frame);
            self.predictor.recalculate(&update.id, &update.transform)
        } else {
            update.transform
        };

        *current = transform;
        self.updated_this_frame.insert(update.id);
        sink.apply_transform(update.id, transform);
        Ok(())
    }

    fn handle_reliable<S: EntitySink + ?Sized>(&mut self, message: Message, sink: &mut S) -> NetResult<()> {
        match message {
            Message::RegistrationReply { frame, id, status } => {
                if id != self.id {
                    return Ok(());
                }
                if status != REGISTRATION_ACCEPTED {
                    log::warn!("server refused registration (status {})", status);
                    self.pending_events
                        .push_back(ClientEvent::RegistrationRefused { status });
                    return Ok(());
                }

                self.flags.insert(LinkFlags::RELIABLE_REGISTERED);
                self.frame = frame;
                let latency_ms = self.params.latency_ms;
                self.apply_latency(latency_ms);
                log::info!("registered as {}", self.id);
                self.set_state(ClientState::Registered);
                self.pending_events
                    .push_back(ClientEvent::Registered { id: self.id });

                if self.auto_ready {
                    self.ready_up()?;
                }
                Ok(())
            }
            Message::StartSession { frame } => {
                log::info!("session started at frame {}", frame);
                self.frame = frame;
                self.set_state(ClientState::InRound);
                self.pending_events
                    .push_back(ClientEvent::SessionStarted { frame });
                Ok(())
            }
            Message::CreateEntity { id, kind, .. } => {
                if id == self.id || self.remote.contains_key(&id) {
                    return Ok(());
                }
                self.remote.insert(id, Transform::IDENTITY);
                sink.create_entity(id, kind);
                self.pending_events
                    .push_back(ClientEvent::EntityCreated { id, kind });
                Ok(())
            }
            Message::DestroyEntity { id, .. } => {
                if self.remote.remove(&id).is_some() {
                    self.predictor.remove(&id);
                    sink.destroy_entity(id);
                    self.pending_events
                        .push_back(ClientEvent::EntityDestroyed { id });
                }
                Ok(())
            }
            Message::MoveClient { transform, .. } => {
                self.pending_events
                    .push_back(ClientEvent::MoveTo { transform });
                Ok(())
            }
            Message::SetSpawn {
                position, heading, ..
            } => {
                self.spawn = Some((position, heading));
                self.pending_events
                    .push_back(ClientEvent::SpawnChanged { position, heading });
                Ok(())
            }
            Message::Respawn { .. } => {
                self.pending_events.push_back(ClientEvent::Respawn);
                // A kill ends the engagement; everyone readies up again.
                if self.state == ClientState::InRound {
                    self.set_state(ClientState::Registered);
                    if self.auto_ready {
                        self.ready_up()?;
                    }
                }
                Ok(())
            }
            Message::AddPoints { points, .. } => {
                self.points += points;
                self.pending_events.push_back(ClientEvent::PointsAwarded {
                    points,
                    total: self.points,
                });
                self.pending_events.push_back(ClientEvent::Respawn);
                Ok(())
            }
            Message::RoundTimeout { .. } => {
                if self.state == ClientState::InRound {
                    self.round_timeout()?;
                }
                Ok(())
            }
            Message::FeedbackStart { .. } => {
                self.set_state(ClientState::RoundFeedback);
                Ok(())
            }
            Message::ResetRound { .. } => {
                self.points = 0;
                self.pending_events.push_back(ClientEvent::Respawn);
                self.set_state(ClientState::Registered);
                if self.auto_ready {
                    self.ready_up()?;
                }
                Ok(())
            }
            Message::SessionEnd { .. } => {
                log::info!("session ended");
                self.set_state(ClientState::SessionEnded);
                Ok(())
            }
            Message::PlayerConfig {
                latency_ms,
                progress,
                respawn,
                ..
            } => {
                self.progress = progress;
                self.apply_latency(latency_ms);
                self.pending_events.push_back(ClientEvent::ConfigReceived {
                    latency_ms,
                    progress,
                    respawn,
                });
                Ok(())
            }
            other => {
                log::debug!("unexpected reliable {}", other.kind());
                Ok(())
            }
        }
    }

    fn apply_latency(&mut self, latency_ms: u32) {
        let server = self.server;
        let latency = self.transport.latency_mut();
        latency.set(server.reliable, latency_ms);
        latency.set(server.unreliable, latency_ms);
    }
}
