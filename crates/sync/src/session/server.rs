use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};

use glam::Vec3;

use crate::config::{PortLayout, SessionParams};
use crate::error::{NetError, NetResult};
use crate::input_buffer::InputFrameBuffer;
use crate::net::{
    Destination, EntityId, EntityKind, EntityUpdate, IncomingEvent, LatencyTable, Message,
    NetworkStats, PeerId, PingResponder, Source, Transform, Transport, MAX_BATCH_ENTITIES,
    REGISTRATION_ACCEPTED,
};

use super::events::{PlayerAction, PlayerInput, RemoteAction, ServerEvent};
use super::registry::{ClientRegistry, ConnectedClient};

/// Where every second registered client is moved on arrival.
pub const ALTERNATE_SPAWN: Vec3 = Vec3::new(-46.0, -2.3, 0.0);
pub const ALTERNATE_SPAWN_HEADING: f32 = 90.0;

/// Server half of the session: registration, round bookkeeping, the
/// per-client history windows and the frame-indexed input buffer.
pub struct ServerSession {
    transport: Transport,
    ping: Option<PingResponder>,
    registry: ClientRegistry,
    inputs: InputFrameBuffer<PlayerInput>,
    params: SessionParams,
    frame: u32,
    ready: HashSet<EntityId>,
    timed_out: HashSet<EntityId>,
    feedback: HashSet<EntityId>,
    rounds_played: u32,
    in_round: bool,
    pending_events: VecDeque<ServerEvent>,
}

impl ServerSession {
    pub fn new(transport: Transport, params: SessionParams) -> Self {
        Self {
            transport,
            ping: None,
            registry: ClientRegistry::new(params.history_window),
            inputs: InputFrameBuffer::new(params.input_cutoff, 0),
            params,
            frame: 0,
            ready: HashSet::new(),
            timed_out: HashSet::new(),
            feedback: HashSet::new(),
            rounds_played: 0,
            in_round: false,
            pending_events: VecDeque::new(),
        }
    }

    /// Binds both channels on `ports` plus the ping responder.
    pub fn bind(ip: IpAddr, ports: &PortLayout, params: SessionParams) -> NetResult<Self> {
        let transport = Transport::listen(ip, ports.reliable(), LatencyTable::default())?;
        let ping = PingResponder::bind(SocketAddr::new(ip, ports.ping()))?;

        log::info!(
            "server listening: reliable {}, unreliable {}, ping {}",
            transport.reliable_addr(),
            transport.unreliable_addr(),
            ports.ping()
        );

        let mut session = Self::new(transport, params);
        session.ping = Some(ping);
        Ok(session)
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn inputs(&self) -> &InputFrameBuffer<PlayerInput> {
        &self.inputs
    }

    /// Whether every registered client has an input collected for `frame`.
    pub fn inputs_complete(&self, frame: u32) -> bool {
        !self.registry.is_empty() && self.inputs.all_clients_present(frame, self.registry.len())
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    pub fn in_round(&self) -> bool {
        self.in_round
    }

    pub fn progress(&self) -> f32 {
        self.rounds_played as f32 / self.params.rounds.max(1) as f32
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn stats(&self) -> NetworkStats {
        self.transport.stats()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Handles everything that arrived since the last call.
    pub fn poll_network(&mut self) {
        if let Some(ping) = self.ping.as_mut() {
            if let Err(e) = ping.service() {
                log::warn!("ping responder failed: {}", e);
            }
        }

        while let Some(event) = self.transport.poll() {
            if let Err(e) = self.handle_event(event) {
                self.report(e);
            }
        }
    }

    /// Advances the network frame, rotates every history window and the
    /// input buffer, then sends the latest transforms to all clients.
    pub fn step(&mut self) {
        self.frame = self.frame.wrapping_add(1);
        self.registry.advance(self.frame);
        self.inputs.advance(self.frame);
        self.broadcast_entity_updates();
        self.transport.service();
    }

    pub fn broadcast_entity_updates(&mut self) {
        let updates: Vec<EntityUpdate> = self
            .registry
            .iter()
            .filter_map(|client| {
                client.latest_transform().map(|transform| EntityUpdate {
                    id: client.id,
                    transform,
                })
            })
            .collect();
        if updates.is_empty() {
            return;
        }

        let destinations = self.registry.unreliable_addrs();
        for chunk in updates.chunks(MAX_BATCH_ENTITIES) {
            let message = Message::BatchEntityUpdate {
                frame: self.frame,
                updates: chunk.to_vec(),
            };
            if let Err(e) = self.transport.broadcast_unreliable(&message, &destinations) {
                self.report(e);
            }
        }
    }

    /// Ends the current round for every client.
    pub fn force_round_timeout(&mut self) {
        let message = Message::RoundTimeout { frame: self.frame };
        if let Err(e) = self.transport.broadcast_reliable(&message) {
            self.report(e);
        }
    }

    pub fn move_client(&mut self, id: &EntityId, transform: Transform) -> NetResult<()> {
        let peer = self.peer_of(id)?;
        self.transport.send(
            &Message::MoveClient {
                frame: self.frame,
                transform,
            },
            Destination::Reliable(peer),
        )
    }

    /// Sends a player configuration to one client, or to all of them, and
    /// applies its latency to the addresses involved.
    pub fn send_player_config(
        &mut self,
        target: Option<&EntityId>,
        latency_ms: u32,
        respawn: bool,
    ) -> NetResult<()> {
        let message = Message::PlayerConfig {
            frame: self.frame,
            latency_ms,
            progress: self.progress(),
            respawn,
        };

        let targets: Vec<(PeerId, SocketAddr, SocketAddr)> = match target {
            Some(id) => {
                let client = self
                    .registry
                    .get(id)
                    .ok_or(NetError::UnaffiliatedUpdate(*id))?;
                vec![(client.peer, client.reliable_addr, client.unreliable_addr)]
            }
            None => self
                .registry
                .iter()
                .map(|client| (client.peer, client.reliable_addr, client.unreliable_addr))
                .collect(),
        };

        for (peer, reliable_addr, unreliable_addr) in targets {
            self.transport.send(&message, Destination::Reliable(peer))?;
            let latency = self.transport.latency_mut();
            latency.set(reliable_addr, latency_ms);
            latency.set(unreliable_addr, latency_ms);
        }
        Ok(())
    }

    pub fn kick_client(&mut self, id: &EntityId) {
        let Some(client) = self.registry.remove(id) else {
            return;
        };
        self.transport.disconnect(client.peer);
        self.forget(&client);
        let destroy = Message::DestroyEntity {
            frame: self.frame,
            id: client.id,
        };
        if let Err(e) = self.transport.broadcast_reliable(&destroy) {
            self.report(e);
        }
        log::info!("kicked {}", client.id);
        self.pending_events.push_back(ServerEvent::ClientRemoved {
            id: client.id,
            kicked: true,
        });
    }

    pub fn shutdown(&mut self) {
        let ids: Vec<EntityId> = self.registry.iter().map(|client| client.id).collect();
        for id in ids {
            self.kick_client(&id);
        }
        self.transport.shutdown();
    }

    fn report(&mut self, error: NetError) {
        match &error {
            NetError::StaleUpdate { .. } => log::trace!("{}", error),
            NetError::UnaffiliatedUpdate(_) | NetError::ForeignUpdate { .. } => {
                log::debug!("{}", error)
            }
            _ => {
                log::warn!("{}", error);
                self.pending_events.push_back(ServerEvent::Error {
                    message: error.to_string(),
                });
            }
        }
    }

    fn peer_of(&self, id: &EntityId) -> NetResult<PeerId> {
        self.registry
            .get(id)
            .map(|client| client.peer)
            .ok_or(NetError::UnaffiliatedUpdate(*id))
    }

    fn expected(&self) -> usize {
        self.params.expected_clients
    }

    fn handle_event(&mut self, event: IncomingEvent) -> NetResult<()> {
        match event {
            IncomingEvent::Connected { peer, addr } => {
                log::info!("reliable connection from {}", addr);
                self.pending_events
                    .push_back(ServerEvent::PeerConnected { peer, addr });
                Ok(())
            }
            IncomingEvent::Disconnected { peer, addr } => {
                log::info!("{} disconnected", addr);
                if let Some(client) = self.registry.remove_by_peer(peer) {
                    self.forget(&client);
                    self.transport.broadcast_reliable(&Message::DestroyEntity {
                        frame: self.frame,
                        id: client.id,
                    })?;
                    self.pending_events.push_back(ServerEvent::ClientRemoved {
                        id: client.id,
                        kicked: false,
                    });
                }
                Ok(())
            }
            IncomingEvent::Received { from, message } => match from {
                Source::Unreliable { addr } => self.handle_unreliable(addr, message),
                Source::Reliable { peer, addr } => self.handle_reliable(peer, addr, message),
            },
        }
    }

    fn handle_unreliable(&mut self, addr: SocketAddr, message: Message) -> NetResult<()> {
        match message {
            Message::Handshake { .. } => {
                log::debug!("handshake from {}", addr);
                self.transport.send(
                    &Message::HandshakeReply { frame: self.frame },
                    Destination::Unreliable(addr),
                )
            }
            Message::BatchEntityUpdate { frame, updates } => {
                for update in updates {
                    if !update.transform.is_finite() {
                        log::warn!("discarding non-finite transform for {}", update.id);
                        continue;
                    }
                    let recorded = self
                        .registry
                        .record_update(&update.id, addr, frame, update.transform);
                    if let Err(e) = recorded {
                        self.report(e);
                    }
                }
                Ok(())
            }
            Message::PlayerInteract {
                frame,
                action,
                actor,
            } => {
                let Some(client) = self.registry.get(&actor) else {
                    return Err(NetError::UnaffiliatedUpdate(actor));
                };
                if client.unreliable_addr != addr {
                    return Err(NetError::ForeignUpdate {
                        id: actor,
                        from: addr,
                    });
                }

                let action = PlayerAction::from(action);
                let position = client
                    .transform_at_or_before(frame)
                    .map(|transform| transform.translation);
                self.pending_events
                    .push_back(ServerEvent::Remote(RemoteAction {
                        frame,
                        local_frame: self.frame,
                        action,
                        actor,
                        affected: None,
                        position,
                    }));
                self.collect_input(
                    frame,
                    actor,
                    PlayerInput {
                        action,
                        affected: None,
                    },
                );
                Ok(())
            }
            other => {
                log::debug!("unexpected {} from {}", other.kind(), addr);
                Ok(())
            }
        }
    }

    fn handle_reliable(&mut self, peer: PeerId, addr: SocketAddr, message: Message) -> NetResult<()> {
        if let Message::RegisterClient { id, port, .. } = message {
            return self.register(peer, addr, id, port);
        }

        let Some(client) = self.registry.get_by_peer(peer) else {
            log::debug!("{} from unregistered {}", message.kind(), addr);
            return Ok(());
        };
        let client_id = client.id;

        match message {
            Message::ReadyUp { .. } => self.ready_up(client_id),
            Message::ReportHit {
                frame,
                shot,
                shooter,
            } => self.report_hit(peer, frame, shot, shooter),
            Message::RoundTimeout { .. } => self.round_timeout(client_id),
            Message::FeedbackSubmitted { .. } => self.feedback_submitted(client_id),
            other => {
                log::debug!("unexpected {} from {}", other.kind(), addr);
                Ok(())
            }
        }
    }

    fn register(&mut self, peer: PeerId, addr: SocketAddr, id: EntityId, port: u16) -> NetResult<()> {
        let unreliable_addr = SocketAddr::new(addr.ip(), port);
        let registration = self
            .registry
            .register(id, peer, addr, unreliable_addr, self.frame);

        if registration.is_replacement() {
            log::warn!("{}, keeping the newest", NetError::DuplicateRegistration(id));
        } else {
            log::info!("registered client {} (unreliable {})", id, unreliable_addr);
        }

        let latency_ms = self.params.latency_ms;
        let latency = self.transport.latency_mut();
        latency.set(unreliable_addr, latency_ms);
        latency.set(addr, latency_ms);

        self.transport.send(
            &Message::RegistrationReply {
                frame: self.frame,
                id,
                status: REGISTRATION_ACCEPTED,
            },
            Destination::Reliable(peer),
        )?;

        self.transport.broadcast_reliable(&Message::CreateEntity {
            frame: self.frame,
            id,
            kind: EntityKind::Player,
        })?;

        let others: Vec<EntityId> = self
            .registry
            .iter()
            .map(|client| client.id)
            .filter(|other| *other != id)
            .collect();
        for other in others {
            self.transport.send(
                &Message::CreateEntity {
                    frame: self.frame,
                    id: other,
                    kind: EntityKind::Player,
                },
                Destination::Reliable(peer),
            )?;
        }

        if self.registry.len() % 2 == 0 {
            self.transport.send(
                &Message::SetSpawn {
                    frame: self.frame,
                    position: ALTERNATE_SPAWN,
                    heading: ALTERNATE_SPAWN_HEADING,
                },
                Destination::Reliable(peer),
            )?;
            self.transport.send(
                &Message::Respawn { frame: self.frame },
                Destination::Reliable(peer),
            )?;
        }

        self.pending_events.push_back(ServerEvent::ClientRegistered {
            id,
            unreliable_addr,
            replaced: registration.is_replacement(),
        });
        Ok(())
    }

    fn ready_up(&mut self, id: EntityId) -> NetResult<()> {
        self.ready.insert(id);
        let ready = self.ready.len();
        log::info!("{} ready ({}/{})", id, ready, self.expected());
        self.pending_events.push_back(ServerEvent::ClientReady {
            id,
            ready,
            expected: self.expected(),
        });

        if ready >= self.expected() && !self.in_round {
            self.in_round = true;
            self.feedback.clear();
            self.transport
                .broadcast_reliable(&Message::StartSession { frame: self.frame })?;
            log::info!("all clients ready, starting at frame {}", self.frame);
            self.pending_events
                .push_back(ServerEvent::SessionStarted { frame: self.frame });
        }
        Ok(())
    }

    fn report_hit(
        &mut self,
        reporter: PeerId,
        frame: u32,
        shot: EntityId,
        shooter: EntityId,
    ) -> NetResult<()> {
        let position = self
            .registry
            .get(&shooter)
            .and_then(|client| client.transform_at_or_before(frame))
            .map(|transform| transform.translation);
        self.pending_events
            .push_back(ServerEvent::Remote(RemoteAction {
                frame,
                local_frame: self.frame,
                action: PlayerAction::Hit,
                actor: shooter,
                affected: Some(shot),
                position,
            }));
        self.collect_input(
            frame,
            shooter,
            PlayerInput {
                action: PlayerAction::Hit,
                affected: Some(shot),
            },
        );

        let damage = self.params.damage_per_hit();
        match self.registry.get_mut(&shot) {
            Some(target) => {
                let killed = target.damage(damage);
                let health = target.health;
                self.pending_events.push_back(ServerEvent::PlayerHit {
                    shooter,
                    target: shot,
                    health,
                    killed,
                });

                if killed {
                    log::info!("{} eliminated {}, respawning everyone", shooter, shot);
                    self.registry.restore_health();
                    self.ready.clear();
                    self.in_round = false;
                    self.transport
                        .broadcast_reliable(&Message::Respawn { frame: self.frame })?;
                    self.transport.send(
                        &Message::AddPoints {
                            frame: self.frame,
                            points: 1,
                        },
                        Destination::Reliable(reporter),
                    )?;
                }
            }
            None => self.report(NetError::UnaffiliatedUpdate(shot)),
        }

        let interact = Message::PlayerInteract {
            frame: self.frame,
            action: PlayerAction::Hit.into(),
            actor: shooter,
        };
        let destinations = self.registry.unreliable_addrs();
        self.transport.broadcast_unreliable(&interact, &destinations)
    }

    /// Files `input` under the frame it was stamped with. Inputs too old or
    /// too far ahead for the buffer are still handled, just not collected.
    fn collect_input(&mut self, frame: u32, actor: EntityId, input: PlayerInput) {
        let before = self.inputs.inputs(frame).len();
        if !self.inputs.submit(frame, actor, input) {
            return;
        }

        let collected = self.inputs.inputs(frame).len();
        if collected > before && self.inputs_complete(frame) {
            log::trace!("all {} inputs collected for frame {}", collected, frame);
            self.pending_events.push_back(ServerEvent::InputsComplete {
                frame,
                inputs: collected,
            });
        }
    }

    fn round_timeout(&mut self, id: EntityId) -> NetResult<()> {
        self.timed_out.insert(id);
        if self.timed_out.len() < self.expected() {
            return Ok(());
        }

        self.rounds_played += 1;
        self.ready.clear();
        self.timed_out.clear();
        self.in_round = false;
        log::info!(
            "round over ({} of {} played)",
            self.rounds_played,
            self.params.rounds
        );

        self.transport
            .broadcast_reliable(&Message::FeedbackStart { frame: self.frame })?;
        self.pending_events.push_back(ServerEvent::RoundCompleted {
            rounds_played: self.rounds_played,
            progress: self.progress(),
        });
        Ok(())
    }

    fn feedback_submitted(&mut self, id: EntityId) -> NetResult<()> {
        self.feedback.insert(id);
        self.pending_events.push_back(ServerEvent::FeedbackReceived {
            id,
            submitted: self.feedback.len(),
        });

        if self.rounds_played >= self.params.rounds {
            log::info!("session over after {} rounds", self.rounds_played);
            self.transport
                .broadcast_reliable(&Message::SessionEnd { frame: self.frame })?;
            self.pending_events.push_back(ServerEvent::SessionEnded {
                rounds_played: self.rounds_played,
            });
        } else if self.feedback.len() >= self.expected() {
            self.feedback.clear();
            self.transport
                .broadcast_reliable(&Message::ResetRound { frame: self.frame })?;
            self.pending_events.push_back(ServerEvent::RoundReset);
        }
        Ok(())
    }

    fn forget(&mut self, client: &ConnectedClient) {
        self.ready.remove(&client.id);
        self.timed_out.remove(&client.id);
        self.feedback.remove(&client.id);

        let latency = self.transport.latency_mut();
        latency.remove(&client.reliable_addr);
        latency.remove(&client.unreliable_addr);
    }
}
