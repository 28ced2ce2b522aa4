use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::Vec3;
use latentsync::net::PingClient;
use latentsync::{
    ClientEvent, ClientSession, ClientState, EntityKind, EntityTable, NetResult,
};

use crate::config::ClientConfig;
use crate::motion::CircleMotion;

const MOTION_RADIUS: f32 = 2.0;
const MOTION_SPEED: f32 = 0.02;

/// Fixed-rate tick loop around a [`ClientSession`] that plays a scripted
/// participant.
pub struct HeadlessClient {
    session: ClientSession,
    entities: EntityTable,
    motion: CircleMotion,
    ping: Option<PingClient>,
    config: ClientConfig,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    start_time: Instant,
    round_started: Option<Instant>,
    hit_reported: bool,
    feedback_started: Option<Instant>,
    last_ping: Instant,
    last_stats: Instant,
    finished: bool,
}

impl HeadlessClient {
    pub fn new(config: ClientConfig) -> NetResult<Self> {
        let session = ClientSession::bind(
            config.bind,
            config.server,
            &config.ports,
            config.session.clone(),
            config.prediction,
        )?;

        let ping = match config.ping_interval {
            Some(_) => {
                let server = SocketAddr::new(config.server, config.ports.ping());
                Some(PingClient::bind(
                    SocketAddr::new(config.bind, 0),
                    server,
                    config.ping_window,
                )?)
            }
            None => None,
        };

        let now = Instant::now();
        Ok(Self {
            session,
            entities: EntityTable::new(),
            motion: CircleMotion::new(Vec3::ZERO, MOTION_RADIUS, MOTION_SPEED),
            ping,
            tick_duration: config.tick_duration(),
            last_tick_time: now,
            accumulator: Duration::ZERO,
            start_time: now,
            round_started: None,
            hit_reported: false,
            feedback_started: None,
            last_ping: now,
            last_stats: now,
            finished: false,
            config,
        })
    }

    pub fn run(&mut self) -> NetResult<()> {
        log::info!("Client {} connecting", self.session.id());
        self.session.start()?;

        while !self.finished {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }

        self.session.disconnect();
        Ok(())
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        self.session.poll_network(&mut self.entities);
        self.handle_events();

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            let local = self.session.is_linked().then(|| self.motion.advance());
            self.session.step(&mut self.entities, local);
        }

        self.run_script();
        self.service_ping();
        self.report_stats();

        if self
            .config
            .run_for
            .is_some_and(|limit| self.start_time.elapsed() >= limit)
        {
            log::info!("Run time elapsed at frame {}", self.session.frame());
            self.finished = true;
        }
    }

    fn handle_events(&mut self) {
        let events: Vec<ClientEvent> = self.session.drain_events().collect();
        for event in events {
            match event {
                ClientEvent::StateChanged { from, to } => {
                    log::debug!("{} -> {}", from, to);
                    match to {
                        ClientState::InRound => {
                            self.round_started = Some(Instant::now());
                            self.hit_reported = false;
                        }
                        ClientState::RoundFeedback => {
                            self.round_started = None;
                            self.feedback_started = Some(Instant::now());
                        }
                        ClientState::SessionEnded => {
                            log::info!("Session over with {} points", self.session.points());
                            self.finished = true;
                        }
                        _ => self.round_started = None,
                    }
                }
                ClientEvent::Registered { id } => log::info!("Registered as {}", id),
                ClientEvent::RegistrationRefused { status } => {
                    log::error!("Registration refused (status {})", status);
                    self.finished = true;
                }
                ClientEvent::SessionStarted { frame } => {
                    log::info!("Round started at frame {}", frame);
                }
                ClientEvent::EntityCreated { id, kind } => {
                    log::info!("Remote {:?} {} joined", kind, id);
                }
                ClientEvent::EntityDestroyed { id } => log::info!("Remote {} left", id),
                ClientEvent::MoveTo { transform } => {
                    self.motion.set_origin(transform.translation);
                }
                ClientEvent::SpawnChanged { position, heading } => {
                    log::info!("Spawn moved to {} facing {}", position, heading);
                    self.motion.set_origin(position);
                }
                ClientEvent::Respawn => self.motion.reset(),
                ClientEvent::PointsAwarded { points, total } => {
                    log::info!("+{} points ({} total)", points, total);
                }
                ClientEvent::ConfigReceived {
                    latency_ms,
                    progress,
                    respawn,
                } => {
                    log::info!(
                        "Latency now {} ms, progress {:.0}%",
                        latency_ms,
                        progress * 100.0
                    );
                    if respawn {
                        self.motion.reset();
                    }
                }
                ClientEvent::Remote(action) => {
                    log::debug!(
                        "Action {:?} by {} at frame {} (local {})",
                        action.action,
                        action.actor,
                        action.frame,
                        action.local_frame
                    );
                }
                ClientEvent::Disconnected => {
                    log::warn!("Disconnected from server");
                    self.finished = true;
                }
            }
        }
    }

    fn run_script(&mut self) {
        if let Some(started) = self.round_started {
            let elapsed = started.elapsed();

            if !self.hit_reported && self.config.hit_after.is_some_and(|after| elapsed >= after) {
                self.hit_reported = true;
                let target = self
                    .entities
                    .iter()
                    .find(|(_, entity)| entity.kind == EntityKind::Player)
                    .map(|(id, _)| *id);
                if let Some(target) = target {
                    log::info!("Reporting hit on {}", target);
                    if let Err(e) = self.session.report_hit(target) {
                        log::warn!("Hit not sent: {}", e);
                    }
                }
            }

            if self.config.round_length.is_some_and(|limit| elapsed >= limit) {
                self.round_started = None;
                if let Err(e) = self.session.round_timeout() {
                    log::warn!("Round timeout not sent: {}", e);
                }
            }
        }

        if let Some(started) = self.feedback_started {
            if started.elapsed() >= self.config.feedback_delay {
                self.feedback_started = None;
                if let Err(e) = self.session.submit_feedback() {
                    log::warn!("Feedback not sent: {}", e);
                }
            }
        }
    }

    fn service_ping(&mut self) {
        let (Some(ping), Some(interval)) = (self.ping.as_mut(), self.config.ping_interval) else {
            return;
        };

        if self.last_ping.elapsed() >= interval {
            self.last_ping = Instant::now();
            if let Err(e) = ping.send_ping() {
                log::debug!("Ping not sent: {}", e);
            }
        }
        if let Err(e) = ping.receive() {
            log::debug!("Ping receive failed: {}", e);
        }
    }

    fn report_stats(&mut self) {
        if self.last_stats.elapsed() < self.config.stats_interval {
            return;
        }
        self.last_stats = Instant::now();

        let stats = self.session.stats();
        let ping = self
            .ping
            .as_ref()
            .and_then(|ping| ping.stats().average())
            .map(|rtt| format!("{:.1} ms", rtt.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "-".to_string());

        log::info!(
            "{} | frame {} | remotes {} | ping {} | sent {} | received {} | retransmits {}",
            self.session.state(),
            self.session.frame(),
            self.entities.len(),
            ping,
            stats.packets_sent,
            stats.packets_received,
            stats.retransmissions
        );
    }
}
