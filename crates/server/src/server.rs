use std::time::{Duration, Instant};

use latentsync::{NetResult, ServerEvent, ServerSession};

use crate::config::ServerConfig;
use crate::events::log_event;

/// Fixed-rate tick loop around a [`ServerSession`].
pub struct ExperimentServer {
    session: ServerSession,
    config: ServerConfig,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    running: bool,
    start_time: Instant,
    round_started: Option<Instant>,
    last_stats: Instant,
}

impl ExperimentServer {
    pub fn new(config: ServerConfig) -> NetResult<Self> {
        let session = ServerSession::bind(config.bind, &config.ports, config.session.clone())?;
        let now = Instant::now();

        Ok(Self {
            session,
            tick_duration: config.tick_duration(),
            last_tick_time: now,
            accumulator: Duration::ZERO,
            running: true,
            start_time: now,
            round_started: None,
            last_stats: now,
            config,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn run(&mut self) {
        while self.running {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        self.session.shutdown();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        self.session.poll_network();
        self.handle_events();

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.session.step();
        }

        self.check_round_length();
        self.report_stats();

        if self
            .config
            .run_for
            .is_some_and(|limit| self.start_time.elapsed() >= limit)
        {
            log::info!("Run time elapsed at frame {}", self.session.frame());
            self.running = false;
        }
    }

    fn handle_events(&mut self) {
        let events: Vec<ServerEvent> = self.session.drain_events().collect();
        for event in events {
            log_event(&event);
            match event {
                ServerEvent::SessionStarted { .. } => self.round_started = Some(Instant::now()),
                ServerEvent::RoundCompleted { .. } | ServerEvent::PlayerHit { killed: true, .. } => {
                    self.round_started = None;
                }
                ServerEvent::SessionEnded { .. } => {
                    self.running = false;
                }
                _ => {}
            }
        }
    }

    fn check_round_length(&mut self) {
        let (Some(limit), Some(started)) = (self.config.round_length, self.round_started) else {
            return;
        };
        if started.elapsed() >= limit {
            log::info!("Round time limit reached, forcing timeout");
            self.round_started = None;
            self.session.force_round_timeout();
        }
    }

    fn report_stats(&mut self) {
        if self.last_stats.elapsed() < self.config.stats_interval {
            return;
        }
        self.last_stats = Instant::now();

        let stats = self.session.stats();
        log::info!(
            "frame {} | clients {} | rtt {:.1} ms | sent {} ({} B) | received {} ({} B) | delayed {} | retransmits {} | violations {}",
            self.session.frame(),
            self.session.client_count(),
            stats.rtt_ms,
            stats.packets_sent,
            stats.bytes_sent,
            stats.packets_received,
            stats.bytes_received,
            stats.packets_delayed,
            stats.retransmissions,
            stats.protocol_violations
        );
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use latentsync::{PortLayout, SessionParams};

    use super::*;

    #[test]
    fn test_run_stops_when_time_elapses() {
        let config = ServerConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ports: PortLayout::new(47310, 47320, 47330),
            session: SessionParams {
                expected_clients: 1,
                ..Default::default()
            },
            run_for: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let mut server = ExperimentServer::new(config).unwrap();
        assert!(server.is_running());

        let started = Instant::now();
        server.run();

        assert!(!server.is_running());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(server.session.frame() > 0);
    }
}
