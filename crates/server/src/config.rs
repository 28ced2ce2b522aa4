use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use latentsync::{PortLayout, SessionParams, DEFAULT_TICK_RATE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub ports: PortLayout,
    pub tick_rate: u32,
    pub session: SessionParams,
    /// Forces every client out of a round that has lasted this long.
    pub round_length: Option<Duration>,
    pub stats_interval: Duration,
    /// Stop after this long; run until the session ends otherwise.
    pub run_for: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ports: PortLayout::default(),
            tick_rate: DEFAULT_TICK_RATE,
            session: SessionParams::default(),
            round_length: None,
            stats_interval: Duration::from_secs(10),
            run_for: None,
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
