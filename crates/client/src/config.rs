use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use latentsync::{PortLayout, PredictionMode, SessionParams, DEFAULT_TICK_RATE};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub bind: IpAddr,
    pub server: IpAddr,
    pub ports: PortLayout,
    pub tick_rate: u32,
    pub session: SessionParams,
    pub prediction: PredictionMode,
    /// Report a round timeout this long after the round starts.
    pub round_length: Option<Duration>,
    /// Report a hit on the first remote player this long into a round.
    pub hit_after: Option<Duration>,
    pub feedback_delay: Duration,
    pub ping_interval: Option<Duration>,
    pub ping_window: usize,
    pub stats_interval: Duration,
    pub run_for: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            server: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ports: PortLayout::default(),
            tick_rate: DEFAULT_TICK_RATE,
            session: SessionParams::default(),
            prediction: PredictionMode::None,
            round_length: None,
            hit_after: None,
            feedback_delay: Duration::from_secs(1),
            ping_interval: Some(Duration::from_millis(250)),
            ping_window: latentsync::net::DEFAULT_SMA_WINDOW,
            stats_interval: Duration::from_secs(10),
            run_for: None,
        }
    }
}

impl ClientConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
