use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::{DEFAULT_PING_PORT, DEFAULT_PORT};

pub const DEFAULT_HISTORY_WINDOW: u32 = 10;
pub const DEFAULT_INPUT_CUTOFF: u32 = 10;

pub const DEFAULT_CLIENT_PORT: u16 = 12350;

/// Reliable channel on the base port, unreliable on base + 1, the client's
/// unreliable listening port and the ping port configured separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLayout {
    pub base: u16,
    pub client: u16,
    pub ping: u16,
}

impl Default for PortLayout {
    fn default() -> Self {
        Self::new(DEFAULT_PORT, DEFAULT_CLIENT_PORT, DEFAULT_PING_PORT)
    }
}

impl PortLayout {
    /// A ping port that lands on a channel port is moved to base + 2, or to
    /// base + 3 when base + 2 is the client port.
    pub fn new(base: u16, client: u16, ping: u16) -> Self {
        let taken = [base, base.wrapping_add(1), client];

        let ping = if taken.contains(&ping) {
            let reassigned = [base.wrapping_add(2), base.wrapping_add(3)]
                .into_iter()
                .find(|candidate| !taken.contains(candidate))
                .unwrap_or(ping);
            log::warn!(
                "ping port {} collides with a channel port, using {}",
                ping,
                reassigned
            );
            reassigned
        } else {
            ping
        };

        Self { base, client, ping }
    }

    pub fn reliable(&self) -> u16 {
        self.base
    }

    pub fn unreliable(&self) -> u16 {
        self.base.wrapping_add(1)
    }

    pub fn client(&self) -> u16 {
        self.client
    }

    pub fn ping(&self) -> u16 {
        self.ping
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PredictionMode {
    #[default]
    None,
    Linear,
    Quadratic,
}

impl PredictionMode {
    /// History depth needed before a delta can be computed.
    pub fn depth(self) -> usize {
        match self {
            PredictionMode::None => 1,
            PredictionMode::Linear => 2,
            PredictionMode::Quadratic => 3,
        }
    }
}

/// Per-session parameters handed to the core by the experiment layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParams {
    pub latency_ms: u32,
    pub history_window: u32,
    pub input_cutoff: u32,
    pub expected_clients: usize,
    pub hits_to_kill: u32,
    pub rounds: u32,
    pub handshake_interval_ms: u64,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            history_window: DEFAULT_HISTORY_WINDOW,
            input_cutoff: DEFAULT_INPUT_CUTOFF,
            expected_clients: 2,
            hits_to_kill: 1,
            rounds: 1,
            handshake_interval_ms: 100,
        }
    }
}

impl SessionParams {
    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms)
    }

    pub fn damage_per_hit(&self) -> f32 {
        1.001 / self.hits_to_kill.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_layout_defaults() {
        let ports = PortLayout::default();
        assert_eq!(ports.reliable(), DEFAULT_PORT);
        assert_eq!(ports.unreliable(), DEFAULT_PORT + 1);
        assert_eq!(ports.ping(), DEFAULT_PING_PORT);
    }

    #[test]
    fn test_ping_port_collision_reassigned() {
        assert_eq!(PortLayout::new(5000, 5100, 5000).ping(), 5002);
        assert_eq!(PortLayout::new(5000, 5100, 5001).ping(), 5002);
        assert_eq!(PortLayout::new(5000, 5002, 5001).ping(), 5003);
        assert_eq!(PortLayout::new(5000, 5100, 5100).ping(), 5002);
        assert_eq!(PortLayout::new(5000, 5100, 6000).ping(), 6000);
    }

    #[test]
    fn test_damage_per_hit() {
        let params = SessionParams {
            hits_to_kill: 2,
            ..Default::default()
        };
        assert!(params.damage_per_hit() > 0.5);
        assert!(params.damage_per_hit() * 2.0 >= 1.0);
    }
}
