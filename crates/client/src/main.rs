mod client;
mod config;
mod motion;

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use client::HeadlessClient;
use config::ClientConfig;
use latentsync::config::{DEFAULT_CLIENT_PORT, DEFAULT_HISTORY_WINDOW};
use latentsync::net::{DEFAULT_PING_PORT, DEFAULT_SMA_WINDOW};
use latentsync::{PortLayout, PredictionMode, SessionParams};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Prediction {
    None,
    Linear,
    Quadratic,
}

impl From<Prediction> for PredictionMode {
    fn from(value: Prediction) -> Self {
        match value {
            Prediction::None => PredictionMode::None,
            Prediction::Linear => PredictionMode::Linear,
            Prediction::Quadratic => PredictionMode::Quadratic,
        }
    }
}

#[derive(Parser)]
#[command(name = "latentsync-client")]
#[command(about = "Headless scripted experiment client")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1", help = "Server address")]
    server: IpAddr,

    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short, long, default_value_t = latentsync::DEFAULT_PORT, help = "Server reliable port; unreliable uses port + 1")]
    port: u16,

    #[arg(long, default_value_t = DEFAULT_CLIENT_PORT, help = "Local unreliable listening port")]
    client_port: u16,

    #[arg(long, default_value_t = DEFAULT_PING_PORT)]
    ping_port: u16,

    #[arg(short, long, default_value_t = latentsync::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 0, help = "Injected one-way latency in ms")]
    latency: u32,

    #[arg(short, long, default_value_t = DEFAULT_HISTORY_WINDOW)]
    window: u32,

    #[arg(long, value_enum, default_value_t = Prediction::None)]
    prediction: Prediction,

    #[arg(long, help = "Report a round timeout after this many seconds")]
    round_secs: Option<u64>,

    #[arg(long, help = "Report a hit on a remote player after this many seconds")]
    hit_secs: Option<u64>,

    #[arg(long, default_value_t = 1, help = "Seconds before submitting feedback")]
    feedback_secs: u64,

    #[arg(long, help = "Disable the ping measurement")]
    no_ping: bool,

    #[arg(long, default_value_t = DEFAULT_SMA_WINDOW)]
    ping_window: usize,

    #[arg(long, help = "Stop after this many seconds")]
    duration_secs: Option<u64>,

    #[arg(long, default_value_t = 10, help = "Seconds between statistics lines")]
    stats_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let defaults = ClientConfig::default();
    let config = ClientConfig {
        bind: args.bind,
        server: args.server,
        ports: PortLayout::new(args.port, args.client_port, args.ping_port),
        tick_rate: args.tick_rate,
        session: SessionParams {
            latency_ms: args.latency,
            history_window: args.window,
            ..Default::default()
        },
        prediction: args.prediction.into(),
        round_length: args.round_secs.map(Duration::from_secs),
        hit_after: args.hit_secs.map(Duration::from_secs),
        feedback_delay: Duration::from_secs(args.feedback_secs),
        ping_interval: if args.no_ping {
            None
        } else {
            defaults.ping_interval
        },
        ping_window: args.ping_window,
        stats_interval: Duration::from_secs(args.stats_secs),
        run_for: args.duration_secs.map(Duration::from_secs),
    };

    let mut client = HeadlessClient::new(config).with_context(|| {
        format!(
            "failed to bind client on {} (unreliable port {})",
            args.bind, args.client_port
        )
    })?;

    client.run().context("client session failed")?;
    log::info!("Client exiting");

    Ok(())
}
