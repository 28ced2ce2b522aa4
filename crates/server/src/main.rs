mod config;
mod events;
mod server;

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use config::ServerConfig;
use latentsync::config::{DEFAULT_CLIENT_PORT, DEFAULT_HISTORY_WINDOW, DEFAULT_INPUT_CUTOFF};
use latentsync::net::DEFAULT_PING_PORT;
use latentsync::{PortLayout, SessionParams};
use server::ExperimentServer;

#[derive(Parser)]
#[command(name = "latentsync-server")]
#[command(about = "Experiment session server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short, long, default_value_t = latentsync::DEFAULT_PORT, help = "Reliable port; unreliable uses port + 1")]
    port: u16,

    #[arg(long, default_value_t = DEFAULT_CLIENT_PORT, help = "Unreliable port clients listen on")]
    client_port: u16,

    #[arg(long, default_value_t = DEFAULT_PING_PORT)]
    ping_port: u16,

    #[arg(short, long, default_value_t = latentsync::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 0, help = "Injected one-way latency in ms")]
    latency: u32,

    #[arg(short, long, default_value_t = DEFAULT_HISTORY_WINDOW, help = "Frame acceptance window")]
    window: u32,

    #[arg(long, default_value_t = DEFAULT_INPUT_CUTOFF, help = "Input buffer cutoff in frames")]
    input_cutoff: u32,

    #[arg(short, long, default_value_t = 2)]
    expected_clients: usize,

    #[arg(long, default_value_t = 1)]
    hits_to_kill: u32,

    #[arg(short, long, default_value_t = 1)]
    rounds: u32,

    #[arg(long, help = "Force a round timeout after this many seconds")]
    round_secs: Option<u64>,

    #[arg(long, help = "Stop after this many seconds")]
    duration_secs: Option<u64>,

    #[arg(long, default_value_t = 10, help = "Seconds between statistics lines")]
    stats_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        bind: args.bind,
        ports: PortLayout::new(args.port, args.client_port, args.ping_port),
        tick_rate: args.tick_rate,
        session: SessionParams {
            latency_ms: args.latency,
            history_window: args.window,
            input_cutoff: args.input_cutoff,
            expected_clients: args.expected_clients,
            hits_to_kill: args.hits_to_kill,
            rounds: args.rounds,
            ..Default::default()
        },
        round_length: args.round_secs.map(Duration::from_secs),
        stats_interval: Duration::from_secs(args.stats_secs),
        run_for: args.duration_secs.map(Duration::from_secs),
    };

    let mut server = ExperimentServer::new(config)
        .with_context(|| format!("failed to bind server on {}:{}", args.bind, args.port))?;

    log::info!("Server started, waiting for {} clients", args.expected_clients);
    server.run();
    log::info!("Server shutting down");

    Ok(())
}
