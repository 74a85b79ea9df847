use std::{net::IpAddr, time::Duration};

use clap::Parser;
use parlor::{config::ServerConfig, server, state::ServerState};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// `parlor` — a length-prefixed binary chat gateway over WebSocket.
#[derive(Parser)]
#[command(name = "parlor", about = "Real-time multi-user chat gateway")]
struct Cli {
    /// Address to bind to.
    #[arg(long, env = "PARLOR_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "PARLOR_PORT", default_value_t = 3000)]
    port: u16,

    /// WebSocket keepalive ping interval, in seconds.
    #[arg(long, env = "PARLOR_PING_INTERVAL_SECS", default_value_t = 40)]
    ping_interval_secs: u64,

    /// Maximum inbound WebSocket frame size, in bytes.
    #[arg(long, env = "PARLOR_MAX_FRAME_SIZE", default_value_t = 64 * 1024)]
    max_frame_size: usize,

    /// Idle-detector scan period, in seconds.
    #[arg(long, env = "PARLOR_IDLE_CHECK_SECS", default_value_t = 3)]
    idle_check_secs: u64,

    /// Idle-detector demotion threshold, in seconds.
    #[arg(long, env = "PARLOR_IDLE_THRESHOLD_SECS", default_value_t = 5)]
    idle_threshold_secs: u64,

    /// Per-channel chat history capacity (entries).
    #[arg(long, env = "PARLOR_HISTORY_CAPACITY", default_value_t = parlor::config::MAX_HISTORY_CAPACITY)]
    history_capacity: usize,

    /// Per-connection outbound queue depth (frames).
    #[arg(long, env = "PARLOR_OUTBOUND_QUEUE_DEPTH", default_value_t = 64)]
    outbound_queue_depth: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PARLOR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long, env = "PARLOR_JSON_LOGS", default_value_t = false)]
    json_logs: bool,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            max_frame_size: self.max_frame_size,
            idle_check_period: Duration::from_secs(self.idle_check_secs),
            idle_threshold: Duration::from_secs(self.idle_threshold_secs),
            history_capacity: self.history_capacity.min(parlor::config::MAX_HISTORY_CAPACITY),
            outbound_queue_depth: self.outbound_queue_depth,
        }
    }
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = cli.into_config();
    tracing::info!(
        bind = %config.bind,
        port = config.port,
        history_capacity = config.history_capacity,
        "starting parlor"
    );

    let state = ServerState::new(config);
    if let Err(e) = server::run(state).await {
        tracing::error!(error = %e, "fatal error");
        std::process::exit(1);
    }
    Ok(())
}
