// CLI entry point for the Party Dice coordinator.
//
// Starts a standalone coordinator that game clients connect to. See
// `server.rs` for the networking architecture and `coordinator.rs` for
// request handling.
//
// Usage:
//   coordinator [OPTIONS]
//     --bind <ADDR>              Listen address (default: 127.0.0.1)
//     --port <PORT>              Listen port (default: 7979)
//     --seed <N>                 Fixed PRNG seed (default: OS entropy)
//     --turn-timeout-secs <N>    Auto-roll after N seconds (default: off)
//     --lobby-ttl-secs <N>       Reap abandoned lobbies after N seconds
//     --log-level <LEVEL>        trace, debug, info, warn, error
//     --json-logs                Emit JSON log lines

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use party_dice_coordinator::{CoordinatorConfig, start_coordinator};

#[derive(Parser)]
#[command(name = "coordinator", about = "Party Dice lobby and turn coordinator")]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "PARTY_DICE_BIND", default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on (0 picks a free port).
    #[arg(long, env = "PARTY_DICE_PORT", default_value_t = 7979)]
    port: u16,

    /// Fixed PRNG seed for reproducible codes, turn orders and rolls.
    #[arg(long)]
    seed: Option<u64>,

    /// Roll a normal die for a player who holds the turn this long.
    #[arg(long)]
    turn_timeout_secs: Option<u64>,

    /// Remove lobbies idle this long with no member online. 0 disables.
    #[arg(long, default_value_t = 1800)]
    lobby_ttl_secs: u64,

    /// Milliseconds between sweeps for turn deadlines and idle lobbies.
    #[arg(long, default_value_t = 1000)]
    sweep_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

impl Cli {
    fn config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            bind_addr: self.bind.clone(),
            port: self.port,
            seed: self.seed,
            turn_timeout: self.turn_timeout_secs.map(Duration::from_secs),
            lobby_ttl: (self.lobby_ttl_secs > 0).then(|| Duration::from_secs(self.lobby_ttl_secs)),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms.max(10)),
        }
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_thread_ids(true))
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "party dice coordinator starting"
    );

    let config = cli.config();
    let (handle, addr) = start_coordinator(config)
        .with_context(|| format!("failed to listen on {}:{}", cli.bind, cli.port))?;
    tracing::info!(%addr, "ready for clients, stop with Ctrl+C");

    // The main loop only exits when stopped; the process ends on SIGINT.
    handle.wait();
    Ok(())
}
