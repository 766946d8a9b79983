mod api;
mod constants;

use api::{router, AppState, MiningMode};
use clap::Parser;
use constants::{DEFAULT_LISTEN, DEFAULT_MINE_TIMEOUT_SECS};
use ledger_core::{
    constants::{DEFAULT_DIFFICULTY, DEFAULT_GENESIS_IDENTITY, DEFAULT_LEDGER_NAME, HASH_HEX_SIZE},
    LedgerConfig, MiningStrategy, SharedLedger,
};
use std::{net::SocketAddr, time::Duration};
use tracing::{info, Level};

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Label reported alongside the chain
    #[arg(long, default_value = DEFAULT_LEDGER_NAME)]
    name: String,

    /// Sole transaction of the genesis block
    #[arg(long, default_value = DEFAULT_GENESIS_IDENTITY)]
    identity: String,

    /// Leading zero hex digits required of every block hash
    #[arg(
        long,
        default_value_t = DEFAULT_DIFFICULTY,
        value_parser = clap::value_parser!(u32).range(0..=HASH_HEX_SIZE as i64)
    )]
    difficulty: u32,

    /// Cancel a /mine request after this many seconds (0 waits forever)
    #[arg(long, default_value_t = DEFAULT_MINE_TIMEOUT_SECS)]
    mine_timeout_secs: u64,

    /// Spread the nonce search over all cores
    #[arg(long)]
    parallel: bool,

    /// Hold the ledger lock for the entire search instead of committing optimistically
    #[arg(long)]
    coarse_lock: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let strategy = if args.parallel {
        MiningStrategy::Parallel
    } else {
        MiningStrategy::Sequential
    };
    let config = LedgerConfig {
        name: args.name,
        identity: args.identity,
        difficulty: args.difficulty,
    };
    let ledger = tokio::task::spawn_blocking(move || SharedLedger::from_config(config))
        .await??
        .with_strategy(strategy);

    let state = AppState {
        ledger,
        mining: if args.coarse_lock {
            MiningMode::CoarseLock
        } else {
            MiningMode::Optimistic
        },
        mine_timeout: (args.mine_timeout_secs > 0)
            .then(|| Duration::from_secs(args.mine_timeout_secs)),
    };

    let addr: SocketAddr = args.listen.parse()?;
    info!("ledger-node listening on http://{addr}");
    info!("  GET  /chain  /pending  /search?q=..  /health");
    info!("  POST /tx {{\"tx\":\"Alice -> Bob : 5\"}}  /mine");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
