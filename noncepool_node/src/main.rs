// Copyright (C) 2025 NoncePool Developers (see AUTHORS)
//
// This file is part of NoncePool
//
// NoncePool is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// NoncePool is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// NoncePool. If not, see <https://www.gnu.org/licenses/>.

use bitcoindrpc::{BitcoindRpc, BitcoindRpcClient};
use clap::Parser;
use noncepool_lib::config::Config;
use noncepool_lib::logging::setup_logging;
use noncepool_lib::miners::registry::start_registry;
use noncepool_lib::pool_state::PoolStateCache;
use noncepool_lib::stratum::server::StratumServerBuilder;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use crate::shutdown::{spawn_shutdown_watcher, ShutdownReason};

mod shutdown;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults and NONCEPOOL_* environment
    /// variables are used without one.
    #[arg(short, long, env("NONCEPOOL_CONFIG"))]
    config: Option<String>,

    /// Host to listen on for miners
    #[arg(long)]
    stratum_hostname: Option<String>,

    /// Port to listen on for miners
    #[arg(long)]
    stratum_port: Option<u16>,

    /// Longest line accepted from a miner, in bytes
    #[arg(long)]
    max_line_length: Option<usize>,

    #[arg(long)]
    bitcoinrpc_url: Option<String>,

    #[arg(long)]
    bitcoinrpc_username: Option<String>,

    #[arg(long)]
    bitcoinrpc_password: Option<String>,

    /// Log level filter, e.g. info or noncepool_lib=debug
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Command line flags win over the file and the environment.
    fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(hostname) = &self.stratum_hostname {
            config = config.with_stratum_hostname(hostname.clone());
        }
        if let Some(port) = self.stratum_port {
            config = config.with_stratum_port(port);
        }
        if let Some(max_line_length) = self.max_line_length {
            config = config.with_max_line_length(max_line_length);
        }
        if let Some(url) = &self.bitcoinrpc_url {
            config = config.with_bitcoinrpc_url(url.clone());
        }
        if let Some(username) = &self.bitcoinrpc_username {
            config = config.with_bitcoinrpc_username(username.clone());
        }
        if let Some(password) = &self.bitcoinrpc_password {
            config = config.with_bitcoinrpc_password(password.clone());
        }
        if let Some(level) = &self.log_level {
            config = config.with_log_level(level.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => args.apply_overrides(config),
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    // hold guard to keep the file appender flushing until exit
    let _guard = match setup_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Starting NoncePool...");

    let rpc: Arc<dyn BitcoindRpc> = match BitcoindRpcClient::from_config(&config.bitcoinrpc) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create bitcoind RPC client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pool_state = PoolStateCache::new(rpc.clone());
    match pool_state.refresh().await {
        Ok(snapshot) => info!(
            "bitcoind tip {} at height {}",
            snapshot.best_block_hash, snapshot.height
        ),
        Err(e) => warn!("Initial pool state refresh failed, continuing: {e}"),
    }

    let exit_sender = watch::Sender::new(ShutdownReason::None);
    let (stratum_shutdown_tx, stratum_shutdown_rx) = oneshot::channel();
    let shutdown = spawn_shutdown_watcher(exit_sender.clone(), stratum_shutdown_tx);

    let registry = start_registry();
    let stratum_config = config.stratum.clone();

    tokio::spawn(async move {
        let mut stratum_server = match StratumServerBuilder::default()
            .shutdown_rx(stratum_shutdown_rx)
            .hostname(stratum_config.hostname)
            .port(stratum_config.port)
            .max_line_length(stratum_config.max_line_length)
            .registry(registry)
            .pool_state(pool_state)
            .rpc(rpc)
            .build()
        {
            Ok(server) => server,
            Err(e) => {
                error!("Failed to build Stratum server: {e}");
                exit_sender.send_replace(ShutdownReason::Error);
                return;
            }
        };
        info!(
            "Starting Stratum server, miners connect to {}",
            stratum_config.public_url
        );
        if let Err(e) = stratum_server.start(None).await {
            error!("Failed to start Stratum server: {e}");
            exit_sender.send_replace(ShutdownReason::Error);
        }
        info!("Stratum server stopped");
    });

    match shutdown.await {
        Ok(reason) => reason.exit_code(),
        Err(e) => {
            error!("Shutdown watcher failed: {e}");
            ExitCode::FAILURE
        }
    }
}
