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

use bitcoindrpc::BitcoindRpcClient;
use clap::{Parser, Subcommand};
use noncepool_lib::cli_commands;
use noncepool_lib::config::Config;
use std::error::Error;

/// NoncePool CLI utility
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to noncepool config file
    #[arg(short, long, env("NONCEPOOL_CONFIG"))]
    config: Option<String>,

    /// bitcoind RPC URL, overrides the config file
    #[arg(long)]
    bitcoinrpc_url: Option<String>,

    #[arg(long)]
    bitcoinrpc_username: Option<String>,

    #[arg(long)]
    bitcoinrpc_password: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch and print the current pool state from bitcoind
    Info,
    /// Check bitcoind is reachable and print its chain info
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.bitcoinrpc_url.clone() {
        config = config.with_bitcoinrpc_url(url);
    }
    if let Some(username) = cli.bitcoinrpc_username.clone() {
        config = config.with_bitcoinrpc_username(username);
    }
    if let Some(password) = cli.bitcoinrpc_password.clone() {
        config = config.with_bitcoinrpc_password(password);
    }
    let rpc = BitcoindRpcClient::from_config(&config.bitcoinrpc)?;

    match &cli.command {
        Some(Commands::Info) => cli_commands::info::execute(&rpc).await?,
        Some(Commands::Status) => cli_commands::status::execute(&rpc).await?,
        None => {
            println!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}
