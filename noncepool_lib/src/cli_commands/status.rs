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

use bitcoindrpc::BitcoindRpc;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use tracing::warn;

/// Whether bitcoind answers, and what it says about the chain.
#[derive(Debug, Serialize, PartialEq)]
pub struct BackendStatus {
    pub rpc_status: &'static str,
    pub info: Option<Value>,
}

pub async fn build_status(rpc: &dyn BitcoindRpc) -> BackendStatus {
    match rpc.getblockchaininfo().await {
        Ok(info) => BackendStatus {
            rpc_status: "Connected",
            info: Some(info),
        },
        Err(e) => {
            warn!("getblockchaininfo failed: {e}");
            BackendStatus {
                rpc_status: "RPC error",
                info: None,
            }
        }
    }
}

/// Implementation of the status command
pub async fn execute(rpc: &dyn BitcoindRpc) -> Result<(), Box<dyn Error>> {
    let status = build_status(rpc).await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
