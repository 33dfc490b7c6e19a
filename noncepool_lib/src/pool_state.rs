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

use bitcoin::BlockHash;
use bitcoindrpc::{BitcoindRpc, BitcoindRpcError};
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// The latest view of the chain tip and mempool, fetched from bitcoind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStateSnapshot {
    pub height: u64,
    pub best_block_hash: BlockHash,
    pub difficulty: f64,
    pub template_height: u64,
    pub prioritised_transactions: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolStateError {
    #[error("backend call failed: {0}")]
    Backend(#[from] BitcoindRpcError),
    #[error("malformed backend response: {0}")]
    Malformed(String),
    #[error("refresh task failed: {0}")]
    Task(String),
}

fn height_field(value: &Value, call: &str) -> Result<u64, PoolStateError> {
    value
        .get("height")
        .and_then(Value::as_u64)
        .ok_or_else(|| PoolStateError::Malformed(format!("{call} has no height")))
}

/// Run the backend calls that make up one snapshot, in order. The first
/// failure aborts the fetch.
pub async fn fetch_snapshot(rpc: &dyn BitcoindRpc) -> Result<PoolStateSnapshot, PoolStateError> {
    let best_block_hash = rpc.getbestblockhash().await?;
    let header = rpc.getblockheader(best_block_hash.clone()).await?;
    let height = height_field(&header, "getblockheader")?;
    let difficulty = rpc.getdifficulty().await?;
    let template = rpc.getblocktemplate().await?;
    let template_height = height_field(&template, "getblocktemplate")?;
    let prioritised_transactions = match rpc.getprioritisedtransactions().await? {
        Value::Object(map) => map.len(),
        Value::Array(entries) => entries.len(),
        Value::Null => 0,
        other => {
            return Err(PoolStateError::Malformed(format!(
                "getprioritisedtransactions returned {other}"
            )))
        }
    };

    let best_block_hash = BlockHash::from_str(&best_block_hash)
        .map_err(|e| PoolStateError::Malformed(format!("bad block hash {best_block_hash}: {e}")))?;

    Ok(PoolStateSnapshot {
        height,
        best_block_hash,
        difficulty,
        template_height,
        prioritised_transactions,
    })
}

/// Holds the most recent snapshot and refreshes it on demand.
///
/// Readers get an `Arc` to a complete snapshot. A refresh publishes a new one
/// with a single replace, so a reader never sees a partly updated value.
#[derive(Clone)]
pub struct PoolStateCache {
    rpc: Arc<dyn BitcoindRpc>,
    snapshot_tx: Arc<watch::Sender<Option<Arc<PoolStateSnapshot>>>>,
}

impl PoolStateCache {
    pub fn new(rpc: Arc<dyn BitcoindRpc>) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            rpc,
            snapshot_tx: Arc::new(snapshot_tx),
        }
    }

    /// The last published snapshot, if any refresh has succeeded yet.
    pub fn current(&self) -> Option<Arc<PoolStateSnapshot>> {
        self.snapshot_tx.borrow().clone()
    }

    /// Fetch a new snapshot on its own task and publish it.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<Arc<PoolStateSnapshot>, PoolStateError> {
        let rpc = self.rpc.clone();
        let snapshot = tokio::spawn(async move { fetch_snapshot(rpc.as_ref()).await })
            .await
            .map_err(|e| PoolStateError::Task(e.to_string()))??;

        let snapshot = Arc::new(snapshot);
        debug!("Pool state refreshed: {:?}", snapshot);
        let previous = self.snapshot_tx.send_replace(Some(snapshot.clone()));
        if previous.map(|p| p.best_block_hash) != Some(snapshot.best_block_hash) {
            info!(
                "New chain tip {} at height {}",
                snapshot.best_block_hash, snapshot.height
            );
        }
        Ok(snapshot)
    }
}
