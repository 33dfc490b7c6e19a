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

use crate::stratum::error::Error;
use crate::stratum::messages::{Message, Request, Response};
use crate::stratum::server::StratumContext;
use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::Block;
use bitcoindrpc::BitcoindRpc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Submissions with at least this many params carry a block candidate as the
/// last param.
const BLOCK_CANDIDATE_MIN_PARAMS: usize = 3;

/// What happened to a block candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    /// bitcoind did not accept it as valid, or could not be asked.
    Invalid,
    Accepted,
    Rejected(String),
    SubmitFailed(String),
}

/// Only `null` or `true` from testblockvalidity counts as valid.
fn is_valid_verdict(verdict: &Value) -> bool {
    matches!(verdict, Value::Null | Value::Bool(true))
}

/// Check a block candidate with bitcoind and submit it only if it passes.
///
/// Nothing is submitted unless testblockvalidity said yes, including when the
/// check itself failed.
pub async fn submit_block_candidate(rpc: &dyn BitcoindRpc, block_hex: &str) -> CandidateOutcome {
    match rpc.testblockvalidity(block_hex.to_string()).await {
        Ok(verdict) if is_valid_verdict(&verdict) => {}
        Ok(verdict) => {
            debug!("Block candidate failed validity test: {verdict}");
            return CandidateOutcome::Invalid;
        }
        Err(e) => {
            warn!("Block validity test failed, not submitting candidate: {e}");
            return CandidateOutcome::Invalid;
        }
    }

    match deserialize_hex::<Block>(block_hex) {
        Ok(block) => info!("Submitting block {}", block.block_hash()),
        Err(e) => info!("Submitting block candidate that does not decode locally: {e}"),
    }

    match rpc.submitblock(block_hex.to_string()).await {
        Ok(Value::Null) => {
            info!("Block accepted by bitcoind");
            CandidateOutcome::Accepted
        }
        Ok(Value::String(reason)) => {
            warn!("Block rejected by bitcoind: {reason}");
            CandidateOutcome::Rejected(reason)
        }
        Ok(other) => {
            warn!("Block rejected by bitcoind: {other}");
            CandidateOutcome::Rejected(other.to_string())
        }
        Err(e) => {
            warn!("Block submission failed: {e}");
            CandidateOutcome::SubmitFailed(e.to_string())
        }
    }
}

/// Handle the "mining.submit" message.
///
/// The identity in the first param gets a share, whether or not this
/// session authorized it. The miner always gets `true`.
pub(crate) async fn handle_submit(message: Request, ctx: &StratumContext) -> Result<Vec<Message>, Error> {
    debug!("Handling mining.submit message");
    match message.identity() {
        Some(identity) => {
            let weight = ctx.registry.record_share(identity.to_string()).await?;
            debug!("Share from {identity}, weight now {weight}");
        }
        None => debug!("mining.submit without identity, no share recorded"),
    }

    if message.params.len() >= BLOCK_CANDIDATE_MIN_PARAMS {
        match message.params.last().and_then(Value::as_str) {
            Some(block_hex) => {
                let outcome = submit_block_candidate(ctx.rpc.as_ref(), block_hex).await;
                debug!("Block candidate outcome: {outcome:?}");
            }
            None => debug!("Block candidate is not a hex string, skipping"),
        }
    }

    Ok(vec![Message::Response(Response::new_ok(
        message.id,
        json!(true),
    ))])
}
