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
use crate::stratum::session::Session;
use serde_json::json;
use tracing::{debug, warn};

/// Handle the "mining.subscribe" message.
///
/// Refreshes the pool state from bitcoind before answering. A failed refresh
/// is logged and the miner still gets its response.
pub(crate) async fn handle_subscribe(
    message: Request,
    session: &mut Session,
    ctx: &StratumContext,
) -> Result<Vec<Message>, Error> {
    debug!("Handling mining.subscribe message");
    session.subscribed = true;

    match ctx.pool_state.refresh().await {
        Ok(snapshot) => debug!("Pool state at height {}", snapshot.height),
        Err(e) => warn!("Pool state refresh failed on subscribe from {}: {e}", session.addr),
    }

    Ok(vec![Message::Response(Response::new_ok(
        message.id,
        json!([null, "pool_sha256d"]),
    ))])
}
