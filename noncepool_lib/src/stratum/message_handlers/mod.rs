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
use crate::stratum::messages::{Message, Request};
use crate::stratum::server::StratumContext;
use crate::stratum::session::Session;
use authorize::handle_authorize;
use submit::handle_submit;
use subscribe::handle_subscribe;
use tracing::debug;

pub mod authorize;
pub mod submit;
pub mod subscribe;

/// Handle one request from a miner.
///
/// The session is updated in response to the message where needed. Returns
/// the lines to write back, the response first.
pub(crate) async fn handle_message(
    message: Request,
    session: &mut Session,
    ctx: &StratumContext,
) -> Result<Vec<Message>, Error> {
    debug!("Handling request: {}", message.method);
    match message.method.as_str() {
        "mining.subscribe" => handle_subscribe(message, session, ctx).await,
        "mining.authorize" => handle_authorize(message, session, ctx).await,
        "mining.submit" => handle_submit(message, ctx).await,
        method => Err(Error::UnknownMethod(method.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miners::registry::SessionId;
    use bitcoindrpc::MockBitcoindRpc;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_method_has_no_side_effect() {
        let mut rpc = MockBitcoindRpc::new();
        rpc.expect_getbestblockhash().times(0);
        let ctx = StratumContext::for_tests(rpc);
        let mut session = Session::new(SessionId(0), "127.0.0.1:4000".parse().unwrap());

        let request = Request {
            id: json!(9),
            method: "mining.extranonce.subscribe".to_string(),
            params: vec![],
        };
        let result = handle_message(request, &mut session, &ctx).await;

        assert!(matches!(result, Err(Error::UnknownMethod(method)) if method == "mining.extranonce.subscribe"));
        assert!(!session.subscribed);
    }
}
