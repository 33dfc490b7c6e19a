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
use crate::stratum::messages::{Message, Notification, Request, Response};
use crate::stratum::server::StratumContext;
use crate::stratum::session::Session;
use serde_json::json;
use tracing::debug;

/// Handle the "mining.authorize" message.
///
/// The first identity presented on a session is bound to it for the life of
/// the connection. The miner gets `true` followed by its nonce range. With no
/// identity the miner gets `true` and nothing is bound.
pub(crate) async fn handle_authorize(
    message: Request,
    session: &mut Session,
    ctx: &StratumContext,
) -> Result<Vec<Message>, Error> {
    debug!("Handling mining.authorize message");
    let Some(identity) = message.identity().map(str::to_string) else {
        debug!("mining.authorize from {} without identity", session.addr);
        return Ok(vec![Message::Response(Response::new_ok(
            message.id,
            json!(true),
        ))]);
    };

    let binding = ctx.registry.authorize(session.id, identity).await?;
    session.bind(binding.identity.clone());

    Ok(vec![
        Message::Response(Response::new_ok(message.id, json!(true))),
        Message::Notification(Notification::set_nonce_range(
            &binding.identity,
            binding.range,
        )),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miners::allocator::{NonceRange, NONCE_SPACE};
    use crate::miners::registry::SessionId;
    use bitcoindrpc::MockBitcoindRpc;
    use std::net::SocketAddr;

    async fn connected(ctx: &StratumContext, port: u16) -> Session {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let channels = ctx.registry.add(addr).await.unwrap();
        Session::new(channels.id, addr)
    }

    #[tokio::test]
    async fn test_handle_authorize_sends_range_after_response() {
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());
        let mut session = connected(&ctx, 4000).await;

        let messages = handle_authorize(Request::new_authorize(2, "alice"), &mut session, &ctx)
            .await
            .unwrap();

        assert_eq!(
            messages,
            vec![
                Message::Response(Response::new_ok(json!(2), json!(true))),
                Message::Notification(Notification::set_nonce_range(
                    "alice",
                    NonceRange {
                        start: 0,
                        size: NONCE_SPACE
                    }
                )),
            ]
        );
        assert_eq!(session.identity.as_deref(), Some("alice"));
        assert_eq!(ctx.registry.weight("alice".into()).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_handle_authorize_without_identity() {
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());
        let mut session = connected(&ctx, 4000).await;
        let request = Request {
            id: json!(3),
            method: "mining.authorize".to_string(),
            params: vec![],
        };

        let messages = handle_authorize(request, &mut session, &ctx).await.unwrap();

        assert_eq!(
            messages,
            vec![Message::Response(Response::new_ok(json!(3), json!(true)))]
        );
        assert!(session.identity.is_none());
    }

    #[tokio::test]
    async fn test_second_authorize_keeps_first_identity() {
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());
        let mut session = connected(&ctx, 4000).await;

        handle_authorize(Request::new_authorize(1, "alice"), &mut session, &ctx)
            .await
            .unwrap();
        let messages = handle_authorize(Request::new_authorize(2, "mallory"), &mut session, &ctx)
            .await
            .unwrap();

        match &messages[..] {
            [Message::Response(response), Message::Notification(notification)] => {
                assert_eq!(response.result, json!(true));
                assert_eq!(notification.params[0], "alice");
            }
            _ => panic!("Expected response and range notification"),
        }
        assert_eq!(session.identity.as_deref(), Some("alice"));
        assert_eq!(ctx.registry.weight("mallory".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_authorize_on_unregistered_session_fails() {
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());
        let mut session = Session::new(SessionId(99), "127.0.0.1:4999".parse().unwrap());

        let result = handle_authorize(Request::new_authorize(1, "alice"), &mut session, &ctx).await;

        assert!(matches!(result, Err(Error::RegistryUnavailable)));
    }
}
