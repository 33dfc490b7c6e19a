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

use crate::miners::registry::{RegistryHandle, SessionChannels};
use crate::pool_state::PoolStateCache;
use crate::stratum::error::Error;
use crate::stratum::message_handlers::handle_message;
use crate::stratum::messages::{Message, Request, Response};
use crate::stratum::session::Session;
use bitcoindrpc::BitcoindRpc;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

/// Default maximum length of a request line in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

pub struct StratumServer {
    pub hostname: String,
    pub port: u16,
    pub max_line_length: usize,
    shutdown_rx: oneshot::Receiver<()>,
    registry: RegistryHandle,
    pool_state: PoolStateCache,
    rpc: Arc<dyn BitcoindRpc>,
}

#[derive(Default)]
pub struct StratumServerBuilder {
    hostname: Option<String>,
    port: Option<u16>,
    max_line_length: Option<usize>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
    registry: Option<RegistryHandle>,
    pool_state: Option<PoolStateCache>,
    rpc: Option<Arc<dyn BitcoindRpc>>,
}

impl StratumServerBuilder {
    pub fn hostname(mut self, hostname: String) -> Self {
        self.hostname = Some(hostname);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = Some(max_line_length);
        self
    }

    pub fn shutdown_rx(mut self, shutdown_rx: oneshot::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    pub fn registry(mut self, registry: RegistryHandle) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn pool_state(mut self, pool_state: PoolStateCache) -> Self {
        self.pool_state = Some(pool_state);
        self
    }

    pub fn rpc(mut self, rpc: Arc<dyn BitcoindRpc>) -> Self {
        self.rpc = Some(rpc);
        self
    }

    pub fn build(self) -> Result<StratumServer, Box<dyn std::error::Error + Send + Sync>> {
        Ok(StratumServer {
            hostname: self.hostname.ok_or("hostname is required")?,
            port: self.port.ok_or("port is required")?,
            max_line_length: self.max_line_length.unwrap_or(DEFAULT_MAX_LINE_LENGTH),
            shutdown_rx: self.shutdown_rx.ok_or("shutdown_rx is required")?,
            registry: self.registry.ok_or("registry is required")?,
            pool_state: self.pool_state.ok_or("pool_state is required")?,
            rpc: self.rpc.ok_or("rpc is required")?,
        })
    }
}

impl StratumServer {
    /// Accept miner connections until the shutdown signal arrives.
    ///
    /// `ready_tx` receives the bound address once the listener is up, which
    /// is how callers binding port 0 learn the real port.
    pub async fn start(
        &mut self,
        ready_tx: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Starting Stratum server at {}:{}", self.hostname, self.port);

        let bind_address = format!("{}:{}", self.hostname, self.port);
        let listener = match TcpListener::bind(&bind_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind to {}: {}", bind_address, e);
                return Err(Box::new(e));
            }
        };
        let local_addr = listener.local_addr()?;

        if let Some(ready_tx) = ready_tx {
            info!("Stratum server is ready to accept connections on {local_addr}");
            ready_tx.send(local_addr).ok();
        }
        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    info!("Shutdown signal received");
                    break;
                }
                connection = listener.accept() => {
                    let (stream, addr) = match connection {
                        Ok(connection) => connection,
                        Err(e) => {
                            info!("Connection failed: {}", e);
                            continue;
                        }
                    };
                    info!("New connection from: {}", addr);
                    let channels = match self.registry.add(addr).await {
                        Ok(channels) => channels,
                        Err(e) => {
                            error!("Cannot register connection {addr}: {e}");
                            continue;
                        }
                    };
                    let (reader, writer) = stream.into_split();
                    let ctx = StratumContext {
                        registry: self.registry.clone(),
                        pool_state: self.pool_state.clone(),
                        rpc: self.rpc.clone(),
                    };
                    let max_line_length = self.max_line_length;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(reader, writer, addr, channels, max_line_length, ctx).await {
                            error!("Error occurred while handling connection {addr}: {e}. Closing connection.");
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

/// Shared handles every connection needs.
#[derive(Clone)]
pub(crate) struct StratumContext {
    pub registry: RegistryHandle,
    pub pool_state: PoolStateCache,
    pub rpc: Arc<dyn BitcoindRpc>,
}

#[cfg(test)]
impl StratumContext {
    pub(crate) fn for_tests(rpc: bitcoindrpc::MockBitcoindRpc) -> Self {
        let rpc: Arc<dyn BitcoindRpc> = Arc::new(rpc);
        Self {
            registry: crate::miners::registry::start_registry(),
            pool_state: PoolStateCache::new(rpc.clone()),
            rpc,
        }
    }
}

/// Serve one miner until it disconnects, misbehaves or the registry drops it.
///
/// The session is removed from the registry on every exit path. Its
/// identity's weight is kept.
async fn handle_connection<R, W>(
    reader: R,
    mut writer: W,
    addr: SocketAddr,
    channels: SessionChannels,
    max_line_length: usize,
    ctx: StratumContext,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length));
    let SessionChannels {
        id,
        mut message_rx,
        mut shutdown_rx,
    } = channels;
    let mut session = Session::new(id, addr);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Shutdown signal received, closing connection from {}", addr);
                break Ok(());
            }
            Some(message) = message_rx.recv() => {
                debug!("Tx {addr} {message}");
                if let Err(e) = write_line(&mut writer, &message).await {
                    error!("Failed to write to {}: {}", addr, e);
                    break Err(e);
                }
            }
            line = framed.next() => {
                match line {
                    Some(Ok(line)) => {
                        debug!("Rx {addr} {line}");
                        if line.trim().is_empty() {
                            continue;
                        }
                        if let Err(e) = process_incoming_message(&line, &mut writer, &mut session, &ctx).await {
                            break Err(e);
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!("Line from {addr} exceeds {max_line_length} bytes, closing connection");
                        break Err(Error::LineTooLong);
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        info!("Error reading line from {}: {}", addr, e);
                        break Err(Error::Io(e));
                    }
                    None => {
                        info!("Connection closed by client: {}", addr);
                        break Ok(());
                    }
                }
            }
        }
    };

    ctx.registry.remove(id).await;
    let _ = writer.shutdown().await;
    result
}

async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(format!("{line}\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Parse one line, dispatch it and write the replies.
///
/// Protocol errors get an error response and the connection carries on.
async fn process_incoming_message<W>(
    line: &str,
    writer: &mut W,
    session: &mut Session,
    ctx: &StratumContext,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let replies = match parse_request(line) {
        Ok(request) => {
            let id = request.id.clone();
            match handle_message(request, session, ctx).await {
                Ok(replies) => replies,
                Err(e) if e.is_recoverable() => {
                    debug!("Rejecting request from {}: {e}", session.addr);
                    vec![Message::Response(Response::new_error(id, e))]
                }
                Err(e) => {
                    error!("Error handling message from {}: {e}", session.addr);
                    return Err(e);
                }
            }
        }
        Err(id) => {
            debug!("Failed to parse message from {}", session.addr);
            vec![Message::Response(Response::new_error(id, Error::InvalidJson))]
        }
    };

    for reply in replies {
        let json = serde_json::to_string(&reply).map_err(|e| Error::Io(e.into()))?;
        debug!("Tx {} {json}", session.addr);
        write_line(writer, &json).await?;
    }
    Ok(())
}

/// Decode a request line. On failure returns the id to answer with: the
/// request's own id if the line was a JSON object carrying one, else null.
fn parse_request(line: &str) -> Result<Request, Value> {
    let value: Value = serde_json::from_str(line).map_err(|_| Value::Null)?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|_| id)
}

#[cfg(test)]
mod stratum_server_tests {
    use super::*;
    use bitcoindrpc::{BitcoindRpcError, MockBitcoindRpc};
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080)
    }

    /// Feed `input` to a fresh connection and return the lines written back.
    async fn run_connection(input: &str, ctx: StratumContext) -> (Result<(), Error>, Vec<Value>) {
        let channels = ctx.registry.add(test_addr()).await.unwrap();
        let mut writer = Vec::new();

        let result = handle_connection(
            input.as_bytes(),
            &mut writer,
            test_addr(),
            channels,
            DEFAULT_MAX_LINE_LENGTH,
            ctx,
        )
        .await;

        let output = String::from_utf8_lossy(&writer);
        let lines = output
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str(line).expect("Response should be valid JSON"))
            .collect();
        (result, lines)
    }

    #[test]
    fn test_parse_request_error_ids() {
        assert_eq!(parse_request("{not json").unwrap_err(), Value::Null);
        assert_eq!(parse_request(r#"{"id": 12, "params": []}"#).unwrap_err(), json!(12));
        assert_eq!(parse_request("[1,2,3]").unwrap_err(), Value::Null);
        assert!(parse_request(r#"{"id": 1, "method": "mining.subscribe"}"#).is_ok());
    }

    #[tokio::test]
    async fn test_build_requires_handles() {
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let result = StratumServerBuilder::default()
            .hostname("127.0.0.1".to_string())
            .port(0)
            .shutdown_rx(shutdown_rx)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_and_start_server() {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());

        let mut server = StratumServerBuilder::default()
            .hostname("127.0.0.1".to_string())
            .port(0)
            .shutdown_rx(shutdown_rx)
            .registry(ctx.registry.clone())
            .pool_state(ctx.pool_state.clone())
            .rpc(ctx.rpc.clone())
            .build()
            .unwrap();
        assert_eq!(server.max_line_length, DEFAULT_MAX_LINE_LENGTH);

        let (ready_tx, ready_rx) = oneshot::channel();
        let server_handle = tokio::spawn(async move { server.start(Some(ready_tx)).await.is_ok() });

        let addr = ready_rx.await.expect("Server should signal readiness");
        assert_ne!(addr.port(), 0);
        assert!(!server_handle.is_finished());

        shutdown_tx.send(()).unwrap();
        assert!(server_handle.await.unwrap());
    }

    #[test_log::test(tokio::test)]
    async fn test_subscribe_with_unreachable_backend_still_responds() {
        let mut rpc = MockBitcoindRpc::new();
        rpc.expect_getbestblockhash().returning(|| {
            Err(BitcoindRpcError::Unreachable {
                message: "connection refused".to_string(),
            })
        });
        let ctx = StratumContext::for_tests(rpc);
        let request = serde_json::to_string(&Request::new_subscribe(1, "cpuminer/2.5")).unwrap();

        let (result, lines) = run_connection(&format!("{request}\n"), ctx).await;

        assert!(result.is_ok());
        assert_eq!(lines, vec![json!({"id": 1, "result": [null, "pool_sha256d"], "error": null})]);
    }

    #[tokio::test]
    async fn test_invalid_json_does_not_close_connection() {
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());
        let input = "this is not json\n{\"id\": 2, \"method\": \"mining.authorize\", \"params\": [\"alice\"]}\n";

        let (result, lines) = run_connection(input, ctx).await;

        assert!(result.is_ok());
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], json!({"id": null, "result": null, "error": "Invalid JSON"}));
        assert_eq!(lines[1], json!({"id": 2, "result": true, "error": null}));
        assert_eq!(lines[2]["method"], "mining.set_nonce_range");
    }

    #[tokio::test]
    async fn test_unknown_method_gets_error_response() {
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());
        let input = "{\"id\": \"q\", \"method\": \"mining.get_transactions\", \"params\": []}\n";

        let (result, lines) = run_connection(input, ctx).await;

        assert!(result.is_ok());
        assert_eq!(lines, vec![json!({"id": "q", "result": null, "error": "Unknown method"})]);
    }

    #[tokio::test]
    async fn test_empty_lines_are_skipped() {
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());

        let (result, lines) = run_connection("\n\n   \n", ctx).await;

        assert!(result.is_ok());
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_line_too_long_closes_connection() {
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());
        let long_line = format!(
            "{{\"id\": 1, \"method\": \"mining.submit\", \"params\": [\"{}\"]}}\n{{\"id\": 2, \"method\": \"mining.subscribe\"}}\n",
            "a".repeat(DEFAULT_MAX_LINE_LENGTH * 2)
        );

        let (result, lines) = run_connection(&long_line, ctx).await;

        assert!(matches!(result, Err(Error::LineTooLong)));
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_block_never_calls_backend() {
        let mut rpc = MockBitcoindRpc::new();
        rpc.expect_testblockvalidity().times(0);
        rpc.expect_submitblock().times(0);
        let ctx = StratumContext::for_tests(rpc);
        let registry = ctx.registry.clone();
        let input = [
            serde_json::to_string(&Request::new_authorize(1, "alice")).unwrap(),
            serde_json::to_string(&Request::new_submit(2, "alice", "job1", None)).unwrap(),
        ]
        .join("\n")
            + "\n";

        let (result, lines) = run_connection(&input, ctx).await;

        assert!(result.is_ok());
        assert_eq!(lines[0], json!({"id": 1, "result": true, "error": null}));
        assert_eq!(
            lines[1],
            json!({"id": null, "method": "mining.set_nonce_range", "params": ["alice", 0, 4294967296u64]})
        );
        assert!(lines.contains(&json!({"id": 2, "result": true, "error": null})));
        assert_eq!(registry.weight("alice".into()).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_invalid_candidate_is_never_submitted() {
        let mut rpc = MockBitcoindRpc::new();
        rpc.expect_testblockvalidity()
            .times(1)
            .returning(|_| Ok(json!("bad-txnmrklroot")));
        rpc.expect_submitblock().times(0);
        let ctx = StratumContext::for_tests(rpc);
        let input = serde_json::to_string(&Request::new_submit(3, "bob", "job7", Some("00ff"))).unwrap() + "\n";

        let (result, lines) = run_connection(&input, ctx).await;

        assert!(result.is_ok());
        assert_eq!(lines, vec![json!({"id": 3, "result": true, "error": null})]);
    }

    #[tokio::test]
    async fn test_disconnect_unbinds_but_keeps_weight() {
        let ctx = StratumContext::for_tests(MockBitcoindRpc::new());
        let registry = ctx.registry.clone();
        let input = serde_json::to_string(&Request::new_authorize(1, "carol")).unwrap() + "\n";

        let (result, _) = run_connection(&input, ctx).await;
        assert!(result.is_ok());

        assert_eq!(registry.range("carol".into()).await.unwrap(), None);
        assert_eq!(registry.weight("carol".into()).await.unwrap(), Some(1));
        assert_eq!(registry.record_share("carol".into()).await.unwrap(), 2);
    }
}
