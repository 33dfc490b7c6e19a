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

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Upper bound for a single round trip to the node.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// JSON-RPC 2.0 shaped request, as accepted by bitcoind and its forks
#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

/// The node answers with both fields present, one of them null.
#[derive(Deserialize, Debug)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Deserialize, Clone)]
pub struct BitcoinRpcConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Custom Debug to redact passwords
impl std::fmt::Debug for BitcoinRpcConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BitcoinRpcConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// The one failure kind surfaced to callers of the backend.
///
/// `Unreachable` covers every transport failure including the request
/// timeout. The remaining variants carry what the node said.
#[derive(Debug)]
pub enum BitcoindRpcError {
    Unreachable { message: String },
    HttpError { status_code: u16, message: String },
    ParseError { message: String },
    RpcError { code: i64, message: String },
}

impl Error for BitcoindRpcError {}

impl fmt::Display for BitcoindRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitcoindRpcError::Unreachable { message } => {
                write!(f, "RPC connection failed: {message}")
            }
            BitcoindRpcError::HttpError {
                status_code,
                message,
            } => {
                write!(f, "HTTP error {status_code}: {message}")
            }
            BitcoindRpcError::ParseError { message } => {
                write!(f, "Parse error: {message}")
            }
            BitcoindRpcError::RpcError { code, message } => {
                write!(f, "RPC error {code}: {message}")
            }
        }
    }
}

impl BitcoindRpcError {
    /// Node errors come as `{"code": .., "message": ..}`, but forks and
    /// proxies also send bare strings.
    fn from_rpc_error(error: Value) -> Self {
        match error {
            Value::String(message) => BitcoindRpcError::RpcError { code: 0, message },
            Value::Object(ref map) => BitcoindRpcError::RpcError {
                code: map.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            },
            other => BitcoindRpcError::RpcError {
                code: 0,
                message: other.to_string(),
            },
        }
    }
}

/// The node operations the pool consumes.
///
/// Every call is a single request/response round trip. Nothing here retries
/// or caches; callers decide how to degrade on failure.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait BitcoindRpc: Send + Sync {
    async fn getbestblockhash(&self) -> Result<String, BitcoindRpcError>;
    async fn getblockheader(&self, blockhash: String) -> Result<Value, BitcoindRpcError>;
    async fn getdifficulty(&self) -> Result<f64, BitcoindRpcError>;
    async fn getblocktemplate(&self) -> Result<Value, BitcoindRpcError>;
    async fn getprioritisedtransactions(&self) -> Result<Value, BitcoindRpcError>;
    async fn getblockchaininfo(&self) -> Result<Value, BitcoindRpcError>;
    /// Returns null when the node would accept the block, otherwise a reason.
    async fn testblockvalidity(&self, block_hex: String) -> Result<Value, BitcoindRpcError>;
    /// Returns null on acceptance, otherwise the node's rejection reason.
    async fn submitblock(&self, block_hex: String) -> Result<Value, BitcoindRpcError>;
}

#[derive(Debug, Clone)]
pub struct BitcoindRpcClient {
    client: reqwest::Client,
    url: String,
    request_id: Arc<AtomicU64>,
}

impl BitcoindRpcClient {
    pub fn new(url: &str, username: &str, password: &str) -> Result<Self, BitcoindRpcError> {
        Self::with_timeout(
            url,
            username,
            password,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn from_config(config: &BitcoinRpcConfig) -> Result<Self, BitcoindRpcError> {
        Self::with_timeout(
            &config.url,
            &config.username,
            &config.password,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn with_timeout(
        url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, BitcoindRpcError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!(
                "Basic {}",
                STANDARD.encode(format!("{username}:{password}"))
            )
            .parse()
            .map_err(|e| BitcoindRpcError::ParseError {
                message: format!("Invalid header: {e}"),
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| BitcoindRpcError::Unreachable {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
            request_id: Arc::new(AtomicU64::new(0)),
        })
    }

    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, BitcoindRpcError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        debug!("Calling {method} on bitcoin node, id={id}");

        let response = match self.client.post(&self.url).json(&request).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!(
                    "HTTP request to bitcoin node failed: timeout={}, error={}",
                    e.is_timeout(),
                    e
                );
                return Err(BitcoindRpcError::Unreachable {
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BitcoindRpcError::Unreachable {
                message: format!("Failed to read response body: {e}"),
            })?;

        // bitcoind reports RPC errors with a 500 status and a JSON body, so try
        // the body before falling back to the bare status.
        let rpc_response = match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(rpc_response) => rpc_response,
            Err(e) => {
                if !status.is_success() {
                    error!(
                        "Error reaching bitcoin node with status={:?}. Message={:?}",
                        status.as_u16(),
                        body
                    );
                    return Err(BitcoindRpcError::HttpError {
                        status_code: status.as_u16(),
                        message: body,
                    });
                }
                return Err(BitcoindRpcError::ParseError {
                    message: format!("Failed to parse response: {e}"),
                });
            }
        };

        if let Some(error) = rpc_response.error.filter(|error| !error.is_null()) {
            return Err(BitcoindRpcError::from_rpc_error(error));
        }
        if !status.is_success() {
            return Err(BitcoindRpcError::HttpError {
                status_code: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_value(rpc_response.result).map_err(|e| BitcoindRpcError::ParseError {
            message: format!("Unexpected result for {method}: {e}"),
        })
    }
}

#[async_trait]
impl BitcoindRpc for BitcoindRpcClient {
    async fn getbestblockhash(&self) -> Result<String, BitcoindRpcError> {
        self.request("getbestblockhash", vec![]).await
    }

    /// Verbose header, so the height comes back decoded
    async fn getblockheader(&self, blockhash: String) -> Result<Value, BitcoindRpcError> {
        self.request(
            "getblockheader",
            vec![Value::String(blockhash), Value::Bool(true)],
        )
        .await
    }

    async fn getdifficulty(&self) -> Result<f64, BitcoindRpcError> {
        self.request("getdifficulty", vec![]).await
    }

    async fn getblocktemplate(&self) -> Result<Value, BitcoindRpcError> {
        let params = vec![serde_json::json!({ "rules": ["segwit"] })];
        self.request("getblocktemplate", params).await
    }

    async fn getprioritisedtransactions(&self) -> Result<Value, BitcoindRpcError> {
        self.request("getprioritisedtransactions", vec![]).await
    }

    async fn getblockchaininfo(&self) -> Result<Value, BitcoindRpcError> {
        self.request("getblockchaininfo", vec![]).await
    }

    async fn testblockvalidity(&self, block_hex: String) -> Result<Value, BitcoindRpcError> {
        self.request("testblockvalidity", vec![Value::String(block_hex)])
            .await
    }

    async fn submitblock(&self, block_hex: String) -> Result<Value, BitcoindRpcError> {
        self.request("submitblock", vec![Value::String(block_hex)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_method, mock_method_error, setup_mock_bitcoin_rpc};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path},
    };

    fn client_for(config: &BitcoinRpcConfig) -> BitcoindRpcClient {
        BitcoindRpcClient::from_config(config).unwrap()
    }

    #[tokio::test]
    async fn test_bitcoin_client() {
        let mock_server = MockServer::start().await;

        let auth_header = format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", "testuser", "testpass"))
        );

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("Authorization", auth_header))
            .and(body_json(json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "test",
                "params": []
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "test response",
                "error": null,
                "id": 0
            })))
            .mount(&mock_server)
            .await;

        let client = BitcoindRpcClient::new(&mock_server.uri(), "testuser", "testpass").unwrap();

        let result: String = client.request("test", vec![]).await.unwrap();

        assert_eq!(result, "test response");
    }

    #[tokio::test]
    async fn test_bitcoin_client_with_invalid_credentials() {
        let mock_server = MockServer::start().await;

        let client =
            BitcoindRpcClient::new(&mock_server.uri(), "invaliduser", "invalidpass").unwrap();
        let result: Result<String, BitcoindRpcError> = client.request("test", vec![]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_reported_as_unreachable() {
        // Nothing listens on the discard port
        let client = BitcoindRpcClient::with_timeout(
            "http://127.0.0.1:9",
            "user",
            "pass",
            Duration::from_millis(500),
        )
        .unwrap();

        let result = client.getbestblockhash().await;
        assert!(matches!(
            result,
            Err(BitcoindRpcError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_node_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": 1.0, "error": null, "id": 0}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let client = BitcoindRpcClient::with_timeout(
            &mock_server.uri(),
            "testuser",
            "testpass",
            Duration::from_millis(200),
        )
        .unwrap();

        let result = client.getdifficulty().await;
        assert!(matches!(
            result,
            Err(BitcoindRpcError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_getbestblockhash() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        let hash = "00000000000000000001a0a3f1b2c3d4e5f60718293a4b5c6d7e8f9011223344";
        mock_method(&mock_server, "getbestblockhash", json!([]), json!(hash)).await;

        let result = client_for(&config).getbestblockhash().await.unwrap();
        assert_eq!(result, hash);
    }

    #[tokio::test]
    async fn test_getblockheader_requests_verbose_header() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        mock_method(
            &mock_server,
            "getblockheader",
            json!(["abcd", true]),
            json!({"hash": "abcd", "height": 840000}),
        )
        .await;

        let header = client_for(&config)
            .getblockheader("abcd".to_string())
            .await
            .unwrap();
        assert_eq!(header["height"], 840000);
    }

    #[tokio::test]
    async fn test_get_difficulty() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        mock_method(&mock_server, "getdifficulty", json!([]), json!(1234.5)).await;

        let difficulty = client_for(&config).getdifficulty().await.unwrap();
        assert_eq!(difficulty, 1234.5);
    }

    #[tokio::test]
    async fn test_getblocktemplate_sends_segwit_rules() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        mock_method(
            &mock_server,
            "getblocktemplate",
            json!([{"rules": ["segwit"]}]),
            json!({"height": 840001, "transactions": []}),
        )
        .await;

        let template = client_for(&config).getblocktemplate().await.unwrap();
        assert_eq!(template["height"], 840001);
    }

    #[tokio::test]
    async fn test_getprioritisedtransactions() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        mock_method(
            &mock_server,
            "getprioritisedtransactions",
            json!([]),
            json!({"aa": {"fee_delta": 100, "in_mempool": true}}),
        )
        .await;

        let prioritised = client_for(&config)
            .getprioritisedtransactions()
            .await
            .unwrap();
        assert_eq!(prioritised.as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_testblockvalidity_returns_null_for_valid_block() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        mock_method(&mock_server, "testblockvalidity", json!(["00ff"]), Value::Null).await;

        let verdict = client_for(&config)
            .testblockvalidity("00ff".to_string())
            .await
            .unwrap();
        assert!(verdict.is_null());
    }

    #[tokio::test]
    async fn test_submitblock_returns_rejection_reason() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        mock_method(&mock_server, "submitblock", json!(["00ff"]), json!("duplicate")).await;

        let result = client_for(&config)
            .submitblock("00ff".to_string())
            .await
            .unwrap();
        assert_eq!(result, json!("duplicate"));
    }

    #[tokio::test]
    async fn test_node_error_with_500_status_is_rpc_error() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        mock_method_error(&mock_server, "submitblock", -22, "Block decode failed").await;

        let result = client_for(&config).submitblock("zz".to_string()).await;
        match result {
            Err(BitcoindRpcError::RpcError { code, message }) => {
                assert_eq!(code, -22);
                assert_eq!(message, "Block decode failed");
            }
            other => panic!("Expected RpcError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_error_body_is_http_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&mock_server)
            .await;

        let client = BitcoindRpcClient::new(&mock_server.uri(), "u", "p").unwrap();
        let result = client.getblockchaininfo().await;
        assert!(matches!(
            result,
            Err(BitcoindRpcError::HttpError {
                status_code: 401,
                ..
            })
        ));
    }

    #[test]
    fn test_string_errors_are_accepted() {
        let error = BitcoindRpcError::from_rpc_error(json!("bad-txns"));
        assert_eq!(error.to_string(), "RPC error 0: bad-txns");
    }

    #[test]
    fn test_config_debug_redacts_password() {
        let config = BitcoinRpcConfig {
            url: "http://localhost:8332".to_string(),
            username: "user".to_string(),
            password: "hunter2".to_string(),
            timeout_secs: 10,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[redacted]"));
    }

    #[tokio::test]
    #[ignore] // Only used to check against a locally running node
    async fn test_bitcoin_client_real_connection() {
        let client = BitcoindRpcClient::new("http://localhost:38332", "user", "pass").unwrap();

        let result = client.getblockchaininfo().await.unwrap();

        assert!(result.is_object());
        assert!(result.get("chain").is_some());
    }
}
