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

use crate::{BitcoinRpcConfig, DEFAULT_TIMEOUT_SECS};
use base64::Engine;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn auth_header() -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", "testuser", "testpass"))
    )
}

pub async fn setup_mock_bitcoin_rpc() -> (MockServer, BitcoinRpcConfig) {
    let mock_server = MockServer::start().await;

    let config = BitcoinRpcConfig {
        url: mock_server.uri(),
        username: "testuser".to_string(),
        password: "testpass".to_string(),
        timeout_secs: DEFAULT_TIMEOUT_SECS,
    };

    (mock_server, config)
}

/// Answer `api_method` called with exactly `params` with `result`.
///
/// The request id is not matched as it increments on every call.
pub async fn mock_method(
    mock_server: &MockServer,
    api_method: &str,
    params: serde_json::Value,
    result: serde_json::Value,
) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("Authorization", auth_header()))
        .and(body_partial_json(serde_json::json!({
            "jsonrpc": "2.0",
            "method": api_method,
            "params": params,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({ "jsonrpc": "2.0", "result": result, "error": null, "id": 0 }),
        ))
        .mount(mock_server)
        .await;
}

/// Answer any call to `api_method` with a node error, the way bitcoind does
/// with a 500 status.
pub async fn mock_method_error(mock_server: &MockServer, api_method: &str, code: i64, message: &str) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("Authorization", auth_header()))
        .and(body_partial_json(serde_json::json!({ "method": api_method })))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "result": null,
            "error": { "code": code, "message": message },
            "id": 0
        })))
        .mount(mock_server)
        .await;
}
