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

use crate::pool_state::fetch_snapshot;
use bitcoindrpc::BitcoindRpc;
use std::error::Error;

/// Implementation of the info command
///
/// Fetches a fresh pool state snapshot and prints it. Fails if bitcoind
/// cannot be reached.
pub async fn execute(rpc: &dyn BitcoindRpc) -> Result<(), Box<dyn Error>> {
    let snapshot = fetch_snapshot(rpc).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::execute;
    use bitcoindrpc::test_utils::{mock_method, mock_method_error, setup_mock_bitcoin_rpc};
    use bitcoindrpc::BitcoindRpcClient;
    use serde_json::json;

    const TIP: &str = "000000000000000000024bead8df69990852c202db0e0097c1a12ea637d7e96d";

    #[tokio::test]
    async fn test_execute_prints_snapshot() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        mock_method(&mock_server, "getbestblockhash", json!([]), json!(TIP)).await;
        mock_method(
            &mock_server,
            "getblockheader",
            json!([TIP, true]),
            json!({"hash": TIP, "height": 800000}),
        )
        .await;
        mock_method(&mock_server, "getdifficulty", json!([]), json!(53911173001054.59)).await;
        mock_method(
            &mock_server,
            "getblocktemplate",
            json!([{"rules": ["segwit"]}]),
            json!({"height": 800001}),
        )
        .await;
        mock_method(&mock_server, "getprioritisedtransactions", json!([]), json!({})).await;
        let client = BitcoindRpcClient::from_config(&config).unwrap();

        assert!(execute(&client).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_fails_when_backend_errors() {
        let (mock_server, config) = setup_mock_bitcoin_rpc().await;
        mock_method_error(&mock_server, "getbestblockhash", -28, "Loading block index...").await;
        let client = BitcoindRpcClient::from_config(&config).unwrap();

        assert!(execute(&client).await.is_err());
    }
}
