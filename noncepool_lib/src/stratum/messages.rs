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

use crate::miners::allocator::NonceRange;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// Params should be an array. Anything else is read as no params.
fn params_or_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(params) => params,
        _ => Vec::new(),
    })
}

/// A request line from a miner. The id is kept as raw JSON so it can be
/// echoed back exactly as sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default, deserialize_with = "params_or_empty")]
    pub params: Vec<Value>,
}

impl Request {
    fn new(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            id: json!(id),
            method: method.to_string(),
            params,
        }
    }

    pub fn new_subscribe(id: u64, user_agent: &str) -> Self {
        Self::new(id, "mining.subscribe", vec![json!(user_agent)])
    }

    pub fn new_authorize(id: u64, identity: &str) -> Self {
        Self::new(id, "mining.authorize", vec![json!(identity)])
    }

    /// A share submission. With a block candidate it carries the job fields
    /// and the block hex last.
    pub fn new_submit(id: u64, identity: &str, job_id: &str, block_hex: Option<&str>) -> Self {
        let mut params = vec![json!(identity), json!(job_id)];
        if let Some(block_hex) = block_hex {
            params.push(json!(block_hex));
        }
        Self::new(id, "mining.submit", params)
    }

    pub fn identity(&self) -> Option<&str> {
        self.params
            .first()
            .and_then(Value::as_str)
            .filter(|identity| !identity.is_empty())
    }
}

/// Exactly one of these is written per request.
///
/// All three fields are always present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    pub result: Value,
    pub error: Option<String>,
}

impl Response {
    pub fn new_ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn new_error(id: Value, error: impl ToString) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(error.to_string()),
        }
    }
}

/// Server initiated message, always with a null id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Value,
    pub method: String,
    pub params: Vec<Value>,
}

impl Notification {
    pub fn set_nonce_range(identity: &str, range: NonceRange) -> Self {
        Self {
            id: Value::Null,
            method: "mining.set_nonce_range".to_string(),
            params: vec![json!(identity), json!(range.start), json!(range.size)],
        }
    }
}

/// Anything the server writes back to a miner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Notification(Notification),
    Response(Response),
}
