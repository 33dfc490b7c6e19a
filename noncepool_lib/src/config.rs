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

use bitcoindrpc::BitcoinRpcConfig;
use serde::Deserialize;

/// Environment variables override the file, e.g. `NONCEPOOL_STRATUM__PORT`.
pub const ENV_PREFIX: &str = "NONCEPOOL";

const DEFAULT_STRATUM_HOSTNAME: &str = "0.0.0.0";
const DEFAULT_STRATUM_PORT: i64 = 3333;
const DEFAULT_MAX_LINE_LENGTH: i64 = 8 * 1024;
const DEFAULT_PUBLIC_URL: &str = "stratum+tcp://127.0.0.1:3333";
const DEFAULT_BITCOINRPC_URL: &str = "http://127.0.0.1:8332";
const DEFAULT_BITCOINRPC_USERNAME: &str = "user";
const DEFAULT_BITCOINRPC_PASSWORD: &str = "pass";

#[derive(Debug, Deserialize, Clone)]
pub struct StratumConfig {
    /// The hostname for the Stratum server
    pub hostname: String,
    /// The port for the Stratum server
    pub port: u16,
    /// Longest accepted request line in bytes, longer lines close the connection
    pub max_line_length: usize,
    /// The URL miners are told to connect to
    pub public_url: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    /// Log to file if specified
    pub file: Option<String>,
    /// Log level (defaults to "info")
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to console, on unless disabled
    pub console: Option<bool>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub stratum: StratumConfig,
    pub bitcoinrpc: BitcoinRpcConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment,
    /// each layer overriding the previous one.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("stratum.hostname", DEFAULT_STRATUM_HOSTNAME)?
            .set_default("stratum.port", DEFAULT_STRATUM_PORT)?
            .set_default("stratum.max_line_length", DEFAULT_MAX_LINE_LENGTH)?
            .set_default("stratum.public_url", DEFAULT_PUBLIC_URL)?
            .set_default("bitcoinrpc.url", DEFAULT_BITCOINRPC_URL)?
            .set_default("bitcoinrpc.username", DEFAULT_BITCOINRPC_USERNAME)?
            .set_default("bitcoinrpc.password", DEFAULT_BITCOINRPC_PASSWORD)?
            .set_default(
                "bitcoinrpc.timeout_secs",
                bitcoindrpc::DEFAULT_TIMEOUT_SECS as i64,
            )?
            .set_default("logging.level", default_log_level())?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn with_stratum_hostname(mut self, stratum_hostname: String) -> Self {
        self.stratum.hostname = stratum_hostname;
        self
    }

    pub fn with_stratum_port(mut self, stratum_port: u16) -> Self {
        self.stratum.port = stratum_port;
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.stratum.max_line_length = max_line_length;
        self
    }

    pub fn with_bitcoinrpc_url(mut self, bitcoin_url: String) -> Self {
        self.bitcoinrpc.url = bitcoin_url;
        self
    }

    pub fn with_bitcoinrpc_username(mut self, bitcoin_username: String) -> Self {
        self.bitcoinrpc.username = bitcoin_username;
        self
    }

    pub fn with_bitcoinrpc_password(mut self, bitcoin_password: String) -> Self {
        self.bitcoinrpc.password = bitcoin_password;
        self
    }

    pub fn with_log_level(mut self, level: String) -> Self {
        self.logging.level = level;
        self
    }
}
