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

use std::fmt;

/// Errors raised while serving a miner connection.
///
/// `InvalidJson`, `UnknownMethod` and `InvalidParams` are answered with an
/// error response and the connection stays open. The rest end the session.
#[derive(Debug)]
pub enum Error {
    InvalidJson,
    UnknownMethod(String),
    InvalidParams(String),
    LineTooLong,
    Io(std::io::Error),
    RegistryUnavailable,
}

impl Error {
    /// True when the miner can carry on after the error response.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidJson | Self::UnknownMethod(_) | Self::InvalidParams(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson => write!(f, "Invalid JSON"),
            Self::UnknownMethod(_) => write!(f, "Unknown method"),
            Self::InvalidParams(msg) => write!(f, "Invalid parameters provided: {msg}"),
            Self::LineTooLong => write!(f, "Line exceeds maximum length"),
            Self::Io(err) => write!(f, "IO error: {err}"),
            Self::RegistryUnavailable => write!(f, "Miner registry unavailable"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<crate::miners::registry::RegistryError> for Error {
    fn from(_: crate::miners::registry::RegistryError) -> Self {
        Self::RegistryUnavailable
    }
}
