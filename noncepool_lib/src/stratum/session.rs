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

use crate::miners::registry::SessionId;
use std::net::SocketAddr;

/// Per connection state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub subscribed: bool,
    /// Set by the first successful authorize and never changed after.
    pub identity: Option<String>,
}

impl Session {
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            subscribed: false,
            identity: None,
        }
    }

    /// Record the identity the registry bound this session to.
    pub fn bind(&mut self, identity: String) {
        if self.identity.is_none() {
            self.identity = Some(identity);
        }
    }
}
