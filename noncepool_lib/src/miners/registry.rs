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

use super::allocator::{allocate, NonceRange};
use crate::stratum::messages::Notification;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Buffer size for channels to send messages to a session.
const MSG_CHANNEL_SIZE: usize = 32;

/// Buffer size for the registry's command channel.
const CMD_CHANNEL_SIZE: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("miner registry is not running")]
    Unavailable,
    #[error("no session registered as {0}")]
    UnknownSession(SessionId),
}

/// Registry assigned id for one connection. Ids are never reused, so a
/// reconnect from the same address gets a distinct entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a new session gets back from the registry: its id, the receiver for
/// pushed notifications and the receiver signalled when it is dropped.
#[derive(Debug)]
pub struct SessionChannels {
    pub id: SessionId,
    pub message_rx: mpsc::Receiver<Arc<String>>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

/// The identity a session ended up bound to, with that identity's range.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub identity: String,
    pub range: NonceRange,
}

/// Channel endpoints and binding for one connected session
struct SessionEntry {
    addr: SocketAddr,
    message_tx: mpsc::Sender<Arc<String>>,
    shutdown_tx: oneshot::Sender<()>,
    identity: Option<String>,
}

/// Commands that can be sent to the MinerRegistry actor
#[derive(Debug)]
pub enum RegistryCommand {
    Add {
        addr: SocketAddr,
        response: oneshot::Sender<SessionChannels>,
    },
    Remove {
        id: SessionId,
    },
    Authorize {
        id: SessionId,
        identity: String,
        response: oneshot::Sender<Result<Binding, RegistryError>>,
    },
    RecordShare {
        identity: String,
        response: oneshot::Sender<u64>,
    },
    GetWeight {
        identity: String,
        response: oneshot::Sender<Option<u64>>,
    },
    GetRange {
        identity: String,
        response: oneshot::Sender<Option<NonceRange>>,
    },
}

/// A handle to interact with the MinerRegistry actor
#[derive(Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    async fn request<T>(
        &self,
        cmd: RegistryCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, RegistryError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RegistryError::Unavailable)?;
        rx.await.map_err(|_| RegistryError::Unavailable)
    }

    /// Register a new session connected from `addr`.
    pub async fn add(&self, addr: SocketAddr) -> Result<SessionChannels, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.request(RegistryCommand::Add { addr, response: tx }, rx)
            .await
    }

    /// Drop a session and its identity binding. The identity's weight is kept.
    /// Fire and forget.
    pub async fn remove(&self, id: SessionId) {
        let _ = self.cmd_tx.send(RegistryCommand::Remove { id }).await;
    }

    /// Bind the session to `identity`, unless it is already bound, in which
    /// case the existing binding is returned.
    pub async fn authorize(&self, id: SessionId, identity: String) -> Result<Binding, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryCommand::Authorize {
                id,
                identity,
                response: tx,
            },
            rx,
        )
        .await?
    }

    /// Count one share for `identity` and return its new weight.
    pub async fn record_share(&self, identity: String) -> Result<u64, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryCommand::RecordShare {
                identity,
                response: tx,
            },
            rx,
        )
        .await
    }

    pub async fn weight(&self, identity: String) -> Result<Option<u64>, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryCommand::GetWeight {
                identity,
                response: tx,
            },
            rx,
        )
        .await
    }

    pub async fn range(&self, identity: String) -> Result<Option<NonceRange>, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryCommand::GetRange {
                identity,
                response: tx,
            },
            rx,
        )
        .await
    }
}

/// Weights, session bindings and the current range table.
///
/// All mutation happens on the actor task, so "update weights, recompute
/// ranges, publish ranges" runs as one step and concurrent submits never see a
/// half updated weight table.
#[derive(Default)]
struct MinerRegistry {
    weights: HashMap<String, u64>,
    sessions: HashMap<SessionId, SessionEntry>,
    ranges: HashMap<String, NonceRange>,
    next_session_id: u64,
}

impl MinerRegistry {
    fn add(&mut self, addr: SocketAddr) -> SessionChannels {
        let (message_tx, message_rx) = mpsc::channel(MSG_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;

        debug!("Session {id} added for {addr}");
        self.sessions.insert(
            id,
            SessionEntry {
                addr,
                message_tx,
                shutdown_tx,
                identity: None,
            },
        );
        SessionChannels {
            id,
            message_rx,
            shutdown_rx,
        }
    }

    /// Drop the session. If that left its identity with no bound session the
    /// active set shrank, so the remaining miners get new ranges.
    fn remove(&mut self, id: SessionId) -> bool {
        let Some(entry) = self.sessions.remove(&id) else {
            return false;
        };
        let _ = entry.shutdown_tx.send(());

        if let Some(identity) = entry.identity {
            if !self.is_bound(&identity) {
                debug!("{identity} has no sessions left, reallocating");
                self.recompute();
                self.broadcast(None);
            }
        }
        true
    }

    fn is_bound(&self, identity: &str) -> bool {
        self.sessions
            .values()
            .any(|entry| entry.identity.as_deref() == Some(identity))
    }

    fn authorize(&mut self, id: SessionId, identity: String) -> Result<Binding, RegistryError> {
        let entry = self
            .sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownSession(id))?;

        let identity = match &entry.identity {
            Some(bound) => bound.clone(),
            None => {
                entry.identity = Some(identity.clone());
                self.weights.entry(identity.clone()).or_insert(1);
                info!("Session {id} from {} authorized as {identity}", entry.addr);
                identity
            }
        };

        self.recompute();
        self.broadcast(Some(id));

        let range = self
            .ranges
            .get(&identity)
            .copied()
            .ok_or(RegistryError::UnknownSession(id))?;
        Ok(Binding { identity, range })
    }

    fn record_share(&mut self, identity: String) -> u64 {
        let weight = self.weights.entry(identity).or_insert(1);
        *weight += 1;
        let weight = *weight;

        self.recompute();
        self.broadcast(None);
        weight
    }

    /// Replace the range table with a fresh allocation over the active set.
    fn recompute(&mut self) {
        let active: HashSet<&str> = self
            .sessions
            .values()
            .filter_map(|entry| entry.identity.as_deref())
            .collect();
        let active_weights: HashMap<&str, u64> = active
            .into_iter()
            .map(|identity| (identity, self.weights.get(identity).copied().unwrap_or(1)))
            .collect();
        self.ranges = allocate(&active_weights);
    }

    /// Push every bound session its identity's range, skipping `except`.
    ///
    /// Delivery is best effort. A session with a full channel misses this
    /// update and gets the next one. A session whose channel is closed has
    /// gone away and is removed.
    fn broadcast(&mut self, except: Option<SessionId>) {
        let mut closed = Vec::new();

        for (id, entry) in &self.sessions {
            if Some(*id) == except {
                continue;
            }
            let Some(identity) = entry.identity.as_deref() else {
                continue;
            };
            let Some(range) = self.ranges.get(identity) else {
                continue;
            };
            let message = match serde_json::to_string(&Notification::set_nonce_range(identity, *range)) {
                Ok(message) => Arc::new(message),
                Err(e) => {
                    warn!("Failed to serialize nonce range for {identity}: {e}");
                    continue;
                }
            };
            match entry.message_tx.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "Session {id} from {} is not keeping up, dropped nonce range update",
                        entry.addr
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            self.remove(id);
        }
    }
}

/// Spawn a new MinerRegistry actor and return a handle to it
pub fn start_registry() -> RegistryHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<RegistryCommand>(CMD_CHANNEL_SIZE);
    let handle = RegistryHandle { cmd_tx };

    let mut registry = MinerRegistry::default();

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                RegistryCommand::Add { addr, response } => {
                    let _ = response.send(registry.add(addr));
                }
                RegistryCommand::Remove { id } => {
                    registry.remove(id);
                }
                RegistryCommand::Authorize {
                    id,
                    identity,
                    response,
                } => {
                    let _ = response.send(registry.authorize(id, identity));
                }
                RegistryCommand::RecordShare { identity, response } => {
                    let _ = response.send(registry.record_share(identity));
                }
                RegistryCommand::GetWeight { identity, response } => {
                    let _ = response.send(registry.weights.get(&identity).copied());
                }
                RegistryCommand::GetRange { identity, response } => {
                    let _ = response.send(registry.ranges.get(&identity).copied());
                }
            }
        }
        debug!("Miner registry stopped");
    });
    handle
}
