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

#[cfg(unix)]
use tokio::signal::unix::{self, SignalKind};

use std::process::ExitCode;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Why the pool is stopping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// No shutdown requested yet
    None,
    /// ctrl-c, SIGTERM or SIGHUP
    Signal,
    /// A component failed
    Error,
}

impl ShutdownReason {
    /// Only an operator stop is a clean exit.
    pub fn exit_code(self) -> ExitCode {
        match self {
            ShutdownReason::Signal => ExitCode::SUCCESS,
            ShutdownReason::None | ShutdownReason::Error => ExitCode::FAILURE,
        }
    }
}

#[cfg(unix)]
async fn operator_signal() -> std::io::Result<&'static str> {
    let mut hangup = unix::signal(SignalKind::hangup())?;
    let mut terminate = unix::signal(SignalKind::terminate())?;

    Ok(tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            "SIGINT"
        }
        _ = hangup.recv() => "SIGHUP",
        _ = terminate.recv() => "SIGTERM",
    })
}

#[cfg(not(unix))]
async fn operator_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

/// Resolves once some component has published a reason other than `None`.
async fn requested_shutdown(mut exit_receiver: watch::Receiver<ShutdownReason>) -> ShutdownReason {
    loop {
        let reason = *exit_receiver.borrow_and_update();
        if reason != ShutdownReason::None {
            return reason;
        }
        if exit_receiver.changed().await.is_err() {
            return ShutdownReason::Error;
        }
    }
}

/// Spawn the task that decides when and why the pool stops.
///
/// Stops on the first of an operator signal or a component publishing a
/// reason on `exit_sender`. Then the stratum server is told to stop accepting,
/// the final reason is published for anyone else watching and returned from
/// the task.
pub fn spawn_shutdown_watcher(
    exit_sender: watch::Sender<ShutdownReason>,
    stratum_shutdown_tx: oneshot::Sender<()>,
) -> JoinHandle<ShutdownReason> {
    let exit_receiver = exit_sender.subscribe();
    tokio::spawn(async move {
        let reason = tokio::select! {
            signal = operator_signal() => match signal {
                Ok(name) => {
                    info!("Received {name}. Stopping...");
                    ShutdownReason::Signal
                }
                Err(e) => {
                    error!("Cannot listen for signals: {e}");
                    ShutdownReason::Error
                }
            },
            reason = requested_shutdown(exit_receiver) => {
                info!("Shutdown requested: {reason:?}");
                reason
            }
        };

        info!("NoncePool shutting down...");
        // the server is already gone if it failed to start
        let _ = stratum_shutdown_tx.send(());
        exit_sender.send_replace(reason);
        reason
    })
}
