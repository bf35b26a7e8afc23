// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Detached bounded workers.
//!
//! All provider work runs inside a detached worker: a spawned task that the
//! caller waits on for at most a fixed wall-clock bound. When the bound is
//! exceeded the worker is aborted. Subprocesses are spawned with
//! `kill_on_drop`, so aborting a worker also kills whatever it was waiting on.
//! A panic inside the worker is captured instead of unwinding into the caller.

use std::{any::Any, future::Future, time::Duration};
use tokio::task::JoinError;
use tracing::warn;

/// Run future as a detached worker with a hard wall-clock bound.
///
/// # Errors
///
/// - Return [`WorkerError::TimedOut`] if bound elapses first.
/// - Return [`WorkerError::Panicked`] if work panics.
pub async fn run_detached<F, T>(bound: Duration, work: F) -> Result<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(work);
    match tokio::time::timeout(bound, &mut handle).await {
        Ok(joined) => joined.map_err(WorkerError::from),
        Err(_) => {
            warn!("worker exceeded {}s bound, aborting", bound.as_secs_f32());
            handle.abort();
            Err(WorkerError::TimedOut(bound))
        }
    }
}

/// Run blocking closure as a detached worker with a hard wall-clock bound.
///
/// Blocking threads cannot be interrupted. On timeout the caller resumes
/// immediately, and the thread is left to finish in the background.
///
/// # Errors
///
/// - Return [`WorkerError::TimedOut`] if bound elapses first.
/// - Return [`WorkerError::Panicked`] if work panics.
pub async fn run_blocking<F, T>(bound: Duration, work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(bound, &mut handle).await {
        Ok(joined) => joined.map_err(WorkerError::from),
        Err(_) => {
            warn!("blocking worker exceeded {}s bound, detaching", bound.as_secs_f32());
            Err(WorkerError::TimedOut(bound))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }

    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }

    "worker panicked".into()
}

/// Detached worker error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Worker exceeded its wall-clock bound.
    #[error("timed out after {}s", .0.as_secs_f32())]
    TimedOut(Duration),

    /// Worker panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// Worker was cancelled by the runtime.
    #[error("cancelled")]
    Cancelled,
}

impl From<JoinError> for WorkerError {
    fn from(error: JoinError) -> Self {
        if error.is_panic() {
            Self::Panicked(panic_message(error.into_panic()))
        } else {
            Self::Cancelled
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = WorkerError> = std::result::Result<T, E>;
