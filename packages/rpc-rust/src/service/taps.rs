//! Diagnostic taps: one log line per queue event, gated by the configured
//! level.

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;
use tracing::Level;

use jobwire_core::QueueEvent;

/// Render the log line for `event` on `service`.
///
/// Returns `None` for events that never produce a line (`Ready` is logged by
/// the server itself when it binds).
#[must_use]
pub fn tap_line(service: &str, event: &QueueEvent) -> Option<(Level, String)> {
    let line = match event {
        QueueEvent::Ready => return None,
        QueueEvent::Error { message } => (Level::WARN, format!("{service}|E|{message}")),
        QueueEvent::Failed { job_id, error } => {
            (Level::WARN, format!("{service}|F|{job_id}|{error}"))
        }
        QueueEvent::Stalled { job_id } => (Level::WARN, format!("{service}|S|{job_id}")),
        QueueEvent::Retrying { job_id, error } => {
            (Level::INFO, format!("{service}|R|{job_id}|{error}"))
        }
        QueueEvent::Progress { job_id, percent } => {
            (Level::INFO, format!("{service}|P|{job_id}|{percent}%"))
        }
        QueueEvent::Succeeded { job_id, result } => {
            (Level::INFO, format!("{service}|OK|{job_id}|{result}"))
        }
    };
    Some(line)
}

/// Whether any tap line is visible at `level`.
#[must_use]
pub fn taps_enabled(level: LevelFilter) -> bool {
    level >= LevelFilter::WARN
}

fn emit(service: &str, event: &QueueEvent, level: LevelFilter) {
    let Some((line_level, line)) = tap_line(service, event) else {
        return;
    };
    if level < line_level {
        return;
    }
    if line_level == Level::WARN {
        tracing::warn!(target: "jobwire::tap", "{line}");
    } else {
        tracing::info!(target: "jobwire::tap", "{line}");
    }
}

/// Spawn the tap task for one queue.
///
/// Runs until the queue's event channel closes or `shutdown` flips to
/// `true`; on shutdown, events already buffered are still logged.
pub fn spawn(
    service: String,
    mut events: broadcast::Receiver<QueueEvent>,
    level: LevelFilter,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                received = events.recv() => match received {
                    Ok(event) => emit(&service, &event, level),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(service = %service, skipped, "tap lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
        while let Ok(event) = events.try_recv() {
            emit(&service, &event, level);
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
