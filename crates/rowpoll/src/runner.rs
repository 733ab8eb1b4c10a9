//! Drives a poller to completion and writes its messages as JSON lines
//!
//! Used by the `rowpoll run` command. Every message becomes one line of JSON
//! on the writer. Poll failures are logged and counted; the first fatal one
//! ends the run with an error.

use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::config::RowpollConfig;
use crate::error::{Error, Result};
use crate::message::{ErrorMessage, Message, MessageSource};
use crate::poller::{Poller, StopReason, DEFAULT_POLL_INTERVAL};
use crate::stats::SourceStats;

const MESSAGE_BUFFER: usize = 256;
const ERROR_BUFFER: usize = 64;

/// Limits for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Interval between polls
    pub interval: Duration,
    /// Stop after this many polls
    pub max_polls: Option<u64>,
    /// Stop after this many messages
    pub max_messages: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: None,
            max_messages: None,
        }
    }
}

impl RunOptions {
    /// Limits from configuration. `once` limits the run to a single poll.
    pub fn from_config(config: &RowpollConfig, once: bool) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: if once { Some(1) } else { config.max_polls },
            max_messages: config.max_messages,
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The poller stopped on its own
    Poller(StopReason),
    /// `max_messages` messages were written
    MessageLimit,
    /// The shutdown future completed
    Interrupted,
}

/// Outcome of a run that did not fail fatally
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Why the run ended
    pub end: RunEnd,
    /// Messages written
    pub emitted: u64,
    /// Failed polls, none of them fatal
    pub failures: u64,
    /// Poller statistics at the end of the run
    pub stats: SourceStats,
}

/// Poll `source` until a limit is reached, the poller stops or `shutdown`
/// completes, writing every message to `out`.
///
/// Failures still queued when the loop ends are drained before returning.
/// Returns the first fatal failure as an error.
pub async fn run_source<T, W>(
    source: Arc<dyn MessageSource<T>>,
    options: &RunOptions,
    shutdown: impl Future<Output = ()>,
    out: &mut W,
) -> Result<RunSummary>
where
    T: Serialize + Send + 'static,
    W: Write,
{
    let (tx, mut rx) = mpsc::channel::<Message<T>>(MESSAGE_BUFFER);
    let (err_tx, mut err_rx) = mpsc::channel::<ErrorMessage>(ERROR_BUFFER);
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let mut poller = Poller::new(source, tx)
        .with_interval(options.interval)
        .with_error_channel(err_tx);
    if let Some(max_polls) = options.max_polls {
        poller = poller.with_max_polls(max_polls);
    }
    let stats = poller.stats_handle();
    let poller_task = tokio::spawn(poller.run(shutdown_rx));

    tokio::pin!(shutdown);
    let mut failures = Failures::default();
    let mut emitted = 0u64;
    let mut write_error = None;

    let end = loop {
        tokio::select! {
            biased; // a failure queued before the output closed must be seen
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break RunEnd::Interrupted;
            }
            Some(failure) = err_rx.recv() => {
                if failures.record(failure) {
                    break RunEnd::Poller(StopReason::Shutdown);
                }
            }
            message = rx.recv() => {
                let Some(message) = message else {
                    break RunEnd::Poller(StopReason::OutputClosed);
                };
                if let Err(e) = write_line(out, &message) {
                    write_error = Some(e);
                    break RunEnd::Poller(StopReason::OutputClosed);
                }
                emitted += 1;
                if options.max_messages.is_some_and(|max| emitted >= max) {
                    info!(emitted, "Message limit reached");
                    break RunEnd::MessageLimit;
                }
            }
        }
    };

    // closing the output unblocks a poller waiting to send
    drop(rx);
    let _ = shutdown_tx.send(());
    while let Some(failure) = err_rx.recv().await {
        failures.record(failure);
    }

    let reason = poller_task.await?;
    let end = match end {
        RunEnd::Poller(_) => RunEnd::Poller(reason),
        other => other,
    };
    let stats = stats.snapshot();
    info!(end = ?end, emitted, failures = failures.count, stats = ?stats, "Run finished");

    if let Some(e) = write_error {
        return Err(e.into());
    }
    if let Some(e) = failures.fatal {
        return Err(e);
    }
    Ok(RunSummary {
        end,
        emitted,
        failures: failures.count,
        stats,
    })
}

fn write_line<T: Serialize, W: Write>(out: &mut W, message: &Message<T>) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, message)?;
    out.write_all(b"\n")?;
    out.flush()
}

#[derive(Default)]
struct Failures {
    count: u64,
    fatal: Option<Error>,
}

impl Failures {
    /// Log and count a failure. Returns `true` for the first fatal one.
    fn record(&mut self, failure: ErrorMessage) -> bool {
        let fatal = failure.error().is_fatal();
        error!(
            component = failure.component_type(),
            error = %failure.error(),
            fatal,
            "Poll failed"
        );

        if !fatal {
            self.count += 1;
            return false;
        }
        if self.fatal.is_some() {
            return false;
        }
        self.fatal = Some(failure.into_error());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let config = RowpollConfig::from_yaml(
            "connection_url: postgres://localhost/shop\nquery: SELECT 1\npoll_interval_ms: 250\nmax_polls: 5\nmax_messages: 9\n",
        )
        .unwrap();

        let options = RunOptions::from_config(&config, false);
        assert_eq!(options.interval, Duration::from_millis(250));
        assert_eq!(options.max_polls, Some(5));
        assert_eq!(options.max_messages, Some(9));

        assert_eq!(RunOptions::from_config(&config, true).max_polls, Some(1));
    }

    #[test]
    fn test_only_first_fatal_failure_is_kept() {
        let mut failures = Failures::default();

        assert!(!failures.record(ErrorMessage::new(
            Error::expression("unknown variable 'id'"),
            "test"
        )));
        assert!(failures.record(ErrorMessage::new(Error::Uninitialized, "test")));
        assert!(!failures.record(ErrorMessage::new(Error::config("late"), "test")));

        assert_eq!(failures.count, 1);
        assert!(matches!(failures.fatal, Some(Error::Uninitialized)));
    }
}
