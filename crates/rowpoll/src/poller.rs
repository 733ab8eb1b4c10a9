//! Fixed-interval poller
//!
//! Calls `receive()` on a [`MessageSource`] once per tick, runs the returned
//! handle and forwards one [`Message`] per row to the output channel. Row
//! messages from a stream poll are correlated to the poll and numbered from 1.
//!
//! Failures, whether raised by `receive()` or by the database while the
//! handle runs, become [`ErrorMessage`]s on the error channel. A polled
//! message carrying an [`ERROR_CHANNEL`] header sends its failures to the
//! channel registered under that name instead. Without an error channel
//! failures are logged. Either way the poller keeps going.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::message::{
    ErrorMessage, Message, MessageHeaders, MessageSource, ERROR_CHANNEL, SEQUENCE_NUMBER,
};
use crate::source::Payload;
use crate::stats::{AtomicSourceStats, SourceStats};

/// Default interval between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Shortest accepted interval between polls
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Why a poller stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was signalled
    Shutdown,
    /// The poll limit was reached
    MaxPolls,
    /// The output channel was closed
    OutputClosed,
}

/// Drives a message source on a fixed interval
pub struct Poller<T> {
    source: Arc<dyn MessageSource<T>>,
    output: mpsc::Sender<Message<T>>,
    error_channel: Option<mpsc::Sender<ErrorMessage>>,
    named_error_channels: HashMap<String, mpsc::Sender<ErrorMessage>>,
    interval: Duration,
    max_polls: Option<u64>,
    stats: Arc<AtomicSourceStats>,
}

impl<T: Send + 'static> Poller<T> {
    /// Poll `source` and send row messages to `output`
    pub fn new(source: Arc<dyn MessageSource<T>>, output: mpsc::Sender<Message<T>>) -> Self {
        Self {
            source,
            output,
            error_channel: None,
            named_error_channels: HashMap::new(),
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: None,
            stats: Arc::new(AtomicSourceStats::default()),
        }
    }

    /// Set the interval between polls, at least [`MIN_POLL_INTERVAL`]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_POLL_INTERVAL {
            warn!(requested = ?interval, "Poll interval too short, using {:?}", MIN_POLL_INTERVAL);
        }
        self.interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Interval between polls
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop after `max_polls` polls
    pub fn with_max_polls(mut self, max_polls: u64) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    /// Route failures to `errors` instead of the log
    pub fn with_error_channel(mut self, errors: mpsc::Sender<ErrorMessage>) -> Self {
        self.error_channel = Some(errors);
        self
    }

    /// Route failures of messages whose [`ERROR_CHANNEL`] header is `name` to `errors`
    pub fn with_named_error_channel(
        mut self,
        name: impl Into<String>,
        errors: mpsc::Sender<ErrorMessage>,
    ) -> Self {
        self.named_error_channels.insert(name.into(), errors);
        self
    }

    /// Shared statistics counters, readable while the poller runs
    pub fn stats_handle(&self) -> Arc<AtomicSourceStats> {
        Arc::clone(&self.stats)
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SourceStats {
        self.stats.snapshot()
    }

    /// Poll until shutdown, the poll limit, or the output channel closing
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> StopReason {
        let component = self.source.component_type();
        info!(
            component,
            interval_ms = self.interval.as_millis() as u64,
            max_polls = ?self.max_polls,
            "Poller started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = 0u64;

        let reason = loop {
            if self.max_polls.is_some_and(|max| polls >= max) {
                break StopReason::MaxPolls;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break StopReason::Shutdown,
                _ = ticker.tick() => {}
            }

            polls += 1;
            if !self.poll_once().await {
                break StopReason::OutputClosed;
            }
        };

        info!(component, reason = ?reason, stats = ?self.stats.snapshot(), "Poller stopped");
        reason
    }

    /// Run a single poll. Returns `false` once the output channel is closed.
    pub async fn poll_once(&self) -> bool {
        self.stats.record_poll();
        let message = match self.source.receive() {
            Ok(message) => message,
            Err(e) => {
                self.stats.record_resolution_failure();
                self.report(e, None).await;
                return true;
            }
        };

        let (headers, payload) = message.into_parts();
        let mut sent = 0u64;

        match payload {
            Payload::Single(fut) => match fut.await {
                Ok(Some(value)) => {
                    if !self.send(Message::with_headers(value, headers)).await {
                        return false;
                    }
                    sent = 1;
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.record_database_failure();
                    self.report(e.into(), Some(&headers)).await;
                    return true;
                }
            },
            Payload::Stream(mut rows) => {
                while let Some(row) = rows.next().await {
                    match row {
                        Ok(value) => {
                            let mut row_headers = headers.derive();
                            row_headers.insert(SEQUENCE_NUMBER, (sent + 1).to_string());
                            if !self.send(Message::with_headers(value, row_headers)).await {
                                return false;
                            }
                            sent += 1;
                        }
                        Err(e) => {
                            self.stats.record_database_failure();
                            self.report(e.into(), Some(&headers)).await;
                            if sent > 0 {
                                self.stats.record_messages(sent);
                            }
                            debug!(messages = sent, "Poll aborted");
                            return true;
                        }
                    }
                }
            }
        }

        debug!(messages = sent, "Poll complete");
        self.stats.record_messages(sent);
        true
    }

    async fn send(&self, message: Message<T>) -> bool {
        if self.output.send(message).await.is_err() {
            warn!(component = self.source.component_type(), "Output channel closed");
            return false;
        }
        true
    }

    fn error_channel_for(
        &self,
        failed: Option<&MessageHeaders>,
    ) -> Option<&mpsc::Sender<ErrorMessage>> {
        let Some(name) = failed.and_then(|headers| headers.get(ERROR_CHANNEL)) else {
            return self.error_channel.as_ref();
        };
        match self.named_error_channels.get(name) {
            Some(errors) => Some(errors),
            None => {
                warn!(error_channel = name, "Unknown error channel, using the default");
                self.error_channel.as_ref()
            }
        }
    }

    async fn report(&self, e: Error, failed: Option<&MessageHeaders>) {
        let component = self.source.component_type();
        let Some(errors) = self.error_channel_for(failed) else {
            error!(component, error = %e, fatal = e.is_fatal(), "Poll failed");
            return;
        };

        let message = match failed {
            Some(headers) => ErrorMessage::for_message(e, component, headers),
            None => ErrorMessage::new(e, component),
        };
        if let Err(mpsc::error::SendError(message)) = errors.send(message).await {
            error!(component, error = %message.error(), "Poll failed and error channel is closed");
        }
    }
}
