use crate::params::Rate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Permission to issue exactly one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSourceReport {
    /// Ticks that landed in the channel
    pub emitted: u64,
    /// Ticks dropped because the channel was full
    pub dropped: u64,
}

/// Emits one token per period into a bounded channel without ever blocking.
///
/// When the consumers fall behind the channel fills up and further ticks are
/// dropped, so memory stays bounded by the channel capacity and pacing is never
/// delayed by slow consumers.
pub struct RateSource {
    period: Duration,
    tx: mpsc::Sender<Token>,
    shutdown: CancellationToken,
}

impl RateSource {
    pub fn new(rate: Rate, tx: mpsc::Sender<Token>, shutdown: CancellationToken) -> Self {
        Self {
            period: rate.period(),
            tx,
            shutdown,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tick until shutdown is signalled or every receiver is gone.
    ///
    /// Ticks are scheduled from the start time so timer rounding does not
    /// accumulate; ticks missed by a stalled runtime are skipped, not replayed.
    /// Shutdown is checked once per tick, so it takes effect within one period.
    pub async fn run(self) -> RateSourceReport {
        let mut report = RateSourceReport::default();
        let mut ticker = interval(self.period.max(Duration::from_nanos(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.tx.try_send(Token) {
                Ok(()) => report.emitted += 1,
                Err(TrySendError::Full(_)) => report.dropped += 1,
                Err(TrySendError::Closed(_)) => {
                    debug!("Rate source: channel closed, stopping");
                    break;
                }
            }
        }

        debug!(
            "Rate source shutting down (emitted={} dropped={})",
            report.emitted, report.dropped
        );
        report
    }
}
