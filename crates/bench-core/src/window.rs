use crate::params::{check_discarded, ParamError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time range searched for benchmark traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TraceWindow {
    /// Window ending now that skips the first `discarded` fraction of a run of
    /// length `duration`, so cold starts do not skew the measurements.
    ///
    /// The end is the call time, not the end of the run: collecting after an
    /// extra drain period still covers the tail of the run.
    pub fn resolve(duration: Duration, discarded: f64) -> Result<Self, ParamError> {
        Self::resolve_at(Utc::now(), duration, discarded)
    }

    pub fn resolve_at(
        now: DateTime<Utc>,
        duration: Duration,
        discarded: f64,
    ) -> Result<Self, ParamError> {
        let kept_ms = duration.as_secs_f64() * (1.0 - check_discarded(discarded)?) * 1000.0;
        let start = chrono::Duration::try_milliseconds(kept_ms.round() as i64)
            .and_then(|kept| now.checked_sub_signed(kept))
            .ok_or_else(|| ParamError::Duration(format!("{}s", duration.as_secs_f64())))?;
        Ok(Self { start, end: now })
    }

    pub fn length(&self) -> chrono::Duration {
        self.end - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_excludes_warm_up() {
        let now = Utc::now();
        let window = TraceWindow::resolve_at(now, Duration::from_secs(300), 0.3).unwrap();
        assert_eq!(window.end, now);
        assert_eq!(window.length(), chrono::Duration::seconds(210));
    }

    #[test]
    fn test_window_without_discard_spans_whole_run() {
        let now = Utc::now();
        let window = TraceWindow::resolve_at(now, Duration::from_secs(60), 0.0).unwrap();
        assert_eq!(window.length(), chrono::Duration::seconds(60));
    }

    #[test]
    fn test_window_rejects_bad_fraction() {
        assert!(TraceWindow::resolve(Duration::from_secs(60), 1.0).is_err());
        assert!(TraceWindow::resolve(Duration::from_secs(60), -0.5).is_err());
    }

    #[test]
    fn test_window_ends_at_call_time() {
        let before = Utc::now();
        let window = TraceWindow::resolve(Duration::from_secs(10), 0.5).unwrap();
        assert!(window.end >= before);
        assert!(window.end <= Utc::now());
    }
}
