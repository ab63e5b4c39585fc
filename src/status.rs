//! Status codes and the live status snapshot of a running sequence.
//!
//! Severity is ordered `Ok < Warn < Busy < NotReached < Error`; combining
//! statuses always keeps the worst one, so a sub-device fault surfaces through
//! a sequencer that is itself merely busy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status severity code, ordered from best to worst.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusCode {
    /// Idle, at target.
    Ok,
    /// Operational with a warning attached.
    Warn,
    /// An operation is in flight.
    Busy,
    /// A stop request ended the operation before the target was reached.
    NotReached,
    /// Unrecoverable failure.
    Error,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Ok => "ok",
            StatusCode::Warn => "warning",
            StatusCode::Busy => "busy",
            StatusCode::NotReached => "not reached",
            StatusCode::Error => "error",
        };
        f.write_str(s)
    }
}

/// A point-in-time status snapshot: severity code, human-readable text, and
/// the timestamp of the last transition.
///
/// Equality compares code and text only. `since` changes only when the
/// (code, text) pair changes, so repeated reads without an intervening
/// transition return identical snapshots.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeqStatus {
    pub code: StatusCode,
    pub text: String,
    pub since: DateTime<Utc>,
}

impl SeqStatus {
    pub fn new(code: StatusCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into().trim().to_string(),
            since: Utc::now(),
        }
    }

    /// The resting status of a sequencer: `(Ok, "idle")`.
    pub fn idle() -> Self {
        Self::new(StatusCode::Ok, "idle")
    }

    pub fn is_busy(&self) -> bool {
        self.code == StatusCode::Busy
    }

    /// Returns the worse of the two statuses by severity.
    pub fn worse(self, other: SeqStatus) -> SeqStatus {
        if other.code > self.code {
            other
        } else {
            self
        }
    }
}

impl PartialEq for SeqStatus {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.text == other.text
    }
}

impl Eq for SeqStatus {}

impl fmt::Display for SeqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(StatusCode::Ok < StatusCode::Warn);
        assert!(StatusCode::Warn < StatusCode::Busy);
        assert!(StatusCode::Busy < StatusCode::NotReached);
        assert!(StatusCode::NotReached < StatusCode::Error);
    }

    #[test]
    fn test_worse_keeps_highest_severity() {
        let busy = SeqStatus::new(StatusCode::Busy, "moving");
        let fault = SeqStatus::new(StatusCode::Error, "axis fault");
        assert_eq!(busy.clone().worse(fault.clone()), fault);
        assert_eq!(fault.clone().worse(busy), fault);
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let a = SeqStatus::new(StatusCode::Ok, "idle");
        let b = SeqStatus::idle();
        assert_eq!(a, b);
    }

    #[test]
    fn test_text_is_trimmed() {
        let s = SeqStatus::new(StatusCode::Busy, "  waiting for: wait(5s)  ");
        assert_eq!(s.text, "waiting for: wait(5s)");
    }
}
