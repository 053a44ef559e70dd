//! Wall-clock timing of a call session.

use chrono::{DateTime, Utc};

/// Captures the start of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimer {
    started_at: DateTime<Utc>,
}

/// Start and end of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: u64,
}

impl SessionTimer {
    pub fn start() -> Self {
        Self::started_at(Utc::now())
    }

    pub fn started_at(started_at: DateTime<Utc>) -> Self {
        Self { started_at }
    }

    pub fn stop(self) -> SessionTiming {
        self.stop_at(Utc::now())
    }

    pub fn stop_at(self, ended_at: DateTime<Utc>) -> SessionTiming {
        SessionTiming {
            started_at: self.started_at,
            ended_at,
            duration_secs: whole_seconds_between(self.started_at, ended_at),
        }
    }
}

/// Elapsed whole seconds, truncated. A clock that stepped backwards yields 0.
pub fn whole_seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_seconds().max(0) as u64
}
