//! # Termination Signal
//!
//! Set-once flag shared by both forwarding loops of a session.
//!
//! The first loop to detect the end of the call records *why* it ended; every
//! later attempt is a no-op, so both loops may race to set it safely. Loops
//! wait on [`TerminationSignal::fired`] alongside their next receive, which
//! lets the other side stop at its receive boundary without being cancelled
//! mid-forward.

use std::fmt;
use tokio::sync::watch;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The client sent `end_call`
    ClientEndedCall,
    /// The client connection went away or stopped accepting messages
    ClientDisconnected,
    /// The upstream sent an `error` event
    UpstreamError(String),
    /// The upstream closed its stream
    UpstreamClosed,
    /// The upstream transport failed mid-stream
    UpstreamUnavailable(String),
    /// The client stayed silent longer than the configured idle timeout
    IdleTimeout,
    /// The configured maximum call length was reached
    SessionLimit,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::ClientEndedCall => write!(f, "client ended call"),
            TerminationReason::ClientDisconnected => write!(f, "client disconnected"),
            TerminationReason::UpstreamError(msg) => write!(f, "upstream error: {}", msg),
            TerminationReason::UpstreamClosed => write!(f, "upstream closed"),
            TerminationReason::UpstreamUnavailable(msg) => write!(f, "upstream unavailable: {}", msg),
            TerminationReason::IdleTimeout => write!(f, "idle timeout"),
            TerminationReason::SessionLimit => write!(f, "session length limit"),
        }
    }
}

#[derive(Debug)]
pub struct TerminationSignal {
    state: watch::Sender<Option<TerminationReason>>,
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationSignal {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(None),
        }
    }

    /// Set the signal. Returns `true` only for the call that actually set it.
    pub fn trigger(&self, reason: TerminationReason) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn is_set(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn reason(&self) -> Option<TerminationReason> {
        self.state.borrow().clone()
    }

    /// Resolve once the signal is set (immediately if it already is).
    pub async fn fired(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the wait cannot fail
        let _ = rx.wait_for(|reason| reason.is_some()).await;
    }
}
