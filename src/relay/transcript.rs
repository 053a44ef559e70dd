//! # Transcript Accumulator
//!
//! Append-only, ordered log of what was said during a call.
//!
//! ## Single-writer funnel:
//! Forwarding loops never touch the log directly. They hold a cloneable
//! [`TranscriptRecorder`] and push `(speaker, text)` pairs into a channel;
//! exactly one [`TranscriptCollector`] drains that channel and owns the
//! [`Transcript`]. The collector finishes only after every recorder has been
//! dropped, so a transcript handed out by [`TranscriptCollector::collect`] can
//! never change again.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Who said something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The trainee making the cold call
    Caller,
    /// The AI-voiced call recipient
    Persona,
}

impl Speaker {
    /// Label used in the joined transcript.
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::Caller => "Caller",
            Speaker::Persona => "Persona",
        }
    }
}

/// One recorded speech turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    /// Arrival position, starting at 0
    pub sequence: u64,
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.speaker.label(), self.text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    utterances: Vec<Utterance>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an utterance at the next sequence position.
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        let sequence = self.utterances.len() as u64;
        self.utterances.push(Utterance {
            speaker,
            text: text.into(),
            sequence,
        });
    }

    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// Render as `"Speaker: text"` lines in append order.
    pub fn joined(&self) -> String {
        self.utterances
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Write side of the funnel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TranscriptRecorder {
    tx: mpsc::UnboundedSender<(Speaker, String)>,
}

impl TranscriptRecorder {
    pub fn record(&self, speaker: Speaker, text: impl Into<String>) {
        // The collector outlives every recorder inside the relay engine
        let _ = self.tx.send((speaker, text.into()));
    }
}

/// Read side of the funnel. There is exactly one per session.
#[derive(Debug)]
pub struct TranscriptCollector {
    rx: mpsc::UnboundedReceiver<(Speaker, String)>,
}

impl TranscriptCollector {
    /// Drain until every recorder is gone and return the finished transcript.
    pub async fn collect(mut self) -> Transcript {
        let mut transcript = Transcript::new();
        while let Some((speaker, text)) = self.rx.recv().await {
            transcript.push(speaker, text);
        }
        transcript
    }
}

/// Create a connected recorder/collector pair.
pub fn channel() -> (TranscriptRecorder, TranscriptCollector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TranscriptRecorder { tx }, TranscriptCollector { rx })
}
