//! # Relay Wire Protocol
//!
//! Message types for both sides of the relay.
//!
//! ## Client connection (JSON text frames):
//! - **Client → Server**: `audio` (base64 chunk), `end_call`
//! - **Server → Client**: `audio`, `transcript`, `response_complete`, `error`,
//!   `call_complete`
//!
//! ## Upstream connection (JSON text frames):
//! - **Outbound**: `session.update` once at connect, then
//!   `input_audio_buffer.append` per audio chunk
//! - **Inbound**: event-tagged frames decoded into [`UpstreamEvent`]
//!
//! Unknown message kinds on either side decode into an `Unknown` variant that
//! the relay ignores, so newer peers never break an older server.

use crate::call::analysis::CallAnalysis;
use crate::relay::session_config::SessionConfig;
use crate::relay::transcript::Speaker;
use serde::{Deserialize, Deserializer, Serialize};

/// Messages the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientInbound {
    /// Microphone audio, base64 encoded, forwarded upstream untouched
    #[serde(rename = "audio")]
    Audio { data: String },

    /// The caller hung up
    #[serde(rename = "end_call")]
    EndCall,

    #[serde(other)]
    Unknown,
}

/// Messages the server sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientOutbound {
    /// Persona audio, base64 encoded as received from upstream
    #[serde(rename = "audio")]
    Audio { data: String },

    /// A finished speech turn
    #[serde(rename = "transcript")]
    Transcript { speaker: Speaker, text: String },

    /// The persona finished a response
    #[serde(rename = "response_complete")]
    ResponseComplete,

    #[serde(rename = "error")]
    Error { message: String },

    /// Final message of a successful call
    #[serde(rename = "call_complete")]
    CallComplete { analysis: CallAnalysis },
}

/// Frames the relay sends upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum UpstreamCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio { audio: String },
}

/// Upstream events the relay understands.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamEvent {
    /// A chunk of persona audio
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },

    /// The caller's speech was transcribed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    /// The persona's spoken response was transcribed
    #[serde(rename = "response.audio_transcript.done")]
    ResponseTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone,

    /// Any `error` frame ends the session, whatever shape its detail has
    #[serde(rename = "error")]
    Error {
        #[serde(default, deserialize_with = "lenient_error_detail")]
        error: UpstreamErrorDetail,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpstreamErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

fn lenient_error_detail<'de, D>(deserializer: D) -> Result<UpstreamErrorDetail, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(UpstreamErrorDetail::deserialize(value).unwrap_or_default())
}

impl UpstreamErrorDetail {
    pub fn message_or_default(&self) -> String {
        self.message.clone().unwrap_or_else(|| "Unknown error".to_string())
    }
}
