//! # Session Config Builder
//!
//! Turns a persona into what the upstream voice service needs at session
//! start: a role-play system prompt and the `session.update` payload.
//!
//! ## Properties:
//! - **Pure**: no I/O, same persona and settings always give the same output
//! - **Strict input**: a persona without a name, personality or objections
//!   is rejected rather than producing a half-empty prompt

use crate::call::{Difficulty, Persona};
use crate::config::RealtimeConfig;
use crate::error::{AppError, AppResult};
use serde::Serialize;
use serde_json::Value;

/// Persona attributes the prompt is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaProfile {
    pub name: String,
    pub difficulty: Difficulty,
    pub personality: Value,
    pub objections: Value,
}

impl PersonaProfile {
    /// Build a profile from a stored persona, decoding JSON-in-a-string fields.
    pub fn from_persona(persona: &Persona) -> AppResult<Self> {
        let profile = Self {
            name: persona.name.trim().to_string(),
            difficulty: persona.difficulty,
            personality: decode_structured(&persona.personality),
            objections: decode_structured(&persona.objections),
        };
        profile.ensure_complete()?;
        Ok(profile)
    }

    fn ensure_complete(&self) -> AppResult<()> {
        if self.name.is_empty() {
            return Err(AppError::ValidationError("Persona name is required".to_string()));
        }
        if is_missing(&self.personality) {
            return Err(AppError::ValidationError(format!(
                "Persona {} has no personality",
                self.name
            )));
        }
        if is_missing(&self.objections) {
            return Err(AppError::ValidationError(format!(
                "Persona {} has no objections",
                self.name
            )));
        }
        Ok(())
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Strings holding JSON are decoded; anything else is kept as is.
fn decode_structured(value: &Value) -> Value {
    match value {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// Tone guidance for each difficulty tier.
pub fn difficulty_guidance(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "Be pleasant and relatively easy to convince",
        Difficulty::Medium => "Be moderately skeptical but open to persuasion",
        Difficulty::Hard => "Be very skeptical, rude, and difficult to convince (but not impossible)",
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Render the role-play instructions for the upstream model.
pub fn build_system_prompt(profile: &PersonaProfile) -> AppResult<String> {
    profile.ensure_complete()?;

    let name = &profile.name;
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are {}, a potential customer receiving a cold call.\n\n",
        name
    ));
    prompt.push_str("PERSONALITY & BEHAVIOR:\n");
    prompt.push_str(&pretty(&profile.personality));
    prompt.push_str("\n\n");
    prompt.push_str(&format!(
        "DIFFICULTY LEVEL: {}\n\n",
        profile.difficulty.as_str().to_uppercase()
    ));
    prompt.push_str("YOUR OBJECTIONS:\n");
    prompt.push_str(&pretty(&profile.objections));
    prompt.push_str("\n\n");

    let rules = [
        "Act naturally as this persona would during a real cold call".to_string(),
        "Let the personality traits guide your responses".to_string(),
        "Raise your objections naturally as the conversation unfolds, one at a time".to_string(),
        difficulty_guidance(profile.difficulty).to_string(),
        "Keep responses brief and realistic, like a real phone conversation".to_string(),
        format!("Never reveal you are an AI; stay in character as {}", name),
        "End the call naturally when appropriate: hang up if very dissatisfied, agree to next steps if convinced"
            .to_string(),
    ];
    prompt.push_str("INSTRUCTIONS:\n");
    for rule in &rules {
        prompt.push_str("- ");
        prompt.push_str(rule);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nStart the conversation by answering the phone with a simple \"Hello?\" or similar greeting.",
    );

    Ok(prompt)
}

/// Payload of the upstream `session.update` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: TranscriptionSettings,
    pub turn_detection: TurnDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f64,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl SessionConfig {
    /// Combine finished instructions with the configured voice settings.
    pub fn new(instructions: String, realtime: &RealtimeConfig) -> Self {
        let vad = &realtime.turn_detection;
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions,
            voice: realtime.voice.clone(),
            input_audio_format: realtime.audio_format.clone(),
            output_audio_format: realtime.audio_format.clone(),
            input_audio_transcription: TranscriptionSettings {
                model: realtime.transcription_model.clone(),
            },
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
                threshold: vad.threshold,
                prefix_padding_ms: vad.prefix_padding_ms,
                silence_duration_ms: vad.silence_duration_ms,
            },
        }
    }

    /// Prompt plus session config for a stored persona.
    pub fn for_persona(persona: &Persona, realtime: &RealtimeConfig) -> AppResult<Self> {
        let profile = PersonaProfile::from_persona(persona)?;
        let instructions = build_system_prompt(&profile)?;
        Ok(Self::new(instructions, realtime))
    }
}
