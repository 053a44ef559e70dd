//! # Post-Call Analysis
//!
//! Scores a finished call. The lifecycle only sees the [`CallAnalyzer`]
//! trait: it hands over the transcript, the reference script and the persona
//! name, and gets a [`CallAnalysis`] back.
//!
//! [`ChatCompletionsAnalyzer`] is the production implementation. It asks an
//! OpenAI-compatible chat completions endpoint for a JSON verdict.

use crate::config::AnalysisConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// How the call ended for the trainee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Partial,
    Failure,
}

/// Structured verdict on one call. All scores are 0 to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallAnalysis {
    pub overall_score: f64,
    #[serde(default)]
    pub script_adherence: f64,
    #[serde(default)]
    pub objection_handling: f64,
    #[serde(default)]
    pub tonality: f64,
    #[serde(default)]
    pub value_delivery: f64,
    pub outcome: Outcome,
    #[serde(default)]
    pub feedback: String,
}

impl CallAnalysis {
    /// Parse a model reply, rejecting non-numeric scores and clamping the rest
    /// into range.
    pub fn from_model_reply(content: &str) -> AppResult<Self> {
        let mut analysis: CallAnalysis = serde_json::from_str(content)
            .map_err(|e| AppError::AnalysisFailed(format!("Unparseable analysis: {}", e)))?;

        for score in [
            &mut analysis.overall_score,
            &mut analysis.script_adherence,
            &mut analysis.objection_handling,
            &mut analysis.tonality,
            &mut analysis.value_delivery,
        ] {
            if !score.is_finite() {
                return Err(AppError::AnalysisFailed("Analysis contains a non-finite score".to_string()));
            }
            *score = score.clamp(0.0, 100.0);
        }

        Ok(analysis)
    }

    /// JSON document stored as the call's feedback.
    pub fn to_feedback_json(&self) -> AppResult<String> {
        serde_json::to_string(self).map_err(|e| AppError::Internal(format!("Cannot encode analysis: {}", e)))
    }
}

#[async_trait]
pub trait CallAnalyzer: Send + Sync {
    async fn analyze(&self, transcript: &str, script: &str, persona_name: &str) -> AppResult<CallAnalysis>;
}

const SYSTEM_PROMPT: &str =
    "You are an expert sales coach giving constructive feedback on cold call practice. Always answer with valid JSON.";

fn analysis_prompt(transcript: &str, script: &str, persona_name: &str) -> String {
    format!(
        r#"Review this cold call practice session.

ORIGINAL SCRIPT:
{script}

PERSONA BEING PITCHED TO: {persona_name}

CALL TRANSCRIPT:
{transcript}

Score each aspect from 0 to 100:
1. Script adherence: how closely the caller followed the script
2. Objection handling: how well objections were handled
3. Tonality: whether tone and pacing fit the conversation
4. Value delivery: how clearly the value proposition came across
5. Overall: how good the call was as a whole

Answer with this JSON object:
{{
  "overall_score": <0-100>,
  "script_adherence": <0-100>,
  "objection_handling": <0-100>,
  "tonality": <0-100>,
  "value_delivery": <0-100>,
  "outcome": "success" | "partial" | "failure",
  "feedback": "specific, actionable feedback with examples from the call"
}}"#
    )
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Analyzer backed by an OpenAI-compatible chat completions endpoint.
pub struct ChatCompletionsAnalyzer {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl ChatCompletionsAnalyzer {
    pub fn from_config(config: &AnalysisConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Cannot build analysis client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CallAnalyzer for ChatCompletionsAnalyzer {
    async fn analyze(&self, transcript: &str, script: &str, persona_name: &str) -> AppResult<CallAnalysis> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": analysis_prompt(transcript, script, persona_name)}
            ],
            "temperature": self.temperature,
            "response_format": {"type": "json_object"}
        });

        let mut request = self.client.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::AnalysisFailed(format!("Analysis API error {}: {}", status, text)));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| AppError::AnalysisFailed(format!("Analysis response parse error: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::AnalysisFailed("Analysis response has no content".to_string()))?;

        debug!(chars = content.len(), "Received call analysis");
        CallAnalysis::from_model_reply(&content)
    }
}
