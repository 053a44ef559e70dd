//! # Call Lifecycle Controller
//!
//! Runs one practice call from the moment the client connects until the
//! score is stored.
//!
//! ## Steps:
//! 1. **Load**: call, persona and script from the [`CallStore`]
//! 2. **Configure**: persona prompt and upstream session config
//! 3. **Connect**: open the upstream voice session
//! 4. **Relay**: run the [`RelayEngine`] until the call ends
//! 5. **Persist**: store transcript and duration *before* analysis, so a failed
//!    analysis never loses the conversation
//! 6. **Score**: analysis, stats, achievements
//! 7. **Report**: `call_complete` to the client
//!
//! Whatever happens, the client connection is closed when [`CallLifecycle::run`]
//! returns, and a failure is reported to the client as an `error` event first.

use crate::call::achievements::{AchievementRules, ScoredCall};
use crate::call::analysis::{CallAnalysis, CallAnalyzer};
use crate::call::store::CallStore;
use crate::call::{Achievement, CallId, CallRecord, Persona, PersonaId, Script, UserId};
use crate::config::{AppConfig, RealtimeConfig};
use crate::error::{AppError, AppResult};
use crate::relay::client::{ClientSink, ClientSource};
use crate::relay::engine::{RelayEngine, RelayOptions};
use crate::relay::protocol::ClientOutbound;
use crate::relay::session_config::SessionConfig;
use crate::relay::termination::TerminationReason;
use crate::relay::upstream::UpstreamConnector;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-call settings, snapshotted from the live configuration when the
/// client connects.
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub realtime: RealtimeConfig,
    pub relay: RelayOptions,
}

impl CallSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            realtime: config.realtime.clone(),
            relay: RelayOptions {
                idle_timeout: config.session.idle_timeout(),
                max_duration: config.session.max_duration(),
            },
        }
    }
}

/// A scored call and the badges it unlocked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub analysis: CallAnalysis,
    pub new_achievements: Vec<Achievement>,
}

/// Result of a call that ran to the end.
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub call_id: CallId,
    pub session_id: Uuid,
    pub reason: TerminationReason,
    pub duration_secs: u64,
    pub report: AnalysisReport,
}

pub struct CallLifecycle {
    store: Arc<dyn CallStore>,
    analyzer: Arc<dyn CallAnalyzer>,
    connector: Arc<dyn UpstreamConnector>,
    rules: AchievementRules,
}

impl CallLifecycle {
    pub fn new(
        store: Arc<dyn CallStore>,
        analyzer: Arc<dyn CallAnalyzer>,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Self {
        Self {
            store,
            analyzer,
            connector,
            rules: AchievementRules,
        }
    }

    pub fn store(&self) -> &Arc<dyn CallStore> {
        &self.store
    }

    /// Create an empty call record for `user_id` against `persona_id`.
    pub async fn start_call(&self, user_id: UserId, persona_id: PersonaId) -> AppResult<CallRecord> {
        if self.store.get_persona(persona_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Persona {} not found", persona_id)));
        }
        let call = self.store.create_call(user_id, persona_id).await?;
        info!(call_id = call.id, user_id, persona_id, "Call created");
        Ok(call)
    }

    /// Run a live call over an accepted client connection.
    pub async fn run(
        &self,
        call_id: CallId,
        source: Box<dyn ClientSource>,
        client: Arc<dyn ClientSink>,
        settings: CallSettings,
    ) -> AppResult<CallSummary> {
        let span = info_span!("call", call_id);
        async move {
            let result = self.drive(call_id, source, client.clone(), &settings).await;

            if let Err(err) = &result {
                error!(error = %err, "Call failed");
                if client.is_writable() {
                    if let Err(send_err) = client.send(ClientOutbound::Error { message: err.to_string() }).await {
                        debug!(error = %send_err, "Could not report call failure to client");
                    }
                }
            }
            client.close().await;

            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        call_id: CallId,
        source: Box<dyn ClientSource>,
        client: Arc<dyn ClientSink>,
        settings: &CallSettings,
    ) -> AppResult<CallSummary> {
        let call = self.load_call(call_id).await?;
        let (persona, script) = self.load_context(&call).await?;

        let session = SessionConfig::for_persona(&persona, &settings.realtime)?;
        let upstream = self.connector.connect(&session).await?;

        let engine = RelayEngine::new(source, client.clone(), upstream, settings.relay);
        let outcome = engine.handle().await;

        let transcript = outcome.transcript.joined();
        let duration_secs = outcome.duration_secs();
        self.store
            .save_session_result(call.id, transcript.clone(), duration_secs)
            .await?;
        info!(duration_secs, reason = %outcome.reason, "Call session saved");

        let report = self.apply_analysis(&call, &persona, &script, &transcript).await?;

        if client.is_writable() {
            let complete = ClientOutbound::CallComplete {
                analysis: report.analysis.clone(),
            };
            if let Err(err) = client.send(complete).await {
                warn!(error = %err, "Could not deliver call_complete");
            }
        }

        Ok(CallSummary {
            call_id: call.id,
            session_id: outcome.session_id,
            reason: outcome.reason,
            duration_secs,
            report,
        })
    }

    /// Score a call whose analysis failed earlier.
    ///
    /// A call that already has feedback returns the stored analysis without
    /// touching stats or achievements.
    pub async fn retry_analysis(&self, call_id: CallId) -> AppResult<AnalysisReport> {
        let call = self.load_call(call_id).await?;

        if let Some(feedback) = &call.feedback {
            let analysis: CallAnalysis = serde_json::from_str(feedback)
                .map_err(|e| AppError::Internal(format!("Stored analysis for call {} is corrupt: {}", call_id, e)))?;
            return Ok(AnalysisReport {
                analysis,
                new_achievements: Vec::new(),
            });
        }

        let transcript = call
            .transcript
            .clone()
            .ok_or_else(|| AppError::BadRequest(format!("Call {} has no transcript yet", call_id)))?;
        let (persona, script) = self.load_context(&call).await?;

        info!(call_id, "Retrying call analysis");
        self.apply_analysis(&call, &persona, &script, &transcript).await
    }

    /// Analysis, then score, stats and achievements.
    async fn apply_analysis(
        &self,
        call: &CallRecord,
        persona: &Persona,
        script: &Script,
        transcript: &str,
    ) -> AppResult<AnalysisReport> {
        let analysis = self.analyzer.analyze(transcript, &script.content, &persona.name).await?;
        let score = analysis.overall_score;

        self.store
            .save_analysis(call.id, score, analysis.to_feedback_json()?)
            .await?;
        let stats = self.store.record_call_stats(call.user_id, score).await?;

        let held: HashSet<Achievement> = self
            .store
            .achievements(call.user_id)
            .await?
            .into_iter()
            .map(|record| record.achievement)
            .collect();
        let earned = self.rules.evaluate(
            &stats,
            ScoredCall {
                score,
                difficulty: persona.difficulty,
            },
            &held,
        );
        let awarded = self.store.award_achievements(call.user_id, &earned).await?;
        let new_achievements: Vec<Achievement> = awarded.into_iter().map(|record| record.achievement).collect();

        info!(
            score,
            total_calls = stats.total_calls,
            new_achievements = new_achievements.len(),
            "Call scored"
        );

        Ok(AnalysisReport {
            analysis,
            new_achievements,
        })
    }

    async fn load_call(&self, call_id: CallId) -> AppResult<CallRecord> {
        self.store
            .get_call(call_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Call {} not found", call_id)))
    }

    async fn load_context(&self, call: &CallRecord) -> AppResult<(Persona, Script)> {
        let persona = self
            .store
            .get_persona(call.persona_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Persona {} not found", call.persona_id)))?;
        let script = self
            .store
            .get_script(persona.script_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Script {} not found", persona.script_id)))?;
        Ok((persona, script))
    }
}
