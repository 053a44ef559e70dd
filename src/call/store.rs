//! # Call Store
//!
//! Persistence interface used by the call lifecycle, plus an in-memory
//! implementation.
//!
//! ## Thread Safety:
//! [`InMemoryCallStore`] keeps every table behind one `tokio::sync::RwLock`.
//! Reads share the lock; each write takes it once, so a write such as
//! "increment stats and return the new values" is atomic.
//!
//! ## Seeding:
//! Scripts and personas come from outside the call flow. At startup they can
//! be loaded from a TOML file:
//!
//! ```toml
//! [[scripts]]
//! id = 1
//! title = "Payroll software"
//! content = "Hi, this is Sam from Acme..."
//!
//! [[personas]]
//! id = 1
//! script_id = 1
//! name = "Dana Whitfield"
//! difficulty = "hard"
//! personality = { traits = ["busy", "direct"] }
//! objections = ["We already have a vendor"]
//! ```

use crate::call::{
    Achievement, AchievementRecord, CallId, CallRecord, Persona, PersonaId, Script, ScriptId, UserId, UserStats,
};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

/// Everything the lifecycle needs from persistence.
///
/// Lookups return `Ok(None)` for a missing id; errors are reserved for the
/// store itself failing. Writes to a missing call are `NotFound`.
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn get_call(&self, id: CallId) -> AppResult<Option<CallRecord>>;

    async fn create_call(&self, user_id: UserId, persona_id: PersonaId) -> AppResult<CallRecord>;

    async fn get_persona(&self, id: PersonaId) -> AppResult<Option<Persona>>;

    async fn get_script(&self, id: ScriptId) -> AppResult<Option<Script>>;

    /// Store what the relay produced. Runs before analysis.
    async fn save_session_result(&self, id: CallId, transcript: String, duration_secs: u64) -> AppResult<()>;

    async fn save_analysis(&self, id: CallId, score: f64, feedback: String) -> AppResult<()>;

    /// Count a scored call for `user_id`, creating their stats if needed.
    /// Returns the stats after the update.
    async fn record_call_stats(&self, user_id: UserId, score: f64) -> AppResult<UserStats>;

    async fn get_user_stats(&self, user_id: UserId) -> AppResult<Option<UserStats>>;

    async fn achievements(&self, user_id: UserId) -> AppResult<Vec<AchievementRecord>>;

    /// Record `earned` for `user_id`, skipping any already held.
    /// Returns only the newly written records.
    async fn award_achievements(&self, user_id: UserId, earned: &[Achievement]) -> AppResult<Vec<AchievementRecord>>;
}

#[derive(Debug, Default, Deserialize)]
struct SeedData {
    #[serde(default)]
    scripts: Vec<Script>,
    #[serde(default)]
    personas: Vec<Persona>,
}

#[derive(Debug, Default)]
struct Tables {
    scripts: HashMap<ScriptId, Script>,
    personas: HashMap<PersonaId, Persona>,
    calls: HashMap<CallId, CallRecord>,
    stats: HashMap<UserId, UserStats>,
    achievements: HashMap<UserId, Vec<AchievementRecord>>,
    last_call_id: CallId,
}

impl Tables {
    fn call_mut(&mut self, id: CallId) -> AppResult<&mut CallRecord> {
        self.calls
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Call {} not found", id)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCallStore {
    tables: RwLock<Tables>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a seed document (see module docs).
    pub fn from_seed_str(seed: &str) -> AppResult<Self> {
        let seed: SeedData = toml::from_str(seed)?;

        let mut tables = Tables::default();
        for script in seed.scripts {
            tables.scripts.insert(script.id, script);
        }
        for persona in seed.personas {
            if !tables.scripts.contains_key(&persona.script_id) {
                return Err(AppError::ValidationError(format!(
                    "Persona {} references unknown script {}",
                    persona.id, persona.script_id
                )));
            }
            tables.personas.insert(persona.id, persona);
        }

        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    pub fn from_seed_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let seed = std::fs::read_to_string(path)
            .map_err(|e| AppError::ConfigError(format!("Cannot read seed file {}: {}", path.display(), e)))?;
        let store = Self::from_seed_str(&seed)?;
        info!(path = %path.display(), "Loaded call store seed");
        Ok(store)
    }

    pub async fn insert_script(&self, script: Script) {
        self.tables.write().await.scripts.insert(script.id, script);
    }

    pub async fn insert_persona(&self, persona: Persona) {
        self.tables.write().await.personas.insert(persona.id, persona);
    }

    /// `(scripts, personas)` currently loaded.
    pub async fn catalog_size(&self) -> (usize, usize) {
        let tables = self.tables.read().await;
        (tables.scripts.len(), tables.personas.len())
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn get_call(&self, id: CallId) -> AppResult<Option<CallRecord>> {
        Ok(self.tables.read().await.calls.get(&id).cloned())
    }

    async fn create_call(&self, user_id: UserId, persona_id: PersonaId) -> AppResult<CallRecord> {
        let mut tables = self.tables.write().await;
        tables.last_call_id += 1;
        let call = CallRecord {
            id: tables.last_call_id,
            user_id,
            persona_id,
            transcript: None,
            duration_secs: None,
            score: None,
            feedback: None,
            created_at: Utc::now(),
        };
        tables.calls.insert(call.id, call.clone());
        Ok(call)
    }

    async fn get_persona(&self, id: PersonaId) -> AppResult<Option<Persona>> {
        Ok(self.tables.read().await.personas.get(&id).cloned())
    }

    async fn get_script(&self, id: ScriptId) -> AppResult<Option<Script>> {
        Ok(self.tables.read().await.scripts.get(&id).cloned())
    }

    async fn save_session_result(&self, id: CallId, transcript: String, duration_secs: u64) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let call = tables.call_mut(id)?;
        call.transcript = Some(transcript);
        call.duration_secs = Some(duration_secs);
        Ok(())
    }

    async fn save_analysis(&self, id: CallId, score: f64, feedback: String) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let call = tables.call_mut(id)?;
        call.score = Some(score);
        call.feedback = Some(feedback);
        Ok(())
    }

    async fn record_call_stats(&self, user_id: UserId, score: f64) -> AppResult<UserStats> {
        let mut tables = self.tables.write().await;
        let stats = tables.stats.entry(user_id).or_insert_with(|| UserStats::new(user_id));
        stats.record_score(score);
        Ok(stats.clone())
    }

    async fn get_user_stats(&self, user_id: UserId) -> AppResult<Option<UserStats>> {
        Ok(self.tables.read().await.stats.get(&user_id).cloned())
    }

    async fn achievements(&self, user_id: UserId) -> AppResult<Vec<AchievementRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .achievements
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn award_achievements(&self, user_id: UserId, earned: &[Achievement]) -> AppResult<Vec<AchievementRecord>> {
        let mut tables = self.tables.write().await;
        let held = tables.achievements.entry(user_id).or_default();

        let mut awarded = Vec::new();
        for &achievement in earned {
            if held.iter().any(|record| record.achievement == achievement) {
                continue;
            }
            let record = AchievementRecord {
                user_id,
                achievement,
                unlocked_at: Utc::now(),
            };
            held.push(record.clone());
            awarded.push(record);
        }
        Ok(awarded)
    }
}
