//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor through
//! `web::Data<AppState>`.
//!
//! ## Thread Safety:
//! - **config**: `Arc<RwLock<AppConfig>>`; many readers, one writer on
//!   `PUT /api/v1/config`. Calls snapshot it when they start.
//! - **metrics**: `Arc<RwLock<AppMetrics>>`; written on every request and at
//!   call start and end.
//! - **lifecycle**: `Arc<CallLifecycle>`; immutable, shared by every call.
//!
//! The locks are held only for a copy or a counter bump, never across an
//! `.await`, so plain `std::sync::RwLock` is enough here.

use crate::call::lifecycle::CallLifecycle;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Runs live calls and post-call analysis
    pub lifecycle: Arc<CallLifecycle>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters reported by `/health` and `/api/v1/metrics`.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Requests that ended with a 4xx or 5xx status
    pub error_count: u64,

    /// Calls currently connected or still being scored
    pub active_sessions: u32,

    /// Calls that were relayed and scored
    pub completed_calls: u64,

    /// Calls that ended with an error (connect, persistence or analysis)
    pub failed_calls: u64,

    /// Key: method and route pattern, e.g. "GET /api/v1/calls/{call_id}"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Cumulative handling time in milliseconds
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, lifecycle: Arc<CallLifecycle>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            lifecycle,
            start_time: Instant::now(),
        }
    }

    // A panic while holding a lock leaves plain data behind, still usable
    fn read_config(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.config.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.read_config().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> AppResult<()> {
        new_config
            .validate()
            .map_err(|e| AppError::ValidationError(e.to_string()))?;
        *self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Claim a call slot if one is free. The check and the claim happen under
    /// one write lock, so concurrent upgrades cannot overshoot the limit.
    pub fn try_acquire_session(&self) -> bool {
        let limit = self.read_config().performance.max_concurrent_sessions;
        let mut metrics = self.write_metrics();
        if (metrics.active_sessions as usize) < limit {
            metrics.active_sessions += 1;
            true
        } else {
            false
        }
    }

    /// Give back a slot whose call never started.
    pub fn release_session(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Count a finished call and release its session slot.
    pub fn record_call_finished(&self, succeeded: bool) {
        let mut metrics = self.write_metrics();
        if succeeded {
            metrics.completed_calls += 1;
        } else {
            metrics.failed_calls += 1;
        }
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Consistent copy of the metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
