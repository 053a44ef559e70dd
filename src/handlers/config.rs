use crate::config::AppConfig;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};

/// Configuration as shown over HTTP. Credentials are reported only as
/// present or absent.
fn public_view(config: &AppConfig) -> Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "realtime": {
            "url": config.realtime.url,
            "model": config.realtime.model,
            "api_key_set": !config.realtime.api_key.is_empty(),
            "voice": config.realtime.voice,
            "audio_format": config.realtime.audio_format,
            "transcription_model": config.realtime.transcription_model,
            "turn_detection": {
                "threshold": config.realtime.turn_detection.threshold,
                "prefix_padding_ms": config.realtime.turn_detection.prefix_padding_ms,
                "silence_duration_ms": config.realtime.turn_detection.silence_duration_ms
            },
            "connect_timeout_secs": config.realtime.connect_timeout_secs
        },
        "analysis": {
            "url": config.analysis.url,
            "model": config.analysis.model,
            "api_key_set": !config.analysis.api_key.is_empty(),
            "temperature": config.analysis.temperature,
            "request_timeout_secs": config.analysis.request_timeout_secs
        },
        "session": {
            "idle_timeout_secs": config.session.idle_timeout_secs,
            "max_duration_secs": config.session.max_duration_secs
        },
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": public_view(&config)
    })))
}

/// Apply a partial update. Calls already running keep the settings they
/// started with.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut updated = state.get_config();
    updated
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;
    state.update_config(updated.clone())?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": public_view(&updated)
    })))
}
