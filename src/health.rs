use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "active_sessions": metrics.active_sessions
        },
        "upstream": {
            "realtime_model": config.realtime.model,
            "analysis_model": config.analysis.model,
            "credentials_configured": !config.realtime.api_key.is_empty() && !config.analysis.api_key.is_empty()
        },
        "system": session_load(&config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "active_sessions": metrics.active_sessions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "calls": {
            "completed": metrics.completed_calls,
            "failed": metrics.failed_calls
        },
        "endpoints": endpoint_stats,
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions
        }
    }))
}

fn session_load(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let session_usage = if config.performance.max_concurrent_sessions > 0 {
        metrics.active_sessions as f64 / config.performance.max_concurrent_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage >= 1.0 {
        "at_capacity"
    } else if session_usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": config.performance.max_concurrent_sessions,
        "current_sessions": metrics.active_sessions
    })
}
