//! # Call REST API Handlers
//!
//! ## Available Endpoints:
//! - `POST /api/v1/calls` - Create a call for a user and persona
//! - `GET /api/v1/calls/{call_id}` - Call record with transcript and score
//! - `POST /api/v1/calls/{call_id}/analysis` - Score a call whose analysis failed
//!
//! The live conversation itself runs over `GET /ws/calls/{call_id}`.

use crate::call::{CallId, PersonaId, UserId};
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CreateCallRequest {
    pub user_id: UserId,
    pub persona_id: PersonaId,
}

pub async fn create_call(
    state: web::Data<AppState>,
    body: web::Json<CreateCallRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let call = state.lifecycle.start_call(request.user_id, request.persona_id).await?;
    Ok(HttpResponse::Created().json(call))
}

pub async fn get_call(state: web::Data<AppState>, path: web::Path<CallId>) -> Result<HttpResponse, AppError> {
    let call_id = path.into_inner();
    let call = state
        .lifecycle
        .store()
        .get_call(call_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Call {} not found", call_id)))?;
    Ok(HttpResponse::Ok().json(call))
}

pub async fn retry_analysis(
    state: web::Data<AppState>,
    path: web::Path<CallId>,
) -> Result<HttpResponse, AppError> {
    let call_id = path.into_inner();
    info!(call_id, "Analysis requested over HTTP");
    let report = state.lifecycle.retry_analysis(call_id).await?;
    Ok(HttpResponse::Ok().json(report))
}
