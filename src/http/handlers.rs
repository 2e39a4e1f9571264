use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::engine::Scheduler;
use crate::model::*;

use super::error::ApiError;

pub type AppState = Arc<Scheduler>;

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: String,
}

fn body(payload: Result<Json<BookingDraft>, JsonRejection>) -> Result<BookingDraft, ApiError> {
    payload
        .map(|Json(draft)| draft)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// A path segment that cannot be a booking id names no booking.
fn booking_id(raw: &str) -> Result<BookingId, ApiError> {
    raw.parse().map_err(|_| ApiError::not_found())
}

pub async fn list_all(State(scheduler): State<AppState>) -> Result<Json<Vec<Booking>>, ApiError> {
    Ok(Json(scheduler.list_all().await?))
}

/// `GET /api/bookings/{date}`
pub async fn list_by_date(
    State(scheduler): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let date = parse_date(&date).map_err(|e| ApiError::bad_request(e.message()))?;
    Ok(Json(scheduler.list_by_date(date).await?))
}

pub async fn create(
    State(scheduler): State<AppState>,
    payload: Result<Json<BookingDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let draft = body(payload)?;
    let booking = scheduler.create(&draft).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn update(
    State(scheduler): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<BookingDraft>, JsonRejection>,
) -> Result<Json<Booking>, ApiError> {
    let id = booking_id(&id)?;
    let draft = body(payload)?;
    Ok(Json(scheduler.update(id, &draft).await?))
}

pub async fn delete(
    State(scheduler): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    let id = booking_id(&id)?;
    scheduler.delete(id).await?;
    Ok(Json(Message {
        message: "booking deleted".into(),
    }))
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "OK",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}
