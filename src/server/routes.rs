//! HTTP route handlers for the voxpair API.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::{RatingId, RoomId, UserId};
use crate::core::kinds::{PartnerKind, RoomStatus};
use crate::relay::ai_call::AI_PARTNER_NAME;
use crate::session::room::format_duration;

use super::auth::AuthUser;
use super::error::ApiError;
use super::state::AppState;
use super::ws;

/// Default number of rooms returned by the history endpoint.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Upper bound on the history `limit` parameter.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Name shown when a partner's profile is gone.
const UNKNOWN_PARTNER: &str = "Unknown";

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/rooms/history", get(room_history))
        .route("/api/rooms/{room_id}/rating", post(rate_room))
        .route("/api/rooms/{room_id}/end", post(end_room))
        .route("/ws/voice-match", get(ws::voice_match))
        .route("/ws/voice-call/{room_id}", get(ws::voice_call))
        .route("/ws/ai-call", get(ws::ai_call))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "voxpair",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Rating request.
#[derive(Debug, Deserialize)]
pub struct RateRequest {
    /// Score, `1..=5`.
    pub rating: i64,
    /// Optional comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Rating response.
#[derive(Debug, Serialize)]
pub struct RateResponse {
    /// Always `true`.
    pub ok: bool,
    /// Stored rating.
    pub rating_id: RatingId,
}

async fn rate_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    AuthUser(profile): AuthUser,
    Json(request): Json<RateRequest>,
) -> Result<(StatusCode, Json<RateResponse>), ApiError> {
    let rating = state
        .lifecycle
        .submit_rating(
            room_id,
            profile.id,
            request.rating,
            request.comment.unwrap_or_default(),
            Utc::now(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RateResponse {
            ok: true,
            rating_id: rating.id,
        }),
    ))
}

/// End-call response.
#[derive(Debug, Serialize)]
pub struct EndResponse {
    /// Always `ended`.
    pub status: RoomStatus,
    /// Recorded call length.
    pub duration_seconds: u64,
}

async fn end_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    AuthUser(profile): AuthUser,
) -> Result<Json<EndResponse>, ApiError> {
    let outcome = state
        .lifecycle
        .end_room(room_id, profile.id, &profile.username, Utc::now())
        .await?;

    Ok(Json(EndResponse {
        status: outcome.room().status,
        duration_seconds: outcome.room().duration_seconds.unwrap_or(0),
    }))
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of rooms.
    pub limit: Option<usize>,
}

/// One room in the history response.
#[derive(Debug, Serialize)]
pub struct HistoryRoomDto {
    /// Room id.
    pub room_id: RoomId,
    /// Human or AI.
    pub partner_type: PartnerKind,
    /// Partner display name.
    pub partner_name: String,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Close time.
    pub ended_at: Option<DateTime<Utc>>,
    /// Recorded length in seconds.
    pub duration_seconds: u64,
    /// Recorded length as `m:ss`.
    pub duration: String,
    /// Whether the caller already rated the room.
    pub has_rated: bool,
}

/// History response.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Most recent rooms first.
    pub rooms: Vec<HistoryRoomDto>,
    /// Human calls taken so far.
    pub call_count: u64,
}

async fn room_history(
    State(state): State<Arc<AppState>>,
    AuthUser(profile): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let entries = state.lifecycle.history(profile.id, limit).await?;

    let mut names: HashMap<UserId, String> = HashMap::new();
    let mut rooms = Vec::with_capacity(entries.len());
    for entry in entries {
        let partner_name = match (entry.room.partner_kind, entry.partner) {
            (PartnerKind::Ai, _) => AI_PARTNER_NAME.to_string(),
            (PartnerKind::Human, Some(partner)) => {
                if let Some(name) = names.get(&partner) {
                    name.clone()
                } else {
                    let name = state
                        .directory
                        .profile(partner)
                        .await?
                        .map_or_else(|| UNKNOWN_PARTNER.to_string(), |p| p.display_name());
                    names.insert(partner, name.clone());
                    name
                }
            }
            (PartnerKind::Human, None) => UNKNOWN_PARTNER.to_string(),
        };
        let duration_seconds = entry.room.duration_seconds.unwrap_or(0);
        rooms.push(HistoryRoomDto {
            room_id: entry.room.id,
            partner_type: entry.room.partner_kind,
            partner_name,
            status: entry.room.status,
            started_at: entry.room.started_at,
            ended_at: entry.room.ended_at,
            duration_seconds,
            duration: format_duration(duration_seconds),
            has_rated: entry.has_rated,
        });
    }

    let call_count = state.lifecycle.call_count(profile.id).await?;
    Ok(Json(HistoryResponse { rooms, call_count }))
}
