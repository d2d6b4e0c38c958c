//! HTTP query and admin surface.
//!
//! * `GET /timelapse/pixels?after=&since=&limit=` pages through placement
//!   history by sequence cursor, straight from the store.
//! * `GET <admin.path>?username=&pixels=` credits every account with the
//!   given display name. Only mounted when enabled, and unauthenticated.

use crate::config::AdminSettings;
use crate::error::StoreError;
use crate::store::{CanvasStore, HistoryQuery};
use crate::types::{Balance, Color, Seq};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn CanvasStore>,
    /// Upper bound on `limit`
    pub page_limit: usize,
}

/// Builds the router; the admin route only exists when enabled.
pub fn router(state: HttpState, admin: &AdminSettings) -> Router {
    let mut router = Router::new().route("/timelapse/pixels", get(timelapse));
    if admin.enabled {
        info!("Admin grant endpoint enabled at {}", admin.path);
        router = router.route(&admin.path, get(grant));
    }
    router.with_state(state)
}

/// A handler failure rendered as a plain-text response.
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    Store(StoreError),
}

impl From<StoreError> for HttpError {
    fn from(e: StoreError) -> Self {
        HttpError::Store(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            HttpError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            HttpError::Store(StoreError::InsufficientBalance) => (
                StatusCode::BAD_REQUEST,
                "Balance would drop below zero".to_string(),
            )
                .into_response(),
            HttpError::Store(StoreError::Overflow) => {
                (StatusCode::BAD_REQUEST, "Pixel count out of range".to_string()).into_response()
            }
            HttpError::Store(e) => {
                error!("HTTP request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string()).into_response()
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TimelapseQuery {
    pub after: Option<Seq>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelapsePixel {
    pub x: u32,
    pub y: u32,
    pub color: Color,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelapsePage {
    pub pixels: Vec<TimelapsePixel>,
    /// Pass back as `after` to get the next page
    pub cursor: Option<Seq>,
}

pub async fn timelapse(
    State(state): State<HttpState>,
    Query(query): Query<TimelapseQuery>,
) -> Result<Json<TimelapsePage>, HttpError> {
    let limit = query
        .limit
        .unwrap_or(state.page_limit)
        .min(state.page_limit);
    let placements = state
        .store
        .history(HistoryQuery {
            since: query.since,
            after: query.after,
            limit,
        })
        .await?;

    let cursor = placements.last().map(|p| p.seq).or(query.after);
    let pixels = placements
        .into_iter()
        .map(|p| TimelapsePixel {
            x: p.coordinate.x,
            y: p.coordinate.y,
            color: p.color,
            created_at: p.created_at,
        })
        .collect();
    Ok(Json(TimelapsePage { pixels, cursor }))
}

#[derive(Debug, Deserialize)]
pub struct GrantQuery {
    pub username: String,
    pub pixels: String,
}

pub async fn grant(
    State(state): State<HttpState>,
    Query(query): Query<GrantQuery>,
) -> Result<&'static str, HttpError> {
    let pixels: Balance = query
        .pixels
        .trim()
        .parse()
        .map_err(|_| HttpError::BadRequest(format!("Invalid pixel count {:?}", query.pixels)))?;
    let updated = state.store.credit_by_name(&query.username, pixels).await?;
    info!(
        "Granted {} pixels to {} account(s) named {}",
        pixels, updated, query.username
    );
    Ok("Added Pixels")
}
