use std::sync::Arc;

use axum::http::{header, HeaderMap};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::SessionProvider;
use crate::catalog::Searchable;
use crate::identity::{resolve_caller, Caller};
use crate::models::TicketStatus;
use crate::refresh::Snapshot;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod account;
pub mod admin;
pub mod directory;
pub mod tickets;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "resale-api",
    };

    success(payload, "Health check successful")
}

/// Token from `Authorization: Bearer <token>`, if present and well formed.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

pub(crate) fn request_session(state: &AppState, headers: &HeaderMap) -> Arc<dyn SessionProvider> {
    state.sessions.open(bearer_token(headers))
}

pub(crate) async fn require_caller(
    state: &AppState,
    session: &dyn SessionProvider,
) -> Result<Caller, AppError> {
    Ok(resolve_caller(session, state.rpc.as_ref()).await?)
}

/// Parses a `status` query value. `all` is only accepted where the caller
/// may see every status.
pub(crate) fn parse_status(
    raw: Option<&str>,
    allow_all: bool,
    default: Option<TicketStatus>,
) -> Result<Option<TicketStatus>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some("all") if allow_all => Ok(None),
        Some("all") => Err(AppError::ValidationError(
            "status=all is only available for your own tickets".to_string(),
        )),
        Some(s) => s
            .parse::<TicketStatus>()
            .map(Some)
            .map_err(|e| AppError::ValidationError(e.to_string())),
    }
}

/// A cached list as served to clients.
#[derive(Debug, Serialize)]
pub struct SnapshotBody<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub search: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

impl<T> SnapshotBody<T> {
    pub(crate) fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            search: None,
            refreshed_at: None,
            stale: false,
        }
    }

    pub(crate) fn from_view(
        snapshot: &Snapshot<T>,
        items: Vec<T>,
        search: Option<String>,
    ) -> Self
    where
        T: Searchable + Clone,
    {
        Self {
            items,
            total: snapshot.items().len(),
            search,
            refreshed_at: Some(snapshot.refreshed_at()),
            stale: snapshot.is_stale(),
        }
    }
}
