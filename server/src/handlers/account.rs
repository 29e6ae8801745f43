use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;

use crate::catalog::search;
use crate::handlers::{parse_status, request_session, require_caller, SnapshotBody};
use crate::models::Ticket;
use crate::refresh::{RefreshOutcome, RefreshScope};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Default, Deserialize)]
pub struct OwnedTicketsQuery {
    pub q: Option<String>,
    pub status: Option<String>,
}

/// The caller's own tickets from their snapshot. The first request loads it;
/// `q` narrows this response only.
pub async fn my_tickets(
    State(state): State<AppState>,
    Query(query): Query<OwnedTicketsQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let status = parse_status(query.status.as_deref(), true, None)?;
    let session = request_session(&state, &headers);
    let caller = require_caller(&state, session.as_ref()).await?;
    let scope = RefreshScope::OwnedTickets(caller.profile.id);

    if state.owned_tickets.snapshot(&scope).is_none() {
        state.owned_tickets.refresh(&scope, session.as_ref()).await?;
    }
    // Another request may still be loading it.
    let Some(snapshot) = state.owned_tickets.snapshot(&scope) else {
        return Ok(success(SnapshotBody::<Ticket>::empty(), "Owned tickets retrieved"));
    };

    let query = query
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());
    let items = search(snapshot.items(), query.as_deref())
        .into_iter()
        .filter(|ticket| status.map_or(true, |s| ticket.status == s))
        .collect();
    let body = SnapshotBody::from_view(&snapshot, items, query);
    Ok(success(body, "Owned tickets retrieved"))
}

pub async fn refresh_my_tickets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = request_session(&state, &headers);
    let caller = require_caller(&state, session.as_ref()).await?;
    let scope = RefreshScope::OwnedTickets(caller.profile.id);

    let outcome = state.owned_tickets.refresh(&scope, session.as_ref()).await?;
    Ok(success(outcome, refresh_message(outcome)))
}

pub(crate) fn refresh_message(outcome: RefreshOutcome) -> &'static str {
    match outcome {
        RefreshOutcome::Refreshed { .. } => "Refreshed",
        RefreshOutcome::Skipped { .. } => "Refresh skipped",
    }
}
