use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::{filter_and_sort, FilterParams, ListingEdit, NewListing, ShardId};
use crate::handlers::{bearer_token, parse_status, request_session, require_caller};
use crate::identity::resolve_caller;
use crate::models::{Ticket, TicketId, TicketStatus};
use crate::purchase::purchase_blocker;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success};

#[derive(Debug, Default, Deserialize)]
pub struct TicketListQuery {
    pub category: Option<String>,
    pub status: Option<String>,
    pub q: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct TicketListBody {
    pub tickets: Vec<Ticket>,
    pub partial: bool,
    pub unavailable_shards: Vec<ShardId>,
}

#[derive(Debug, Serialize)]
pub struct TicketDetailBody {
    pub ticket: Ticket,
    /// Present only for signed-in callers with a profile.
    pub can_purchase: Option<bool>,
    pub purchase_blocked_reason: Option<String>,
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Query(query): Query<TicketListQuery>,
) -> Result<Response, AppError> {
    let status = parse_status(query.status.as_deref(), false, Some(TicketStatus::Available))?;
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::ValidationError(
                "'from' must not be after 'to'".to_string(),
            ));
        }
    }

    let page = match query.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(category) => state.catalog.list_by_category(category, status).await,
        None => state.catalog.list_all(status).await,
    };

    let params = FilterParams {
        search_text: query.q,
        start_date: query.from,
        end_date: query.to,
    };
    let partial = page.is_partial();
    let body = TicketListBody {
        tickets: filter_and_sort(page.tickets, &params),
        partial,
        unavailable_shards: page.unavailable,
    };
    Ok(success(body, "Tickets retrieved"))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let id = TicketId::new(id);
    let ticket = state
        .resolver
        .find(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Ticket '{id}' was not found")))?;

    let mut body = TicketDetailBody {
        ticket,
        can_purchase: None,
        purchase_blocked_reason: None,
    };
    if bearer_token(&headers).is_some() {
        let session = request_session(&state, &headers);
        if let Ok(caller) = resolve_caller(session.as_ref(), state.rpc.as_ref()).await {
            let blocker = purchase_blocker(&body.ticket, caller.profile.id);
            body.can_purchase = Some(blocker.is_none());
            body.purchase_blocked_reason = blocker.map(|b| b.to_string());
        }
    }
    Ok(success(body, "Ticket retrieved"))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(listing): Json<NewListing>,
) -> Result<Response, AppError> {
    let session = request_session(&state, &headers);
    let caller = require_caller(&state, session.as_ref()).await?;
    let ticket = state.listings.create(caller.profile.id, listing).await?;
    Ok(created(ticket, "Ticket listed"))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(edit): Json<ListingEdit>,
) -> Result<Response, AppError> {
    let session = request_session(&state, &headers);
    let caller = require_caller(&state, session.as_ref()).await?;
    let ticket = state
        .listings
        .update(caller.profile.id, &TicketId::new(id), edit)
        .await?;
    Ok(success(ticket, "Ticket updated"))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = request_session(&state, &headers);
    let caller = require_caller(&state, session.as_ref()).await?;
    state
        .listings
        .delete(caller.profile.id, &TicketId::new(id))
        .await?;
    Ok(empty_success("Ticket deleted"))
}

pub async fn purchase_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = request_session(&state, &headers);
    let receipt = state
        .purchases
        .purchase(session.as_ref(), &TicketId::new(id))
        .await?;
    Ok(success(receipt, "Ticket purchased"))
}
