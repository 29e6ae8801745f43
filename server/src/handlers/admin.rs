//! Admin back-office lists. Each is a shared snapshot; search is applied per
//! request so admins do not see each other's filters.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::backend::SessionProvider;
use crate::catalog::{search, Searchable};
use crate::handlers::account::refresh_message;
use crate::handlers::{request_session, require_caller, SnapshotBody};
use crate::refresh::{RefreshController, RefreshScope};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Default, Deserialize)]
pub struct AdminListQuery {
    pub q: Option<String>,
}

async fn require_admin(
    state: &AppState,
    session: &dyn SessionProvider,
) -> Result<(), AppError> {
    let caller = require_caller(state, session).await?;
    if !caller.profile.is_admin {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }
    Ok(())
}

async fn list_scope<T>(
    controller: &RefreshController<T>,
    scope: RefreshScope,
    session: &dyn SessionProvider,
    query: Option<String>,
) -> Result<SnapshotBody<T>, AppError>
where
    T: Searchable + Clone + Serialize + Send + Sync + 'static,
{
    if controller.snapshot(&scope).is_none() {
        controller.refresh(&scope, session).await?;
    }
    let Some(snapshot) = controller.snapshot(&scope) else {
        return Ok(SnapshotBody::empty());
    };
    let query = query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());
    let items = search(snapshot.items(), query.as_deref());
    Ok(SnapshotBody::from_view(&snapshot, items, query))
}

async fn refresh_scope<T>(
    controller: &RefreshController<T>,
    scope: RefreshScope,
    session: &dyn SessionProvider,
) -> Result<Response, AppError>
where
    T: Searchable + Clone + Send + Sync + 'static,
{
    let outcome = controller.refresh(&scope, session).await?;
    Ok(success(outcome, refresh_message(outcome)))
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<AdminListQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = request_session(&state, &headers);
    require_admin(&state, session.as_ref()).await?;
    let body = list_scope(&state.users, RefreshScope::Users, session.as_ref(), query.q).await?;
    Ok(success(body, "Users retrieved"))
}

pub async fn refresh_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = request_session(&state, &headers);
    require_admin(&state, session.as_ref()).await?;
    refresh_scope(&state.users, RefreshScope::Users, session.as_ref()).await
}

pub async fn list_subscribers(
    State(state): State<AppState>,
    Query(query): Query<AdminListQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = request_session(&state, &headers);
    require_admin(&state, session.as_ref()).await?;
    let body = list_scope(
        &state.subscribers,
        RefreshScope::Subscribers,
        session.as_ref(),
        query.q,
    )
    .await?;
    Ok(success(body, "Subscribers retrieved"))
}

pub async fn refresh_subscribers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = request_session(&state, &headers);
    require_admin(&state, session.as_ref()).await?;
    refresh_scope(&state.subscribers, RefreshScope::Subscribers, session.as_ref()).await
}
