//! Storage, RPC and session collaborators.
//!
//! The core never talks to a database directly; it goes through these traits
//! so the per-shard tables, the procedure-call mechanism and the session
//! service can be backed by Postgres in production and by
//! [`memory::MemoryBackend`] in tests and local runs.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::shard::ShardId;
use crate::models::{AuthIdentity, Category, Event, Subscriber, TicketId, TicketStatus, UserSummary};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("shard {0} is unavailable")]
    ShardUnavailable(ShardId),

    #[error("{0} is unavailable")]
    Unavailable(&'static str),

    #[error("unknown procedure '{0}'")]
    UnknownProcedure(String),

    #[error("unsupported refresh scope '{0}'")]
    UnsupportedScope(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Conditions pushed down into a shard listing query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowFilter {
    pub status: Option<TicketStatus>,
    pub owner_id: Option<Uuid>,
}

impl RowFilter {
    pub fn status(status: Option<TicketStatus>) -> Self {
        Self {
            status,
            owner_id: None,
        }
    }

    pub fn owned_by(owner_id: Uuid, status: Option<TicketStatus>) -> Self {
        Self {
            status,
            owner_id: Some(owner_id),
        }
    }

    pub fn matches(&self, status: Option<TicketStatus>, owner_id: Option<Uuid>) -> bool {
        self.status.map_or(true, |s| status == Some(s))
            && self.owner_id.map_or(true, |o| owner_id == Some(o))
    }
}

/// Column values for a new ticket row.
#[derive(Debug, Clone, Serialize)]
pub struct NewTicketRow {
    pub id: TicketId,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub price: Decimal,
    pub quantity: i32,
    pub status: TicketStatus,
    pub event_id: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub venue: Option<String>,
    pub seat: Option<String>,
    pub file_path: Option<String>,
    pub owner_id: Uuid,
    pub seller_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied to a single row. `None` leaves a column untouched;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub price: Option<Decimal>,
    pub quantity: Option<i32>,
    pub status: Option<TicketStatus>,
    pub event_id: Option<Option<String>>,
    pub event_date: Option<Option<DateTime<Utc>>>,
    pub venue: Option<Option<String>>,
    pub seat: Option<Option<String>>,
    pub file_path: Option<Option<String>>,
    pub owner_id: Option<Uuid>,
    pub buyer_id: Option<Option<Uuid>>,
    /// Only apply when the row currently has this status.
    pub expected_status: Option<TicketStatus>,
}

impl TicketUpdate {
    /// Ownership transfer to `buyer`, guarded on the row still being available.
    pub fn sold_to(buyer: Uuid) -> Self {
        Self {
            status: Some(TicketStatus::Sold),
            owner_id: Some(buyer),
            buyer_id: Some(Some(buyer)),
            expected_status: Some(TicketStatus::Available),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        Self {
            expected_status: None,
            ..self.clone()
        } == Self::default()
    }
}

/// Per-shard table access.
#[async_trait]
pub trait TicketStore: Send + Sync + 'static {
    async fn select_by_id(&self, shard: ShardId, id: &TicketId) -> BackendResult<Option<Value>>;

    async fn select_listings(&self, shard: ShardId, filter: RowFilter) -> BackendResult<Vec<Value>>;

    async fn insert(&self, shard: ShardId, row: &NewTicketRow) -> BackendResult<Value>;

    /// Returns `true` when a row matched and was updated.
    async fn update_by_id(
        &self,
        shard: ShardId,
        id: &TicketId,
        update: &TicketUpdate,
    ) -> BackendResult<bool>;

    /// Returns `true` when a row was deleted.
    async fn delete_by_id(&self, shard: ShardId, id: &TicketId) -> BackendResult<bool>;
}

/// Opaque named procedure call.
#[async_trait]
pub trait RpcClient: Send + Sync + 'static {
    async fn call(&self, name: &str, params: Value) -> BackendResult<Value>;
}

/// Read-only reference data owned by other parts of the system.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    async fn list_categories(&self) -> BackendResult<Vec<Category>>;

    async fn list_events(&self) -> BackendResult<Vec<Event>>;

    async fn list_users(&self) -> BackendResult<Vec<UserSummary>>;

    async fn list_subscribers(&self) -> BackendResult<Vec<Subscriber>>;
}

/// The caller's authentication session.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_identity(&self) -> BackendResult<Option<AuthIdentity>>;

    /// Extends a live session. `false` means the session is gone or expired.
    async fn refresh_session(&self) -> BackendResult<bool>;
}

/// Builds a session handle for one request.
pub trait SessionFactory: Send + Sync + 'static {
    fn open(&self, bearer_token: Option<&str>) -> Arc<dyn SessionProvider>;
}

/// Procedure names are interpolated into SQL, so only plain identifiers pass.
pub fn is_valid_procedure_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
