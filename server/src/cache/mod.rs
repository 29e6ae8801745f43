//! Key/value cache and change notification.
//!
//! Cached views are kept behind [`KeyValueStore`] so the core does not care
//! where they live. Changes to a ticket are announced through
//! [`CacheInvalidation`] implementors and a [`CacheEvent`] broadcast channel.

pub mod store;
pub mod tickets;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::TicketId;

pub use store::MemoryStore;
pub use tickets::{CachedResolver, TicketCache};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache backend error: {0}")]
    Backend(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// String key/value store with an eviction lifecycle owned by the implementor.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug + 'static {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> CacheResult<()>;

    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Drops every entry.
    async fn clear(&self) -> CacheResult<()>;
}

/// Receives notice that a ticket's row changed so dependent views can be dropped.
#[async_trait]
pub trait CacheInvalidation: Send + Sync + 'static {
    /// `parties` are the profiles whose own-ticket views include the ticket
    /// before or after the change.
    async fn ticket_changed(&self, ticket_id: &TicketId, parties: &[Uuid]);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    TicketInvalidated { ticket_id: TicketId },
}
