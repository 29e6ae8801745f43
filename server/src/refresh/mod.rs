//! Throttled re-synchronisation of cached list snapshots.
//!
//! A controller owns the snapshots for its scopes. Readers get an
//! `Arc<Snapshot<T>>` that never changes underneath them; every refresh or
//! search builds a new snapshot and swaps it in whole.
//!
//! A refresh for a scope is skipped when another one for the same scope is
//! still running or when the last successful one finished less than the
//! cooldown ago. Completion stamps live in the injected [`KeyValueStore`].
//! Snapshots themselves expire once idle; an expired scope loads on demand.

mod controller;
mod sources;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::backend::{BackendError, BackendResult};

pub use controller::{RefreshController, Snapshot};
pub use sources::DirectorySource;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "profile_id", rename_all = "snake_case")]
pub enum RefreshScope {
    OwnedTickets(Uuid),
    Users,
    Subscribers,
}

impl fmt::Display for RefreshScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OwnedTickets(owner) => write!(f, "owned_tickets:{owner}"),
            Self::Users => f.write_str("users"),
            Self::Subscribers => f.write_str("subscribers"),
        }
    }
}

/// Loads the full contents of a scope from the backend.
#[async_trait]
pub trait SnapshotSource<T>: Send + Sync + 'static {
    async fn load(&self, scope: &RefreshScope) -> BackendResult<Vec<T>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InFlight,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Refreshed { count: usize },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("session expired")]
    AuthExpired,

    #[error("refresh failed: {0}")]
    Load(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshEvent {
    Refreshed { scope: RefreshScope, count: usize },
    Invalidated { scope: RefreshScope },
}
