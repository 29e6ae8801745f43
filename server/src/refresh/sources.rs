use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{BackendError, BackendResult, Directory};
use crate::models::{Subscriber, UserSummary};
use crate::refresh::{RefreshScope, SnapshotSource};

/// Admin back-office lists served from the [`Directory`].
#[derive(Clone)]
pub struct DirectorySource {
    directory: Arc<dyn Directory>,
}

impl DirectorySource {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl SnapshotSource<UserSummary> for DirectorySource {
    async fn load(&self, scope: &RefreshScope) -> BackendResult<Vec<UserSummary>> {
        match scope {
            RefreshScope::Users => self.directory.list_users().await,
            other => Err(BackendError::UnsupportedScope(other.to_string())),
        }
    }
}

#[async_trait]
impl SnapshotSource<Subscriber> for DirectorySource {
    async fn load(&self, scope: &RefreshScope) -> BackendResult<Vec<Subscriber>> {
        match scope {
            RefreshScope::Subscribers => self.directory.list_subscribers().await,
            other => Err(BackendError::UnsupportedScope(other.to_string())),
        }
    }
}
