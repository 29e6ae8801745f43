//! Category and owner listings across shards.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::backend::{BackendError, BackendResult, RowFilter, TicketStore};
use crate::catalog::normalize::normalize;
use crate::catalog::shard::{fold_category, ShardId, ShardMap};
use crate::models::{Ticket, TicketStatus};
use crate::refresh::{RefreshScope, SnapshotSource};

/// Tickets gathered from one or more shards. Shards that failed are listed
/// in `unavailable` so callers can flag a partial result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogPage {
    pub tickets: Vec<Ticket>,
    pub unavailable: Vec<ShardId>,
}

impl CatalogPage {
    pub fn is_partial(&self) -> bool {
        !self.unavailable.is_empty()
    }
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn TicketStore>,
    shards: Arc<ShardMap>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn TicketStore>, shards: Arc<ShardMap>) -> Self {
        Self { store, shards }
    }

    pub fn shards(&self) -> &ShardMap {
        &self.shards
    }

    /// Listings of one category. Localized and differently cased names reach
    /// the same shard. Categories that are not recognised fall back to the
    /// `Other` shard and only rows carrying that exact category are kept.
    pub async fn list_by_category(
        &self,
        category: &str,
        status: Option<TicketStatus>,
    ) -> CatalogPage {
        let routed = self.shards.resolve(category);
        let mut page = self.scan(&[routed.shard], RowFilter::status(status)).await;
        if !routed.known {
            let wanted = fold_category(category);
            page.tickets
                .retain(|ticket| fold_category(&ticket.category) == wanted);
        }
        page
    }

    pub async fn list_all(&self, status: Option<TicketStatus>) -> CatalogPage {
        self.scan(self.shards.all_shards(), RowFilter::status(status))
            .await
    }

    /// Every ticket the profile currently owns, optionally narrowed by status.
    pub async fn list_owned(&self, owner_id: Uuid, status: Option<TicketStatus>) -> CatalogPage {
        self.scan(
            self.shards.all_shards(),
            RowFilter::owned_by(owner_id, status),
        )
        .await
    }

    async fn scan(&self, shards: &[ShardId], filter: RowFilter) -> CatalogPage {
        let mut page = CatalogPage::default();
        for shard in shards {
            match self.store.select_listings(*shard, filter).await {
                Ok(rows) => page.tickets.extend(normalize_rows(*shard, rows)),
                Err(e) => {
                    warn!(
                        shard = %shard,
                        error = %e,
                        "Shard listing failed, skipping"
                    );
                    page.unavailable.push(*shard);
                }
            }
        }
        page
    }
}

fn normalize_rows(shard: ShardId, rows: Vec<Value>) -> impl Iterator<Item = Ticket> {
    rows.into_iter().filter_map(move |row| match normalize(shard, row) {
        Ok(ticket) => Some(ticket),
        Err(e) => {
            warn!(shard = %shard, error = %e, "Skipping malformed ticket row");
            None
        }
    })
}

#[async_trait]
impl SnapshotSource<Ticket> for CatalogService {
    async fn load(&self, scope: &RefreshScope) -> BackendResult<Vec<Ticket>> {
        match scope {
            RefreshScope::OwnedTickets(owner_id) => {
                let page = self.list_owned(*owner_id, None).await;
                match page.unavailable.first() {
                    // A snapshot missing a shard would look like deleted tickets.
                    Some(shard) => Err(BackendError::ShardUnavailable(*shard)),
                    None => Ok(page.tickets),
                }
            }
            other => Err(BackendError::UnsupportedScope(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn row(id: &str, category: &str, status: &str, owner: Uuid) -> Value {
        json!({
            "id": id,
            "title": format!("Ticket {id}"),
            "category": category,
            "price": 10,
            "status": status,
            "owner_id": owner.to_string(),
            "buyer_id": if status == "sold" { Some(owner.to_string()) } else { None },
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    fn service(backend: &Arc<MemoryBackend>) -> CatalogService {
        CatalogService::new(backend.clone(), Arc::new(ShardMap::default()))
    }

    #[tokio::test]
    async fn test_status_filter_is_applied() {
        let backend = Arc::new(MemoryBackend::new());
        let owner = Uuid::new_v4();
        backend.insert_raw(ShardId::Concerts, row("a", "Concerts", "available", owner)).await;
        backend.insert_raw(ShardId::Concerts, row("b", "Concerts", "sold", owner)).await;

        let page = service(&backend)
            .list_by_category("Concerts", Some(TicketStatus::Available))
            .await;
        let ids: Vec<_> = page.tickets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);

        let page = service(&backend).list_by_category("Concerts", None).await;
        assert_eq!(page.tickets.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_category_only_returns_matching_rows_from_other() {
        let backend = Arc::new(MemoryBackend::new());
        let owner = Uuid::new_v4();
        backend.insert_raw(ShardId::Other, row("m", "Magic shows", "available", owner)).await;
        backend.insert_raw(ShardId::Other, row("o", "Other", "available", owner)).await;

        let page = service(&backend).list_by_category("magic  SHOWS", None).await;
        assert_eq!(page.tickets.len(), 1);
        assert_eq!(page.tickets[0].id.as_str(), "m");

        let page = service(&backend).list_by_category("ostalo", None).await;
        assert_eq!(page.tickets.len(), 2);
    }

    #[tokio::test]
    async fn test_list_all_skips_failed_shards_and_bad_rows() {
        let backend = Arc::new(MemoryBackend::new());
        let owner = Uuid::new_v4();
        backend.insert_raw(ShardId::Sports, row("s", "Sports", "available", owner)).await;
        backend.insert_raw(ShardId::Cinema, row("c", "Cinema", "available", owner)).await;
        backend.insert_raw(ShardId::Cinema, json!({ "id": "broken" })).await;
        backend.fail_shard(ShardId::Sports).await;

        let page = service(&backend).list_all(Some(TicketStatus::Available)).await;
        assert_eq!(page.tickets.len(), 1);
        assert_eq!(page.tickets[0].id.as_str(), "c");
        assert_eq!(page.unavailable, vec![ShardId::Sports]);
        assert!(page.is_partial());
    }

    #[tokio::test]
    async fn test_owned_listing_spans_shards() {
        let backend = Arc::new(MemoryBackend::new());
        let me = Uuid::new_v4();
        backend.insert_raw(ShardId::Sports, row("s", "Sports", "available", me)).await;
        backend.insert_raw(ShardId::Theater, row("t", "Theater", "sold", me)).await;
        backend
            .insert_raw(ShardId::Theater, row("x", "Theater", "available", Uuid::new_v4()))
            .await;

        let page = service(&backend).list_owned(me, None).await;
        let mut ids: Vec<_> = page.tickets.iter().map(|t| t.id.as_str().to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["s", "t"]);
    }

    #[tokio::test]
    async fn test_owned_snapshot_refuses_partial_results() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_shard(ShardId::Festivals).await;
        let result = service(&backend)
            .load(&RefreshScope::OwnedTickets(Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(BackendError::ShardUnavailable(ShardId::Festivals))));
    }
}
