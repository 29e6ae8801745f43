use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheEvent, CacheInvalidation, KeyValueStore};
use crate::catalog::resolver::TicketResolver;
use crate::models::{Ticket, TicketId};

const EVENT_CHANNEL_CAPACITY: usize = 64;

fn ticket_key(id: &TicketId) -> String {
    format!("ticket:{id}")
}

/// Resolved tickets, serialized as JSON under `ticket:{id}`.
#[derive(Debug)]
pub struct TicketCache {
    store: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<CacheEvent>,
}

impl TicketCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { store, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub async fn get(&self, id: &TicketId) -> Option<Ticket> {
        let raw = match self.store.get(&ticket_key(id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(ticket_id = %id, error = %e, "Ticket cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(ticket) => Some(ticket),
            Err(e) => {
                warn!(ticket_id = %id, error = %e, "Discarding undecodable cached ticket");
                None
            }
        }
    }

    pub async fn put(&self, ticket: &Ticket) {
        let encoded = match serde_json::to_string(ticket) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(ticket_id = %ticket.id, error = %e, "Ticket not cacheable");
                return;
            }
        };
        if let Err(e) = self.store.set(&ticket_key(&ticket.id), &encoded).await {
            warn!(ticket_id = %ticket.id, error = %e, "Ticket cache write failed");
        }
    }
}

#[async_trait]
impl CacheInvalidation for TicketCache {
    async fn ticket_changed(&self, ticket_id: &TicketId, _parties: &[Uuid]) {
        if let Err(e) = self.store.remove(&ticket_key(ticket_id)).await {
            warn!(ticket_id = %ticket_id, error = %e, "Ticket cache invalidation failed");
        }
        // No subscribers is fine.
        let _ = self.events.send(CacheEvent::TicketInvalidated {
            ticket_id: ticket_id.clone(),
        });
        debug!(ticket_id = %ticket_id, "Invalidated cached ticket");
    }
}

/// Read-through cache in front of another resolver. Misses are not cached.
pub struct CachedResolver {
    inner: Arc<dyn TicketResolver>,
    cache: Arc<TicketCache>,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn TicketResolver>, cache: Arc<TicketCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl TicketResolver for CachedResolver {
    async fn find(&self, id: &TicketId) -> Option<Ticket> {
        if let Some(ticket) = self.cache.get(id).await {
            return Some(ticket);
        }
        let ticket = self.inner.find(id).await?;
        self.cache.put(&ticket).await;
        Some(ticket)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::cache::MemoryStore;
    use crate::catalog::resolver::ShardScanResolver;
    use crate::catalog::shard::{ShardId, ShardMap};

    async fn setup() -> (Arc<MemoryBackend>, Arc<TicketCache>, CachedResolver) {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .insert_raw(
                ShardId::Comedy,
                json!({
                    "id": "t-7",
                    "title": "Open mic",
                    "price": 12,
                    "owner_id": Uuid::new_v4().to_string(),
                    "created_at": "2024-02-02T19:00:00Z"
                }),
            )
            .await;
        let scan = Arc::new(ShardScanResolver::new(
            backend.clone(),
            Arc::new(ShardMap::default()),
        ));
        let cache = Arc::new(TicketCache::new(Arc::new(MemoryStore::new(
            100,
            Duration::from_secs(60),
        ))));
        let resolver = CachedResolver::new(scan, cache.clone());
        (backend, cache, resolver)
    }

    #[tokio::test]
    async fn test_second_lookup_is_served_from_cache() {
        let (backend, _cache, resolver) = setup().await;
        let id = TicketId::from("t-7");

        assert!(resolver.find(&id).await.is_some());
        let probes = backend.point_lookups();
        assert!(resolver.find(&id).await.is_some());
        assert_eq!(backend.point_lookups(), probes);
    }

    #[tokio::test]
    async fn test_invalidation_forces_rescan_and_notifies() {
        let (backend, cache, resolver) = setup().await;
        let id = TicketId::from("t-7");
        let mut events = cache.subscribe();

        resolver.find(&id).await;
        let probes = backend.point_lookups();
        cache.ticket_changed(&id, &[]).await;

        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::TicketInvalidated { ticket_id: id.clone() }
        );
        resolver.find(&id).await;
        assert!(backend.point_lookups() > probes);
    }
}
