//! Wiring of the core services into one cloneable handle for the router.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::{Directory, RpcClient, SessionFactory, TicketStore};
use crate::cache::{CachedResolver, KeyValueStore, MemoryStore, TicketCache};
use crate::catalog::{CatalogService, ListingService, ShardMap, ShardScanResolver, TicketResolver};
use crate::config::Config;
use crate::models::{Subscriber, Ticket, UserSummary};
use crate::purchase::PurchaseOrchestrator;
use crate::refresh::{DirectorySource, RefreshController};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: CatalogService,
    /// Cached lookups for read paths. Writes resolve through the shards.
    pub resolver: Arc<dyn TicketResolver>,
    pub ticket_cache: Arc<TicketCache>,
    pub purchases: PurchaseOrchestrator,
    pub listings: ListingService,
    pub sessions: Arc<dyn SessionFactory>,
    pub directory: Arc<dyn Directory>,
    pub rpc: Arc<dyn RpcClient>,
    pub owned_tickets: Arc<RefreshController<Ticket>>,
    pub users: Arc<RefreshController<UserSummary>>,
    pub subscribers: Arc<RefreshController<Subscriber>>,
}

impl AppState {
    pub fn new<B>(config: Config, backend: Arc<B>, shards: ShardMap) -> Self
    where
        B: TicketStore + RpcClient + Directory + SessionFactory,
    {
        let shards = Arc::new(shards);
        let store: Arc<dyn TicketStore> = backend.clone();
        let rpc: Arc<dyn RpcClient> = backend.clone();
        let directory: Arc<dyn Directory> = backend.clone();
        let sessions: Arc<dyn SessionFactory> = backend;

        let ticket_store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(
            config.cache_max_capacity,
            config.ticket_cache_ttl,
        ));
        // Stamps must outlive the cooldown.
        let stamp_store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(
            config.cache_max_capacity,
            config.refresh_cooldown.max(config.ticket_cache_ttl),
        ));

        let scan: Arc<dyn TicketResolver> =
            Arc::new(ShardScanResolver::new(store.clone(), shards.clone()));
        let ticket_cache = Arc::new(TicketCache::new(ticket_store));
        let resolver: Arc<dyn TicketResolver> =
            Arc::new(CachedResolver::new(scan.clone(), ticket_cache.clone()));

        let catalog = CatalogService::new(store.clone(), shards.clone());
        let directory_source = Arc::new(DirectorySource::new(directory.clone()));
        let retention = (config.cache_max_capacity, config.snapshot_idle_ttl);
        let owned_tickets: Arc<RefreshController<Ticket>> = Arc::new(
            RefreshController::new(
                Arc::new(catalog.clone()),
                stamp_store.clone(),
                config.refresh_cooldown,
            )
            .with_retention(retention.0, retention.1),
        );
        let users: Arc<RefreshController<UserSummary>> = Arc::new(
            RefreshController::new(
                directory_source.clone(),
                stamp_store.clone(),
                config.refresh_cooldown,
            )
            .with_retention(retention.0, retention.1),
        );
        let subscribers: Arc<RefreshController<Subscriber>> = Arc::new(
            RefreshController::new(directory_source, stamp_store, config.refresh_cooldown)
                .with_retention(retention.0, retention.1),
        );

        let purchases = PurchaseOrchestrator::new(store.clone(), scan.clone(), rpc.clone())
            .with_invalidation(ticket_cache.clone())
            .with_invalidation(owned_tickets.clone());
        let listings = ListingService::new(store, scan, shards)
            .with_invalidation(ticket_cache.clone())
            .with_invalidation(owned_tickets.clone());

        Self {
            config: Arc::new(config),
            catalog,
            resolver,
            ticket_cache,
            purchases,
            listings,
            sessions,
            directory,
            rpc,
            owned_tickets,
            users,
            subscribers,
        }
    }
}

/// Shard map extended with the live categories' locale variants. Falls back
/// to the built-in synonyms when categories cannot be read.
pub async fn load_shard_map(directory: &dyn Directory) -> ShardMap {
    match directory.list_categories().await {
        Ok(categories) => {
            info!(count = categories.len(), "Loaded categories for shard routing");
            ShardMap::with_categories(&categories)
        }
        Err(e) => {
            warn!(error = %e, "Could not load categories, using built-in synonyms");
            ShardMap::default()
        }
    }
}
