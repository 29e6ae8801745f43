//! Ticket lookup without knowing the shard.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backend::TicketStore;
use crate::catalog::normalize::normalize;
use crate::catalog::shard::ShardMap;
use crate::models::{Ticket, TicketId};

/// Finds a ticket by id alone. `None` is the normal answer for deleted or
/// mistyped ids.
#[async_trait]
pub trait TicketResolver: Send + Sync + 'static {
    async fn find(&self, id: &TicketId) -> Option<Ticket>;
}

/// Probes every shard in the fixed order, one at a time, and stops at the
/// first hit. Ids are unique across shards so the first hit is the only one.
#[derive(Clone)]
pub struct ShardScanResolver {
    store: Arc<dyn TicketStore>,
    shards: Arc<ShardMap>,
}

impl ShardScanResolver {
    pub fn new(store: Arc<dyn TicketStore>, shards: Arc<ShardMap>) -> Self {
        Self { store, shards }
    }
}

#[async_trait]
impl TicketResolver for ShardScanResolver {
    async fn find(&self, id: &TicketId) -> Option<Ticket> {
        for shard in self.shards.all_shards() {
            let row = match self.store.select_by_id(*shard, id).await {
                Ok(Some(row)) => row,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        ticket_id = %id,
                        shard = %shard,
                        error = %e,
                        "Shard lookup failed, continuing scan"
                    );
                    continue;
                }
            };
            match normalize(*shard, row) {
                Ok(ticket) => return Some(ticket),
                Err(e) => {
                    warn!(
                        ticket_id = %id,
                        shard = %shard,
                        error = %e,
                        "Skipping malformed ticket row"
                    );
                }
            }
        }
        debug!(ticket_id = %id, "Ticket not found in any shard");
        None
    }
}
