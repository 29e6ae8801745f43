//! Ticket purchase: resolve the caller, refuse self-purchase, transfer
//! ownership with a single guarded row update, then drop cached views.
//!
//! No money moves here. The row update is the only write, so a failure at
//! any step leaves the ticket exactly as it was.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{RpcClient, SessionProvider, TicketStore, TicketUpdate};
use crate::cache::CacheInvalidation;
use crate::catalog::resolver::TicketResolver;
use crate::catalog::shard::ShardId;
use crate::identity::{resolve_caller, IdentityError};
use crate::models::{Ticket, TicketId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurchaseError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("no marketplace profile for this account")]
    ProfileNotFound,

    #[error("ticket not found")]
    NotFound,

    #[error("you cannot buy your own ticket")]
    SelfPurchaseRejected,

    #[error("purchase failed: {0}")]
    PurchaseFailed(String),
}

impl From<IdentityError> for PurchaseError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotAuthenticated => Self::NotAuthenticated,
            IdentityError::ProfileNotFound => Self::ProfileNotFound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReceipt {
    pub ticket_id: TicketId,
    pub shard: ShardId,
    pub buyer_id: Uuid,
    pub previous_owner_id: Uuid,
}

/// Why `profile_id` may not buy `ticket` right now, if anything. Lets the UI
/// disable the action up front instead of failing after the click.
pub fn purchase_blocker(ticket: &Ticket, profile_id: Uuid) -> Option<PurchaseError> {
    if ticket.is_owned_by(profile_id) {
        return Some(PurchaseError::SelfPurchaseRejected);
    }
    if !ticket.is_available() {
        return Some(PurchaseError::PurchaseFailed(format!(
            "ticket is {}",
            ticket.status
        )));
    }
    None
}

#[derive(Clone)]
pub struct PurchaseOrchestrator {
    store: Arc<dyn TicketStore>,
    resolver: Arc<dyn TicketResolver>,
    rpc: Arc<dyn RpcClient>,
    invalidations: Vec<Arc<dyn CacheInvalidation>>,
}

impl PurchaseOrchestrator {
    /// `resolver` should read through to the shards; a cached copy could
    /// hide a sale that already happened.
    pub fn new(
        store: Arc<dyn TicketStore>,
        resolver: Arc<dyn TicketResolver>,
        rpc: Arc<dyn RpcClient>,
    ) -> Self {
        Self {
            store,
            resolver,
            rpc,
            invalidations: Vec::new(),
        }
    }

    pub fn with_invalidation(mut self, target: Arc<dyn CacheInvalidation>) -> Self {
        self.invalidations.push(target);
        self
    }

    pub async fn purchase(
        &self,
        session: &dyn SessionProvider,
        ticket_id: &TicketId,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let caller = resolve_caller(session, self.rpc.as_ref()).await?;
        let buyer_id = caller.profile.id;

        let ticket = self
            .resolver
            .find(ticket_id)
            .await
            .ok_or(PurchaseError::NotFound)?;

        if let Some(blocker) = purchase_blocker(&ticket, buyer_id) {
            warn!(
                ticket_id = %ticket_id,
                buyer_id = %buyer_id,
                reason = %blocker,
                "Purchase refused"
            );
            return Err(blocker);
        }

        let applied = self
            .store
            .update_by_id(ticket.shard, ticket_id, &TicketUpdate::sold_to(buyer_id))
            .await
            .map_err(|e| {
                error!(
                    ticket_id = %ticket_id,
                    shard = %ticket.shard,
                    error = %e,
                    "Purchase write failed"
                );
                PurchaseError::PurchaseFailed("the ticket could not be updated".to_string())
            })?;
        if !applied {
            warn!(
                ticket_id = %ticket_id,
                buyer_id = %buyer_id,
                "Ticket sold or removed before purchase"
            );
            return Err(PurchaseError::PurchaseFailed(
                "ticket is no longer available".to_string(),
            ));
        }

        let parties = [ticket.owner_id, buyer_id];
        for target in &self.invalidations {
            target.ticket_changed(ticket_id, &parties).await;
        }

        info!(
            ticket_id = %ticket_id,
            shard = %ticket.shard,
            buyer_id = %buyer_id,
            previous_owner_id = %ticket.owner_id,
            "Ticket purchased"
        );
        Ok(PurchaseReceipt {
            ticket_id: ticket_id.clone(),
            shard: ticket.shard,
            buyer_id,
            previous_owner_id: ticket.owner_id,
        })
    }
}
