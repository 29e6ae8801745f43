//! Seller-side listing lifecycle: create, edit, withdraw.
//!
//! The shard is fixed by the category at creation time. There is no way to
//! move a ticket between shards, so the category cannot be edited.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, NewTicketRow, TicketStore, TicketUpdate};
use crate::cache::CacheInvalidation;
use crate::catalog::normalize::{normalize, NormalizeError};
use crate::catalog::resolver::TicketResolver;
use crate::catalog::shard::ShardMap;
use crate::models::{Ticket, TicketId, TicketStatus};

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("{0}")]
    Validation(String),

    #[error("ticket not found")]
    NotFound,

    #[error("only the owner can change this ticket")]
    Forbidden,

    #[error("sold tickets cannot be edited")]
    SoldNotEditable,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("stored ticket is unreadable: {0}")]
    Unreadable(#[from] NormalizeError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewListing {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    pub price: Decimal,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub seat: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Fields an owner may change. An absent field is left alone; an explicit
/// `null` clears a nullable column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingEdit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default, deserialize_with = "present")]
    pub event_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub event_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub venue: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub seat: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub file_path: Option<Option<String>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_title(title: &str) -> Result<String, ListingError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ListingError::Validation("title is required".to_string()));
    }
    Ok(title.to_string())
}

fn validate_price(price: Decimal) -> Result<Decimal, ListingError> {
    if price < Decimal::ZERO {
        return Err(ListingError::Validation(
            "price cannot be negative".to_string(),
        ));
    }
    Ok(price)
}

fn validate_quantity(quantity: i32) -> Result<i32, ListingError> {
    if quantity < 1 {
        return Err(ListingError::Validation(
            "quantity must be at least 1".to_string(),
        ));
    }
    Ok(quantity)
}

impl ListingEdit {
    fn into_update(self) -> Result<TicketUpdate, ListingError> {
        Ok(TicketUpdate {
            title: self.title.as_deref().map(validate_title).transpose()?,
            description: self.description.map(trimmed),
            price: self.price.map(validate_price).transpose()?,
            quantity: self.quantity.map(validate_quantity).transpose()?,
            event_id: self.event_id.map(trimmed),
            event_date: self.event_date,
            venue: self.venue.map(trimmed),
            seat: self.seat.map(trimmed),
            file_path: self.file_path.map(trimmed),
            ..TicketUpdate::default()
        })
    }
}

#[derive(Clone)]
pub struct ListingService {
    store: Arc<dyn TicketStore>,
    resolver: Arc<dyn TicketResolver>,
    shards: Arc<ShardMap>,
    invalidations: Vec<Arc<dyn CacheInvalidation>>,
}

impl ListingService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        resolver: Arc<dyn TicketResolver>,
        shards: Arc<ShardMap>,
    ) -> Self {
        Self {
            store,
            resolver,
            shards,
            invalidations: Vec::new(),
        }
    }

    pub fn with_invalidation(mut self, target: Arc<dyn CacheInvalidation>) -> Self {
        self.invalidations.push(target);
        self
    }

    pub async fn create(&self, owner: Uuid, listing: NewListing) -> Result<Ticket, ListingError> {
        let title = validate_title(&listing.title)?;
        let category = listing.category.trim().to_string();
        if category.is_empty() {
            return Err(ListingError::Validation("category is required".to_string()));
        }
        let price = validate_price(listing.price)?;
        let quantity = validate_quantity(listing.quantity.unwrap_or(1))?;

        let shard = self.shards.shard_for(&category);
        let row = NewTicketRow {
            id: TicketId::generate(),
            title,
            description: trimmed(listing.description),
            category,
            price,
            quantity,
            status: TicketStatus::Available,
            event_id: trimmed(listing.event_id),
            event_date: listing.event_date,
            venue: trimmed(listing.venue),
            seat: trimmed(listing.seat),
            file_path: trimmed(listing.file_path),
            owner_id: owner,
            seller_id: Some(owner),
            created_at: Utc::now(),
        };

        let stored = self.store.insert(shard, &row).await?;
        let ticket = normalize(shard, stored)?;
        self.notify(&ticket.id, &[owner]).await;
        info!(ticket_id = %ticket.id, shard = %shard, owner_id = %owner, "Listing created");
        Ok(ticket)
    }

    pub async fn update(
        &self,
        owner: Uuid,
        id: &TicketId,
        edit: ListingEdit,
    ) -> Result<Ticket, ListingError> {
        let ticket = self.owned(owner, id).await?;
        if ticket.status == TicketStatus::Sold {
            return Err(ListingError::SoldNotEditable);
        }

        let mut update = edit.into_update()?;
        if update.is_empty() {
            return Ok(ticket);
        }
        update.expected_status = Some(ticket.status);

        if !self.store.update_by_id(ticket.shard, id, &update).await? {
            // The row changed status (or vanished) since it was read.
            warn!(ticket_id = %id, "Listing changed underneath edit");
            return Err(ListingError::SoldNotEditable);
        }

        let row = self
            .store
            .select_by_id(ticket.shard, id)
            .await?
            .ok_or(ListingError::NotFound)?;
        let updated = normalize(ticket.shard, row)?;
        self.notify(id, &[owner]).await;
        info!(ticket_id = %id, shard = %ticket.shard, "Listing updated");
        Ok(updated)
    }

    pub async fn delete(&self, owner: Uuid, id: &TicketId) -> Result<(), ListingError> {
        let ticket = self.owned(owner, id).await?;
        if !self.store.delete_by_id(ticket.shard, id).await? {
            return Err(ListingError::NotFound);
        }
        self.notify(id, &[owner]).await;
        info!(ticket_id = %id, shard = %ticket.shard, "Listing deleted");
        Ok(())
    }

    async fn owned(&self, owner: Uuid, id: &TicketId) -> Result<Ticket, ListingError> {
        let ticket = self.resolver.find(id).await.ok_or(ListingError::NotFound)?;
        if !ticket.is_owned_by(owner) {
            return Err(ListingError::Forbidden);
        }
        Ok(ticket)
    }

    async fn notify(&self, id: &TicketId, parties: &[Uuid]) {
        for target in &self.invalidations {
            target.ticket_changed(id, parties).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::catalog::resolver::ShardScanResolver;
    use crate::catalog::shard::ShardId;

    fn service(backend: &Arc<MemoryBackend>) -> ListingService {
        let shards = Arc::new(ShardMap::default());
        let resolver = Arc::new(ShardScanResolver::new(backend.clone(), shards.clone()));
        ListingService::new(backend.clone(), resolver, shards)
    }

    fn listing(category: &str) -> NewListing {
        NewListing {
            title: "  Front row  ".to_string(),
            description: None,
            category: category.to_string(),
            price: Decimal::new(4500, 2),
            quantity: None,
            event_id: None,
            event_date: None,
            venue: Some("Arena".to_string()),
            seat: Some("A1".to_string()),
            file_path: None,
        }
    }

    #[tokio::test]
    async fn test_created_ticket_lands_in_its_category_shard() {
        let backend = Arc::new(MemoryBackend::new());
        let svc = service(&backend);
        let owner = Uuid::new_v4();

        let ticket = svc.create(owner, listing("koncerti")).await.unwrap();
        assert_eq!(ticket.shard, ShardId::Concerts);
        assert_eq!(ShardMap::default().shard_for(&ticket.category), ticket.shard);
        assert_eq!(ticket.title, "Front row");
        assert_eq!(ticket.quantity, 1);
        assert_eq!(ticket.status, TicketStatus::Available);
        assert_eq!(ticket.seller_id, Some(owner));

        let other = svc.create(owner, listing("Poetry slam")).await.unwrap();
        assert_eq!(other.shard, ShardId::Other);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let backend = Arc::new(MemoryBackend::new());
        let svc = service(&backend);

        let mut bad = listing("Sports");
        bad.title = "   ".to_string();
        assert!(matches!(
            svc.create(Uuid::new_v4(), bad).await,
            Err(ListingError::Validation(_))
        ));

        let mut bad = listing("Sports");
        bad.price = Decimal::new(-1, 0);
        assert!(matches!(
            svc.create(Uuid::new_v4(), bad).await,
            Err(ListingError::Validation(_))
        ));

        let mut bad = listing("Sports");
        bad.quantity = Some(0);
        assert!(matches!(
            svc.create(Uuid::new_v4(), bad).await,
            Err(ListingError::Validation(_))
        ));
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_owner_can_edit_and_clear_fields() {
        let backend = Arc::new(MemoryBackend::new());
        let svc = service(&backend);
        let owner = Uuid::new_v4();
        let ticket = svc.create(owner, listing("Theater")).await.unwrap();

        let edit: ListingEdit =
            serde_json::from_value(json!({ "price": "30.00", "seat": null })).unwrap();
        let updated = svc.update(owner, &ticket.id, edit).await.unwrap();
        assert_eq!(updated.price, Decimal::new(3000, 2));
        assert_eq!(updated.seat, None);
        assert_eq!(updated.venue.as_deref(), Some("Arena"));
        assert_eq!(updated.shard, ShardId::Theater);
    }

    #[tokio::test]
    async fn test_non_owner_is_forbidden() {
        let backend = Arc::new(MemoryBackend::new());
        let svc = service(&backend);
        let ticket = svc.create(Uuid::new_v4(), listing("Cinema")).await.unwrap();

        let stranger = Uuid::new_v4();
        let edit = ListingEdit {
            title: Some("Mine now".to_string()),
            ..ListingEdit::default()
        };
        assert!(matches!(
            svc.update(stranger, &ticket.id, edit).await,
            Err(ListingError::Forbidden)
        ));
        assert!(matches!(
            svc.delete(stranger, &ticket.id).await,
            Err(ListingError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_sold_ticket_cannot_be_edited() {
        let backend = Arc::new(MemoryBackend::new());
        let buyer = Uuid::new_v4();
        backend
            .insert_raw(
                ShardId::Comedy,
                json!({
                    "id": "sold-1",
                    "title": "Stand-up night",
                    "price": 12,
                    "status": "sold",
                    "owner_id": buyer.to_string(),
                    "buyer_id": buyer.to_string(),
                    "created_at": "2024-03-01T18:00:00Z"
                }),
            )
            .await;

        let edit = ListingEdit {
            price: Some(Decimal::new(99, 0)),
            ..ListingEdit::default()
        };
        let err = service(&backend)
            .update(buyer, &TicketId::from("sold-1"), edit)
            .await
            .unwrap_err();
        assert!(matches!(err, ListingError::SoldNotEditable));
    }

    #[tokio::test]
    async fn test_delete_removes_the_row() {
        let backend = Arc::new(MemoryBackend::new());
        let svc = service(&backend);
        let owner = Uuid::new_v4();
        let ticket = svc.create(owner, listing("Festivals")).await.unwrap();

        svc.delete(owner, &ticket.id).await.unwrap();
        assert!(matches!(
            svc.delete(owner, &ticket.id).await,
            Err(ListingError::NotFound)
        ));
    }
}
