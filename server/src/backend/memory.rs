//! In-process backend.
//!
//! Rows are kept as loose JSON objects, exactly as the Postgres adapter hands
//! them over, so legacy row shapes and malformed rows can be seeded directly.
//! Individual shards can be switched off, or made to reject writes only, to
//! exercise partial-outage paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::{
    is_valid_procedure_name, BackendError, BackendResult, Directory, NewTicketRow, RowFilter,
    RpcClient, SessionFactory, SessionProvider, TicketStore, TicketUpdate,
};
use crate::catalog::shard::ShardId;
use crate::models::{
    AuthIdentity, Category, Event, Profile, Subscriber, TicketId, TicketStatus, UserSummary,
};

#[derive(Debug, Clone)]
struct SessionEntry {
    identity: AuthIdentity,
    valid: bool,
}

type SessionTable = Arc<RwLock<HashMap<String, SessionEntry>>>;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    shards: RwLock<HashMap<ShardId, Vec<Value>>>,
    failing: RwLock<HashSet<ShardId>>,
    read_only: RwLock<HashSet<ShardId>>,
    profiles: RwLock<HashMap<Uuid, Profile>>,
    sessions: SessionTable,
    categories: RwLock<Vec<Category>>,
    events: RwLock<Vec<Event>>,
    users: RwLock<Vec<UserSummary>>,
    subscribers: RwLock<Vec<Subscriber>>,
    directory_down: AtomicBool,
    point_lookups: AtomicUsize,
    listing_queries: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a row verbatim, bypassing any validation.
    pub async fn insert_raw(&self, shard: ShardId, row: Value) {
        self.shards.write().await.entry(shard).or_default().push(row);
    }

    pub async fn fail_shard(&self, shard: ShardId) {
        self.failing.write().await.insert(shard);
    }

    pub async fn restore_shard(&self, shard: ShardId) {
        self.failing.write().await.remove(&shard);
    }

    /// Reads keep working; updates on the shard fail.
    pub async fn fail_writes(&self, shard: ShardId) {
        self.read_only.write().await.insert(shard);
    }

    pub fn set_directory_available(&self, available: bool) {
        self.directory_down.store(!available, Ordering::SeqCst);
    }

    /// Registers a signed-in user: auth identity, marketplace profile and a
    /// live session reachable through `token`.
    pub async fn add_user(
        &self,
        token: &str,
        email: &str,
        is_admin: bool,
    ) -> (AuthIdentity, Profile) {
        let identity = AuthIdentity {
            id: Uuid::new_v4(),
            email: email.to_string(),
        };
        let profile = Profile {
            id: Uuid::new_v4(),
            is_admin,
        };
        self.profiles.write().await.insert(identity.id, profile);
        self.sessions.write().await.insert(
            token.to_string(),
            SessionEntry {
                identity: identity.clone(),
                valid: true,
            },
        );
        self.users.write().await.push(UserSummary {
            id: profile.id,
            email: email.to_string(),
            display_name: None,
            is_admin,
            created_at: Utc::now(),
        });
        (identity, profile)
    }

    /// Adds a session whose identity has no marketplace profile.
    pub async fn add_session_without_profile(&self, token: &str, email: &str) -> AuthIdentity {
        let identity = AuthIdentity {
            id: Uuid::new_v4(),
            email: email.to_string(),
        };
        self.sessions.write().await.insert(
            token.to_string(),
            SessionEntry {
                identity: identity.clone(),
                valid: true,
            },
        );
        identity
    }

    pub async fn expire_session(&self, token: &str) {
        if let Some(entry) = self.sessions.write().await.get_mut(token) {
            entry.valid = false;
        }
    }

    pub async fn set_categories(&self, categories: Vec<Category>) {
        *self.categories.write().await = categories;
    }

    pub async fn set_events(&self, events: Vec<Event>) {
        *self.events.write().await = events;
    }

    pub async fn add_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.write().await.push(subscriber);
    }

    pub fn point_lookups(&self) -> usize {
        self.point_lookups.load(Ordering::SeqCst)
    }

    pub fn listing_queries(&self) -> usize {
        self.listing_queries.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn ensure_available(&self, shard: ShardId) -> BackendResult<()> {
        if self.failing.read().await.contains(&shard) {
            return Err(BackendError::ShardUnavailable(shard));
        }
        Ok(())
    }

    fn ensure_directory(&self) -> BackendResult<()> {
        if self.directory_down.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("directory"));
        }
        Ok(())
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn row_status(row: &Value) -> Option<TicketStatus> {
    row.get("status")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

fn row_owner(row: &Value) -> Option<Uuid> {
    row.get("owner_id")
        .or_else(|| row.get("user_id"))
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn apply_update(row: &mut Value, update: &TicketUpdate) -> BackendResult<()> {
    let Some(obj) = row.as_object_mut() else {
        return Ok(());
    };
    let mut set = |key: &str, value: Value| {
        obj.insert(key.to_string(), value);
    };
    if let Some(title) = &update.title {
        set("title", json!(title));
    }
    if let Some(description) = &update.description {
        set("description", json!(description));
    }
    if let Some(price) = &update.price {
        set("price", serde_json::to_value(price)?);
    }
    if let Some(quantity) = update.quantity {
        set("quantity", json!(quantity));
    }
    if let Some(status) = update.status {
        set("status", json!(status.as_str()));
    }
    if let Some(event_id) = &update.event_id {
        set("event_id", json!(event_id));
    }
    if let Some(event_date) = &update.event_date {
        set("event_date", json!(event_date.map(|d| d.to_rfc3339())));
    }
    if let Some(venue) = &update.venue {
        set("venue", json!(venue));
    }
    if let Some(seat) = &update.seat {
        set("seat", json!(seat));
    }
    if let Some(file_path) = &update.file_path {
        set("file_path", json!(file_path));
    }
    if let Some(owner_id) = update.owner_id {
        set("owner_id", json!(owner_id.to_string()));
    }
    if let Some(buyer_id) = &update.buyer_id {
        set("buyer_id", json!(buyer_id.map(|b| b.to_string())));
    }
    set("updated_at", json!(Utc::now().to_rfc3339()));
    Ok(())
}

#[async_trait]
impl TicketStore for MemoryBackend {
    async fn select_by_id(&self, shard: ShardId, id: &TicketId) -> BackendResult<Option<Value>> {
        self.point_lookups.fetch_add(1, Ordering::SeqCst);
        self.ensure_available(shard).await?;
        let shards = self.shards.read().await;
        Ok(shards
            .get(&shard)
            .and_then(|rows| rows.iter().find(|row| row_id(row) == Some(id.as_str())))
            .cloned())
    }

    async fn select_listings(
        &self,
        shard: ShardId,
        filter: RowFilter,
    ) -> BackendResult<Vec<Value>> {
        self.listing_queries.fetch_add(1, Ordering::SeqCst);
        self.ensure_available(shard).await?;
        let shards = self.shards.read().await;
        Ok(shards
            .get(&shard)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.matches(row_status(row), row_owner(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, shard: ShardId, row: &NewTicketRow) -> BackendResult<Value> {
        self.ensure_available(shard).await?;
        let value = serde_json::to_value(row)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.shards
            .write()
            .await
            .entry(shard)
            .or_default()
            .push(value.clone());
        Ok(value)
    }

    async fn update_by_id(
        &self,
        shard: ShardId,
        id: &TicketId,
        update: &TicketUpdate,
    ) -> BackendResult<bool> {
        self.ensure_available(shard).await?;
        if self.read_only.read().await.contains(&shard) {
            return Err(BackendError::ShardUnavailable(shard));
        }
        let mut shards = self.shards.write().await;
        let Some(row) = shards
            .get_mut(&shard)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id.as_str())))
        else {
            return Ok(false);
        };
        if let Some(expected) = update.expected_status {
            if row_status(row) != Some(expected) {
                return Ok(false);
            }
        }
        apply_update(row, update)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn delete_by_id(&self, shard: ShardId, id: &TicketId) -> BackendResult<bool> {
        self.ensure_available(shard).await?;
        let mut shards = self.shards.write().await;
        let Some(rows) = shards.get_mut(&shard) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|row| row_id(row) != Some(id.as_str()));
        let deleted = rows.len() < before;
        if deleted {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(deleted)
    }
}

#[async_trait]
impl RpcClient for MemoryBackend {
    async fn call(&self, name: &str, params: Value) -> BackendResult<Value> {
        if !is_valid_procedure_name(name) {
            return Err(BackendError::UnknownProcedure(name.to_string()));
        }
        match name {
            "profile_for_auth" => {
                let auth_id = params
                    .get("auth_user_id")
                    .and_then(Value::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok());
                let profiles = self.profiles.read().await;
                match auth_id.and_then(|id| profiles.get(&id)) {
                    Some(profile) => Ok(serde_json::to_value(profile)?),
                    None => Ok(Value::Null),
                }
            }
            other => Err(BackendError::UnknownProcedure(other.to_string())),
        }
    }
}

#[async_trait]
impl Directory for MemoryBackend {
    async fn list_categories(&self) -> BackendResult<Vec<Category>> {
        self.ensure_directory()?;
        Ok(self.categories.read().await.clone())
    }

    async fn list_events(&self) -> BackendResult<Vec<Event>> {
        self.ensure_directory()?;
        Ok(self.events.read().await.clone())
    }

    async fn list_users(&self) -> BackendResult<Vec<UserSummary>> {
        self.ensure_directory()?;
        Ok(self.users.read().await.clone())
    }

    async fn list_subscribers(&self) -> BackendResult<Vec<Subscriber>> {
        self.ensure_directory()?;
        Ok(self.subscribers.read().await.clone())
    }
}

impl SessionFactory for MemoryBackend {
    fn open(&self, bearer_token: Option<&str>) -> Arc<dyn SessionProvider> {
        Arc::new(MemorySession {
            sessions: Arc::clone(&self.sessions),
            token: bearer_token.map(str::to_string),
        })
    }
}

#[derive(Debug)]
pub struct MemorySession {
    sessions: SessionTable,
    token: Option<String>,
}

#[async_trait]
impl SessionProvider for MemorySession {
    async fn current_identity(&self) -> BackendResult<Option<AuthIdentity>> {
        let Some(token) = &self.token else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .read()
            .await
            .get(token)
            .filter(|entry| entry.valid)
            .map(|entry| entry.identity.clone()))
    }

    async fn refresh_session(&self) -> BackendResult<bool> {
        let Some(token) = &self.token else {
            return Ok(false);
        };
        Ok(self
            .sessions
            .read()
            .await
            .get(token)
            .is_some_and(|entry| entry.valid))
    }
}

/// Fixed session, for driving the core without a session table.
#[derive(Debug, Clone)]
pub struct StaticSession {
    identity: Option<AuthIdentity>,
    valid: bool,
}

impl StaticSession {
    pub fn signed_in(identity: AuthIdentity) -> Self {
        Self {
            identity: Some(identity),
            valid: true,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            identity: None,
            valid: false,
        }
    }

    /// Identity still cached client-side but the session can no longer be extended.
    pub fn expired(identity: AuthIdentity) -> Self {
        Self {
            identity: Some(identity),
            valid: false,
        }
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn current_identity(&self) -> BackendResult<Option<AuthIdentity>> {
        Ok(self.identity.clone())
    }

    async fn refresh_session(&self) -> BackendResult<bool> {
        Ok(self.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_conditional_update_respects_expected_status() {
        let backend = MemoryBackend::new();
        let owner = Uuid::new_v4();
        backend
            .insert_raw(
                ShardId::Sports,
                json!({ "id": "t-9", "status": "sold", "owner_id": owner.to_string() }),
            )
            .await;

        let applied = backend
            .update_by_id(
                ShardId::Sports,
                &TicketId::from("t-9"),
                &TicketUpdate::sold_to(Uuid::new_v4()),
            )
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_failing_shard_reports_unavailable() {
        let backend = MemoryBackend::new();
        backend.fail_shard(ShardId::Cinema).await;
        let err = backend
            .select_by_id(ShardId::Cinema, &TicketId::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ShardUnavailable(ShardId::Cinema)));

        backend.restore_shard(ShardId::Cinema).await;
        assert!(backend
            .select_by_id(ShardId::Cinema, &TicketId::from("x"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_read_only_shard_rejects_updates_but_serves_reads() {
        let backend = MemoryBackend::new();
        let owner = Uuid::new_v4();
        backend
            .insert_raw(
                ShardId::Cinema,
                json!({ "id": "t-3", "status": "available", "owner_id": owner.to_string() }),
            )
            .await;
        backend.fail_writes(ShardId::Cinema).await;

        let id = TicketId::from("t-3");
        assert!(backend.select_by_id(ShardId::Cinema, &id).await.unwrap().is_some());
        let err = backend
            .update_by_id(ShardId::Cinema, &id, &TicketUpdate::sold_to(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ShardUnavailable(ShardId::Cinema)));
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_profile_rpc_returns_null_for_unknown_identity() {
        let backend = MemoryBackend::new();
        let (identity, profile) = backend.add_user("tok", "a@example.com", false).await;

        let found = backend
            .call("profile_for_auth", json!({ "auth_user_id": identity.id.to_string() }))
            .await
            .unwrap();
        assert_eq!(found["id"], json!(profile.id.to_string()));

        let missing = backend
            .call("profile_for_auth", json!({ "auth_user_id": Uuid::new_v4().to_string() }))
            .await
            .unwrap();
        assert!(missing.is_null());

        assert!(backend.call("nope", Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_session_cannot_refresh() {
        let backend = MemoryBackend::new();
        backend.add_user("tok", "a@example.com", false).await;
        let session = backend.open(Some("tok"));
        assert!(session.refresh_session().await.unwrap());

        backend.expire_session("tok").await;
        assert!(!session.refresh_session().await.unwrap());
        assert!(session.current_identity().await.unwrap().is_none());
        assert!(backend.open(None).current_identity().await.unwrap().is_none());
    }
}
