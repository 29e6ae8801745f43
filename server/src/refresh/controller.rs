use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::SessionProvider;
use crate::cache::{CacheInvalidation, KeyValueStore};
use crate::catalog::filter::{search, Searchable};
use crate::models::{Ticket, TicketId};
use crate::refresh::{
    RefreshError, RefreshEvent, RefreshOutcome, RefreshScope, SkipReason, SnapshotSource,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_MAX_SCOPES: u64 = 10_000;
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Immutable view of one scope. `items` is shared between a snapshot and the
/// copies derived from it by a new search or an invalidation.
#[derive(Debug)]
pub struct Snapshot<T> {
    items: Arc<Vec<T>>,
    search_text: Option<String>,
    view: Vec<T>,
    refreshed_at: DateTime<Utc>,
    stale: bool,
}

impl<T: Searchable + Clone> Snapshot<T> {
    fn build(items: Arc<Vec<T>>, search_text: Option<String>, refreshed_at: DateTime<Utc>) -> Self {
        let view = search(&items, search_text.as_deref());
        Self {
            items,
            search_text,
            view,
            refreshed_at,
            stale: false,
        }
    }

    fn marked_stale(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            search_text: self.search_text.clone(),
            view: self.view.clone(),
            refreshed_at: self.refreshed_at,
            stale: true,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Items narrowed by the current search text.
    pub fn view(&self) -> &[T] {
        &self.view
    }

    pub fn search_text(&self) -> Option<&str> {
        self.search_text.as_deref()
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    /// Set once the backend is known to have changed since this snapshot.
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

/// Scopes with a refresh running, each flagged once an invalidation arrives
/// while its load is still outstanding.
type Pending = Mutex<HashMap<RefreshScope, bool>>;

pub struct RefreshController<T> {
    source: Arc<dyn SnapshotSource<T>>,
    stamps: Arc<dyn KeyValueStore>,
    cooldown: Duration,
    snapshots: Cache<RefreshScope, Arc<Snapshot<T>>>,
    searches: Cache<RefreshScope, String>,
    /// Also serializes every snapshot replacement.
    pending: Pending,
    events: broadcast::Sender<RefreshEvent>,
}

/// Holds a scope's in-flight slot; released on drop, including when the
/// refresh future is dropped mid-way.
struct InFlightGuard<'a> {
    slots: &'a Pending,
    scope: RefreshScope,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(slots: &'a Pending, scope: &RefreshScope) -> Option<Self> {
        let mut held = slots.lock().unwrap_or_else(PoisonError::into_inner);
        if held.contains_key(scope) {
            return None;
        }
        held.insert(scope.clone(), false);
        Some(Self {
            slots,
            scope: scope.clone(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.scope);
    }
}

fn stamp_key(scope: &RefreshScope) -> String {
    format!("refresh:{scope}")
}

fn scope_cache<V>(max_scopes: u64, idle_ttl: Duration) -> Cache<RefreshScope, V>
where
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(max_scopes)
        .time_to_idle(idle_ttl)
        .build()
}

impl<T> RefreshController<T>
where
    T: Searchable + Clone + Send + Sync + 'static,
{
    pub fn new(
        source: Arc<dyn SnapshotSource<T>>,
        stamps: Arc<dyn KeyValueStore>,
        cooldown: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source,
            stamps,
            cooldown,
            snapshots: scope_cache(DEFAULT_MAX_SCOPES, DEFAULT_IDLE_TTL),
            searches: scope_cache(DEFAULT_MAX_SCOPES, DEFAULT_IDLE_TTL),
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Bounds how many scopes are held and drops a scope's snapshot and
    /// search once it has not been read for `idle_ttl`. Call before use.
    pub fn with_retention(mut self, max_scopes: u64, idle_ttl: Duration) -> Self {
        self.snapshots = scope_cache(max_scopes, idle_ttl);
        self.searches = scope_cache(max_scopes, idle_ttl);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self, scope: &RefreshScope) -> Option<Arc<Snapshot<T>>> {
        self.snapshots.get(scope)
    }

    pub async fn refresh(
        &self,
        scope: &RefreshScope,
        session: &dyn SessionProvider,
    ) -> Result<RefreshOutcome, RefreshError> {
        let Some(_guard) = InFlightGuard::acquire(&self.pending, scope) else {
            debug!(scope = %scope, "Refresh already in flight, skipping");
            return Ok(RefreshOutcome::Skipped {
                reason: SkipReason::InFlight,
            });
        };

        // A scope with nothing to show always loads, e.g. after eviction.
        if self.snapshots.contains_key(scope) && self.cooling_down(scope).await {
            debug!(scope = %scope, "Refresh within cooldown, skipping");
            return Ok(RefreshOutcome::Skipped {
                reason: SkipReason::Cooldown,
            });
        }

        match session.refresh_session().await {
            Ok(true) => {}
            Ok(false) => {
                info!(scope = %scope, "Session expired during refresh");
                return Err(RefreshError::AuthExpired);
            }
            Err(e) => {
                warn!(scope = %scope, error = %e, "Session check failed during refresh");
                return Err(RefreshError::AuthExpired);
            }
        }

        let items = self.source.load(scope).await.map_err(|e| {
            warn!(
                scope = %scope,
                error = %e,
                "Refresh load failed, keeping previous snapshot"
            );
            RefreshError::Load(e)
        })?;

        let count = items.len();
        let now = Utc::now();
        let mut snapshot = Snapshot::build(Arc::new(items), self.searches.get(scope), now);

        // Stamp first, so an invalidation from here on always gets to clear it.
        if let Err(e) = self
            .stamps
            .set(&stamp_key(scope), &now.timestamp_millis().to_string())
            .await
        {
            warn!(scope = %scope, error = %e, "Could not record refresh time");
        }

        let invalidated = {
            let pending = self.lock_pending();
            let invalidated = pending.get(scope).copied().unwrap_or(false);
            snapshot.stale = invalidated;
            self.snapshots.insert(scope.clone(), Arc::new(snapshot));
            invalidated
        };

        if invalidated {
            debug!(scope = %scope, "Invalidated while loading, snapshot kept stale");
            self.clear_stamp(scope).await;
        }

        let _ = self.events.send(RefreshEvent::Refreshed {
            scope: scope.clone(),
            count,
        });
        info!(scope = %scope, count, "Refreshed snapshot");
        Ok(RefreshOutcome::Refreshed { count })
    }

    /// Sets the search text for a scope and recomputes its view against the
    /// current snapshot, if there is one.
    pub fn set_search(
        &self,
        scope: &RefreshScope,
        search_text: Option<String>,
    ) -> Option<Arc<Snapshot<T>>> {
        let search_text = search_text
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let _pending = self.lock_pending();
        match &search_text {
            Some(text) => self.searches.insert(scope.clone(), text.clone()),
            None => self.searches.invalidate(scope),
        }

        let current = self.snapshots.get(scope)?;
        if current.search_text.as_deref() == search_text.as_deref() {
            return Some(current);
        }
        let mut next =
            Snapshot::build(Arc::clone(&current.items), search_text, current.refreshed_at);
        next.stale = current.stale;
        let next = Arc::new(next);
        self.snapshots.insert(scope.clone(), Arc::clone(&next));
        Some(next)
    }

    /// Marks the scope's snapshot stale and clears its cooldown so the next
    /// refresh goes through. The stale snapshot stays readable until then.
    pub async fn invalidate(&self, scope: &RefreshScope) {
        {
            let mut pending = self.lock_pending();
            if let Some(invalidated) = pending.get_mut(scope) {
                *invalidated = true;
            }
            if let Some(current) = self.snapshots.get(scope) {
                self.snapshots
                    .insert(scope.clone(), Arc::new(current.marked_stale()));
            }
        }
        self.clear_stamp(scope).await;
        let _ = self.events.send(RefreshEvent::Invalidated {
            scope: scope.clone(),
        });
    }

    /// Drops everything held for a scope. The next read loads it afresh.
    pub async fn evict(&self, scope: &RefreshScope) {
        {
            let _pending = self.lock_pending();
            self.snapshots.invalidate(scope);
            self.searches.invalidate(scope);
        }
        self.clear_stamp(scope).await;
        debug!(scope = %scope, "Evicted snapshot");
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<RefreshScope, bool>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn clear_stamp(&self, scope: &RefreshScope) {
        if let Err(e) = self.stamps.remove(&stamp_key(scope)).await {
            warn!(scope = %scope, error = %e, "Could not clear refresh cooldown");
        }
    }

    async fn cooling_down(&self, scope: &RefreshScope) -> bool {
        if self.cooldown.is_zero() {
            return false;
        }
        let stamp = match self.stamps.get(&stamp_key(scope)).await {
            Ok(stamp) => stamp,
            Err(e) => {
                warn!(scope = %scope, error = %e, "Could not read refresh time, not throttling");
                return false;
            }
        };
        let Some(last) = stamp.and_then(|s| s.parse::<i64>().ok()) else {
            return false;
        };
        let elapsed_ms = Utc::now().timestamp_millis().saturating_sub(last);
        let cooldown_ms = i64::try_from(self.cooldown.as_millis()).unwrap_or(i64::MAX);
        elapsed_ms < cooldown_ms
    }
}

#[async_trait]
impl CacheInvalidation for RefreshController<Ticket> {
    async fn ticket_changed(&self, ticket_id: &TicketId, parties: &[Uuid]) {
        for party in parties {
            debug!(ticket_id = %ticket_id, profile_id = %party, "Invalidating owned tickets view");
            self.invalidate(&RefreshScope::OwnedTickets(*party)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;
    use crate::backend::memory::StaticSession;
    use crate::backend::{BackendError, BackendResult};
    use crate::cache::MemoryStore;
    use crate::models::{AuthIdentity, Subscriber};

    struct CountingSource {
        loads: AtomicUsize,
        emails: Vec<&'static str>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    impl CountingSource {
        fn new(emails: Vec<&'static str>) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                emails,
                gate: None,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl SnapshotSource<Subscriber> for CountingSource {
        async fn load(&self, _scope: &RefreshScope) -> BackendResult<Vec<Subscriber>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(BackendError::Unavailable("directory"));
            }
            Ok(self
                .emails
                .iter()
                .map(|email| Subscriber {
                    id: Uuid::new_v4(),
                    email: email.to_string(),
                    locale: None,
                    subscribed_at: Utc::now(),
                })
                .collect())
        }
    }

    fn session() -> StaticSession {
        StaticSession::signed_in(AuthIdentity {
            id: Uuid::new_v4(),
            email: "admin@example.com".to_string(),
        })
    }

    fn controller(
        source: Arc<CountingSource>,
        cooldown: Duration,
    ) -> RefreshController<Subscriber> {
        RefreshController::new(
            source,
            Arc::new(MemoryStore::new(100, Duration::from_secs(60))),
            cooldown,
        )
    }

    #[tokio::test]
    async fn test_back_to_back_refresh_hits_backend_once() {
        let source = Arc::new(CountingSource::new(vec!["a@x.io", "b@x.io"]));
        let controller = controller(source.clone(), Duration::from_secs(5));
        let scope = RefreshScope::Subscribers;

        let first = controller.refresh(&scope, &session()).await.unwrap();
        let second = controller.refresh(&scope, &session()).await.unwrap();

        assert_eq!(first, RefreshOutcome::Refreshed { count: 2 });
        assert_eq!(
            second,
            RefreshOutcome::Skipped {
                reason: SkipReason::Cooldown
            }
        );
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_skipped_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let mut source = CountingSource::new(vec!["a@x.io"]);
        source.gate = Some(gate.clone());
        let source = Arc::new(source);
        let controller = controller(source.clone(), Duration::ZERO);
        let scope = RefreshScope::Subscribers;
        let session = session();

        let (first, second) = tokio::join!(controller.refresh(&scope, &session), async {
            let second = controller.refresh(&scope, &session).await;
            gate.notify_one();
            second
        });

        assert_eq!(first.unwrap(), RefreshOutcome::Refreshed { count: 1 });
        assert_eq!(
            second.unwrap(),
            RefreshOutcome::Skipped {
                reason: SkipReason::InFlight
            }
        );
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        // Slot released once the first refresh completed.
        gate.notify_one();
        assert!(matches!(
            controller.refresh(&scope, &session).await.unwrap(),
            RefreshOutcome::Refreshed { .. }
        ));
    }

    #[tokio::test]
    async fn test_expired_session_leaves_cache_untouched() {
        let source = Arc::new(CountingSource::new(vec!["a@x.io"]));
        let controller = controller(source.clone(), Duration::ZERO);
        let scope = RefreshScope::Subscribers;

        controller.refresh(&scope, &session()).await.unwrap();
        let before = controller.snapshot(&scope).unwrap();

        let expired = StaticSession::expired(AuthIdentity {
            id: Uuid::new_v4(),
            email: "admin@example.com".to_string(),
        });
        let err = controller.refresh(&scope, &expired).await.unwrap_err();
        assert!(matches!(err, RefreshError::AuthExpired));
        assert!(Arc::ptr_eq(&before, &controller.snapshot(&scope).unwrap()));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_snapshot_and_does_not_throttle() {
        let mut source = CountingSource::new(vec![]);
        source.fail = true;
        let source = Arc::new(source);
        let controller = controller(source.clone(), Duration::from_secs(5));
        let scope = RefreshScope::Subscribers;

        assert!(matches!(
            controller.refresh(&scope, &session()).await,
            Err(RefreshError::Load(_))
        ));
        assert!(controller.snapshot(&scope).is_none());
        assert!(controller.refresh(&scope, &session()).await.is_err());
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_search_view_is_recomputed_on_refresh() {
        let source = Arc::new(CountingSource::new(vec!["anna@x.io", "bob@x.io"]));
        let controller = controller(source, Duration::ZERO);
        let scope = RefreshScope::Subscribers;

        assert!(controller.set_search(&scope, Some("ANNA".to_string())).is_none());
        controller.refresh(&scope, &session()).await.unwrap();

        let snapshot = controller.snapshot(&scope).unwrap();
        assert_eq!(snapshot.items().len(), 2);
        assert_eq!(snapshot.view().len(), 1);
        assert_eq!(snapshot.search_text(), Some("ANNA"));

        let cleared = controller.set_search(&scope, None).unwrap();
        assert_eq!(cleared.view().len(), 2);
        // The earlier reference is untouched.
        assert_eq!(snapshot.view().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_marks_stale_and_lifts_cooldown() {
        let source = Arc::new(CountingSource::new(vec!["a@x.io"]));
        let controller = controller(source.clone(), Duration::from_secs(60));
        let scope = RefreshScope::Subscribers;
        let mut events = controller.subscribe();

        controller.refresh(&scope, &session()).await.unwrap();
        controller.invalidate(&scope).await;
        assert!(controller.snapshot(&scope).unwrap().is_stale());

        let outcome = controller.refresh(&scope, &session()).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed { count: 1 });
        assert!(!controller.snapshot(&scope).unwrap().is_stale());

        assert!(matches!(events.recv().await.unwrap(), RefreshEvent::Refreshed { .. }));
        assert_eq!(
            events.recv().await.unwrap(),
            RefreshEvent::Invalidated { scope: scope.clone() }
        );
    }

    #[tokio::test]
    async fn test_invalidation_during_load_leaves_snapshot_stale() {
        let gate = Arc::new(Notify::new());
        let mut source = CountingSource::new(vec!["a@x.io"]);
        source.gate = Some(gate.clone());
        let source = Arc::new(source);
        let controller = controller(source.clone(), Duration::from_secs(60));
        let scope = RefreshScope::Subscribers;
        let session = session();

        let (first, _) = tokio::join!(controller.refresh(&scope, &session), async {
            controller.invalidate(&scope).await;
            gate.notify_one();
        });

        assert_eq!(first.unwrap(), RefreshOutcome::Refreshed { count: 1 });
        assert!(controller.snapshot(&scope).unwrap().is_stale());

        // The cooldown was lifted, so the follow-up goes to the backend.
        gate.notify_one();
        let outcome = controller.refresh(&scope, &session).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed { count: 1 });
        assert!(!controller.snapshot(&scope).unwrap().is_stale());
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evicted_scope_reloads_despite_cooldown() {
        let source = Arc::new(CountingSource::new(vec!["a@x.io"]));
        let controller = controller(source.clone(), Duration::from_secs(60));
        let scope = RefreshScope::Subscribers;

        controller.refresh(&scope, &session()).await.unwrap();
        controller.set_search(&scope, Some("a@".to_string()));
        controller.evict(&scope).await;
        assert!(controller.snapshot(&scope).is_none());

        let outcome = controller.refresh(&scope, &session()).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed { count: 1 });
        let snapshot = controller.snapshot(&scope).unwrap();
        assert_eq!(snapshot.search_text(), None);
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_snapshot_expires_and_reloads() {
        let source = Arc::new(CountingSource::new(vec!["a@x.io"]));
        let controller = controller(source.clone(), Duration::from_secs(60))
            .with_retention(100, Duration::from_millis(50));
        let scope = RefreshScope::Subscribers;

        controller.refresh(&scope, &session()).await.unwrap();
        assert!(controller.snapshot(&scope).is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(controller.snapshot(&scope).is_none());

        let outcome = controller.refresh(&scope, &session()).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed { count: 1 });
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }
}
