//! Live queries over the store.
//!
//! Every committed write bumps a per-table revision counter. A live query
//! holds the latest result in a `watch` channel, so a new receiver always
//! starts with the current value, and re-runs whenever a table it reads from
//! changes. [`SharedQuery`] shares one live query among many subscribers and
//! keeps it running for a grace period after the last one leaves, so a quick
//! unsubscribe/resubscribe does not restart the query.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use anyhow::Result;
use log::error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::connection::Database;

// Set to true to log every live query refresh
const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    ControlPauses,
    Sessions,
    Loops,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revisions {
    control_pauses: u64,
    sessions: u64,
    loops: u64,
}

impl Revisions {
    pub(crate) fn bump(&mut self, table: Table) {
        let counter = match table {
            Table::ControlPauses => &mut self.control_pauses,
            Table::Sessions => &mut self.sessions,
            Table::Loops => &mut self.loops,
        };
        *counter = counter.wrapping_add(1);
    }

    fn get(&self, table: Table) -> u64 {
        match table {
            Table::ControlPauses => self.control_pauses,
            Table::Sessions => self.sessions,
            Table::Loops => self.loops,
        }
    }

    fn project(&self, tables: &[Table]) -> Vec<u64> {
        tables.iter().map(|table| self.get(*table)).collect()
    }
}

pub type QueryFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;
pub type QueryFn<T> = Arc<dyn Fn(Database) -> QueryFuture<T> + Send + Sync>;

/// Boxes an async query so it can be re-run on every change.
pub fn query_fn<T, F, Fut>(query: F) -> QueryFn<T>
where
    F: Fn(Database) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move |db| Box::pin(query(db)))
}

/// A running query. Dropping it stops the refresh task.
pub struct LiveQuery<T> {
    receiver: watch::Receiver<T>,
    _stop: DropGuard,
}

impl<T> LiveQuery<T> {
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.receiver.clone()
    }

    pub fn current(&self) -> T
    where
        T: Clone,
    {
        self.receiver.borrow().clone()
    }
}

impl Database {
    /// Runs `query` now and again after every write to one of `tables`.
    pub async fn observe<T>(&self, tables: &'static [Table], query: QueryFn<T>) -> Result<LiveQuery<T>>
    where
        T: Send + Sync + 'static,
    {
        // Subscribe before the first read so a write racing with it still
        // triggers a refresh.
        let mut revisions = self.revisions();
        let mut seen = revisions.borrow_and_update().project(tables);

        let initial = query(self.clone()).await?;
        let (tx, receiver) = watch::channel(initial);
        let stop = CancellationToken::new();
        let cancelled = stop.clone();
        let db = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tx.closed() => break,
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = revisions.borrow_and_update().project(tables);
                        if current == seen {
                            continue;
                        }
                        seen = current;

                        match query(db.clone()).await {
                            Ok(value) => {
                                tx.send_replace(value);
                                log_debug!("live query over {:?} refreshed", tables);
                            }
                            Err(err) => error!("live query over {:?} failed: {err:?}", tables),
                        }
                    }
                }
            }
        });

        Ok(LiveQuery {
            receiver,
            _stop: stop.drop_guard(),
        })
    }
}

struct SharedState<T> {
    live: Option<LiveQuery<T>>,
    subscribers: usize,
    /// Bumped on every subscribe so a pending teardown can tell it is stale.
    generation: u64,
}

struct SharedInner<T> {
    db: Database,
    tables: &'static [Table],
    query: QueryFn<T>,
    grace: Duration,
    state: Mutex<SharedState<T>>,
}

/// One live query shared by every subscriber, started on demand and stopped
/// `grace` after the last subscriber is dropped.
pub struct SharedQuery<T> {
    inner: Arc<SharedInner<T>>,
}

impl<T> Clone for SharedQuery<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> SharedQuery<T> {
    pub fn new(db: Database, tables: &'static [Table], query: QueryFn<T>, grace: Duration) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                db,
                tables,
                query,
                grace,
                state: Mutex::new(SharedState {
                    live: None,
                    subscribers: 0,
                    generation: 0,
                }),
            }),
        }
    }

    pub async fn subscribe(&self) -> Result<Subscription<T>> {
        let mut state = self.inner.state.lock().await;

        let live = match state.live.take() {
            Some(live) => live,
            None => {
                self.inner
                    .db
                    .observe(self.inner.tables, self.inner.query.clone())
                    .await?
            }
        };
        let receiver = live.subscribe();
        state.live = Some(live);

        state.subscribers += 1;
        state.generation = state.generation.wrapping_add(1);

        Ok(Subscription {
            receiver,
            owner: Some(self.inner.clone()),
        })
    }

    /// Whether the underlying query is currently running.
    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.live.is_some()
    }
}

async fn release<T>(inner: Arc<SharedInner<T>>) {
    let generation = {
        let mut state = inner.state.lock().await;
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers > 0 {
            return;
        }
        state.generation
    };

    tokio::time::sleep(inner.grace).await;

    let mut state = inner.state.lock().await;
    if state.subscribers == 0 && state.generation == generation {
        state.live = None;
        log_info!("shared query over {:?} stopped after grace period", inner.tables);
    }
}

/// A subscriber's view of a [`SharedQuery`].
pub struct Subscription<T: Send + Sync + 'static> {
    receiver: watch::Receiver<T>,
    owner: Option<Arc<SharedInner<T>>>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    pub fn receiver(&mut self) -> &mut watch::Receiver<T> {
        &mut self.receiver
    }

    pub fn current(&self) -> T
    where
        T: Clone,
    {
        self.receiver.borrow().clone()
    }

    /// Waits for the next result and returns it.
    pub async fn changed(&mut self) -> Option<T>
    where
        T: Clone,
    {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

impl<T: Send + Sync + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        let Some(owner) = self.owner.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release(owner));
            }
            // No runtime left to wait out the grace period; stop right away.
            Err(_) => {
                if let Ok(mut state) = owner.state.try_lock() {
                    state.subscribers = state.subscribers.saturating_sub(1);
                    if state.subscribers == 0 {
                        state.live = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn count_query() -> QueryFn<usize> {
        query_fn(|db: Database| async move { Ok(db.list_control_pauses().await?.len()) })
    }

    #[tokio::test]
    async fn new_subscriber_sees_current_value_immediately() {
        let db = Database::open_in_memory().unwrap();
        db.insert_control_pause(Utc::now(), 10.0).await.unwrap();

        let live = db
            .observe(&[Table::ControlPauses], count_query())
            .await
            .unwrap();
        assert_eq!(live.current(), 1);
        assert_eq!(db.path(), None);
    }

    #[tokio::test]
    async fn refreshes_after_write_to_observed_table() {
        let db = Database::open_in_memory().unwrap();
        let live = db
            .observe(&[Table::ControlPauses], count_query())
            .await
            .unwrap();
        let mut rx = live.subscribe();

        db.insert_control_pause(Utc::now(), 12.0).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
    }

    #[tokio::test]
    async fn ignores_writes_to_other_tables() {
        let db = Database::open_in_memory().unwrap();
        let live = db
            .observe(&[Table::ControlPauses], count_query())
            .await
            .unwrap();
        let mut rx = live.subscribe();

        db.insert_session(Utc::now()).await.unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(100), rx.changed()).await;
        assert!(waited.is_err(), "session write must not refresh a CP query");
    }

    #[tokio::test(start_paused = true)]
    async fn shared_query_survives_quick_resubscribe_and_stops_after_grace() {
        let db = Database::open_in_memory().unwrap();
        let shared = SharedQuery::new(
            db.clone(),
            &[Table::ControlPauses],
            count_query(),
            Duration::from_secs(5),
        );
        assert!(!shared.is_active().await);

        let first = shared.subscribe().await.unwrap();
        assert!(shared.is_active().await);
        drop(first);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let second = shared.subscribe().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(shared.is_active().await, "teardown from the first drop is stale");

        drop(second);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!shared.is_active().await);
    }

    #[tokio::test]
    async fn shared_subscribers_receive_updates() {
        let db = Database::open_in_memory().unwrap();
        let shared = SharedQuery::new(
            db.clone(),
            &[Table::ControlPauses],
            count_query(),
            Duration::from_secs(5),
        );
        let mut a = shared.subscribe().await.unwrap();
        let b = shared.subscribe().await.unwrap();

        db.insert_control_pause(Utc::now(), 30.0).await.unwrap();
        assert_eq!(a.changed().await, Some(1));
        assert_eq!(b.current(), 1);
    }
}
