//! Connection registry
//!
//! Caches one [`ConnectionHandle`] per [`TenantRef`] and deduplicates
//! concurrent creation. While a connection is being opened the map slot holds
//! a shared future of the result; every caller that finds the slot awaits that
//! same future, so one creation attempt yields exactly one open and every
//! waiter sees the same outcome.
//!
//! The check-then-install runs under the DashMap shard lock through the entry
//! API and never across an `.await`. The open itself runs in a spawned task,
//! so a waiter that is cancelled does not cancel it for the others.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::db::ConnectionFactory;
use crate::error::{ConnectionError, Result};
use crate::tenant::{TenantId, TenantRef};

pub mod core_holder;
pub mod handle;

pub use core_holder::CoreConnectionHolder;
pub use handle::{ConnectionHandle, HandleState};

type CreateResult = Result<Arc<ConnectionHandle>>;
type InFlight = Shared<BoxFuture<'static, CreateResult>>;

enum Slot {
    /// Creation in progress; `generation` tells this attempt apart from a later one
    Pending {
        generation: u64,
        handle: Arc<ConnectionHandle>,
        in_flight: InFlight,
    },
    Ready(Arc<ConnectionHandle>),
}

impl Slot {
    fn generation(&self) -> Option<u64> {
        match self {
            Slot::Pending { generation, .. } => Some(*generation),
            Slot::Ready(_) => None,
        }
    }

    fn handle(&self) -> &Arc<ConnectionHandle> {
        match self {
            Slot::Pending { handle, .. } | Slot::Ready(handle) => handle,
        }
    }
}

/// What happened to one handle during eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseOutcome {
    /// The client was released
    Closed,
    /// The client was marked closed but releasing it reported an error
    CloseFailed,
    /// Nothing to release: the open had failed or the handle was already closed
    NotOpen,
}

/// Point-in-time view of one registry entry, for admin and health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub tenant: TenantRef,
    pub state: HandleState,
    pub instance: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Concurrency-safe cache of tenant connections
pub struct ConnectionRegistry {
    slots: Arc<DashMap<TenantRef, Slot>>,
    next_generation: AtomicU64,
    factory: ConnectionFactory,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("entries", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// `factory` is used to release clients on eviction
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            factory,
        }
    }

    /// Return the cached handle for `key`, or open one with `open`.
    ///
    /// `open` is invoked at most once per creation attempt, no matter how
    /// many callers arrive while it runs. A failed attempt is not cached: the
    /// slot is cleared and the next caller starts over.
    pub async fn get_or_create<F, Fut>(&self, key: TenantRef, open: F) -> CreateResult
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<DatabaseConnection>> + Send + 'static,
    {
        let in_flight = match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready(handle) => {
                    crate::trace!("[REGISTRY] Cache hit for {}", key);
                    return Ok(handle.clone());
                }
                Slot::Pending { in_flight, .. } => {
                    crate::debug!("[REGISTRY] Joining in-flight connection for {}", key);
                    in_flight.clone()
                }
            },
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let handle = Arc::new(ConnectionHandle::pending(key.clone()));
                crate::debug!(
                    "[REGISTRY] Creating connection for {} (generation {})",
                    key,
                    generation
                );

                let in_flight = Self::spawn_creation(
                    self.slots.clone(),
                    key,
                    generation,
                    handle.clone(),
                    open(),
                );
                entry.insert(Slot::Pending {
                    generation,
                    handle,
                    in_flight: in_flight.clone(),
                });
                in_flight
            }
        };

        in_flight.await
    }

    fn spawn_creation<Fut>(
        slots: Arc<DashMap<TenantRef, Slot>>,
        key: TenantRef,
        generation: u64,
        handle: Arc<ConnectionHandle>,
        open: Fut,
    ) -> InFlight
    where
        Fut: Future<Output = Result<DatabaseConnection>> + Send + 'static,
    {
        let task_slots = slots.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            match open.await {
                Ok(client) => {
                    if !handle.mark_open(client) {
                        crate::warn!(
                            "[REGISTRY] Handle for {} was not pending, dropping new client",
                            task_key
                        );
                    }
                    let mut promoted = false;
                    if let Some(mut slot) = task_slots.get_mut(&task_key) {
                        if slot.generation() == Some(generation) {
                            *slot = Slot::Ready(handle.clone());
                            promoted = true;
                        }
                    }
                    if promoted {
                        crate::info!("[REGISTRY] Connection for {} is open", task_key);
                    } else {
                        // Evicted mid-flight; the evicting caller closes it
                        crate::debug!(
                            "[REGISTRY] Connection for {} opened after eviction",
                            task_key
                        );
                    }
                    Ok(handle)
                }
                Err(err) => {
                    handle.mark_failed(err.clone());
                    task_slots
                        .remove_if(&task_key, |_, slot| slot.generation() == Some(generation));
                    crate::warn!(
                        "[REGISTRY] Connection for {} failed, not cached: {}",
                        task_key,
                        err
                    );
                    Err(err)
                }
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    // The task panicked or was aborted before it could clean up
                    slots.remove_if(&key, |_, slot| slot.generation() == Some(generation));
                    Err(ConnectionError::connect_failure(
                        key.to_string(),
                        format!("connection task failed: {join_err}"),
                    ))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// The cached handle for `key`, only if it is already open
    pub fn get(&self, key: &TenantRef) -> Option<Arc<ConnectionHandle>> {
        self.slots.get(key).and_then(|slot| match slot.value() {
            Slot::Ready(handle) => Some(handle.clone()),
            Slot::Pending { .. } => None,
        })
    }

    pub fn contains(&self, key: &TenantRef) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Status of every entry, sorted with the core database first
    pub fn snapshot(&self) -> Vec<ConnectionStatus> {
        let mut statuses: Vec<ConnectionStatus> = self
            .slots
            .iter()
            .map(|entry| {
                let handle = entry.value().handle();
                ConnectionStatus {
                    tenant: entry.key().clone(),
                    state: handle.state(),
                    instance: handle.instance(),
                    created_at: handle.created_at(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.tenant.cmp(&b.tenant));
        statuses
    }

    /// Remove and close one tenant's handle.
    ///
    /// An in-flight creation is awaited first so the freshly opened client is
    /// not leaked. Returns `None` if the tenant had no entry.
    pub async fn evict(&self, tenant: &TenantId) -> Option<CloseOutcome> {
        let key = TenantRef::Tenant(tenant.clone());
        let (key, slot) = self.slots.remove(&key)?;
        crate::info!("[REGISTRY] Evicting connection for {}", key);
        Some(close_slot(self.factory.clone(), key, slot).await)
    }

    /// Drain every entry, core included, and start closing each one.
    ///
    /// Closes run concurrently; the caller decides how long to wait on the
    /// returned set.
    pub fn evict_all(&self) -> JoinSet<(TenantRef, CloseOutcome)> {
        let keys: Vec<TenantRef> = self.slots.iter().map(|entry| entry.key().clone()).collect();

        let mut closing = JoinSet::new();
        for key in keys {
            if let Some((key, slot)) = self.slots.remove(&key) {
                let factory = self.factory.clone();
                closing.spawn(async move {
                    let outcome = close_slot(factory, key.clone(), slot).await;
                    (key, outcome)
                });
            }
        }

        crate::debug!("[REGISTRY] Closing {} connection(s)", closing.len());
        closing
    }
}

/// Close one removed slot.
///
/// The release runs in its own task: if the caller stops waiting (shutdown
/// budget exhausted), a pending open still gets closed once it completes.
async fn close_slot(factory: ConnectionFactory, key: TenantRef, slot: Slot) -> CloseOutcome {
    let task_key = key.clone();
    match tokio::spawn(release_slot(factory, task_key, slot)).await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            crate::error!("[REGISTRY] Close task for {} failed: {}", key, join_err);
            CloseOutcome::CloseFailed
        }
    }
}

async fn release_slot(factory: ConnectionFactory, key: TenantRef, slot: Slot) -> CloseOutcome {
    let handle = match slot {
        Slot::Ready(handle) => handle,
        Slot::Pending { in_flight, .. } => match in_flight.await {
            Ok(handle) => handle,
            Err(_) => return CloseOutcome::NotOpen,
        },
    };

    if !handle.mark_closed() {
        return CloseOutcome::NotOpen;
    }

    let Some(client) = handle.raw_client() else {
        return CloseOutcome::NotOpen;
    };

    match factory.close(client).await {
        Ok(()) => {
            crate::info!("[REGISTRY] Closed connection for {}", key);
            CloseOutcome::Closed
        }
        Err(e) => {
            crate::error!("[REGISTRY] Failed to close connection for {}: {}", key, e);
            CloseOutcome::CloseFailed
        }
    }
}
