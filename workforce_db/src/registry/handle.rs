//! Connection handles and their state machine
//!
//! ```text
//! Pending ──> Open ──> Closed
//!    └──────> Failed
//! ```
//!
//! Every transition is one compare-and-swap, so a handle can never leave
//! `Closed` and can never be closed twice.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ConnectionError, Result};
use crate::tenant::TenantRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Pending,
    Open,
    Closed,
    Failed,
}

impl HandleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HandleState::Pending,
            1 => HandleState::Open,
            2 => HandleState::Closed,
            _ => HandleState::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            HandleState::Pending => 0,
            HandleState::Open => 1,
            HandleState::Closed => 2,
            HandleState::Failed => 3,
        }
    }
}

/// One tenant's connection, shared by every caller that asked for it
pub struct ConnectionHandle {
    id: TenantRef,
    instance: Uuid,
    state: AtomicU8,
    client: OnceCell<DatabaseConnection>,
    last_error: OnceCell<ConnectionError>,
    created_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub(crate) fn pending(id: TenantRef) -> Self {
        Self {
            id,
            instance: Uuid::new_v4(),
            state: AtomicU8::new(HandleState::Pending.as_u8()),
            client: OnceCell::new(),
            last_error: OnceCell::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &TenantRef {
        &self.id
    }

    /// Unique per handle; a tenant reconnected after eviction gets a new one
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_open(&self) -> bool {
        self.state() == HandleState::Open
    }

    /// The driver client, present only while the handle is open
    pub fn client(&self) -> Option<&DatabaseConnection> {
        if self.is_open() {
            self.client.get()
        } else {
            None
        }
    }

    /// The driver client, or an error naming the handle's state
    pub fn orm(&self) -> Result<&DatabaseConnection> {
        self.client().ok_or_else(|| {
            ConnectionError::connect_failure(
                self.id.to_string(),
                format!("connection handle is {:?}", self.state()),
            )
        })
    }

    /// Why the open failed, present only in the `Failed` state
    pub fn last_error(&self) -> Option<&ConnectionError> {
        if self.state() == HandleState::Failed {
            self.last_error.get()
        } else {
            None
        }
    }

    fn transition(&self, from: HandleState, to: HandleState) -> bool {
        let moved = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            crate::debug!(
                "[HANDLE] {} ({}) {:?} -> {:?}",
                self.id,
                self.instance,
                from,
                to
            );
        }
        moved
    }

    pub(crate) fn mark_open(&self, client: DatabaseConnection) -> bool {
        if self.client.set(client).is_err() {
            return false;
        }
        self.transition(HandleState::Pending, HandleState::Open)
    }

    pub(crate) fn mark_failed(&self, error: ConnectionError) -> bool {
        let _ = self.last_error.set(error);
        self.transition(HandleState::Pending, HandleState::Failed)
    }

    /// Move `Open -> Closed`.
    ///
    /// Returns `false` if the handle was not open, so only the first caller
    /// ever releases the underlying client.
    pub(crate) fn mark_closed(&self) -> bool {
        self.transition(HandleState::Open, HandleState::Closed)
    }

    /// The client regardless of state, for releasing it after `mark_closed`
    pub(crate) fn raw_client(&self) -> Option<&DatabaseConnection> {
        self.client.get()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .field("last_error", &self.last_error())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn mock_client() -> DatabaseConnection {
        MockDatabase::new(DatabaseBackend::MySql).into_connection()
    }

    #[test]
    fn test_pending_has_no_client() {
        let handle = ConnectionHandle::pending(TenantRef::Core);
        assert_eq!(handle.state(), HandleState::Pending);
        assert!(handle.client().is_none());
        assert!(handle.orm().is_err());
        assert!(handle.last_error().is_none());
    }

    #[test]
    fn test_open_then_close_once() {
        let handle = ConnectionHandle::pending(TenantRef::Core);
        assert!(handle.mark_open(mock_client()));
        assert!(handle.is_open());
        assert!(handle.client().is_some());

        assert!(handle.mark_closed());
        assert_eq!(handle.state(), HandleState::Closed);
        assert!(handle.client().is_none());
        assert!(handle.raw_client().is_some());

        // Closed is terminal
        assert!(!handle.mark_closed());
        assert!(!handle.mark_open(mock_client()));
        assert_eq!(handle.state(), HandleState::Closed);
    }

    #[test]
    fn test_failed_keeps_error() {
        let handle = ConnectionHandle::pending(TenantRef::Core);
        let err = ConnectionError::connect_failure("workforce_core", "refused");
        assert!(handle.mark_failed(err.clone()));
        assert_eq!(handle.state(), HandleState::Failed);
        assert_eq!(handle.last_error(), Some(&err));
        assert!(!handle.mark_closed());
    }

    #[test]
    fn test_instances_are_unique() {
        let a = ConnectionHandle::pending(TenantRef::Core);
        let b = ConnectionHandle::pending(TenantRef::Core);
        assert_ne!(a.instance(), b.instance());
    }
}
