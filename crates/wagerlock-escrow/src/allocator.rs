//! Settlement-id allocation.
//!
//! A settlement id is `encode(room) * 1000 + counter`, where the counter is
//! the room's persisted rematch count. The allocator enforces one open id per
//! room and owns the guarded clear that keeps a late settlement of an old
//! game from closing a newer one.

use std::{
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
};

use wagerlock_types::{EscrowError, Result, RoomCode, SettlementId};

use crate::counter_store::CounterStore;

/// Allocates and tracks open settlement ids on top of a [`CounterStore`].
#[derive(Debug)]
pub struct SettlementAllocator {
    store: Mutex<CounterStore>,
}

impl SettlementAllocator {
    #[must_use]
    pub fn new(store: CounterStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Load the state file at `path` (see [`CounterStore::load`]).
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self::new(CounterStore::load(path))
    }

    fn store(&self) -> MutexGuard<'_, CounterStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the next settlement for `room`.
    ///
    /// # Errors
    /// - [`EscrowError::SettlementAlreadyOpen`] while the room has an open id
    /// - [`EscrowError::SequenceExhausted`] past the last counter value
    ///   (the counter is left where it was)
    /// - [`EscrowError::Io`] if the state could not be persisted
    pub fn next_id(&self, room: &RoomCode) -> Result<SettlementId> {
        let mut store = self.store();
        if let Some(id) = store.active_id(room) {
            return Err(EscrowError::SettlementAlreadyOpen {
                room: room.clone(),
                id,
            });
        }
        let counter = store.counter(room).unwrap_or(0).saturating_add(1);
        let id = SettlementId::derive(room, counter)?;
        store.open(room, counter, id)?;
        tracing::info!(room = %room, settlement_id = %id, counter, "Allocated settlement id");
        Ok(id)
    }

    /// Id for the room's current counter, without allocating.
    #[must_use]
    pub fn current_id(&self, room: &RoomCode) -> Option<SettlementId> {
        let counter = self.store().counter(room)?;
        SettlementId::derive(room, counter).ok()
    }

    #[must_use]
    pub fn active_id(&self, room: &RoomCode) -> Option<SettlementId> {
        self.store().active_id(room)
    }

    #[must_use]
    pub fn active_ids(&self) -> Vec<(RoomCode, SettlementId)> {
        self.store().active_ids()
    }

    /// Clear the room's active id only if it is still `id`.
    ///
    /// Returns whether anything was cleared. A mismatch means a newer game
    /// has been opened since and is left untouched.
    pub fn clear_if_current(&self, room: &RoomCode, id: SettlementId) -> Result<bool> {
        let mut store = self.store();
        match store.active_id(room) {
            Some(active) if active == id => {
                store.clear_active(room)?;
                tracing::debug!(room = %room, settlement_id = %id, "Cleared active settlement id");
                Ok(true)
            }
            Some(active) => {
                tracing::warn!(
                    room = %room,
                    settlement_id = %id,
                    active = %active,
                    "Active id moved on, leaving newer game untouched"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Drop the room's active id unconditionally. Admin recovery for a
    /// room stuck on an id the ledger no longer knows.
    pub fn forget(&self, room: &RoomCode) -> Result<Option<SettlementId>> {
        let removed = self.store().clear_active(room)?;
        if let Some(id) = removed {
            tracing::warn!(room = %room, settlement_id = %id, "Forgot active settlement id");
        }
        Ok(removed)
    }
}
