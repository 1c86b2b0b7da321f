//! Durable per-room counters and open settlement ids.
//!
//! The whole state is one small JSON document, read once when the
//! orchestrator is built and rewritten after every mutation:
//!
//! ```json
//! {"counters": {"AB12": 3}, "activeIds": {"AB12": "480854003"}}
//! ```
//!
//! A missing or unreadable file is not fatal: the store starts empty and
//! says so in the log.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use wagerlock_types::{Result, RoomCode, SettlementId};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    #[serde(default)]
    counters: BTreeMap<RoomCode, u32>,
    #[serde(default)]
    active_ids: BTreeMap<RoomCode, SettlementId>,
}

/// File-backed room counters plus the active-id map.
#[derive(Debug)]
pub struct CounterStore {
    path: PathBuf,
    state: PersistedState,
}

impl CounterStore {
    /// Read the state file at `path`, or start empty if it is missing or
    /// does not parse.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => {
                    tracing::info!(
                        path = %path.display(),
                        rooms = state.counters.len(),
                        active = state.active_ids.len(),
                        "Loaded settlement counters"
                    );
                    state
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Counter state is corrupt, starting empty"
                    );
                    PersistedState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "No counter state file, starting empty");
                PersistedState::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Counter state unreadable, starting empty"
                );
                PersistedState::default()
            }
        };
        Self { path, state }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn counter(&self, room: &RoomCode) -> Option<u32> {
        self.state.counters.get(room).copied()
    }

    #[must_use]
    pub fn active_id(&self, room: &RoomCode) -> Option<SettlementId> {
        self.state.active_ids.get(room).copied()
    }

    /// Every `(room, id)` pair still marked open, ordered by room.
    #[must_use]
    pub fn active_ids(&self) -> Vec<(RoomCode, SettlementId)> {
        self.state
            .active_ids
            .iter()
            .map(|(room, id)| (room.clone(), *id))
            .collect()
    }

    /// Record a freshly allocated id and its counter, then persist.
    pub fn open(&mut self, room: &RoomCode, counter: u32, id: SettlementId) -> Result<()> {
        self.state.counters.insert(room.clone(), counter);
        self.state.active_ids.insert(room.clone(), id);
        self.save()
    }

    /// Drop the room's active id, persisting only if something changed.
    pub fn clear_active(&mut self, room: &RoomCode) -> Result<Option<SettlementId>> {
        let removed = self.state.active_ids.remove(room);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    /// Write the state to `<file>.tmp` and rename it over the target.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_string_pretty(&self.state)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
