//! Post-checkpoint index (spec.md §4.5): the process-wide `xid → lsn`
//! mapping from every currently-prepared transaction to the WAL location of
//! its prepare record. Populated by `end_prepare`, by checkpoint-restore, and
//! by the WAL replay hook for prepare records; drained by `finish_prepared`
//! and the "forget 2pc file" replay hook.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Result, TwoPhaseError};
use crate::ids::{Lsn, Xid};

/// One entry as emitted by the checkpoint payload (spec.md §6): `{count,
/// maps: [{xid, lsn}]}`. `Vec` already grows dynamically, so unlike the
/// source's doubling-on-overflow buffer this crate just pushes — assembling
/// it is the only "checkpoint" behavior this crate implements (spec.md §9:
/// the source's `CheckPointTwoPhase` entry point is vestigial and is not
/// ported).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointMapEntry {
    pub xid: Xid,
    pub lsn: Lsn,
}

#[derive(Default)]
pub struct PostCheckpointIndex {
    entries: RwLock<HashMap<Xid, Lsn>>,
}

impl PostCheckpointIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `xid`'s prepare-record begin LSN. Spec.md §9 records an open
    /// question about the source silently swallowing a collision here — this
    /// implementation treats a collision as implementation sloppiness rather
    /// than a contract and asserts instead of silently overwriting.
    pub fn insert(&self, xid: Xid, begin_lsn: Lsn) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.insert(xid, begin_lsn) {
            return Err(TwoPhaseError::Panic(format!(
                "post-checkpoint index collision for xid {}: existing entry at {}, new insert at {}",
                xid, existing, begin_lsn
            )));
        }
        Ok(())
    }

    /// Used only by recovery population, where re-adopting an already-known
    /// xid (e.g. re-running prescan) is expected and not a collision.
    pub fn insert_or_replace(&self, xid: Xid, begin_lsn: Lsn) {
        self.entries.write().insert(xid, begin_lsn);
    }

    pub fn remove(&self, xid: Xid) -> Option<Lsn> {
        self.entries.write().remove(&xid)
    }

    pub fn get(&self, xid: Xid) -> Option<Lsn> {
        self.entries.read().get(&xid).copied()
    }

    pub fn contains(&self, xid: Xid) -> bool {
        self.entries.read().contains_key(&xid)
    }

    /// All entries, for checkpoint assembly.
    pub fn snapshot_for_checkpoint(&self) -> Vec<CheckpointMapEntry> {
        self.entries
            .read()
            .iter()
            .map(|(&xid, &lsn)| CheckpointMapEntry { xid, lsn })
            .collect()
    }

    /// Smallest WAL location among all entries, used to clamp WAL retention
    /// (spec.md §4.5). `None` when no prepared transaction is outstanding.
    pub fn oldest_lsn(&self) -> Option<Lsn> {
        self.entries.read().values().copied().min()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
