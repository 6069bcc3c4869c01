//! Backend-scoped locking and shutdown cleanup (spec.md §4.4). Each backend
//! retains at most one locked `GXact` at a time; its shutdown/abort hook
//! decides whether that entry is released or merely unlocked.

use parking_lot::Mutex;

use crate::error::Result;
use crate::gxact::{GXactRef, GXactTable};

/// The single GXact the owning backend currently holds locked, if any.
/// Constructed once per backend/session (a thread-local or per-task value in
/// an embedding database); the cleanup hook is meant to run exactly once, on
/// backend shutdown or transaction abort.
#[derive(Default)]
pub struct BackendLockedGXact {
    current: Mutex<Option<GXactRef>>,
}

impl BackendLockedGXact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that this backend now holds `entry` locked (spec.md §4.3 step
    /// 8: "reassign the caller's currently-locked GXact pointer").
    pub fn set(&self, entry: GXactRef) {
        *self.current.lock() = Some(entry);
    }

    pub fn clear(&self) {
        *self.current.lock() = None;
    }

    pub fn get(&self) -> Option<GXactRef> {
        *self.current.lock()
    }

    /// Shutdown/abort hook (spec.md §4.4):
    /// - no locked entry: no-op.
    /// - entry not yet valid: the reservation never completed (or the
    ///   backend crashed mid `finish_prepared`'s rollback path), so release
    ///   it back to the freelist.
    /// - entry valid: clear `locking_backend` only; the prepared transaction
    ///   remains for a future session to finish.
    pub fn cleanup(&self, table: &GXactTable) -> Result<()> {
        let entry = match self.current.lock().take() {
            Some(entry) => entry,
            None => return Ok(()),
        };

        if table.is_valid(entry)? {
            table.unlock(entry)
        } else {
            table.release_and_recycle(entry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Gid;

    fn gid(s: &str) -> Gid {
        Gid::new(s.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn cleanup_is_noop_when_nothing_locked() {
        let table = GXactTable::new(4, 100);
        let backend = BackendLockedGXact::new();
        backend.cleanup(&table).unwrap();
    }

    #[test]
    fn cleanup_recycles_unfinished_reservation() {
        let table = GXactTable::new(4, 100);
        let backend = BackendLockedGXact::new();
        let entry = table.reserve(1, 1, gid("tx"), 0, 10, 1).unwrap();
        backend.set(entry);

        backend.cleanup(&table).unwrap();
        assert!(table.peek(entry).is_err());
        assert_eq!(table.snapshot_all().len(), 0);
    }

    #[test]
    fn cleanup_only_unlocks_a_valid_entry() {
        let table = GXactTable::new(4, 100);
        let backend = BackendLockedGXact::new();
        let entry = table.reserve(1, 1, gid("tx"), 0, 10, 1).unwrap();
        table.mark_valid(entry).unwrap();
        backend.set(entry);

        backend.cleanup(&table).unwrap();
        assert_eq!(table.snapshot_all().len(), 1);
        assert!(table.is_valid(entry).unwrap());
    }
}
