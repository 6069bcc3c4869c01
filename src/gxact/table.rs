use parking_lot::RwLock;

use crate::error::{Result, TwoPhaseError};
use crate::gxact::descriptor::{DummyProc, GXact};
use crate::ids::{BackendId, DatabaseId, Gid, Lsn, RoleId, Xid, INVALID_BACKEND_ID};

/// Opaque handle to a slot in the [`GXactTable`]. Stable for the lifetime of
/// the reservation; becomes dangling (and must not be reused) after
/// [`GXactTable::release_and_recycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GXactRef(usize);

/// Immutable snapshot of one descriptor's observable fields, returned by
/// `snapshot_all` for reporting (spec.md §4.2) — deliberately excludes the
/// embedded `DummyProc` (the "process pointer" the spec says snapshots omit),
/// but does carry the flattened subxact count for diagnostics.
#[derive(Debug, Clone)]
pub struct GXactSnapshot {
    pub xid: Xid,
    pub gid: Gid,
    pub database: DatabaseId,
    pub owner: RoleId,
    pub prepared_at: i64,
    pub valid: bool,
    pub locking_backend: BackendId,
}

struct Inner {
    slots: Vec<Option<GXact>>,
    freelist: Vec<usize>,
    active: Vec<usize>,
    /// Bumped on every structural mutation; invalidates the one-slot
    /// `dummy_proc_for` memoization cache (spec.md §9).
    generation: u64,
    last_lookup: Option<(Xid, usize, u64)>,
}

/// Fixed-capacity shared slab of [`GXact`] descriptors (spec.md §4.2).
///
/// A single reader-writer lock (`TwoPhaseStateLock`) guards the freelist
/// head, the active index, and every descriptor's `locking_backend`/`valid`
/// fields. This implementation also uses it to guard the remaining payload
/// fields: the C original can mutate those without the lock once a backend
/// holds `locking_backend`, but safe Rust needs a `&mut` borrow to touch
/// them, so every payload mutation here briefly takes the same exclusive
/// lock the structural operations use. Correctness is unaffected — ownership
/// is still checked against `locking_backend` before any payload write.
pub struct GXactTable {
    inner: RwLock<Inner>,
    capacity: usize,
    max_real_backends: BackendId,
}

impl GXactTable {
    /// Allocate a table with the given capacity (`max_prepared`). `0` means
    /// the subsystem is disabled; `reserve` always fails thereafter
    /// (spec.md §5).
    pub fn new(capacity: usize, max_real_backends: BackendId) -> Self {
        GXactTable {
            inner: RwLock::new(Inner {
                slots: (0..capacity).map(|_| None).collect(),
                freelist: (0..capacity).rev().collect(),
                active: Vec::with_capacity(capacity),
                generation: 0,
                last_lookup: None,
            }),
            capacity,
            max_real_backends,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dummy backend id for slot `idx`, stable for the slot's lifetime and
    /// unique in `(max_real_backends, max_real_backends + max_prepared]`
    /// (spec.md §3).
    fn dummy_backend_id(&self, idx: usize) -> BackendId {
        self.max_real_backends + 1 + idx as BackendId
    }

    /// Reserve a fresh GXact for `gid`. Fails `duplicate-object` if any
    /// existing entry (valid or not) already carries this GID; fails
    /// `out-of-memory` if the freelist is exhausted.
    pub fn reserve(
        &self,
        caller: BackendId,
        xid: Xid,
        gid: Gid,
        prepared_at: i64,
        owner: RoleId,
        database: DatabaseId,
    ) -> Result<GXactRef> {
        if self.capacity == 0 {
            return Err(TwoPhaseError::ObjectNotInPrerequisiteState(
                "prepared transactions are disabled (max_prepared_transactions = 0)".into(),
            ));
        }

        let mut inner = self.inner.write();

        for &idx in &inner.active {
            let existing = inner.slots[idx]
                .as_ref()
                .expect("active index must point at an occupied slot");
            if existing.gid == gid {
                return Err(TwoPhaseError::DuplicateObject(format!(
                    "transaction identifier \"{}\" is already in use",
                    gid
                )));
            }
        }

        let idx = inner.freelist.pop().ok_or_else(|| {
            TwoPhaseError::OutOfMemory(
                "maximum number of prepared transactions reached (increase max_prepared_transactions)"
                    .into(),
            )
        })?;

        let dummy_backend_id = self.dummy_backend_id(idx);
        let gxact = GXact {
            dummy_proc: DummyProc::new(xid, database, owner),
            dummy_backend_id,
            prepared_at,
            prepare_begin_lsn: Lsn::ZERO,
            prepare_lsn: Lsn::ZERO,
            owner,
            database,
            locking_backend: caller,
            valid: false,
            gid,
            append_only_intent_count: 0,
        };
        inner.slots[idx] = Some(gxact);
        inner.active.push(idx);
        inner.generation += 1;
        inner.last_lookup = None;

        Ok(GXactRef(idx))
    }

    /// Mark `entry` valid: the reservation has become a durably-prepared
    /// transaction. Does not itself insert into a process array — callers
    /// combine this with their `ProcArrayCollaborator::add` under the
    /// ordering spec.md §4.3 requires.
    pub fn mark_valid(&self, entry: GXactRef) -> Result<()> {
        let mut inner = self.inner.write();
        let gxact = Self::slot_mut(&mut inner, entry)?;
        gxact.valid = true;
        inner.generation += 1;
        Ok(())
    }

    /// Find the entry owning `gid` and lock it for finishing, enforcing the
    /// ownership and database checks from spec.md §4.2.
    #[allow(clippy::too_many_arguments)]
    pub fn lock_for_finish(
        &self,
        caller: BackendId,
        gid: &Gid,
        caller_role: RoleId,
        caller_is_superuser: bool,
        caller_database: DatabaseId,
        coordinator_mode: bool,
        raise_if_missing: bool,
    ) -> Result<Option<GXactRef>> {
        let mut inner = self.inner.write();

        let idx = inner
            .active
            .iter()
            .copied()
            .find(|&idx| {
                let g = inner.slots[idx].as_ref().expect("active slot occupied");
                g.valid && &g.gid == gid
            });

        let idx = match idx {
            Some(idx) => idx,
            None => {
                return if raise_if_missing {
                    Err(TwoPhaseError::UndefinedObject(format!(
                        "prepared transaction with identifier \"{}\" does not exist",
                        gid
                    )))
                } else {
                    Ok(None)
                };
            }
        };

        let gxact = inner.slots[idx].as_mut().expect("active slot occupied");

        if gxact.locking_backend != INVALID_BACKEND_ID {
            return Err(TwoPhaseError::ObjectNotInPrerequisiteState(format!(
                "prepared transaction with identifier \"{}\" is busy",
                gid
            )));
        }
        if caller_role != gxact.owner && !caller_is_superuser {
            return Err(TwoPhaseError::InsufficientPrivilege(format!(
                "permission denied to finish prepared transaction \"{}\"",
                gid
            )));
        }
        if gxact.database != caller_database && !coordinator_mode {
            return Err(TwoPhaseError::FeatureNotSupported(
                "cannot finish prepared transaction of another database".into(),
            ));
        }

        gxact.locking_backend = caller;
        inner.generation += 1;
        Ok(Some(GXactRef(idx)))
    }

    /// Scan for `gid` ignoring `valid`, used only during the prepare window
    /// by the backend that reserved it (spec.md §4.2).
    pub fn find(&self, gid: &Gid) -> Result<GXactRef> {
        let inner = self.inner.read();
        inner
            .active
            .iter()
            .copied()
            .find(|&idx| inner.slots[idx].as_ref().expect("active slot occupied").gid == *gid)
            .map(GXactRef)
            .ok_or_else(|| {
                TwoPhaseError::UndefinedObject(format!(
                    "transaction identifier \"{}\" not found",
                    gid
                ))
            })
    }

    /// Swap-remove `entry` from the active array and push it onto the
    /// freelist. Callers must have already removed `dummy_proc` from the
    /// process array (spec.md §4.2).
    pub fn release_and_recycle(&self, entry: GXactRef) -> Result<()> {
        let mut inner = self.inner.write();
        let pos = inner
            .active
            .iter()
            .position(|&idx| idx == entry.0)
            .ok_or_else(|| {
                TwoPhaseError::UndefinedObject("GXact entry is not active".into())
            })?;
        inner.active.swap_remove(pos);
        inner.slots[entry.0] = None;
        inner.freelist.push(entry.0);
        inner.generation += 1;
        inner.last_lookup = None;
        Ok(())
    }

    /// Copy every descriptor's observable fields under the shared lock.
    pub fn snapshot_all(&self) -> Vec<GXactSnapshot> {
        let inner = self.inner.read();
        inner
            .active
            .iter()
            .map(|&idx| {
                let g = inner.slots[idx].as_ref().expect("active slot occupied");
                GXactSnapshot {
                    xid: g.xid(),
                    gid: g.gid.clone(),
                    database: g.database,
                    owner: g.owner,
                    prepared_at: g.prepared_at,
                    valid: g.valid,
                    locking_backend: g.locking_backend,
                }
            })
            .collect()
    }

    /// Look up the dummy process for `xid`, memoizing the last hit per the
    /// single-slot cache in spec.md §9 (invalidated on any table mutation).
    pub fn dummy_proc_for(&self, xid: Xid) -> Option<DummyProc> {
        {
            let inner = self.inner.read();
            if let Some((cached_xid, idx, gen)) = inner.last_lookup {
                if cached_xid == xid && gen == inner.generation {
                    if let Some(g) = &inner.slots[idx] {
                        if g.xid() == xid {
                            return Some(g.dummy_proc.clone());
                        }
                    }
                }
            }
        }

        let mut inner = self.inner.write();
        let hit = inner
            .active
            .iter()
            .copied()
            .find(|&idx| inner.slots[idx].as_ref().expect("active slot occupied").xid() == xid);
        match hit {
            Some(idx) => {
                inner.last_lookup = Some((xid, idx, inner.generation));
                Some(inner.slots[idx].as_ref().unwrap().dummy_proc.clone())
            }
            None => None,
        }
    }

    /// Run `f` against the payload of a locked entry. Callers must already
    /// hold the lock (their own `locking_backend` must match `caller`) —
    /// enforced here so one backend cannot mutate another's reservation.
    pub fn with_locked_entry<R>(
        &self,
        caller: BackendId,
        entry: GXactRef,
        f: impl FnOnce(&mut GXact) -> R,
    ) -> Result<R> {
        let mut inner = self.inner.write();
        let gxact = Self::slot_mut(&mut inner, entry)?;
        if gxact.locking_backend != caller {
            return Err(TwoPhaseError::ObjectNotInPrerequisiteState(
                "caller does not hold the lock on this prepared transaction".into(),
            ));
        }
        let r = f(gxact);
        inner.generation += 1;
        Ok(r)
    }

    /// Read-only peek at a locked or unlocked entry's payload, for callers
    /// that already proved ownership (e.g. the coordinator after
    /// `lock_for_finish`).
    pub fn peek(&self, entry: GXactRef) -> Result<GXact> {
        let inner = self.inner.read();
        inner.slots[entry.0]
            .clone()
            .ok_or_else(|| TwoPhaseError::UndefinedObject("GXact entry is not active".into()))
    }

    /// Clear `locking_backend` without touching `valid` — used by backend
    /// cleanup when a valid entry's owning backend goes away mid-retry
    /// (spec.md §4.4).
    pub fn unlock(&self, entry: GXactRef) -> Result<()> {
        let mut inner = self.inner.write();
        let gxact = Self::slot_mut(&mut inner, entry)?;
        gxact.locking_backend = INVALID_BACKEND_ID;
        inner.generation += 1;
        Ok(())
    }

    pub fn is_valid(&self, entry: GXactRef) -> Result<bool> {
        let inner = self.inner.read();
        Ok(inner.slots[entry.0]
            .as_ref()
            .ok_or_else(|| TwoPhaseError::UndefinedObject("GXact entry is not active".into()))?
            .valid)
    }

    fn slot_mut(inner: &mut Inner, entry: GXactRef) -> Result<&mut GXact> {
        inner.slots[entry.0]
            .as_mut()
            .ok_or_else(|| TwoPhaseError::UndefinedObject("GXact entry is not active".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(s: &str) -> Gid {
        Gid::new(s.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn s1_duplicate_gid_rejected() {
        let table = GXactTable::new(8, 100);
        table.reserve(1, 100, gid("tx-A"), 0, 10, 1).unwrap();
        let err = table.reserve(2, 101, gid("tx-A"), 0, 10, 1).unwrap_err();
        assert!(matches!(err, TwoPhaseError::DuplicateObject(_)));
        assert_eq!(table.snapshot_all().len(), 1);
    }

    #[test]
    fn s2_exhaustion_then_recover() {
        let table = GXactTable::new(2, 100);
        let r1 = table.reserve(1, 1, gid("a"), 0, 10, 1).unwrap();
        table.reserve(2, 2, gid("b"), 0, 10, 1).unwrap();
        let err = table.reserve(3, 3, gid("c"), 0, 10, 1).unwrap_err();
        assert!(matches!(err, TwoPhaseError::OutOfMemory(_)));

        table.mark_valid(r1).unwrap();
        table.release_and_recycle(r1).unwrap();
        table.reserve(3, 3, gid("c"), 0, 10, 1).unwrap();
    }

    #[test]
    fn disabled_subsystem_rejects_reserve() {
        let table = GXactTable::new(0, 100);
        let err = table.reserve(1, 1, gid("x"), 0, 10, 1).unwrap_err();
        assert!(matches!(
            err,
            TwoPhaseError::ObjectNotInPrerequisiteState(_)
        ));
    }

    #[test]
    fn active_array_stays_dense_after_swap_remove() {
        let table = GXactTable::new(4, 100);
        let r1 = table.reserve(1, 1, gid("a"), 0, 10, 1).unwrap();
        let r2 = table.reserve(1, 2, gid("b"), 0, 10, 1).unwrap();
        table.reserve(1, 3, gid("c"), 0, 10, 1).unwrap();

        table.mark_valid(r1).unwrap();
        table.release_and_recycle(r1).unwrap();
        assert_eq!(table.snapshot_all().len(), 2);

        // r2 must still be reachable after the swap-remove reindexed slots.
        assert!(table.peek(r2).is_ok());
    }

    #[test]
    fn s6_foreign_backend_finish_rejected() {
        let table = GXactTable::new(4, 100);
        let r = table
            .reserve(1, 1, gid("tx-owned-by-a"), 0, /*owner*/ 500, 1)
            .unwrap();
        table.mark_valid(r).unwrap();
        table.unlock(r).unwrap();

        let err = table
            .lock_for_finish(2, &gid("tx-owned-by-a"), /*role b*/ 999, false, 1, false, true)
            .unwrap_err();
        assert!(matches!(err, TwoPhaseError::InsufficientPrivilege(_)));
        assert!(table.is_valid(r).unwrap());
    }

    #[test]
    fn busy_entry_rejects_second_locker() {
        let table = GXactTable::new(4, 100);
        let r = table.reserve(1, 1, gid("tx"), 0, 10, 1).unwrap();
        table.mark_valid(r).unwrap();
        table.unlock(r).unwrap();

        table
            .lock_for_finish(2, &gid("tx"), 10, false, 1, false, true)
            .unwrap();
        let err = table
            .lock_for_finish(3, &gid("tx"), 10, false, 1, false, true)
            .unwrap_err();
        assert!(matches!(
            err,
            TwoPhaseError::ObjectNotInPrerequisiteState(_)
        ));
    }

    #[test]
    fn missing_gid_raise_if_missing_false_returns_none() {
        let table = GXactTable::new(4, 100);
        let result = table
            .lock_for_finish(1, &gid("nope"), 10, false, 1, false, false)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn dummy_proc_lookup_survives_cache_invalidation() {
        let table = GXactTable::new(4, 100);
        table.reserve(1, 42, gid("tx"), 0, 10, 1).unwrap();
        assert!(table.dummy_proc_for(42).is_some());
        assert!(table.dummy_proc_for(42).is_some()); // second call hits cache

        table.reserve(1, 43, gid("tx2"), 0, 10, 1).unwrap();
        // Cache must not return stale data for an xid added after the hit.
        assert!(table.dummy_proc_for(43).is_some());
    }
}
