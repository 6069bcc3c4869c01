//! Recovery driver (spec.md §4.6): runs once at startup, before user
//! connections are admitted, to rebuild the GXact table from prepare records
//! discovered via the post-checkpoint index.

use crate::coordinator::TwoPhaseCoordinator;
use crate::error::Result;
use crate::ids::{BackendId, Xid};
use crate::payload::reader::parse_prepare_record;

#[derive(Debug, Clone, Copy, Default)]
pub struct PrescanResult {
    pub oldest_in_progress: Option<Xid>,
    /// The lowest xid that must not be reissued: one past the highest
    /// subxact id observed across every still-in-progress prepared xact.
    pub next_xid_floor: Option<Xid>,
}

impl TwoPhaseCoordinator {
    /// Prescan (spec.md §4.6): for each post-checkpoint index entry, read the
    /// prepare record and, if the xid is neither committed nor aborted,
    /// adopt it into the oldest-in-progress running minimum and advance the
    /// next-xid floor past every subxact id, so subxact ids are never
    /// reissued.
    pub fn prescan(&self) -> Result<PrescanResult> {
        let mut result = PrescanResult::default();
        for entry in self.checkpoint.snapshot_for_checkpoint() {
            let raw = self.wal().read_record(entry.lsn)?;
            let parsed = parse_prepare_record(&raw)?;
            let xid = parsed.header.xid;

            if self.clog().did_commit(xid) || self.clog().did_abort(xid) {
                continue;
            }

            result.oldest_in_progress = Some(match result.oldest_in_progress {
                Some(current) => current.min(xid),
                None => xid,
            });

            if let Some(highest) = parsed.subxacts.iter().copied().max() {
                let floor = highest + 1;
                result.next_xid_floor = Some(match result.next_xid_floor {
                    Some(current) => current.max(floor),
                    None => floor,
                });
            }
        }
        Ok(result)
    }

    /// Recover (spec.md §4.6): for each post-checkpoint index entry, read the
    /// record again, flatten the subxact hierarchy onto the top xid (the
    /// original hierarchy is not preserved), crack a distributed-transaction
    /// identifier out of the GID, `reserve` a fresh GXact, `mark_valid` it,
    /// insert its dummy process into the process array, and replay every
    /// resource-manager sub-record through its recover callback.
    /// `prepare_lsn` is left zero; the only consequence is that the entry
    /// gets re-fsynced on the next checkpoint, which spec.md §4.6 accepts.
    pub fn recover(&self, recovery_backend: BackendId) -> Result<Vec<Xid>> {
        let mut recovered = Vec::new();
        for entry in self.checkpoint.snapshot_for_checkpoint() {
            let raw = self.wal().read_record(entry.lsn)?;
            let parsed = parse_prepare_record(&raw)?;
            let xid = parsed.header.xid;

            if self.clog().did_commit(xid) || self.clog().did_abort(xid) {
                continue;
            }

            for &child in &parsed.subxacts {
                self.subxact_map().set_parent(child, xid);
            }

            // Crack the GID for a distributed-transaction identifier; the
            // default `NullDistributedXact` returns `None` and this is
            // simply unused in that case.
            let _ = self.distrib().crack_gid(parsed.header.gid.as_bytes());

            let gxact_ref = self.table.reserve(
                recovery_backend,
                xid,
                parsed.header.gid.clone(),
                parsed.header.prepared_at,
                parsed.header.owner_oid,
                parsed.header.database_oid,
            )?;
            self.table.with_locked_entry(recovery_backend, gxact_ref, |g| {
                g.dummy_proc.subxacts = parsed.subxacts.clone();
                g.prepare_begin_lsn = entry.lsn;
            })?;
            self.table.mark_valid(gxact_ref)?;
            if let Some(dummy_proc) = self.table.dummy_proc_for(xid) {
                self.proc_array().add(dummy_proc);
            }
            self.table.unlock(gxact_ref)?;

            for record in &parsed.rm_records {
                self.rm_callbacks().recover(record);
            }

            recovered.push(xid);
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendLockedGXact;
    use crate::collab::memory::{
        InMemoryClog, InMemoryProcArray, InMemoryStorage, InMemorySubxactMap, NullDistributedXact,
        ResourceManagerRegistry,
    };
    use crate::config::TwoPhaseConfig;
    use crate::coordinator::PrepareInput;
    use crate::ids::Gid;
    use crate::wal::FileWal;
    use tempfile::NamedTempFile;

    fn gid(s: &str) -> Gid {
        Gid::new(s.as_bytes().to_vec()).unwrap()
    }

    fn new_coordinator(path: &std::path::Path) -> TwoPhaseCoordinator {
        TwoPhaseCoordinator::new(
            TwoPhaseConfig::default(),
            100,
            Box::new(FileWal::create(path).unwrap()),
            Box::new(InMemoryProcArray::new()),
            Box::new(InMemoryClog::new()),
            Box::new(InMemoryStorage::new()),
            Box::new(InMemorySubxactMap::new()),
            Box::new(ResourceManagerRegistry::new()),
            Box::new(NullDistributedXact::new()),
        )
    }

    #[test]
    fn s5_crash_restart_equivalence() {
        let tmp = NamedTempFile::new().unwrap();

        // Simulate the crash: prepare on one coordinator instance, then drop
        // it without ever calling finish_prepared.
        {
            let coordinator = new_coordinator(tmp.path());
            let backend_lock = BackendLockedGXact::new();
            coordinator
                .prepare_transaction(
                    1,
                    &backend_lock,
                    200,
                    gid("tx-B"),
                    42,
                    10,
                    1,
                    PrepareInput {
                        subxacts: vec![201, 202],
                        commit_rels: vec![],
                        abort_rels: vec![],
                        rm_records: vec![],
                    },
                )
                .unwrap();
        }

        // Restart: fresh coordinator, fresh table, but the same WAL file and
        // a re-populated post-checkpoint index (as a checkpoint-restore
        // would provide).
        let restarted = new_coordinator(tmp.path());
        let records = crate::wal::reader::scan_all(tmp.path()).unwrap();
        let (offset, frame) = records
            .iter()
            .find(|(_, f)| f.rm == crate::collab::RM_XACT)
            .expect("prepare record must be in the WAL");
        assert_eq!(frame.info, crate::collab::INFO_XACT_PREPARE);
        restarted
            .checkpoint
            .insert(200, crate::ids::Lsn::new(0, *offset as u32))
            .unwrap();

        let recovered = restarted.recover(999).unwrap();
        assert_eq!(recovered, vec![200]);

        let rows = crate::view::list_prepared_xacts(&restarted.table);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].xid, 200);
        assert_eq!(rows[0].gid, gid("tx-B"));
        assert_eq!(rows[0].prepared_at, 42);
        assert_eq!(rows[0].owner, 10);
        assert_eq!(rows[0].database, 1);

        // finish_prepared from the fresh session succeeds and reaches the
        // same post-state as S3.
        let finished = restarted
            .finish_prepared(1000, 10, false, 1, &gid("tx-B"), true, true)
            .unwrap();
        assert!(finished);
        assert_eq!(restarted.table.snapshot_all().len(), 0);
    }

    #[test]
    fn prescan_tracks_oldest_in_progress_and_next_xid_floor() {
        let tmp = NamedTempFile::new().unwrap();
        let coordinator = new_coordinator(tmp.path());
        let backend_lock = BackendLockedGXact::new();
        coordinator
            .prepare_transaction(
                1,
                &backend_lock,
                50,
                gid("tx"),
                0,
                10,
                1,
                PrepareInput {
                    subxacts: vec![51, 52],
                    commit_rels: vec![],
                    abort_rels: vec![],
                    rm_records: vec![],
                },
            )
            .unwrap();

        let result = coordinator.prescan().unwrap();
        assert_eq!(result.oldest_in_progress, Some(50));
        assert_eq!(result.next_xid_floor, Some(53));
    }
}
