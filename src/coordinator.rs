//! Prepare/Finish state machine (spec.md §4.3): orchestrates
//! MarkAsPreparing → EndPrepare → LockGXact → FinishPrepared, enforcing the
//! WAL/visibility/file-deletion/callback ordering spec.md §5 requires.

use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "test-utils")]
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::BackendLockedGXact;
use crate::checkpoint::PostCheckpointIndex;
use crate::collab::{
    ClogCollaborator, DistributedXactCollaborator, ProcArrayCollaborator,
    ResourceManagerCallbacks, StorageCollaborator, SubxactCollaborator, WalCollaborator,
    INFO_XACT_ABORT_PREPARED, INFO_XACT_COMMIT_PREPARED, RM_XACT,
};
use crate::config::TwoPhaseConfig;
use crate::error::{Result, TwoPhaseError};
use crate::gxact::{DummyProc, GXactRef, GXactTable};
use crate::ids::{BackendId, DatabaseId, Gid, RoleId, Xid};
use crate::payload::assembler::PrepareRecordAssembler;
use crate::payload::header::RelFileNode;
use crate::payload::reader::{parse_prepare_record, ParsedPrepareRecord};

/// One resource-manager sub-record supplied at prepare time (spec.md §3
/// item 5, §4.1).
pub struct RmInput {
    pub rmid: u8,
    pub info: u16,
    pub data: Vec<u8>,
}

/// The payload content `prepare_transaction` hands to the assembler, sourced
/// by the caller from its own transaction state. Spec.md §6 contracts no
/// generic "query" collaborator for committed-children/pending-deletes, so
/// this crate takes them as direct input rather than pulling them through a
/// trait (see `src/payload/assembler.rs`).
pub struct PrepareInput {
    pub subxacts: Vec<Xid>,
    pub commit_rels: Vec<RelFileNode>,
    pub abort_rels: Vec<RelFileNode>,
    pub rm_records: Vec<RmInput>,
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Ties the GXact table, post-checkpoint index, and every external
/// collaborator (spec.md §6) together behind the public `prepare_transaction`
/// / `finish_prepared` operations.
pub struct TwoPhaseCoordinator {
    pub table: GXactTable,
    pub checkpoint: PostCheckpointIndex,
    config: TwoPhaseConfig,
    wal: Box<dyn WalCollaborator>,
    proc_array: Box<dyn ProcArrayCollaborator>,
    clog: Box<dyn ClogCollaborator>,
    storage: Box<dyn StorageCollaborator>,
    subxact_map: Box<dyn SubxactCollaborator>,
    rm_callbacks: Box<dyn ResourceManagerCallbacks>,
    distrib: Box<dyn DistributedXactCollaborator>,
    /// Fires right after the WAL flush in `end_prepare`, before `mark_valid`
    /// — the "optional injected panic" crash-recovery test hook from
    /// spec.md §4.3 step 6. Only compiled into test builds.
    #[cfg(feature = "test-utils")]
    pub panic_after_flush: AtomicBool,
}

impl TwoPhaseCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TwoPhaseConfig,
        max_real_backends: BackendId,
        wal: Box<dyn WalCollaborator>,
        proc_array: Box<dyn ProcArrayCollaborator>,
        clog: Box<dyn ClogCollaborator>,
        storage: Box<dyn StorageCollaborator>,
        subxact_map: Box<dyn SubxactCollaborator>,
        rm_callbacks: Box<dyn ResourceManagerCallbacks>,
        distrib: Box<dyn DistributedXactCollaborator>,
    ) -> Self {
        let table = GXactTable::new(config.max_prepared, max_real_backends);
        TwoPhaseCoordinator {
            table,
            checkpoint: PostCheckpointIndex::new(),
            config,
            wal,
            proc_array,
            clog,
            storage,
            subxact_map,
            rm_callbacks,
            distrib,
            #[cfg(feature = "test-utils")]
            panic_after_flush: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &TwoPhaseConfig {
        &self.config
    }

    pub(crate) fn wal(&self) -> &dyn WalCollaborator {
        self.wal.as_ref()
    }

    pub(crate) fn proc_array(&self) -> &dyn ProcArrayCollaborator {
        self.proc_array.as_ref()
    }

    pub(crate) fn subxact_map(&self) -> &dyn SubxactCollaborator {
        self.subxact_map.as_ref()
    }

    pub(crate) fn clog(&self) -> &dyn ClogCollaborator {
        self.clog.as_ref()
    }

    pub(crate) fn rm_callbacks(&self) -> &dyn ResourceManagerCallbacks {
        self.rm_callbacks.as_ref()
    }

    pub(crate) fn distrib(&self) -> &dyn DistributedXactCollaborator {
        self.distrib.as_ref()
    }

    /// `reserve` (MarkAsPreparing) followed by `end_prepare` (spec.md §4.3).
    /// On any failure the reservation is rolled back so the caller can
    /// retry — only failures inside the PANIC-on-failure region of
    /// `finish_prepared` are unrecoverable.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_transaction(
        &self,
        caller: BackendId,
        backend_lock: &BackendLockedGXact,
        xid: Xid,
        gid: Gid,
        prepared_at: i64,
        owner: RoleId,
        database: DatabaseId,
        input: PrepareInput,
    ) -> Result<()> {
        if gid.as_bytes().len() > self.config.max_gid_len {
            return Err(TwoPhaseError::InvalidParameter(format!(
                "transaction identifier \"{}\" exceeds the configured maximum length",
                gid
            )));
        }

        let entry = self
            .table
            .reserve(caller, xid, gid.clone(), prepared_at, owner, database)?;
        backend_lock.set(entry);

        if let Err(e) = self.end_prepare(caller, entry, xid, gid, input) {
            let _ = self.table.release_and_recycle(entry);
            backend_lock.clear();
            return Err(e);
        }
        Ok(())
    }

    fn end_prepare(
        &self,
        caller: BackendId,
        entry: GXactRef,
        xid: Xid,
        gid: Gid,
        input: PrepareInput,
    ) -> Result<()> {
        // Step 1 (set in_commit): no checkpointer thread exists in this
        // crate to observe the flag (spec.md §5 names it as coordination
        // with "the checkpointer"), so it is not modeled; the WAL-before-
        // visibility ordering it protects is preserved below regardless.
        let gxact = self.table.peek(entry)?;

        let mut assembler = PrepareRecordAssembler::start(
            xid,
            gxact.database,
            gxact.prepared_at,
            gxact.owner,
            gid,
            &input.subxacts,
            &input.commit_rels,
            &input.abort_rels,
        );
        for rm in &input.rm_records {
            assembler.register(rm.rmid, rm.info, &rm.data)?;
        }

        // Step 2: insert into WAL.
        let (begin_lsn, end_lsn) =
            assembler.finish(self.config.max_payload_len, self.wal.as_ref())?;

        // Step 3: register in the post-checkpoint index before the flush,
        // so a concurrent checkpoint sees the record (ordering rationale,
        // spec.md §4.3).
        self.checkpoint.insert(xid, begin_lsn)?;

        // Step 4: flush WAL up to end_lsn.
        self.wal.flush(end_lsn)?;

        // Step 5: wake WAL senders — no replication collaborator is
        // contracted in spec.md §6; nothing to do.

        // Step 6: optional injected panic, for crash-recovery tests.
        #[cfg(feature = "test-utils")]
        if self.panic_after_flush.load(Ordering::SeqCst) {
            panic!("test-utils: injected panic after WAL flush in end_prepare");
        }

        self.table.with_locked_entry(caller, entry, |g| {
            g.prepare_begin_lsn = begin_lsn;
            g.prepare_lsn = end_lsn;
        })?;

        // Step 7: mark_valid, then insert the dummy process. Ordering
        // matters: `valid = true` under the state lock must precede the
        // process-array insert being observable, so no observer sees the
        // XID as neither running nor prepared (spec.md §4.3, §5).
        self.table.mark_valid(entry)?;
        self.proc_array
            .add(DummyProc::new(xid, gxact.database, gxact.owner));

        // Step 8: the caller's locked-GXact pointer was already set in
        // `prepare_transaction` via `backend_lock.set`, and survives past
        // this function returning.

        // Steps 9/10: leaving the critical section and the
        // synchronous-replication wait have no effect here — no in_commit
        // flag or replication collaborator exists to drive them.

        Ok(())
    }

    /// `lock_for_finish` followed by `finish_prepared`'s PANIC-on-failure
    /// region (spec.md §4.3). Returns `Ok(false)` only when
    /// `raise_if_missing = false` and the GID does not exist; any other
    /// outcome is `Ok(true)` or an error (a `Panic` variant for failures
    /// inside the unrecoverable region).
    #[allow(clippy::too_many_arguments)]
    pub fn finish_prepared(
        &self,
        caller: BackendId,
        caller_role: RoleId,
        caller_is_superuser: bool,
        caller_database: DatabaseId,
        gid: &Gid,
        is_commit: bool,
        raise_if_missing: bool,
    ) -> Result<bool> {
        // Step 1: lock_for_finish.
        let entry = match self.table.lock_for_finish(
            caller,
            gid,
            caller_role,
            caller_is_superuser,
            caller_database,
            self.config.coordinator_mode,
            raise_if_missing,
        )? {
            Some(entry) => entry,
            None => return Ok(false),
        };

        match self.finish_prepared_locked(caller, entry, is_commit) {
            Ok(()) => Ok(true),
            Err(e @ TwoPhaseError::Panic(_)) => Err(e),
            Err(e) => {
                // A failure before entering the PANIC region (step 2's read,
                // or step 3's parse) is recoverable: unlock so the caller
                // can retry from another session (spec.md §7).
                let _ = self.table.unlock(entry);
                Err(e)
            }
        }
    }

    fn finish_prepared_locked(
        &self,
        caller: BackendId,
        entry: GXactRef,
        is_commit: bool,
    ) -> Result<()> {
        let gxact = self.table.peek(entry)?;
        let xid = gxact.xid();

        // Step 2: read the prepare record. A read failure here is
        // data-corruption, surfaced fatally rather than retried (spec.md
        // §4.3 step 2, §7).
        let raw = self.wal.read_record(gxact.prepare_begin_lsn).map_err(|e| {
            TwoPhaseError::DataCorrupted(format!(
                "failed to read prepare record for xid {} at {}: {}",
                xid, gxact.prepare_begin_lsn, e
            ))
        })?;

        // Step 3: parse, verify xid, carve out arrays.
        let parsed = parse_prepare_record(&raw)?;
        if parsed.header.xid != xid {
            return Err(TwoPhaseError::DataCorrupted(format!(
                "prepare record xid {} does not match locked GXact xid {}",
                parsed.header.xid, xid
            )));
        }

        // ---- PANIC-on-failure region (spec.md §4.3 steps 4-13) ----
        self.run_panic_region(caller, entry, xid, gxact.database, &parsed, is_commit)
            .map_err(|e| match e {
                TwoPhaseError::Panic(msg) => TwoPhaseError::Panic(msg),
                other => TwoPhaseError::Panic(format!(
                    "unrecoverable failure while finishing prepared transaction xid {}: {}",
                    xid, other
                )),
            })
    }

    fn run_panic_region(
        &self,
        caller: BackendId,
        entry: GXactRef,
        xid: Xid,
        database: DatabaseId,
        parsed: &ParsedPrepareRecord,
        is_commit: bool,
    ) -> Result<()> {
        // Step 4 (set in_commit): not modeled, see `end_prepare`.

        let children = &parsed.subxacts;
        let latest_xid = children.iter().copied().fold(xid, Xid::max);

        // Step 5: emit commit-prepared/abort-prepared WAL record, flush.
        let info = if is_commit {
            INFO_XACT_COMMIT_PREPARED
        } else {
            INFO_XACT_ABORT_PREPARED
        };
        let rm_chain = if is_commit {
            let (distrib_timestamp, distrib_xid) = self
                .distrib
                .crack_gid(parsed.header.gid.as_bytes())
                .unwrap_or((0, 0));
            encode_commit_prepared(
                xid,
                distrib_timestamp,
                distrib_xid,
                now_micros(),
                &parsed.commit_rels,
                children,
            )
        } else {
            encode_abort_prepared(xid, now_micros(), &parsed.abort_rels, children)
        };
        let end_lsn = self.wal.insert(RM_XACT, info, &rm_chain)?;
        self.wal.flush(end_lsn)?;

        // Step 6: wake WAL senders (no-op, see `end_prepare`); mark trees.
        if is_commit {
            self.distrib.set_committed_tree(xid, children, database);
            self.clog.commit_tree(xid, children);
        } else {
            self.clog.abort_tree(xid, children);
        }

        // Step 7: remove the dummy process.
        self.proc_array.remove(xid, latest_xid);

        // Step 8: valid = false. The entry is already exclusively locked by
        // `caller`, so no additional synchronisation is needed per spec —
        // this still takes the table's lock because safe Rust requires a
        // `&mut` borrow to write the field (see `GXactTable`'s doc comment).
        self.table.with_locked_entry(caller, entry, |g| g.valid = false)?;

        // Step 9: delete every file in the chosen rel list. Fork
        // enumeration is not specified by spec.md beyond "across all
        // forks"; this crate unlinks the main fork (0) only, since no fork
        // catalog is part of this core's contract.
        let rels = if is_commit {
            &parsed.commit_rels
        } else {
            &parsed.abort_rels
        };
        for rel in rels {
            self.storage.unlink(*rel, 0);
        }

        // Step 10: resource-manager callbacks over the sub-record stream.
        for record in &parsed.rm_records {
            if is_commit {
                self.rm_callbacks.post_commit(record);
            } else {
                self.rm_callbacks.post_abort(record);
            }
        }

        // Step 11: update statistics (no stats collaborator is contracted);
        // remove the post-checkpoint index entry.
        self.checkpoint.remove(xid);

        // Step 12: release_and_recycle.
        self.table.release_and_recycle(entry)?;

        // Steps 13/14: leaving the critical section and the
        // synchronous-replication wait have no effect here, as in
        // `end_prepare`.

        Ok(())
    }
}

fn encode_commit_prepared(
    xid: Xid,
    distrib_timestamp: i64,
    distrib_xid: u32,
    commit_time: i64,
    rels: &[RelFileNode],
    children: &[Xid],
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&xid.to_le_bytes());
    buf.extend_from_slice(&distrib_timestamp.to_le_bytes());
    buf.extend_from_slice(&distrib_xid.to_le_bytes());
    buf.extend_from_slice(&commit_time.to_le_bytes());
    buf.extend_from_slice(&(rels.len() as i32).to_le_bytes());
    buf.extend_from_slice(&(children.len() as i32).to_le_bytes());
    for rel in rels {
        rel.encode(&mut buf);
    }
    for &child in children {
        buf.extend_from_slice(&child.to_le_bytes());
    }
    buf
}

fn encode_abort_prepared(xid: Xid, abort_time: i64, rels: &[RelFileNode], children: &[Xid]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&xid.to_le_bytes());
    buf.extend_from_slice(&abort_time.to_le_bytes());
    buf.extend_from_slice(&(rels.len() as i32).to_le_bytes());
    buf.extend_from_slice(&(children.len() as i32).to_le_bytes());
    for rel in rels {
        rel.encode(&mut buf);
    }
    for &child in children {
        buf.extend_from_slice(&child.to_le_bytes());
    }
    buf
}
