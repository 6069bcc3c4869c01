//! Collaborator contracts (spec.md §6): the core treats the WAL writer,
//! clog, process array, storage-unlink layer, subtransaction map,
//! resource-manager callback tables, and distributed-xact cracking as
//! external collaborators. Each is a trait here; `memory` ships in-memory
//! defaults and `crate::wal` ships a file-backed `WalCollaborator`.

pub mod memory;

use crate::error::Result;
use crate::gxact::DummyProc;
use crate::ids::{DatabaseId, Lsn, Xid};
use crate::payload::header::RelFileNode;

/// WAL record types the core emits (spec.md §6).
pub const RM_XACT: u8 = 1;
pub const INFO_XACT_PREPARE: u16 = 0x00;
pub const INFO_XACT_COMMIT_PREPARED: u16 = 0x01;
pub const INFO_XACT_ABORT_PREPARED: u16 = 0x02;

pub trait WalCollaborator: Send + Sync {
    /// Insert `chain` as one WAL record tagged `(rm, info)`. Returns the end
    /// LSN (spec.md §6); the begin LSN is recovered via
    /// `last_insert_begin_lsn`.
    fn insert(&self, rm: u8, info: u16, chain: &[u8]) -> Result<Lsn>;

    /// Flush the WAL up to and including `lsn`.
    fn flush(&self, lsn: Lsn) -> Result<()>;

    /// Read back the raw record bytes beginning at `lsn`.
    fn read_record(&self, lsn: Lsn) -> Result<Vec<u8>>;

    /// Begin LSN of the most recent `insert` call.
    fn last_insert_begin_lsn(&self) -> Lsn;
}

pub trait ProcArrayCollaborator: Send + Sync {
    fn add(&self, proc: DummyProc);
    fn remove(&self, xid: Xid, latest_xid: Xid);
    fn contains(&self, xid: Xid) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    InProgress,
    Committed,
    Aborted,
}

pub trait ClogCollaborator: Send + Sync {
    fn commit_tree(&self, xid: Xid, children: &[Xid]);
    fn abort_tree(&self, xid: Xid, children: &[Xid]);
    fn did_commit(&self, xid: Xid) -> bool;
    fn did_abort(&self, xid: Xid) -> bool;
}

pub trait StorageCollaborator: Send + Sync {
    fn open(&self, rel: RelFileNode);
    fn unlink(&self, rel: RelFileNode, fork: u8);
    fn close(&self, rel: RelFileNode);
}

pub trait SubxactCollaborator: Send + Sync {
    fn set_parent(&self, subxid: Xid, parent: Xid);
}

/// A parsed resource-manager sub-record, as replayed from the prepare
/// payload (spec.md §3 item 5).
#[derive(Debug, Clone)]
pub struct RmRecord {
    pub rmid: u8,
    pub info: u16,
    pub data: Vec<u8>,
}

pub trait ResourceManagerCallbacks: Send + Sync {
    fn recover(&self, record: &RmRecord);
    fn post_commit(&self, record: &RmRecord);
    fn post_abort(&self, record: &RmRecord);
}

pub trait DistributedXactCollaborator: Send + Sync {
    /// Parse a distributed-transaction timestamp and id out of a GID.
    fn crack_gid(&self, gid: &[u8]) -> Option<(i64, u32)>;
    fn set_committed_tree(&self, xid: Xid, children: &[Xid], database: DatabaseId);
}
