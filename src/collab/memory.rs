//! In-memory default collaborators. These let the coordinator and recovery
//! driver be exercised end-to-end without a host database — the same role
//! the teacher crate's `InMemoryProcArray`-shaped test doubles would play,
//! generalized into first-class implementations since this crate's "host"
//! is whatever process embeds it.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::collab::{
    ClogCollaborator, DistributedXactCollaborator, ProcArrayCollaborator, ResourceManagerCallbacks,
    RmRecord, StorageCollaborator, SubxactCollaborator, TransactionStatus,
};
use crate::gxact::DummyProc;
use crate::ids::{DatabaseId, Xid};
use crate::payload::header::RelFileNode;

#[derive(Default)]
pub struct InMemoryProcArray {
    procs: RwLock<HashMap<Xid, DummyProc>>,
}

impl InMemoryProcArray {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcArrayCollaborator for InMemoryProcArray {
    fn add(&self, proc: DummyProc) {
        self.procs.write().insert(proc.xid, proc);
    }

    fn remove(&self, xid: Xid, _latest_xid: Xid) {
        self.procs.write().remove(&xid);
    }

    fn contains(&self, xid: Xid) -> bool {
        self.procs.read().contains_key(&xid)
    }
}

#[derive(Default)]
pub struct InMemoryClog {
    status: RwLock<HashMap<Xid, TransactionStatus>>,
}

impl InMemoryClog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClogCollaborator for InMemoryClog {
    fn commit_tree(&self, xid: Xid, children: &[Xid]) {
        let mut status = self.status.write();
        status.insert(xid, TransactionStatus::Committed);
        for &child in children {
            status.insert(child, TransactionStatus::Committed);
        }
    }

    fn abort_tree(&self, xid: Xid, children: &[Xid]) {
        let mut status = self.status.write();
        status.insert(xid, TransactionStatus::Aborted);
        for &child in children {
            status.insert(child, TransactionStatus::Aborted);
        }
    }

    fn did_commit(&self, xid: Xid) -> bool {
        matches!(
            self.status.read().get(&xid),
            Some(TransactionStatus::Committed)
        )
    }

    fn did_abort(&self, xid: Xid) -> bool {
        matches!(
            self.status.read().get(&xid),
            Some(TransactionStatus::Aborted)
        )
    }
}

/// Records unlink calls for test assertions. Never touches the real
/// filesystem — deleting files on commit/abort remains the host database's
/// job even under this default (spec.md §6, StorageCollaborator).
#[derive(Default)]
pub struct InMemoryStorage {
    unlinked: Mutex<Vec<(RelFileNode, u8)>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unlinked(&self) -> Vec<(RelFileNode, u8)> {
        self.unlinked.lock().clone()
    }
}

impl StorageCollaborator for InMemoryStorage {
    fn open(&self, _rel: RelFileNode) {}

    fn unlink(&self, rel: RelFileNode, fork: u8) {
        self.unlinked.lock().push((rel, fork));
    }

    fn close(&self, _rel: RelFileNode) {}
}

#[derive(Default)]
pub struct InMemorySubxactMap {
    parents: RwLock<HashMap<Xid, Xid>>,
}

impl InMemorySubxactMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent_of(&self, subxid: Xid) -> Option<Xid> {
        self.parents.read().get(&subxid).copied()
    }
}

impl SubxactCollaborator for InMemorySubxactMap {
    fn set_parent(&self, subxid: Xid, parent: Xid) {
        self.parents.write().insert(subxid, parent);
    }
}

type RmCallback = Box<dyn Fn(&RmRecord) + Send + Sync>;

/// The three parallel resource-manager callback tables from spec.md §6,
/// keyed by `rmid`.
#[derive(Default)]
pub struct ResourceManagerRegistry {
    recover: RwLock<HashMap<u8, RmCallback>>,
    post_commit: RwLock<HashMap<u8, RmCallback>>,
    post_abort: RwLock<HashMap<u8, RmCallback>>,
}

impl ResourceManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_recover(&self, rmid: u8, f: impl Fn(&RmRecord) + Send + Sync + 'static) {
        self.recover.write().insert(rmid, Box::new(f));
    }

    pub fn register_post_commit(&self, rmid: u8, f: impl Fn(&RmRecord) + Send + Sync + 'static) {
        self.post_commit.write().insert(rmid, Box::new(f));
    }

    pub fn register_post_abort(&self, rmid: u8, f: impl Fn(&RmRecord) + Send + Sync + 'static) {
        self.post_abort.write().insert(rmid, Box::new(f));
    }
}

impl ResourceManagerCallbacks for ResourceManagerRegistry {
    fn recover(&self, record: &RmRecord) {
        if let Some(cb) = self.recover.read().get(&record.rmid) {
            cb(record);
        }
    }

    fn post_commit(&self, record: &RmRecord) {
        if let Some(cb) = self.post_commit.read().get(&record.rmid) {
            cb(record);
        }
    }

    fn post_abort(&self, record: &RmRecord) {
        if let Some(cb) = self.post_abort.read().get(&record.rmid) {
            cb(record);
        }
    }
}

/// No-op distributed-xact collaborator for the common case where GIDs are
/// not themselves distributed-transaction identifiers (spec.md §6).
#[derive(Default)]
pub struct NullDistributedXact;

impl NullDistributedXact {
    pub fn new() -> Self {
        Self
    }
}

impl DistributedXactCollaborator for NullDistributedXact {
    fn crack_gid(&self, _gid: &[u8]) -> Option<(i64, u32)> {
        None
    }

    fn set_committed_tree(&self, _xid: Xid, _children: &[Xid], _database: DatabaseId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proc_array_add_remove() {
        let pa = InMemoryProcArray::new();
        pa.add(DummyProc::new(5, 1, 1));
        assert!(pa.contains(5));
        pa.remove(5, 5);
        assert!(!pa.contains(5));
    }

    #[test]
    fn clog_tree_commit_and_abort() {
        let clog = InMemoryClog::new();
        clog.commit_tree(10, &[11, 12]);
        assert!(clog.did_commit(10));
        assert!(clog.did_commit(11));
        assert!(!clog.did_abort(10));
    }

    #[test]
    fn resource_manager_registry_dispatches_by_rmid() {
        let registry = ResourceManagerRegistry::new();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        registry.register_post_commit(7, move |rec| seen2.lock().push(rec.rmid));

        registry.post_commit(&RmRecord {
            rmid: 7,
            info: 0,
            data: vec![],
        });
        registry.post_commit(&RmRecord {
            rmid: 8,
            info: 0,
            data: vec![],
        });
        assert_eq!(*seen.lock(), vec![7]);
    }
}
