use crate::ids::{BackendId, DatabaseId, Gid, Lsn, RoleId, Xid, INVALID_BACKEND_ID};

/// Surrogate process-array entry for a prepared transaction: carries the
/// XID, database, role, and subtransaction cache that a live backend would
/// otherwise own, so other transactions keep seeing the XID as running
/// (spec.md §3, "dummy_proc").
#[derive(Debug, Clone)]
pub struct DummyProc {
    pub xid: Xid,
    pub database: DatabaseId,
    pub role: RoleId,
    /// Flattened subtransaction ids (recovery never reconstructs the
    /// original hierarchy — spec.md §4.6).
    pub subxacts: Vec<Xid>,
}

impl DummyProc {
    pub fn new(xid: Xid, database: DatabaseId, role: RoleId) -> Self {
        DummyProc {
            xid,
            database,
            role,
            subxacts: Vec::new(),
        }
    }

    pub fn latest_xid(&self) -> Xid {
        self.subxacts.iter().copied().max().unwrap_or(self.xid).max(self.xid)
    }
}

/// One in-flight prepared transaction descriptor (spec.md §3).
#[derive(Debug, Clone)]
pub struct GXact {
    pub dummy_proc: DummyProc,
    pub dummy_backend_id: BackendId,
    pub prepared_at: i64,
    pub prepare_begin_lsn: Lsn,
    pub prepare_lsn: Lsn,
    pub owner: RoleId,
    pub database: DatabaseId,
    pub locking_backend: BackendId,
    pub valid: bool,
    pub gid: Gid,
    pub append_only_intent_count: u32,
}

impl GXact {
    pub fn xid(&self) -> Xid {
        self.dummy_proc.xid
    }
}
