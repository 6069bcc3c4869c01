//! Read-only view over prepared transactions (spec.md §6): one row per
//! `valid` entry, invalid reservations filtered out. This stands in for the
//! `pg_prepared_xacts`-shaped set-returning view, which stays an external
//! collaborator (the SQL/catalog layer) per the Non-goals — this module is
//! just the projection the core itself can compute from the GXact table.

use crate::gxact::GXactTable;
use crate::ids::{DatabaseId, Gid, RoleId, Xid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedXactRow {
    pub xid: Xid,
    pub gid: Gid,
    pub prepared_at: i64,
    pub owner: RoleId,
    pub database: DatabaseId,
}

pub fn list_prepared_xacts(table: &GXactTable) -> Vec<PreparedXactRow> {
    table
        .snapshot_all()
        .into_iter()
        .filter(|s| s.valid)
        .map(|s| PreparedXactRow {
            xid: s.xid,
            gid: s.gid,
            prepared_at: s.prepared_at,
            owner: s.owner,
            database: s.database,
        })
        .collect()
}
