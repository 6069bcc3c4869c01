use crate::ids::{DatabaseId, Gid, Oid, RoleId, Xid, GID_FIELD_WIDTH};

/// Magic number stamped at the start of every prepare payload (spec.md §3).
pub const PREPARE_MAGIC: u32 = 0x57F9_4531;

/// Segment alignment: every section of the payload occupies an integer
/// multiple of this many bytes (spec.md §4.1).
pub const ALIGNMENT: usize = 8;

/// Resource-manager id reserved for the end-sentinel sub-record
/// (spec.md §3, item 6).
pub const END_ID: u8 = 0xFF;

pub fn align_up(len: usize) -> usize {
    (len + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

/// A storage file identity: files to drop on commit or abort carry one of
/// these per fork (spec.md §3, "RelFileNode triples").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelFileNode {
    pub tablespace: Oid,
    pub database: DatabaseId,
    pub relation: Oid,
}

impl RelFileNode {
    pub const ENCODED_LEN: usize = 12;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tablespace.to_le_bytes());
        out.extend_from_slice(&self.database.to_le_bytes());
        out.extend_from_slice(&self.relation.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        Some(RelFileNode {
            tablespace: u32::from_le_bytes(bytes[0..4].try_into().ok()?),
            database: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            relation: u32::from_le_bytes(bytes[8..12].try_into().ok()?),
        })
    }
}

/// Fixed, decoded form of the header described in spec.md §3 item 1.
#[derive(Debug, Clone)]
pub struct PrepareHeader {
    pub total_len: u32,
    pub xid: Xid,
    pub database_oid: DatabaseId,
    pub prepared_at: i64,
    pub owner_oid: RoleId,
    pub nsubxacts: i32,
    pub ncommit_rels: i32,
    pub nabort_rels: i32,
    pub gid: Gid,
}

impl PrepareHeader {
    pub const ENCODED_LEN: usize = 4 + 4 + 4 + 4 + 8 + 4 + 4 + 4 + 4 + GID_FIELD_WIDTH;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&PREPARE_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.total_len.to_le_bytes());
        out.extend_from_slice(&self.xid.to_le_bytes());
        out.extend_from_slice(&self.database_oid.to_le_bytes());
        out.extend_from_slice(&self.prepared_at.to_le_bytes());
        out.extend_from_slice(&self.owner_oid.to_le_bytes());
        out.extend_from_slice(&self.nsubxacts.to_le_bytes());
        out.extend_from_slice(&self.ncommit_rels.to_le_bytes());
        out.extend_from_slice(&self.nabort_rels.to_le_bytes());
        out.extend_from_slice(&self.gid.to_fixed_field());
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        if magic != PREPARE_MAGIC {
            return None;
        }
        let total_len = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let xid = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
        let database_oid = u32::from_le_bytes(bytes[12..16].try_into().ok()?);
        let prepared_at = i64::from_le_bytes(bytes[16..24].try_into().ok()?);
        let owner_oid = u32::from_le_bytes(bytes[24..28].try_into().ok()?);
        let nsubxacts = i32::from_le_bytes(bytes[28..32].try_into().ok()?);
        let ncommit_rels = i32::from_le_bytes(bytes[32..36].try_into().ok()?);
        let nabort_rels = i32::from_le_bytes(bytes[36..40].try_into().ok()?);
        let gid_field: [u8; GID_FIELD_WIDTH] = bytes[40..40 + GID_FIELD_WIDTH].try_into().ok()?;
        Some(PrepareHeader {
            total_len,
            xid,
            database_oid,
            prepared_at,
            owner_oid,
            nsubxacts,
            ncommit_rels,
            nabort_rels,
            gid: Gid::from_fixed_field(&gid_field),
        })
    }
}
