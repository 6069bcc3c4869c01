//! Streaming builder for the prepare-record binary payload (spec.md §3, §4.1).
//!
//! Process-local: held by the single backend currently preparing. The
//! subxact/commit-rel/abort-rel lists are supplied up front by the caller
//! (fetching them from the embedding database's own transaction state is the
//! caller's job — spec.md §6 names no generic "query" collaborator for this),
//! then zero or more resource-manager sub-records are appended one at a time.

use crate::collab::{WalCollaborator, INFO_XACT_PREPARE, RM_XACT};
use crate::error::{Result, TwoPhaseError};
use crate::ids::{DatabaseId, Gid, Lsn, RoleId, Xid};
use crate::payload::crc::crc32;
use crate::payload::header::{align_up, PrepareHeader, RelFileNode, END_ID};

fn pad_to_alignment(buf: &mut Vec<u8>) {
    let target = align_up(buf.len());
    buf.resize(target, 0);
}

/// Builds one prepare record. `start` writes the header and the fixed-shape
/// arrays; `register` appends resource-manager sub-records in arbitrary
/// number; `finish` seals the record with the END sentinel and CRC and hands
/// it to the WAL collaborator.
pub struct PrepareRecordAssembler {
    buf: Vec<u8>,
    finished: bool,
}

impl PrepareRecordAssembler {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        xid: Xid,
        database_oid: DatabaseId,
        prepared_at: i64,
        owner_oid: RoleId,
        gid: Gid,
        subxacts: &[Xid],
        commit_rels: &[RelFileNode],
        abort_rels: &[RelFileNode],
    ) -> Self {
        let header = PrepareHeader {
            total_len: 0,
            xid,
            database_oid,
            prepared_at,
            owner_oid,
            nsubxacts: subxacts.len() as i32,
            ncommit_rels: commit_rels.len() as i32,
            nabort_rels: abort_rels.len() as i32,
            gid,
        };

        let mut buf = Vec::with_capacity(PrepareHeader::ENCODED_LEN + 64);
        header.encode(&mut buf);
        pad_to_alignment(&mut buf);

        for &sx in subxacts {
            buf.extend_from_slice(&sx.to_le_bytes());
        }
        pad_to_alignment(&mut buf);

        for rel in commit_rels {
            rel.encode(&mut buf);
        }
        pad_to_alignment(&mut buf);

        for rel in abort_rels {
            rel.encode(&mut buf);
        }
        pad_to_alignment(&mut buf);

        PrepareRecordAssembler {
            buf,
            finished: false,
        }
    }

    /// Append one resource-manager sub-record. `data` may be empty (the end
    /// sentinel uses this path internally with `rmid = END_ID`).
    pub fn register(&mut self, rmid: u8, info: u16, data: &[u8]) -> Result<()> {
        if self.finished {
            return Err(TwoPhaseError::InvalidParameter(
                "prepare record assembler already finished".into(),
            ));
        }
        self.buf
            .extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.buf.push(rmid);
        self.buf.extend_from_slice(&info.to_le_bytes());
        self.buf.extend_from_slice(data);
        pad_to_alignment(&mut self.buf);
        Ok(())
    }

    /// Seal the record: append the END sentinel, compute the CRC, patch
    /// `total_len`, and hand the chain to the WAL collaborator for atomic
    /// insertion as an `XLOG_XACT_PREPARE` record. Consumes `self` — the
    /// spec forbids reuse after `finish()` without a fresh `start()`.
    pub fn finish(
        mut self,
        payload_ceiling: usize,
        wal: &dyn WalCollaborator,
    ) -> Result<(Lsn, Lsn)> {
        self.register(END_ID, 0, &[])?;
        self.finished = true;

        // total_len includes the trailing CRC (spec.md §3 item 1) and must
        // be patched into the header *before* the CRC is computed — the
        // reader verifies the CRC over the header it actually decodes,
        // total_len included.
        let total_len = self.buf.len() + 4;
        if total_len > payload_ceiling {
            return Err(TwoPhaseError::ProgramLimitExceeded(format!(
                "prepare record of {} bytes exceeds WAL payload ceiling of {} bytes",
                total_len, payload_ceiling
            )));
        }
        self.buf[4..8].copy_from_slice(&(total_len as u32).to_le_bytes());

        let crc = crc32(&self.buf);
        self.buf.extend_from_slice(&crc.to_le_bytes());

        let end_lsn = wal.insert(RM_XACT, INFO_XACT_PREPARE, &self.buf)?;
        let begin_lsn = wal.last_insert_begin_lsn();
        Ok((begin_lsn, end_lsn))
    }
}
