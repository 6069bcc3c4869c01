//! Parses an assembled prepare-record payload back into its structured parts
//! (spec.md §8 invariant 6's round-trip property; consumed by
//! `finish_prepared` step 3 and by the recovery driver).

use crate::collab::RmRecord;
use crate::error::{Result, TwoPhaseError};
use crate::ids::Xid;
use crate::payload::crc::crc32;
use crate::payload::header::{align_up, PrepareHeader, RelFileNode, END_ID};

#[derive(Debug, Clone)]
pub struct ParsedPrepareRecord {
    pub header: PrepareHeader,
    pub subxacts: Vec<Xid>,
    pub commit_rels: Vec<RelFileNode>,
    pub abort_rels: Vec<RelFileNode>,
    pub rm_records: Vec<RmRecord>,
}

fn corrupted(msg: impl Into<String>) -> TwoPhaseError {
    TwoPhaseError::DataCorrupted(msg.into())
}

/// Parse `bytes` (the full chain as handed to the WAL collaborator, CRC
/// trailer included) into a structured record. Any structural inconsistency
/// — CRC mismatch, a truncated array, a length field running past the end of
/// the buffer — is a `data-corrupted` error (spec.md §7).
pub fn parse_prepare_record(bytes: &[u8]) -> Result<ParsedPrepareRecord> {
    if bytes.len() < 4 {
        return Err(corrupted("prepare record shorter than its CRC trailer"));
    }
    let split = bytes.len() - 4;
    let body = &bytes[..split];
    let stored_crc = u32::from_le_bytes(bytes[split..].try_into().unwrap());
    if crc32(body) != stored_crc {
        return Err(corrupted("prepare record CRC mismatch"));
    }

    let header = PrepareHeader::decode(body)
        .ok_or_else(|| corrupted("prepare record header failed to decode"))?;
    if header.total_len as usize != bytes.len() {
        return Err(corrupted(format!(
            "prepare record total_len {} does not match record size {}",
            header.total_len,
            bytes.len()
        )));
    }

    let mut pos = align_up(PrepareHeader::ENCODED_LEN);

    let nsubxacts = usize::try_from(header.nsubxacts)
        .map_err(|_| corrupted("negative nsubxacts in prepare record"))?;
    let mut subxacts = Vec::with_capacity(nsubxacts);
    for _ in 0..nsubxacts {
        let xid = read_u32(body, pos)?;
        subxacts.push(xid);
        pos += 4;
    }
    pos = align_up(pos);

    let ncommit_rels = usize::try_from(header.ncommit_rels)
        .map_err(|_| corrupted("negative ncommit_rels in prepare record"))?;
    let mut commit_rels = Vec::with_capacity(ncommit_rels);
    for _ in 0..ncommit_rels {
        commit_rels.push(read_rel(body, pos)?);
        pos += RelFileNode::ENCODED_LEN;
    }
    pos = align_up(pos);

    let nabort_rels = usize::try_from(header.nabort_rels)
        .map_err(|_| corrupted("negative nabort_rels in prepare record"))?;
    let mut abort_rels = Vec::with_capacity(nabort_rels);
    for _ in 0..nabort_rels {
        abort_rels.push(read_rel(body, pos)?);
        pos += RelFileNode::ENCODED_LEN;
    }
    pos = align_up(pos);

    let mut rm_records = Vec::new();
    loop {
        if pos + 4 + 1 + 2 > body.len() {
            return Err(corrupted(
                "prepare record truncated before end sentinel",
            ));
        }
        let len = read_u32(body, pos)? as usize;
        let rmid = body[pos + 4];
        let info = u16::from_le_bytes(
            body[pos + 5..pos + 7]
                .try_into()
                .map_err(|_| corrupted("truncated sub-record info field"))?,
        );
        let data_start = pos + 7;
        let data_end = data_start
            .checked_add(len)
            .ok_or_else(|| corrupted("sub-record length overflows"))?;
        if data_end > body.len() {
            return Err(corrupted("sub-record length runs past end of record"));
        }
        let data = body[data_start..data_end].to_vec();
        pos = align_up(data_end);

        if rmid == END_ID {
            break;
        }
        rm_records.push(RmRecord { rmid, info, data });
    }

    Ok(ParsedPrepareRecord {
        header,
        subxacts,
        commit_rels,
        abort_rels,
        rm_records,
    })
}

fn read_u32(body: &[u8], pos: usize) -> Result<u32> {
    body.get(pos..pos + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| corrupted("truncated u32 field in prepare record"))
}

fn read_rel(body: &[u8], pos: usize) -> Result<RelFileNode> {
    body.get(pos..pos + RelFileNode::ENCODED_LEN)
        .and_then(RelFileNode::decode)
        .ok_or_else(|| corrupted("truncated RelFileNode in prepare record"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Gid;
    use crate::payload::assembler::PrepareRecordAssembler;
    use crate::wal::FileWal;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_through_assembler() {
        let tmp = NamedTempFile::new().unwrap();
        let wal = FileWal::create(tmp.path()).unwrap();

        let commit_rels = vec![RelFileNode {
            tablespace: 1,
            database: 1,
            relation: 3,
        }];
        let mut assembler = PrepareRecordAssembler::start(
            200,
            1,
            42,
            10,
            Gid::from("tx-B"),
            &[201, 202],
            &commit_rels,
            &[],
        );
        assembler.register(7, 9, b"abc").unwrap();
        let (begin, _end) = assembler.finish(1024 * 1024, &wal).unwrap();

        let raw = wal.read_record(begin).unwrap();
        let parsed = parse_prepare_record(&raw).unwrap();

        assert_eq!(parsed.header.xid, 200);
        assert_eq!(parsed.subxacts, vec![201, 202]);
        assert_eq!(parsed.commit_rels, commit_rels);
        assert!(parsed.abort_rels.is_empty());
        assert_eq!(parsed.rm_records.len(), 1);
        assert_eq!(parsed.rm_records[0].rmid, 7);
        assert_eq!(parsed.rm_records[0].info, 9);
        assert_eq!(parsed.rm_records[0].data, b"abc");
    }

    #[test]
    fn rejects_corrupted_crc() {
        let tmp = NamedTempFile::new().unwrap();
        let wal = FileWal::create(tmp.path()).unwrap();
        let assembler =
            PrepareRecordAssembler::start(1, 1, 0, 10, Gid::from("x"), &[], &[], &[]);
        let (begin, _end) = assembler.finish(1024 * 1024, &wal).unwrap();
        let mut raw = wal.read_record(begin).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;

        let err = parse_prepare_record(&raw).unwrap_err();
        assert!(matches!(err, TwoPhaseError::DataCorrupted(_)));
    }
}
