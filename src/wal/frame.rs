/// On-disk frame: `[frame_len: u32][rm: u8][info: u16][chain bytes][crc32: u32]`.
///
/// Generalized from a page-oriented WAL frame into one that carries an
/// opaque, already-assembled byte chain (the output of
/// [`crate::payload::assembler::PrepareRecordAssembler`], or a
/// commit/abort-prepared record) tagged with the resource manager id and
/// info bits the embedding database would use to dispatch replay.
use crate::payload::crc::crc32;

pub fn encode_frame(rm: u8, info: u16, chain: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + 2 + chain.len() + 4);
    payload.push(rm);
    payload.extend_from_slice(&info.to_le_bytes());
    payload.extend_from_slice(chain);
    let crc = crc32(&payload);

    let mut frame = Vec::with_capacity(4 + payload.len() + 4);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

pub struct DecodedFrame {
    pub rm: u8,
    pub info: u16,
    pub chain: Vec<u8>,
}

/// Decode a frame's payload (the bytes between the length header and the
/// trailing CRC, exclusive). Returns `None` on CRC mismatch or underflow —
/// callers decide whether that means tail-truncation or corruption.
pub fn decode_frame_payload(payload: &[u8]) -> Option<DecodedFrame> {
    if payload.len() < 4 + 3 {
        return None;
    }
    let body = &payload[..payload.len() - 4];
    let stored_crc = u32::from_le_bytes(payload[payload.len() - 4..].try_into().ok()?);
    if crc32(body) != stored_crc {
        return None;
    }
    if body.len() < 3 {
        return None;
    }
    let rm = body[0];
    let info = u16::from_le_bytes(body[1..3].try_into().ok()?);
    Some(DecodedFrame {
        rm,
        info,
        chain: body[3..].to_vec(),
    })
}
