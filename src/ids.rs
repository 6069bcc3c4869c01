//! Identifier types shared across the coordination core.

use crate::error::{Result, TwoPhaseError};

pub type Xid = u32;
pub type Oid = u32;
pub type RoleId = Oid;
pub type DatabaseId = Oid;

/// Backend id space: real backends live in `1..=max_real_backends`; dummy
/// (prepared-transaction) backends are assigned `(max_real_backends,
/// max_real_backends + max_prepared]`, per spec.md §3.
pub type BackendId = i32;

pub const INVALID_BACKEND_ID: BackendId = 0;

/// A WAL location: `(logical_log_id, byte_offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn {
    pub log_id: u32,
    pub offset: u32,
}

impl Lsn {
    pub const ZERO: Lsn = Lsn {
        log_id: 0,
        offset: 0,
    };

    pub fn new(log_id: u32, offset: u32) -> Self {
        Lsn { log_id, offset }
    }

    pub fn is_zero(self) -> bool {
        self == Lsn::ZERO
    }

    /// A single monotonic ordinal, convenient for an in-memory/test WAL where
    /// the log never rolls over.
    pub fn as_u64(self) -> u64 {
        ((self.log_id as u64) << 32) | self.offset as u64
    }

    pub fn from_u64(v: u64) -> Self {
        Lsn {
            log_id: (v >> 32) as u32,
            offset: v as u32,
        }
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:X}/{:X}", self.log_id, self.offset)
    }
}

/// Externally-chosen GID, bounded to 199 bytes (spec.md §3), byte-exact
/// including embedded NULs up to the fixed on-disk width.
pub const MAX_GID_LEN: usize = 199;

/// On-disk fixed width of the GID field in the prepare payload header
/// (spec.md §3: "gid (fixed 200-byte NUL-padded)").
pub const GID_FIELD_WIDTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gid(Vec<u8>);

impl Gid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > MAX_GID_LEN {
            return Err(TwoPhaseError::InvalidParameter(format!(
                "transaction identifier \"{}...\" is too long ({} bytes, max {})",
                String::from_utf8_lossy(&bytes[..MAX_GID_LEN.min(bytes.len())]),
                bytes.len(),
                MAX_GID_LEN
            )));
        }
        Ok(Gid(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    /// Serialize into the fixed-width, NUL-padded on-disk field.
    pub fn to_fixed_field(&self) -> [u8; GID_FIELD_WIDTH] {
        let mut buf = [0u8; GID_FIELD_WIDTH];
        buf[..self.0.len()].copy_from_slice(&self.0);
        buf
    }

    /// Parse back from the fixed-width field: bytes up to the first NUL.
    ///
    /// In-memory `Gid` comparison (reserve/find/lock_for_finish) is always
    /// exact `Vec<u8>` equality, so a live GXact never loses fidelity to an
    /// embedded NUL. Only the round-trip through the NUL-padded on-disk field
    /// truncates at the first NUL, matching the fixed-width C-string
    /// convention this layout is modeled on.
    pub fn from_fixed_field(field: &[u8; GID_FIELD_WIDTH]) -> Self {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        Gid(field[..end].to_vec())
    }
}

impl std::fmt::Display for Gid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl From<&str> for Gid {
    fn from(s: &str) -> Self {
        // Infallible conversion used pervasively in tests; production callers
        // should prefer `Gid::new` and surface the length error to the user.
        Gid::new(s.as_bytes()).expect("Gid literal exceeds MAX_GID_LEN")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gid_rejects_oversized() {
        let long = vec![b'x'; MAX_GID_LEN + 1];
        assert!(Gid::new(long).is_err());
    }

    #[test]
    fn gid_roundtrips_through_fixed_field() {
        let gid = Gid::new(b"tx-with-embedded\0null".to_vec()).unwrap();
        let field = gid.to_fixed_field();
        let back = Gid::from_fixed_field(&field);
        assert_eq!(back.as_bytes(), b"tx-with-embedded");
    }

    #[test]
    fn lsn_ordinal_roundtrip() {
        let lsn = Lsn::new(3, 77);
        assert_eq!(Lsn::from_u64(lsn.as_u64()), lsn);
    }
}
