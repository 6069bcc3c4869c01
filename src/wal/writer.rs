use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;
use crate::wal::frame::encode_frame;

/// Append-only sink for WAL frames. Tracks the current end-of-file offset so
/// each `append` can report both its begin and end offsets without an extra
/// `stat` call.
pub struct WalAppender {
    file: File,
    offset: u64,
}

impl WalAppender {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(WalAppender { file, offset: 0 })
    }

    pub fn open_append(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.seek(SeekFrom::End(0))?;
        Ok(WalAppender { file, offset })
    }

    /// Append one frame. Returns `(begin_offset, end_offset)`.
    pub fn append(&mut self, rm: u8, info: u16, chain: &[u8]) -> Result<(u64, u64)> {
        let begin = self.offset;
        let frame = encode_frame(rm, info, chain);
        self.file.write_all(&frame)?;
        self.offset += frame.len() as u64;
        Ok((begin, self.offset))
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}
