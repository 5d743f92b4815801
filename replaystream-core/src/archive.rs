//! Position-tracked byte archives
//!
//! A session has three independent archives (header, stream, checkpoint).
//! While recording the application writes into them and the streamer drains
//! them on flush; during playback the streamer appends downloaded bytes and
//! the application reads them back through a cursor.

use std::io;

use bytes::Bytes;

use crate::error::StreamerError;

/// Direction an archive is currently used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveMode {
    /// Not attached to a session.
    #[default]
    Inactive,
    /// Producer appends raw bytes; drained on flush.
    Writing,
    /// Filled from downloaded chunks; consumer advances the read cursor.
    Reading,
}

/// Append-only byte buffer with a read/write cursor.
#[derive(Debug, Default)]
pub struct ByteArchive {
    buffer: Vec<u8>,
    pos: usize,
    mode: ArchiveMode,
    /// Set by the streamer once no more chunks are known and the session is not live.
    end_of_data: bool,
    /// Latched by a short read, mirrors a serializer error flag.
    error: bool,
}

impl ByteArchive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn mode(&self) -> ArchiveMode {
        self.mode
    }

    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.mode == ArchiveMode::Reading
    }

    #[must_use]
    pub fn is_writing(&self) -> bool {
        self.mode == ArchiveMode::Writing
    }

    /// Switch direction. Buffer contents are left alone.
    pub fn set_mode(&mut self, mode: ArchiveMode) {
        self.mode = mode;
        self.end_of_data = false;
        self.error = false;
    }

    /// Current cursor position.
    #[must_use]
    pub const fn tell(&self) -> usize {
        self.pos
    }

    /// Total bytes held, independent of the cursor.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes between the cursor and the end of the buffer.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.pos)
    }

    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.error
    }

    /// Move the cursor. Positions past the end of the buffer are rejected.
    pub fn seek(&mut self, pos: usize) -> Result<(), StreamerError> {
        if pos > self.buffer.len() {
            return Err(StreamerError::invalid(format!(
                "seek to {pos} past end of archive ({} bytes)",
                self.buffer.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// `true` once every byte was consumed and no more data can ever arrive.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.pos >= self.buffer.len() && self.end_of_data
    }

    pub(crate) fn set_end_of_data(&mut self, end: bool) {
        self.end_of_data = end;
    }

    #[must_use]
    pub const fn end_of_data(&self) -> bool {
        self.end_of_data
    }

    /// Write at the cursor, growing the buffer as needed.
    pub fn write_bytes(&mut self, data: &[u8]) {
        let end = self.pos + data.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }

    /// Fill `out` from the cursor. A short buffer latches the error flag and
    /// leaves the cursor where it was.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<(), StreamerError> {
        let available = self.remaining();
        if out.len() > available {
            self.error = true;
            return Err(StreamerError::NoData {
                requested: out.len(),
                available,
            });
        }
        out.copy_from_slice(&self.buffer[self.pos..self.pos + out.len()]);
        self.pos += out.len();
        Ok(())
    }

    /// Everything between the cursor and the end, consuming it.
    pub fn read_available(&mut self) -> Bytes {
        let chunk = Bytes::copy_from_slice(&self.buffer[self.pos..]);
        self.pos = self.buffer.len();
        chunk
    }

    /// Append downloaded bytes without moving the cursor.
    pub(crate) fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Replace the whole contents and rewind.
    pub(crate) fn replace(&mut self, data: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        self.pos = 0;
        self.error = false;
    }

    /// Snapshot the buffer for upload and clear it.
    pub(crate) fn drain(&mut self) -> Bytes {
        self.pos = 0;
        Bytes::from(std::mem::take(&mut self.buffer))
    }

    /// Empty the buffer and rewind, also clearing end-of-data.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pos = 0;
        self.end_of_data = false;
        self.error = false;
    }
}

impl io::Write for ByteArchive {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for ByteArchive {
    /// Partial reads are allowed; returns 0 when nothing is buffered.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
