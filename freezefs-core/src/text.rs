use std::io::SeekFrom;

use crate::error::{FsError, FsResult};
use crate::stream::{BinaryFile, HandleState};

pub const DEFAULT_DECODE_BUFFER: usize = 400;
pub const MIN_DECODE_BUFFER: usize = 16;

/// UTF-8 text view over a [`BinaryFile`].
///
/// Bytes pulled from the underlying stream but not yet handed out live in a
/// fixed-size decode buffer, allocated on first use. Between `read` calls that
/// buffer holds at most the 1..=3 leading bytes of a codepoint that straddled
/// the previous read, plus whatever `readline` over-fetched. The buffer never
/// grows with the file, so a compressed file read as text only keeps the
/// inflate window and this buffer resident.
pub struct TextFile {
    inner: BinaryFile,
    capacity: usize,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
}

impl TextFile {
    pub(crate) fn new(inner: BinaryFile, decode_buffer: usize) -> Self {
        Self {
            inner,
            capacity: decode_buffer.max(MIN_DECODE_BUFFER),
            buf: Vec::new(),
            start: 0,
            end: 0,
            eof: false,
        }
    }

    pub fn path(&self) -> String {
        self.inner.path()
    }

    pub fn size(&self) -> u64 {
        self.inner.size()
    }

    pub fn state(&self) -> HandleState {
        self.inner.state()
    }

    pub fn decode_buffer_capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes pulled from the stream and not yet returned.
    pub fn pending(&self) -> usize {
        self.end - self.start
    }

    /// Stream bytes handed out so far.
    pub fn position(&self) -> u64 {
        self.inner.position() - self.pending() as u64
    }

    fn check_open(&self) -> FsResult<()> {
        if self.inner.state() == HandleState::Closed {
            return Err(FsError::Closed);
        }
        Ok(())
    }

    /// Pull up to `limit` more bytes behind the pending ones.
    fn fill(&mut self, limit: usize) -> FsResult<usize> {
        if self.buf.is_empty() {
            self.buf = vec![0u8; self.capacity];
        }
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        let room = (self.capacity - self.end).min(limit.max(1));
        if room == 0 {
            return Ok(0);
        }
        let n = self.inner.readinto(&mut self.buf[self.end..self.end + room])?;
        if n == 0 {
            self.eof = true;
        }
        self.end += n;
        Ok(n)
    }

    /// Decode from the pending bytes, taking about `budget` of them (stretched to
    /// the end of a codepoint when its continuation bytes are already pending).
    /// Returns the bytes consumed; 0 when the first codepoint is incomplete.
    fn decode_into(&mut self, budget: usize, out: &mut String) -> FsResult<usize> {
        let avail = &self.buf[self.start..self.end];
        let mut cut = budget.min(avail.len());
        while cut < avail.len() && avail[cut] & 0xC0 == 0x80 {
            cut += 1;
        }
        let used = match std::str::from_utf8(&avail[..cut]) {
            Ok(s) => {
                out.push_str(s);
                cut
            }
            // an incomplete sequence followed by a non-continuation byte is
            // malformed, not merely split
            Err(e) if e.error_len().is_some() || cut < avail.len() => {
                return Err(FsError::InvalidData(TextFile::position(self) + e.valid_up_to() as u64));
            }
            Err(e) => {
                let ok = e.valid_up_to();
                // valid_up_to guarantees this prefix decodes
                if let Ok(s) = std::str::from_utf8(&avail[..ok]) {
                    out.push_str(s);
                }
                ok
            }
        };
        self.start += used;
        Ok(used)
    }

    /// Decode roughly `n` bytes of the stream: up to `n` bytes, plus at most
    /// three more to finish a codepoint. Returns an empty string only at end
    /// of file (or when `n` is 0).
    pub fn read(&mut self, n: usize) -> FsResult<String> {
        self.check_open()?;
        let mut out = String::new();
        let mut budget = n;
        while budget > 0 {
            if self.pending() < budget && !self.eof {
                self.fill(budget - self.pending())?;
            }
            let used = self.decode_into(budget, &mut out)?;
            if used == 0 {
                if self.eof {
                    if self.pending() > 0 {
                        return Err(FsError::InvalidData(TextFile::position(self)));
                    }
                    break;
                }
                // first codepoint straddles the buffered bytes
                self.fill(4)?;
                continue;
            }
            budget = budget.saturating_sub(used);
        }
        Ok(out)
    }

    /// Decode everything left, one buffer at a time.
    pub fn read_all(&mut self) -> FsResult<String> {
        let mut out = String::new();
        loop {
            let chunk = self.read(self.capacity)?;
            if chunk.is_empty() {
                break;
            }
            out.push_str(&chunk);
        }
        Ok(out)
    }

    /// Next line including its terminator, the unterminated remainder at end of
    /// file, or an empty string once exhausted.
    pub fn readline(&mut self) -> FsResult<String> {
        self.check_open()?;
        let mut line: Vec<u8> = Vec::new();
        loop {
            if self.pending() == 0 {
                if self.eof || self.fill(self.capacity)? == 0 {
                    break;
                }
            }
            let avail = &self.buf[self.start..self.end];
            match avail.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    line.extend_from_slice(&avail[..=i]);
                    self.start += i + 1;
                    break;
                }
                None => {
                    line.extend_from_slice(avail);
                    self.start = self.end;
                }
            }
        }
        let at = TextFile::position(self) - line.len() as u64;
        String::from_utf8(line).map_err(|e| FsError::InvalidData(at + e.utf8_error().valid_up_to() as u64))
    }

    /// Remaining lines. The handle is left exhausted.
    pub fn readlines(&mut self) -> FsResult<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.readline()?;
            if line.is_empty() {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    /// Undecoded bytes: pending ones first, then straight from the stream.
    pub fn readinto(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        self.check_open()?;
        let pending = self.pending();
        if pending > 0 {
            let n = pending.min(buf.len());
            buf[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
            self.start += n;
            return Ok(n);
        }
        self.inner.readinto(buf)
    }

    /// Same rules as [`BinaryFile::seek`]; pending bytes are discarded.
    pub fn seek(&mut self, to: SeekFrom) -> FsResult<u64> {
        self.check_open()?;
        let to = match to {
            SeekFrom::Current(d) => SeekFrom::Start(
                self.tell()?
                    .checked_add_signed(d)
                    .ok_or_else(|| FsError::InvalidArgument("negative seek position".to_string()))?,
            ),
            other => other,
        };
        let at = self.inner.seek(to)?;
        self.start = 0;
        self.end = 0;
        self.eof = false;
        Ok(at)
    }

    pub fn tell(&self) -> FsResult<u64> {
        Ok(self.inner.tell()? - self.pending() as u64)
    }

    pub fn close(&mut self) {
        self.inner.close();
        self.buf = Vec::new();
        self.start = 0;
        self.end = 0;
    }
}

impl Iterator for TextFile {
    type Item = FsResult<String>;

    fn next(&mut self) -> Option<FsResult<String>> {
        match self.readline() {
            Ok(line) if line.is_empty() => None,
            Err(FsError::Closed) => None,
            other => Some(other),
        }
    }
}
