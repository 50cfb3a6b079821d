//! Per-file zlib (deflate) compression and the forward-only decompressor that
//! sits between an open handle and the stored payload.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{FsError, FsResult};

pub const MIN_WINDOW_BITS: u8 = 9;
pub const MAX_WINDOW_BITS: u8 = 14;
pub const MAX_LEVEL: u8 = 9;

/// Compress one file's bytes as a standalone zlib stream with a `2^wbits`
/// byte window.
pub fn compress(data: &[u8], level: u8, wbits: u8) -> FsResult<Vec<u8>> {
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&wbits) {
        return Err(FsError::InvalidArgument(format!("window bits {wbits} not in 9..=14")));
    }
    if level > MAX_LEVEL {
        return Err(FsError::InvalidArgument(format!("level {level} not in 0..=9")));
    }
    let mut z = Compress::new_with_window_bits(Compression::new(level as u32), true, wbits);
    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    loop {
        if out.capacity() - out.len() < 1024 {
            out.reserve(out.capacity().max(4096));
        }
        let consumed = z.total_in() as usize;
        let status = z
            .compress_vec(&data[consumed..], &mut out, FlushCompress::Finish)
            .map_err(|e| FsError::InvalidArgument(format!("deflate: {e}")))?;
        if status == Status::StreamEnd {
            break;
        }
    }
    Ok(out)
}

/// Streaming inflater over one file's stored bytes. The stored slice is passed
/// on every call (the handle owns the image, not this struct); the position
/// within it is tracked by the decompressor's input counter. Memory held is
/// the codec state plus its `2^window_bits` window.
pub struct InflateStream {
    z: Decompress,
    finished: bool,
}

impl InflateStream {
    pub fn new(window_bits: u8) -> Self {
        Self { z: Decompress::new_with_window_bits(true, window_bits), finished: false }
    }

    /// Decompressed bytes produced so far.
    pub fn produced(&self) -> u64 {
        self.z.total_out()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fill `out` with the next decompressed bytes. Returns 0 only at the end
    /// of the stream.
    pub fn read(&mut self, stored: &[u8], out: &mut [u8]) -> FsResult<usize> {
        if out.is_empty() || self.finished {
            return Ok(0);
        }
        loop {
            let in_pos = self.z.total_in() as usize;
            let out_before = self.z.total_out();
            let status = self
                .z
                .decompress(&stored[in_pos..], out, FlushDecompress::None)
                .map_err(|e| FsError::Decompress(e.to_string()))?;
            let n = (self.z.total_out() - out_before) as usize;
            if status == Status::StreamEnd {
                self.finished = true;
                return Ok(n);
            }
            if n > 0 {
                return Ok(n);
            }
            let in_now = self.z.total_in() as usize;
            if in_now == in_pos {
                // No input taken and nothing produced: either the stored bytes
                // ran out before the end marker or the stream is wedged.
                return Err(FsError::Decompress(format!(
                    "stream truncated after {} of {} stored bytes",
                    in_now,
                    stored.len()
                )));
            }
        }
    }
}
