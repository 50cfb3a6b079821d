use std::io::{self, SeekFrom};
use std::sync::Arc;

use crate::codec::InflateStream;
use crate::error::{FsError, FsResult};
use crate::image::Image;
use crate::tree::{FileMeta, NodeId};

/// How a file was opened. Only reading is possible on a frozen image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Binary,
    Text,
}

impl OpenMode {
    /// Accepts `r`, `rt`, `tr`, `rb`, `br`. Any write/append/create flag is a
    /// permission error; anything else is an invalid argument.
    pub fn parse(mode: &str) -> FsResult<OpenMode> {
        if mode.chars().any(|c| matches!(c, 'w' | 'a' | 'x' | '+')) {
            return Err(FsError::PermissionDenied(format!("read-only filesystem, mode {:?}", mode)));
        }
        let (mut r, mut b, mut t) = (0, 0, 0);
        for c in mode.chars() {
            match c {
                'r' => r += 1,
                'b' => b += 1,
                't' => t += 1,
                _ => return Err(FsError::InvalidArgument(format!("bad mode {:?}", mode))),
            }
        }
        match (r, b, t) {
            (0 | 1, 1, 0) => Ok(OpenMode::Binary),
            (1, 0, 0 | 1) => Ok(OpenMode::Text),
            _ => Err(FsError::InvalidArgument(format!("bad mode {:?}", mode))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    Opened,
    Reading,
    Closed,
}

enum Source {
    Raw { pos: u64 },
    Deflate(Box<InflateStream>),
}

/// A byte stream over one frozen file. Raw files are a window onto the payload
/// and support `seek`/`tell`; compressed files decode forward only.
pub struct BinaryFile {
    image: Arc<Image>,
    node: NodeId,
    meta: FileMeta,
    source: Option<Source>,
    state: HandleState,
}

impl BinaryFile {
    pub(crate) fn open(image: Arc<Image>, node: NodeId, meta: FileMeta) -> Self {
        let source = if meta.compressed {
            Source::Deflate(Box::new(InflateStream::new(meta.window_bits)))
        } else {
            Source::Raw { pos: 0 }
        };
        Self { image, node, meta, source: Some(source), state: HandleState::Opened }
    }

    pub fn path(&self) -> String {
        self.image.tree().path_of(self.node)
    }

    /// Decompressed length of the file.
    pub fn size(&self) -> u64 {
        self.meta.raw_size
    }

    pub fn is_compressed(&self) -> bool {
        self.meta.compressed
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Bytes produced so far (for raw streams, the current offset).
    pub fn position(&self) -> u64 {
        match &self.source {
            Some(Source::Raw { pos }) => *pos,
            Some(Source::Deflate(z)) => z.produced(),
            None => 0,
        }
    }

    fn remaining(&self) -> u64 {
        self.meta.raw_size.saturating_sub(self.position())
    }

    /// Read into `buf`, returning the number of bytes placed; 0 means end of file.
    pub fn readinto(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let stored = self.image.stored(&self.meta);
        let n = match self.source.as_mut() {
            None => return Err(FsError::Closed),
            Some(Source::Raw { pos }) => {
                let start = (*pos).min(stored.len() as u64) as usize;
                let n = buf.len().min(stored.len() - start);
                buf[..n].copy_from_slice(&stored[start..start + n]);
                *pos += n as u64;
                n
            }
            Some(Source::Deflate(z)) => z.read(stored, buf)?,
        };
        self.state = HandleState::Reading;
        Ok(n)
    }

    /// Read up to `n` bytes.
    pub fn read(&mut self, n: usize) -> FsResult<Vec<u8>> {
        let want = (n as u64).min(self.remaining()) as usize;
        let mut out = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let got = self.readinto(&mut out[filled..])?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        if self.source.is_none() {
            return Err(FsError::Closed);
        }
        out.truncate(filled);
        Ok(out)
    }

    /// Read everything from the current position to the end.
    pub fn read_to_end(&mut self) -> FsResult<Vec<u8>> {
        let rest = self.remaining() as usize;
        self.read(rest)
    }

    /// One line including its `\n`, or whatever is left at end of file.
    pub fn readline(&mut self) -> FsResult<Vec<u8>> {
        let mut line = Vec::new();
        let mut b = [0u8; 1];
        while self.readinto(&mut b)? == 1 {
            line.push(b[0]);
            if b[0] == b'\n' {
                break;
            }
        }
        Ok(line)
    }

    /// Absolute repositioning. Only raw (uncompressed) streams support it.
    pub fn seek(&mut self, to: SeekFrom) -> FsResult<u64> {
        match self.source.as_mut() {
            None => Err(FsError::Closed),
            Some(Source::Deflate(_)) => Err(FsError::Unsupported("seek on a compressed stream")),
            Some(Source::Raw { pos }) => {
                let target = match to {
                    SeekFrom::Start(off) => Some(off),
                    SeekFrom::Current(d) => pos.checked_add_signed(d),
                    SeekFrom::End(d) => self.meta.raw_size.checked_add_signed(d),
                };
                let target = target.ok_or_else(|| FsError::InvalidArgument("negative seek position".to_string()))?;
                *pos = target;
                Ok(target)
            }
        }
    }

    pub fn tell(&self) -> FsResult<u64> {
        match &self.source {
            None => Err(FsError::Closed),
            Some(Source::Deflate(_)) => Err(FsError::Unsupported("tell on a compressed stream")),
            Some(Source::Raw { pos }) => Ok(*pos),
        }
    }

    /// Drop decoder state. Further reads fail; closing again is a no-op.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            log::debug!("closed {}", self.path());
        }
        self.state = HandleState::Closed;
    }
}

impl io::Read for BinaryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.readinto(buf)?)
    }
}

impl io::Seek for BinaryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(BinaryFile::seek(self, pos)?)
    }
}
