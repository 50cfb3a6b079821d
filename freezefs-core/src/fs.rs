use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::format::IndexLimits;
use crate::image::{Image, ImageBytes, ImageId};
use crate::paths::MAX_NAME_LEN;
use crate::stream::{BinaryFile, OpenMode};
use crate::text::{TextFile, DEFAULT_DECODE_BUFFER, MIN_DECODE_BUFFER};
use crate::tree::{NodeData, NodeId};
use crate::vfs::{DirEntry, EntryType, FileSystem, OpenFile, ReadDir, Stat, StatVfs, ST_RDONLY};

/// Runtime knobs of the read-only engine.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Size of the per-handle UTF-8 decode buffer for text-mode reads.
    pub decode_buffer: usize,
    pub limits: IndexLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { decode_buffer: DEFAULT_DECODE_BUFFER, limits: IndexLimits::default() }
    }
}

impl EngineConfig {
    pub fn with_decode_buffer(mut self, n: usize) -> FsResult<Self> {
        if n < MIN_DECODE_BUFFER {
            return Err(FsError::InvalidArgument(format!(
                "decode buffer of {n} bytes, minimum is {MIN_DECODE_BUFFER}"
            )));
        }
        self.decode_buffer = n;
        Ok(self)
    }
}

/// Read-only filesystem over one frozen image.
#[derive(Clone, Debug)]
pub struct FrozenFs {
    image: Arc<Image>,
    config: EngineConfig,
}

impl FrozenFs {
    pub fn new(image: Arc<Image>) -> Self {
        Self { image, config: EngineConfig::default() }
    }

    pub fn with_config(image: Arc<Image>, config: EngineConfig) -> Self {
        Self { image, config }
    }

    /// Parse `bytes` under `config.limits` and wrap the result.
    pub fn load(bytes: ImageBytes, config: EngineConfig) -> FsResult<Self> {
        let image = Image::parse(bytes, &config.limits)?;
        Ok(Self { image, config })
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolve(&self, path: &str) -> FsResult<NodeId> {
        self.image.tree().resolve(path)
    }

    fn read_only(&self, op: &str, path: &str) -> FsError {
        FsError::PermissionDenied(format!("{op} {path}: read-only filesystem"))
    }
}

struct DirIter {
    image: Arc<Image>,
    folder: NodeId,
    next: usize,
}

impl Iterator for DirIter {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        let tree = self.image.tree();
        let &id = tree.children(self.folder).get(self.next)?;
        self.next += 1;
        let node = tree.node(id);
        let kind = if node.is_dir() { EntryType::Dir } else { EntryType::File };
        Some(DirEntry { name: node.name.clone(), kind, inode: 0, size: node.raw_size() })
    }
}

impl FileSystem for FrozenFs {
    fn identity(&self) -> Option<ImageId> {
        Some(self.image.id())
    }

    fn stat(&self, path: &str) -> FsResult<Stat> {
        let node = self.image.tree().node(self.resolve(path)?);
        Ok(match &node.data {
            NodeData::Folder { .. } => Stat::of(EntryType::Dir, 0),
            NodeData::File(m) => Stat::of(EntryType::File, m.raw_size),
        })
    }

    fn ilistdir(&self, path: &str) -> FsResult<ReadDir> {
        let id = self.resolve(path)?;
        if !self.image.tree().node(id).is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        Ok(Box::new(DirIter { image: self.image.clone(), folder: id, next: 0 }))
    }

    fn open(&self, path: &str, mode: &str) -> FsResult<OpenFile> {
        let mode = OpenMode::parse(mode)?;
        let id = self.resolve(path)?;
        let meta = match &self.image.tree().node(id).data {
            NodeData::File(m) => *m,
            NodeData::Folder { .. } => return Err(FsError::IsADirectory(path.to_string())),
        };
        log::debug!(
            "open {} ({:?}, {} bytes{})",
            path,
            mode,
            meta.raw_size,
            if meta.compressed { ", compressed" } else { "" }
        );
        let file = BinaryFile::open(self.image.clone(), id, meta);
        Ok(match mode {
            OpenMode::Binary => OpenFile::Binary(file),
            OpenMode::Text => OpenFile::Text(TextFile::new(file, self.config.decode_buffer)),
        })
    }

    fn statvfs(&self, _path: &str) -> FsResult<StatVfs> {
        let tree = self.image.tree();
        Ok(StatVfs {
            bsize: 1,
            frsize: 1,
            blocks: tree.total_raw_size(),
            bfree: 0,
            bavail: 0,
            files: tree.entry_count() as u64,
            ffree: 0,
            favail: 0,
            flag: ST_RDONLY,
            namemax: MAX_NAME_LEN as u64,
        })
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        Err(self.read_only("remove", path))
    }

    fn mkdir(&self, path: &str) -> FsResult<()> {
        Err(self.read_only("mkdir", path))
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        Err(self.read_only("rmdir", path))
    }

    fn rename(&self, from: &str, _to: &str) -> FsResult<()> {
        Err(self.read_only("rename", from))
    }
}
