//! Path dispatch: a mount table mapping absolute prefixes to filesystems, and
//! the capability trait a filesystem implements to be mounted.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{FsError, FsResult};
use crate::image::ImageId;
use crate::paths;
use crate::stream::BinaryFile;
use crate::text::TextFile;

pub const S_IFDIR: u32 = 0x4000;
pub const S_IFREG: u32 = 0x8000;
/// `statvfs` flag for a read-only mount.
pub const ST_RDONLY: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EntryType {
    Dir,
    File,
}

impl EntryType {
    pub fn mode(self) -> u32 {
        match self {
            EntryType::Dir => S_IFDIR,
            EntryType::File => S_IFREG,
        }
    }
}

/// `stat` result. The archive keeps no ownership, times or link counts, so
/// everything but `mode` and `size` is zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub mode: u32,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Stat {
    pub fn of(kind: EntryType, size: u64) -> Self {
        Stat { mode: kind.mode(), size, ..Default::default() }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFDIR != 0
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFREG != 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatVfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub flag: u64,
    pub namemax: u64,
}

/// One `ilistdir` item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryType,
    pub inode: u64,
    pub size: u64,
}

/// Owned, lazy directory listing.
pub type ReadDir = Box<dyn Iterator<Item = DirEntry> + Send>;

/// An open file in either mode.
pub enum OpenFile {
    Binary(BinaryFile),
    Text(TextFile),
}

impl OpenFile {
    pub fn path(&self) -> String {
        match self {
            OpenFile::Binary(f) => f.path(),
            OpenFile::Text(f) => f.path(),
        }
    }

    pub fn readinto(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        match self {
            OpenFile::Binary(f) => f.readinto(buf),
            OpenFile::Text(f) => f.readinto(buf),
        }
    }

    pub fn close(&mut self) {
        match self {
            OpenFile::Binary(f) => f.close(),
            OpenFile::Text(f) => f.close(),
        }
    }

    pub fn into_binary(self) -> Option<BinaryFile> {
        match self {
            OpenFile::Binary(f) => Some(f),
            OpenFile::Text(_) => None,
        }
    }

    pub fn into_text(self) -> Option<TextFile> {
        match self {
            OpenFile::Text(f) => Some(f),
            OpenFile::Binary(_) => None,
        }
    }
}

/// What the dispatcher needs from a mounted filesystem. Paths handed in are
/// relative to the mount point (the prefix already stripped).
pub trait FileSystem: Send + Sync {
    /// Identity of the backing image, if any. Mounting a filesystem with the
    /// same identity at the same point again is a no-op.
    fn identity(&self) -> Option<ImageId> {
        None
    }

    fn stat(&self, path: &str) -> FsResult<Stat>;

    fn ilistdir(&self, path: &str) -> FsResult<ReadDir>;

    fn listdir(&self, path: &str) -> FsResult<Vec<String>> {
        Ok(self.ilistdir(path)?.map(|e| e.name).collect())
    }

    fn open(&self, path: &str, mode: &str) -> FsResult<OpenFile>;

    fn statvfs(&self, path: &str) -> FsResult<StatVfs>;

    fn remove(&self, path: &str) -> FsResult<()>;

    fn mkdir(&self, path: &str) -> FsResult<()>;

    fn rmdir(&self, path: &str) -> FsResult<()>;

    fn rename(&self, from: &str, to: &str) -> FsResult<()>;
}

pub struct MountRecord {
    pub mount_point: String,
    pub fs: Arc<dyn FileSystem>,
}

/// Mount table plus working directory. Routes absolute (or cwd-relative)
/// paths to the filesystem with the longest matching mount point.
pub struct Vfs {
    mounts: Mutex<Vec<MountRecord>>,
    cwd: Mutex<String>,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn longest_match<'a, 'p>(mounts: &'a [MountRecord], abs: &'p str) -> Option<(&'a MountRecord, &'p str)> {
    let mut best: Option<(&MountRecord, &str)> = None;
    for m in mounts {
        if let Some(rest) = paths::strip_mount(abs, &m.mount_point) {
            if best.map_or(true, |(b, _)| m.mount_point.len() > b.mount_point.len()) {
                best = Some((m, rest));
            }
        }
    }
    best
}

impl Vfs {
    pub fn new() -> Self {
        Self { mounts: Mutex::new(Vec::new()), cwd: Mutex::new("/".to_string()) }
    }

    /// Register `fs` under `mount_point`.
    ///
    /// The point must not already be served: neither registered itself nor an
    /// existing entry inside another mount. Registering the same image at the
    /// same point again succeeds without doing anything.
    pub fn mount(&self, fs: Arc<dyn FileSystem>, mount_point: &str) -> FsResult<()> {
        paths::validate_target(mount_point)?;
        let mut mounts = lock(&self.mounts);
        if let Some(existing) = mounts.iter().find(|m| m.mount_point == mount_point) {
            return match (existing.fs.identity(), fs.identity()) {
                (Some(a), Some(b)) if a == b => Ok(()),
                _ => Err(FsError::AlreadyMounted(mount_point.to_string())),
            };
        }
        if let Some((outer, rest)) = longest_match(&mounts, mount_point) {
            if outer.fs.stat(rest).is_ok() {
                return Err(FsError::AlreadyMounted(mount_point.to_string()));
            }
        }
        mounts.push(MountRecord { mount_point: mount_point.to_string(), fs });
        log::debug!("mounted filesystem at {}", mount_point);
        Ok(())
    }

    /// Remove the registration at `mount_point`, handing back the filesystem.
    pub fn umount(&self, mount_point: &str) -> FsResult<Arc<dyn FileSystem>> {
        self.umount_where(mount_point, |_| true)
    }

    /// Like [`Vfs::umount`], but only when the filesystem mounted there is
    /// backed by the image `id`. Anything else at that point is `NotMounted`.
    pub fn umount_image(&self, mount_point: &str, id: ImageId) -> FsResult<Arc<dyn FileSystem>> {
        self.umount_where(mount_point, |fs| fs.identity() == Some(id))
    }

    fn umount_where(
        &self,
        mount_point: &str,
        owns: impl Fn(&dyn FileSystem) -> bool,
    ) -> FsResult<Arc<dyn FileSystem>> {
        let mut mounts = lock(&self.mounts);
        let at = mounts
            .iter()
            .position(|m| m.mount_point == mount_point && owns(m.fs.as_ref()))
            .ok_or_else(|| FsError::NotMounted(mount_point.to_string()))?;
        let record = mounts.remove(at);
        drop(mounts);
        let mut cwd = lock(&self.cwd);
        if paths::strip_mount(&cwd, mount_point).is_some() {
            *cwd = "/".to_string();
        }
        Ok(record.fs)
    }

    pub fn is_mounted(&self, mount_point: &str) -> bool {
        lock(&self.mounts).iter().any(|m| m.mount_point == mount_point)
    }

    pub fn mount_points(&self) -> Vec<String> {
        lock(&self.mounts).iter().map(|m| m.mount_point.clone()).collect()
    }

    fn absolute(&self, path: &str) -> FsResult<String> {
        let cwd = lock(&self.cwd).clone();
        paths::absolutize(&cwd, path)
    }

    /// Find the owning filesystem and the mount-relative path.
    pub fn route(&self, path: &str) -> FsResult<(Arc<dyn FileSystem>, String)> {
        let abs = self.absolute(path)?;
        let mounts = lock(&self.mounts);
        match longest_match(&mounts, &abs) {
            Some((m, rest)) => Ok((m.fs.clone(), rest.to_string())),
            None => Err(FsError::NotFound(abs)),
        }
    }

    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        let (fs, rel) = self.route(path)?;
        fs.stat(&rel)
    }

    pub fn ilistdir(&self, path: &str) -> FsResult<ReadDir> {
        let (fs, rel) = self.route(path)?;
        fs.ilistdir(&rel)
    }

    pub fn listdir(&self, path: &str) -> FsResult<Vec<String>> {
        let (fs, rel) = self.route(path)?;
        fs.listdir(&rel)
    }

    pub fn open(&self, path: &str, mode: &str) -> FsResult<OpenFile> {
        let (fs, rel) = self.route(path)?;
        fs.open(&rel, mode)
    }

    pub fn statvfs(&self, path: &str) -> FsResult<StatVfs> {
        let (fs, rel) = self.route(path)?;
        fs.statvfs(&rel)
    }

    pub fn remove(&self, path: &str) -> FsResult<()> {
        let (fs, rel) = self.route(path)?;
        fs.remove(&rel)
    }

    pub fn mkdir(&self, path: &str) -> FsResult<()> {
        let (fs, rel) = self.route(path)?;
        fs.mkdir(&rel)
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        let (fs, rel) = self.route(path)?;
        fs.rmdir(&rel)
    }

    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let (fs, rel_from) = self.route(from)?;
        // the source filesystem decides; a read-only one refuses whatever `to` is
        let rel_to = match self.route(to) {
            Ok((_, rel)) => rel,
            Err(_) => self.absolute(to)?,
        };
        fs.rename(&rel_from, &rel_to)
    }

    /// Change the working directory used for relative paths. The target must
    /// be a directory on some mounted filesystem.
    pub fn chdir(&self, path: &str) -> FsResult<()> {
        let abs = self.absolute(path)?;
        if !self.stat(&abs)?.is_dir() {
            return Err(FsError::NotADirectory(abs));
        }
        *lock(&self.cwd) = abs;
        Ok(())
    }

    pub fn getcwd(&self) -> String {
        lock(&self.cwd).clone()
    }
}
