//! Copy a frozen tree onto a writable filesystem.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{FsError, FsResult};
use crate::image::Image;
use crate::stream::BinaryFile;
use crate::tree::NodeData;

pub const DEFAULT_TRANSFER_BUFFER: usize = 256;

/// What to do with files that already exist at the destination.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overwrite {
    #[default]
    Never,
    Always,
}

impl FromStr for Overwrite {
    type Err = FsError;

    fn from_str(s: &str) -> FsResult<Self> {
        match s {
            "never" => Ok(Overwrite::Never),
            "always" => Ok(Overwrite::Always),
            other => Err(FsError::InvalidArgument(format!("overwrite policy {other:?}, expected never or always"))),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeployOptions {
    pub overwrite: Overwrite,
    /// Bytes moved per read/write round trip.
    pub transfer_buffer: usize,
    pub silent: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self { overwrite: Overwrite::Never, transfer_buffer: DEFAULT_TRANSFER_BUFFER, silent: false }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub folders_created: usize,
    pub copied: usize,
    pub skipped: usize,
    pub bytes_written: u64,
    /// Set when the guard found a populated target and nothing was touched.
    pub nothing_copied: bool,
}

fn is_populated(target: &Path) -> bool {
    fs::read_dir(target).map(|mut d| d.next().is_some()).unwrap_or(false)
}

/// Copy the whole image below `target`.
///
/// With [`Overwrite::Never`] a target folder that already has content is left
/// alone entirely, so running this on every start is cheap after the first.
/// With [`Overwrite::Always`] every file is rewritten.
pub fn deploy(image: &Arc<Image>, target: &Path, opts: &DeployOptions) -> FsResult<DeployReport> {
    if opts.overwrite == Overwrite::Never && is_populated(target) {
        if !opts.silent {
            log::info!("{} is not empty, nothing copied", target.display());
        }
        return Ok(DeployReport { nothing_copied: true, ..Default::default() });
    }
    extract(image, target, opts)
}

/// Same walk as [`deploy`] but never short-circuits on a populated target.
///
/// On error every file and folder this call created is removed again, so a
/// failed run never leaves a tree the emptiness guard would take as done.
pub fn extract(image: &Arc<Image>, target: &Path, opts: &DeployOptions) -> FsResult<DeployReport> {
    if opts.transfer_buffer == 0 {
        return Err(FsError::InvalidArgument("transfer buffer must not be empty".to_string()));
    }
    let mut created = Created::default();
    match extract_into(image, target, opts, &mut created) {
        Ok(report) => Ok(report),
        Err(e) => {
            log::warn!("deploy to {} failed ({}), removing {} new entries", target.display(), e, created.len());
            created.roll_back();
            Err(e)
        }
    }
}

/// Entries a single extract run brought into existence, in creation order.
#[derive(Default)]
struct Created {
    files: Vec<PathBuf>,
    folders: Vec<PathBuf>,
}

impl Created {
    fn len(&self) -> usize {
        self.files.len() + self.folders.len()
    }

    fn roll_back(self) {
        for f in self.files.iter().rev() {
            if let Err(e) = fs::remove_file(f) {
                log::warn!("could not remove {}: {}", f.display(), e);
            }
        }
        for d in self.folders.iter().rev() {
            if let Err(e) = fs::remove_dir(d) {
                log::warn!("could not remove {}: {}", d.display(), e);
            }
        }
    }
}

fn create_missing_parents(target: &Path, created: &mut Created) -> FsResult<()> {
    let mut missing = Vec::new();
    let mut at = Some(target);
    while let Some(p) = at {
        if p.as_os_str().is_empty() || p.exists() {
            break;
        }
        missing.push(p.to_path_buf());
        at = p.parent();
    }
    for p in missing.into_iter().rev() {
        match fs::create_dir(&p) {
            Ok(()) => created.folders.push(p),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn extract_into(
    image: &Arc<Image>,
    target: &Path,
    opts: &DeployOptions,
    created: &mut Created,
) -> FsResult<DeployReport> {
    create_missing_parents(target, created)?;
    let tree = image.tree();
    let mut report = DeployReport::default();
    let mut buf = vec![0u8; opts.transfer_buffer];
    for id in tree.walk() {
        let rel = tree.path_of(id);
        let dst = dest_path(target, &rel);
        match &tree.node(id).data {
            NodeData::Folder { .. } => match fs::create_dir(&dst) {
                Ok(()) => {
                    created.folders.push(dst.clone());
                    report.folders_created += 1;
                    if !opts.silent {
                        log::info!("created folder {}", dst.display());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            },
            NodeData::File(meta) => {
                let existed = dst.exists();
                if opts.overwrite == Overwrite::Never && existed {
                    log::warn!("{} exists, not overwritten", dst.display());
                    report.skipped += 1;
                    continue;
                }
                let mut src = BinaryFile::open(image.clone(), id, *meta);
                let written = copy_through(&mut src, &dst, &mut buf);
                src.close();
                let written = written?;
                if !existed {
                    created.files.push(dst.clone());
                }
                report.copied += 1;
                report.bytes_written += written;
                if !opts.silent {
                    log::info!("copied {} ({} bytes)", dst.display(), written);
                }
            }
        }
    }
    if !opts.silent {
        log::info!(
            "deploy to {} done: {} files copied, {} skipped, {} folders created",
            target.display(),
            report.copied,
            report.skipped,
            report.folders_created
        );
    }
    Ok(report)
}

fn dest_path(target: &Path, image_path: &str) -> PathBuf {
    let mut p = target.to_path_buf();
    p.extend(image_path.split('/').filter(|s| !s.is_empty()));
    p
}

fn part_path(dst: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(dst.file_name().unwrap_or_default());
    name.push(".freezefs-part");
    dst.with_file_name(name)
}

/// Stream one file into a sibling part file, then rename it over `dst`.
fn copy_through(src: &mut BinaryFile, dst: &Path, buf: &mut [u8]) -> FsResult<u64> {
    let part = part_path(dst);
    let written = fill_part(src, &part, buf).and_then(|n| {
        fs::rename(&part, dst)?;
        Ok(n)
    });
    if written.is_err() {
        let _ = fs::remove_file(&part);
    }
    written
}

fn fill_part(src: &mut BinaryFile, part: &Path, buf: &mut [u8]) -> FsResult<u64> {
    let mut out = File::create(part)?;
    let mut total = 0u64;
    loop {
        let n = src.readinto(buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    out.flush()?;
    Ok(total)
}
