use std::fs;
use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use serde::Serialize;

use crate::codec::{self, MAX_LEVEL, MAX_WINDOW_BITS, MIN_WINDOW_BITS};
use crate::error::{FsError, FsResult};
use crate::format;
use crate::paths;
use crate::tree::{FileMeta, NodeId, TreeIndex, ROOT};

/// Image builder settings.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    pub compress: bool,
    pub window_bits: u8,
    pub level: u8,
    /// Mount point or deploy folder recorded in the image header.
    pub target: String,
    pub follow_symlinks: bool,
    /// Globs over `/`-separated paths relative to the source folder; files
    /// must match one of these (when any are given).
    pub include: Vec<String>,
    /// Entries matching these are skipped, folders with their whole subtree.
    pub exclude: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            compress: false,
            window_bits: 10,
            level: 9,
            target: "/".to_string(),
            follow_symlinks: false,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> FsResult<()> {
        paths::validate_target(&self.target)?;
        if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&self.window_bits) {
            return Err(FsError::InvalidArgument(format!(
                "window bits must be between {MIN_WINDOW_BITS} and {MAX_WINDOW_BITS}"
            )));
        }
        if self.level > MAX_LEVEL {
            return Err(FsError::InvalidArgument(format!("level must be between 0 and {MAX_LEVEL}")));
        }
        Ok(())
    }
}

/// Per-entry line of a build summary.
#[derive(Serialize, Clone, Debug)]
pub struct ReportEntry {
    pub path: String,
    pub folder: bool,
    pub size: u64,
    pub stored_size: u64,
    pub compressed: bool,
}

#[derive(Serialize, Clone, Debug)]
pub struct BuildReport {
    pub target: String,
    pub date_frozen: String,
    pub version: u32,
    pub files: usize,
    pub folders: usize,
    pub total_size: u64,
    pub total_stored: u64,
    pub entries: Vec<ReportEntry>,
}

impl BuildReport {
    /// Describe the contents of `tree` as it sits in an image.
    pub fn from_tree(tree: &TreeIndex, target: &str, built_unix: i64) -> Self {
        let entries: Vec<ReportEntry> = tree
            .walk()
            .map(|id| {
                let node = tree.node(id);
                let meta = node.file();
                ReportEntry {
                    path: tree.path_of(id),
                    folder: node.is_dir(),
                    size: node.raw_size(),
                    stored_size: meta.map(|m| m.stored_size).unwrap_or(0),
                    compressed: meta.map(|m| m.compressed).unwrap_or(false),
                }
            })
            .collect();
        let date_frozen = chrono::DateTime::from_timestamp(built_unix, 0)
            .map(|t| t.with_timezone(&chrono::Local).format("%Y/%m/%d %H:%M:%S").to_string())
            .unwrap_or_default();
        BuildReport {
            target: target.to_string(),
            date_frozen,
            version: format::FORMAT_VERSION,
            files: tree.file_count(),
            folders: tree.entry_count() - tree.file_count(),
            total_size: tree.total_raw_size(),
            total_stored: entries.iter().map(|e| e.stored_size).sum(),
            entries,
        }
    }

    pub fn to_json(&self) -> FsResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| FsError::InvalidArgument(format!("report: {e}")))
    }

    /// Stored bytes as a percentage of the original bytes.
    pub fn ratio_pct(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        self.total_stored as f64 / self.total_size as f64 * 100.0
    }
}

/// A file's bytes as they will sit in the payload.
#[derive(Clone, Debug)]
pub struct Prepared {
    pub bytes: Vec<u8>,
    pub raw_size: u64,
    pub compressed: bool,
}

/// Compress `data` on its own when asked to, keeping the result only when it
/// is actually smaller. Level 0 stores the bytes as they are.
pub fn prepare(data: Vec<u8>, compress: bool, level: u8, window_bits: u8) -> FsResult<Prepared> {
    let raw_size = data.len() as u64;
    if compress && level > 0 && !data.is_empty() {
        let z = codec::compress(&data, level, window_bits)?;
        if z.len() < data.len() {
            return Ok(Prepared { bytes: z, raw_size, compressed: true });
        }
    }
    Ok(Prepared { bytes: data, raw_size, compressed: false })
}

/// Assembles a tree index and its payload in insertion order.
pub struct TreeBuilder {
    tree: TreeIndex,
    payload: Vec<u8>,
    compress: bool,
    window_bits: u8,
    level: u8,
}

impl TreeBuilder {
    pub fn new(compress: bool, window_bits: u8, level: u8) -> FsResult<Self> {
        BuildConfig { compress, window_bits, level, ..Default::default() }.validate()?;
        Ok(Self { tree: TreeIndex::new(), payload: Vec::new(), compress, window_bits, level })
    }

    pub fn from_config(cfg: &BuildConfig) -> FsResult<Self> {
        Self::new(cfg.compress, cfg.window_bits, cfg.level)
    }

    pub fn tree(&self) -> &TreeIndex {
        &self.tree
    }

    /// Create `path` and any missing parent folders; existing folders are reused.
    pub fn add_folder(&mut self, path: &str) -> FsResult<NodeId> {
        let mut cur = ROOT;
        for seg in paths::normalize(path)? {
            cur = match self.tree.child(cur, seg) {
                Some(id) if self.tree.node(id).is_dir() => id,
                Some(_) => return Err(FsError::NotADirectory(self.tree.path_of(cur) + "/" + seg)),
                None => self.tree.add_folder(cur, seg)?,
            };
        }
        Ok(cur)
    }

    /// Add a file, compressing it according to the builder settings.
    pub fn add_file(&mut self, path: &str, data: Vec<u8>) -> FsResult<NodeId> {
        let prepared = prepare(data, self.compress, self.level, self.window_bits)?;
        self.add_prepared(path, prepared)
    }

    pub fn add_prepared(&mut self, path: &str, prepared: Prepared) -> FsResult<NodeId> {
        let segs = paths::normalize(path)?;
        let (name, parents) = segs
            .split_last()
            .ok_or_else(|| FsError::InvalidArgument(format!("no file name in {:?}", path)))?;
        let parent = self.add_folder(&parents.join("/"))?;
        let meta = FileMeta {
            raw_size: prepared.raw_size,
            stored_size: prepared.bytes.len() as u64,
            compressed: prepared.compressed,
            window_bits: if prepared.compressed { self.window_bits } else { 0 },
            level: if prepared.compressed { self.level } else { 0 },
            offset: self.payload.len() as u64,
        };
        let id = self.tree.add_file(parent, name, meta)?;
        self.payload.extend_from_slice(&prepared.bytes);
        Ok(id)
    }

    /// Serialize into a complete image.
    pub fn finish(self, target: &str, built_unix: i64) -> FsResult<(Vec<u8>, BuildReport)> {
        paths::validate_target(target)?;
        let report = BuildReport::from_tree(&self.tree, target, built_unix);
        let image = format::write_image(&self.tree, &self.payload, target, built_unix)?;
        Ok((image, report))
    }
}

fn build_globset(patterns: &[String]) -> FsResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        b.add(Glob::new(p).map_err(|e| FsError::InvalidArgument(format!("glob {p}: {e}")))?);
    }
    b.build().map(Some).map_err(|e| FsError::InvalidArgument(format!("globs: {e}")))
}

/// `/`-joined relative path; every component must be valid UTF-8.
fn rel_string(rel: &Path) -> FsResult<String> {
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => parts.push(
                s.to_str()
                    .ok_or_else(|| FsError::InvalidArgument(format!("non UTF-8 name {:?}", rel)))?
                    .to_string(),
            ),
            _ => return Err(FsError::InvalidArgument(format!("unexpected path component in {:?}", rel))),
        }
    }
    Ok(parts.join("/"))
}

enum Walked {
    Folder(String),
    File(String, std::path::PathBuf),
}

/// Walk `root` (children sorted by name, folders before their contents) and
/// build an image of it.
pub fn build_dir(root: &Path, cfg: &BuildConfig, silent: bool) -> FsResult<(Vec<u8>, BuildReport)> {
    cfg.validate()?;
    let md = fs::metadata(root).map_err(|_| FsError::NotFound(root.display().to_string()))?;
    if !md.is_dir() {
        return Err(FsError::NotADirectory(root.display().to_string()));
    }
    let include = build_globset(&cfg.include)?;
    let exclude = build_globset(&cfg.exclude)?;

    // 1) Discover entries in order
    let mut walked = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .min_depth(1)
        .follow_links(cfg.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let rel = pathdiff::diff_paths(e.path(), root).unwrap_or_default();
            let rel = rel.to_string_lossy().replace('\\', "/");
            !exclude.as_ref().map(|g| g.is_match(&rel)).unwrap_or(false)
        });
    for ent in walker {
        let ent = ent.map_err(std::io::Error::from)?;
        let rel = pathdiff::diff_paths(ent.path(), root)
            .ok_or_else(|| FsError::InvalidArgument(format!("{:?} outside {:?}", ent.path(), root)))?;
        let rel = rel_string(&rel)?;
        let ft = ent.file_type();
        if ft.is_dir() {
            walked.push(Walked::Folder(rel));
        } else if ft.is_file() {
            if include.as_ref().map(|g| g.is_match(&rel)).unwrap_or(true) {
                walked.push(Walked::File(rel, ent.path().to_path_buf()));
            }
        } else if !silent {
            log::warn!("skipping {} (not a regular file or folder)", ent.path().display());
        }
    }

    // 2) Read and compress files independently
    let prepared: Vec<Option<Prepared>> = walked
        .par_iter()
        .map(|w| match w {
            Walked::Folder(_) => Ok(None),
            Walked::File(_, src) => {
                let data = fs::read(src)?;
                prepare(data, cfg.compress, cfg.level, cfg.window_bits).map(Some)
            }
        })
        .collect::<FsResult<_>>()?;

    // 3) Assemble in discovery order
    let mut b = TreeBuilder::from_config(cfg)?;
    for (w, p) in walked.iter().zip(prepared) {
        match (w, p) {
            (Walked::Folder(rel), _) => {
                b.add_folder(rel)?;
                if !silent {
                    log::info!("appended folder {}", rel);
                }
            }
            (Walked::File(rel, src), Some(p)) => {
                let (size, stored, compressed) = (p.raw_size, p.bytes.len(), p.compressed);
                b.add_prepared(rel, p)?;
                if !silent {
                    if compressed {
                        log::info!(
                            "appended file {} ({} bytes) as /{}, compressed/original={:.0}%",
                            src.display(),
                            size,
                            rel,
                            stored as f64 / size as f64 * 100.0
                        );
                    } else {
                        log::info!("appended file {} ({} bytes) as /{}", src.display(), size, rel);
                    }
                }
            }
            (Walked::File(rel, _), None) => {
                return Err(FsError::InvalidArgument(format!("file {rel} was not prepared")));
            }
        }
    }
    let built_unix = chrono::Utc::now().timestamp();
    let (image, report) = b.finish(&cfg.target, built_unix)?;
    if !silent {
        log::info!(
            "sum of file sizes {} bytes, {} files {} folders",
            report.total_size,
            report.files,
            report.folders
        );
        if cfg.compress && report.total_size > 0 {
            log::info!(
                "sum of compressed sizes {}, compressed/original={:.1}%",
                report.total_stored,
                report.ratio_pct()
            );
        }
    }
    Ok((image, report))
}
