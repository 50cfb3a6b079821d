use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use freezefs_core::builder::{self, BuildConfig, BuildReport};
use freezefs_core::deploy::{self, DeployOptions, Overwrite};
use freezefs_core::format::IndexLimits;
use freezefs_core::paths;
use freezefs_core::vfs::EntryType;
use freezefs_core::{FileSystem, FrozenFs, Image, OnImport};

mod codegen;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnImportArg {
    Mount,
    Deploy,
    NoAction,
}

impl From<OnImportArg> for OnImport {
    fn from(a: OnImportArg) -> Self {
        match a {
            OnImportArg::Mount => OnImport::Mount,
            OnImportArg::Deploy => OnImport::Deploy,
            OnImportArg::NoAction => OnImport::NoAction,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OverwriteArg {
    Never,
    Always,
}

impl From<OverwriteArg> for Overwrite {
    fn from(a: OverwriteArg) -> Self {
        match a {
            OverwriteArg::Never => Overwrite::Never,
            OverwriteArg::Always => Overwrite::Always,
        }
    }
}

#[derive(Parser)]
#[command(name = "freezefs", version, about = "Freeze a folder tree into an embeddable read-only image")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Freeze a folder into a Rust module embedding the image
    Build {
        infolder: PathBuf,
        outfile: PathBuf,
        /// Mount point or deploy folder (default: "/" + name of infolder)
        #[arg(long)]
        target: Option<String>,
        #[arg(long, value_enum, default_value_t = OnImportArg::Mount)]
        on_import: OnImportArg,
        #[arg(long, value_enum, default_value_t = OverwriteArg::Never)]
        overwrite: OverwriteArg,
        #[arg(long, default_value_t = false)]
        compress: bool,
        #[arg(long, value_parser = clap::value_parser!(u8).range(9..=14), default_value_t = 10)]
        wbits: u8,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9), default_value_t = 9)]
        level: u8,
        #[arg(long, default_value_t = false)]
        silent: bool,
        #[arg(long, default_value_t = false)]
        follow_symlinks: bool,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        /// Also write the raw image here
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Print a JSON summary of a raw image
    Inspect { image: PathBuf },
    /// List a folder inside a raw image
    Ls {
        image: PathBuf,
        #[arg(default_value = "/")]
        path: String,
        #[arg(short, long, default_value_t = false)]
        recursive: bool,
    },
    /// Write one file of a raw image to stdout
    Cat { image: PathBuf, path: String },
    /// Copy the contents of a raw image into a folder
    Extract {
        image: PathBuf,
        dir: PathBuf,
        #[arg(long, value_enum, default_value_t = OverwriteArg::Never)]
        overwrite: OverwriteArg,
        #[arg(long, default_value_t = false)]
        silent: bool,
    },
}

fn init_logging(silent: bool) {
    let level = if silent { "warn" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Build {
            infolder,
            outfile,
            target,
            on_import,
            overwrite,
            compress,
            wbits,
            level,
            silent,
            follow_symlinks,
            include,
            exclude,
            image,
        } => {
            init_logging(silent);
            let cfg = BuildConfig {
                compress,
                window_bits: wbits,
                level,
                target: target.unwrap_or_default(),
                follow_symlinks,
                include,
                exclude,
            };
            build(&infolder, &outfile, cfg, on_import.into(), overwrite.into(), silent, image.as_deref())?;
        }
        Cmd::Inspect { image } => {
            init_logging(true);
            inspect(&image)?
        }
        Cmd::Ls { image, path, recursive } => {
            init_logging(true);
            ls(&image, &path, recursive)?
        }
        Cmd::Cat { image, path } => {
            init_logging(true);
            cat(&image, &path)?
        }
        Cmd::Extract { image, dir, overwrite, silent } => {
            init_logging(silent);
            extract(&image, &dir, overwrite.into(), silent)?
        }
    }
    Ok(())
}

/// Check the build arguments the way they interact with each other.
fn check_build_args(infolder: &Path, outfile: &Path, cfg: &mut BuildConfig) -> Result<()> {
    if !infolder.is_dir() {
        bail!("input folder {} does not exist or is not a folder", infolder.display());
    }
    if outfile.extension().and_then(|e| e.to_str()) != Some("rs") {
        bail!("output file {} must have the .rs extension", outfile.display());
    }
    if cfg.target.is_empty() {
        let canonical = fs::canonicalize(infolder).with_context(|| format!("resolve {}", infolder.display()))?;
        let name = canonical
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("cannot derive a target from {}", infolder.display()))?;
        cfg.target = format!("/{name}");
    }
    paths::validate_target(&cfg.target).map_err(|e| anyhow!("target {:?}: {}", cfg.target, e))?;
    let target_name = cfg.target.rsplit('/').next().unwrap_or("");
    let stem = outfile.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    if !target_name.is_empty() && target_name == stem {
        bail!(
            "target name {:?} must differ from the output module name {:?}; rename the output file or pass --target",
            target_name,
            stem
        );
    }
    Ok(())
}

fn build(
    infolder: &Path,
    outfile: &Path,
    mut cfg: BuildConfig,
    on_import: OnImport,
    overwrite: Overwrite,
    silent: bool,
    raw_image: Option<&Path>,
) -> Result<()> {
    check_build_args(infolder, outfile, &mut cfg)?;
    let (image, report) =
        builder::build_dir(infolder, &cfg, silent).with_context(|| format!("freeze {}", infolder.display()))?;
    let settings = codegen::ModuleSettings {
        target: &cfg.target,
        on_import,
        overwrite,
        silent,
        version: report.version,
        date_frozen: &report.date_frozen,
        files: report.files,
        folders: report.folders,
    };
    let src = codegen::render_module(&image, &settings);
    fs::write(outfile, src).with_context(|| format!("write {}", outfile.display()))?;
    if let Some(p) = raw_image {
        fs::write(p, &image).with_context(|| format!("write {}", p.display()))?;
    }
    if !silent {
        log::info!(
            "{} written ({} image bytes, target {}, on import: {})",
            outfile.display(),
            image.len(),
            cfg.target,
            on_import.as_str()
        );
    }
    Ok(())
}

fn open_image(path: &Path) -> Result<Arc<Image>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mm = unsafe { Mmap::map(&f)? };
    Image::parse(Arc::new(mm), &IndexLimits::default()).with_context(|| format!("parse {}", path.display()))
}

fn inspect(path: &Path) -> Result<()> {
    let image = open_image(path)?;
    let report = BuildReport::from_tree(image.tree(), image.target(), image.built_unix());
    let h = image.header();
    let summary = serde_json::json!({
        "version": h.version,
        "target": h.target,
        "date_frozen": image.date_frozen(),
        "compressed_files": image.has_compressed_files(),
        "index_len": h.index_len,
        "index_crc": h.index_crc,
        "payload_len": h.payload_len,
        "payload_ok": image.verify_payload().is_ok(),
        "report": report,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn ls(path: &Path, inner: &str, recursive: bool) -> Result<()> {
    let fs = FrozenFs::new(open_image(path)?);
    let mut stack = vec![inner.trim_end_matches('/').to_string()];
    while let Some(dir) = stack.pop() {
        let entries: Vec<_> = fs.ilistdir(&dir).with_context(|| format!("list {:?}", dir))?.collect();
        for e in entries.iter() {
            let full = format!("{}/{}", dir, e.name);
            match e.kind {
                EntryType::Dir => println!("{:>10}  {}/", "-", full.trim_start_matches('/')),
                EntryType::File => println!("{:>10}  {}", e.size, full.trim_start_matches('/')),
            }
        }
        if recursive {
            // reverse so siblings come out in image order
            for e in entries.iter().rev().filter(|e| e.kind == EntryType::Dir) {
                stack.push(format!("{}/{}", dir, e.name));
            }
        }
    }
    Ok(())
}

fn cat(path: &Path, inner: &str) -> Result<()> {
    let fs = FrozenFs::new(open_image(path)?);
    let mut f = fs
        .open(inner, "rb")
        .with_context(|| format!("open {inner}"))?
        .into_binary()
        .ok_or_else(|| anyhow!("{inner} did not open in binary mode"))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut f, &mut out)?;
    out.flush()?;
    Ok(())
}

fn extract(path: &Path, dir: &Path, overwrite: Overwrite, silent: bool) -> Result<()> {
    let image = open_image(path)?;
    let opts = DeployOptions { overwrite, silent, ..Default::default() };
    let report = deploy::extract(&image, dir, &opts).with_context(|| format!("extract into {}", dir.display()))?;
    if !silent {
        log::info!("{} files extracted, {} skipped", report.copied, report.skipped);
    }
    Ok(())
}
