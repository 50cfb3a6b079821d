//! Runtime side of a generated image module: the image bytes compiled into a
//! program plus the action to take on first load.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::deploy::{self, DeployOptions, DeployReport, Overwrite};
use crate::error::{FsError, FsResult};
use crate::fs::FrozenFs;
use crate::image::Image;
use crate::vfs::Vfs;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnImport {
    Mount,
    Deploy,
    NoAction,
}

impl OnImport {
    pub fn as_str(self) -> &'static str {
        match self {
            OnImport::Mount => "mount",
            OnImport::Deploy => "deploy",
            OnImport::NoAction => "no-action",
        }
    }
}

impl FromStr for OnImport {
    type Err = FsError;

    fn from_str(s: &str) -> FsResult<Self> {
        match s {
            "mount" => Ok(OnImport::Mount),
            "deploy" => Ok(OnImport::Deploy),
            "no-action" => Ok(OnImport::NoAction),
            other => Err(FsError::InvalidArgument(format!("on-import action {other:?}"))),
        }
    }
}

/// A frozen image embedded in a program, typically declared as a `static` by
/// generated code.
pub struct FrozenModule {
    bytes: &'static [u8],
    target: &'static str,
    on_import: OnImport,
    overwrite: Overwrite,
    silent: bool,
    loaded: AtomicBool,
    image: OnceLock<Arc<Image>>,
}

impl FrozenModule {
    pub const fn new(
        bytes: &'static [u8],
        target: &'static str,
        on_import: OnImport,
        overwrite: Overwrite,
        silent: bool,
    ) -> Self {
        Self {
            bytes,
            target,
            on_import,
            overwrite,
            silent,
            loaded: AtomicBool::new(false),
            image: OnceLock::new(),
        }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn on_import(&self) -> OnImport {
        self.on_import
    }

    /// Parsed image, decoded on first use and shared afterwards.
    pub fn image(&self) -> FsResult<Arc<Image>> {
        if let Some(img) = self.image.get() {
            return Ok(img.clone());
        }
        let img = Image::from_static(self.bytes)?;
        Ok(self.image.get_or_init(|| img).clone())
    }

    /// Mount at `mount_point`, or at the build-time target when `None`.
    pub fn mount(&self, vfs: &Vfs, mount_point: Option<&str>, silent: bool) -> FsResult<()> {
        let at = mount_point.unwrap_or(self.target);
        vfs.mount(Arc::new(FrozenFs::new(self.image()?)), at)?;
        if !silent {
            log::info!("frozen files mounted at {}", at);
        }
        Ok(())
    }

    /// Unmount this image. Another filesystem at the same point is left in
    /// place and reported as `NotMounted`.
    pub fn umount(&self, vfs: &Vfs, mount_point: Option<&str>, silent: bool) -> FsResult<()> {
        let at = mount_point.unwrap_or(self.target);
        vfs.umount_image(at, self.image()?.id())?;
        if !silent {
            log::info!("frozen files unmounted from {}", at);
        }
        Ok(())
    }

    /// Copy the files out, honoring the build-time overwrite policy.
    pub fn deploy(&self, target: Option<&Path>, silent: bool) -> FsResult<DeployReport> {
        let target = target.unwrap_or_else(|| Path::new(self.target));
        let opts = DeployOptions { overwrite: self.overwrite, silent, ..Default::default() };
        deploy::deploy(&self.image()?, target, &opts)
    }

    pub fn version(&self) -> FsResult<u32> {
        Ok(self.image()?.version())
    }

    pub fn date_frozen(&self) -> FsResult<String> {
        Ok(self.image()?.date_frozen())
    }

    /// Run the configured on-import action. Only the first call in a process
    /// does anything; later calls return `Ok(())` straight away.
    pub fn on_load(&self, vfs: &Vfs) -> FsResult<()> {
        if self.loaded.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.on_import {
            OnImport::Mount => self.mount(vfs, None, self.silent),
            OnImport::Deploy => self.deploy(None, self.silent).map(|_| ()),
            OnImport::NoAction => Ok(()),
        }
    }
}
