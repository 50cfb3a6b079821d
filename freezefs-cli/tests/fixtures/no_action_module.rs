// Generated by freezefs 0.3.0. Do not edit.
// image format v1, frozen 2026/01/02 03:04:05, 1 files, 0 folders

use freezefs_core::deploy::Overwrite;
use freezefs_core::{FrozenModule, OnImport, Vfs};

pub const TARGET: &str = "/demo";

pub static IMAGE: &[u8] = &[
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11,
];

pub static FROZEN: FrozenModule = FrozenModule::new(IMAGE, TARGET, OnImport::NoAction, Overwrite::Never, true);

/// Run the on-import action configured at build time (once per process).
pub fn on_load(vfs: &Vfs) -> freezefs_core::FsResult<()> {
    FROZEN.on_load(vfs)
}
