pub mod builder;
pub mod codec;
pub mod deploy;
pub mod error;
pub mod format;
pub mod fs;
pub mod image;
pub mod module;
pub mod paths;
pub mod stream;
pub mod text;
pub mod tree;
pub mod vfs;

pub use error::{FsError, FsResult};
pub use fs::{EngineConfig, FrozenFs};
pub use image::Image;
pub use module::{FrozenModule, OnImport};
pub use vfs::{FileSystem, OpenFile, Vfs};
