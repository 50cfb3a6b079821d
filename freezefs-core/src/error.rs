use std::io;

/// Errors surfaced by the image codec, the read-only engine and the deploy walk.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("mount point already in use: {0}")]
    AlreadyMounted(String),
    #[error("nothing mounted at {0}")]
    NotMounted(String),
    #[error("entry already exists: {0}")]
    AlreadyExists(String),
    #[error("name longer than {max} bytes: {name}")]
    NameTooLong { name: String, max: usize },
    #[error("corrupt image: {0}")]
    CorruptImage(String),
    #[error("decompression failed: {0}")]
    Decompress(String),
    #[error("invalid UTF-8 data at stream byte {0}")]
    InvalidData(u64),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("I/O operation on closed file")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type FsResult<T> = Result<T, FsError>;

// errno values as used by the dispatch layer of small embedded runtimes
pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EBADF: i32 = 9;
pub const EEXIST: i32 = 17;
pub const ENOTDIR: i32 = 20;
pub const EISDIR: i32 = 21;
pub const EINVAL: i32 = 22;
pub const ENAMETOOLONG: i32 = 36;
pub const EOPNOTSUPP: i32 = 95;

impl FsError {
    /// errno equivalent, for hosts that report failures as OS error numbers.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) | FsError::NotMounted(_) => ENOENT,
            FsError::NotADirectory(_) => ENOTDIR,
            FsError::IsADirectory(_) => EISDIR,
            FsError::PermissionDenied(_) => EPERM,
            FsError::InvalidArgument(_) | FsError::InvalidData(_) => EINVAL,
            FsError::AlreadyMounted(_) | FsError::AlreadyExists(_) => EEXIST,
            FsError::NameTooLong { .. } => ENAMETOOLONG,
            FsError::Unsupported(_) => EOPNOTSUPP,
            FsError::Closed => EBADF,
            FsError::CorruptImage(_) | FsError::Decompress(_) => EIO,
            FsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
        }
    }

    pub(crate) fn kind(&self) -> io::ErrorKind {
        match self {
            FsError::NotFound(_) | FsError::NotMounted(_) => io::ErrorKind::NotFound,
            FsError::PermissionDenied(_) => io::ErrorKind::PermissionDenied,
            FsError::AlreadyMounted(_) | FsError::AlreadyExists(_) => {
                io::ErrorKind::AlreadyExists
            }
            FsError::InvalidArgument(_) | FsError::NameTooLong { .. } => {
                io::ErrorKind::InvalidInput
            }
            FsError::InvalidData(_) | FsError::CorruptImage(_) | FsError::Decompress(_) => {
                io::ErrorKind::InvalidData
            }
            FsError::Unsupported(_) => io::ErrorKind::Unsupported,
            FsError::Io(e) => e.kind(),
            _ => io::ErrorKind::Other,
        }
    }
}

impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Io(inner) => inner,
            other => io::Error::new(other.kind(), other),
        }
    }
}
