use std::fmt;
use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::format::{self, Header, IndexLimits, FLAG_COMPRESSED};
use crate::tree::{FileMeta, TreeIndex};

/// Anything that can hand out the image bytes: a `&'static [u8]` compiled into
/// the program, a `Vec<u8>`, or a memory map.
pub type ImageBytes = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// A parsed image: header and tree index decoded, payload left in place.
/// File content is sliced out of the backing bytes on demand, never copied.
pub struct Image {
    bytes: ImageBytes,
    header: Header,
    tree: TreeIndex,
    payload_start: usize,
}

/// Identity used to decide whether two mounts refer to the same image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageId {
    pub index_crc: u32,
    pub payload_crc: u32,
    pub payload_len: u64,
    pub built_unix: i64,
}

impl Image {
    pub fn from_static(bytes: &'static [u8]) -> FsResult<Arc<Image>> {
        Self::parse(Arc::new(bytes), &IndexLimits::default())
    }

    pub fn from_vec(bytes: Vec<u8>) -> FsResult<Arc<Image>> {
        Self::parse(Arc::new(bytes), &IndexLimits::default())
    }

    /// Parse header and index. Fails with `CorruptImage` on any structural
    /// mismatch; the payload itself is only bounds-checked.
    pub fn parse(bytes: ImageBytes, limits: &IndexLimits) -> FsResult<Arc<Image>> {
        let data: &[u8] = (*bytes).as_ref();
        let header = format::read_header(data)?;
        let index = format::index_bytes(data, &header)?;
        let tree = format::decode_index(index, header.payload_len, limits)?;
        let payload_start = format::payload_start(&header);
        log::debug!(
            "image v{} parsed: {} entries, {} payload bytes",
            header.version,
            tree.entry_count(),
            header.payload_len
        );
        Ok(Arc::new(Image { bytes, header, tree, payload_start }))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn tree(&self) -> &TreeIndex {
        &self.tree
    }

    /// Mount point / deploy target recorded at build time.
    pub fn target(&self) -> &str {
        &self.header.target
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn built_unix(&self) -> i64 {
        self.header.built_unix
    }

    pub fn has_compressed_files(&self) -> bool {
        self.header.flags & FLAG_COMPRESSED != 0
    }

    /// Build time rendered as local `YYYY/MM/DD HH:MM:SS`.
    pub fn date_frozen(&self) -> String {
        match chrono::DateTime::from_timestamp(self.header.built_unix, 0) {
            Some(t) => t.with_timezone(&chrono::Local).format("%Y/%m/%d %H:%M:%S").to_string(),
            None => String::from("unknown"),
        }
    }

    pub fn id(&self) -> ImageId {
        ImageId {
            index_crc: self.header.index_crc,
            payload_crc: self.header.payload_crc,
            payload_len: self.header.payload_len,
            built_unix: self.header.built_unix,
        }
    }

    pub fn payload(&self) -> &[u8] {
        let data: &[u8] = (*self.bytes).as_ref();
        &data[self.payload_start..self.payload_start + self.header.payload_len as usize]
    }

    /// The bytes stored for a file, compressed or not.
    pub fn stored(&self, meta: &FileMeta) -> &[u8] {
        let start = meta.offset as usize;
        &self.payload()[start..start + meta.stored_size as usize]
    }

    /// Full payload checksum. Not done on load since it touches every byte.
    pub fn verify_payload(&self) -> FsResult<()> {
        if format::crc32(self.payload()) != self.header.payload_crc {
            return Err(FsError::CorruptImage("payload CRC mismatch".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("header", &self.header)
            .field("entries", &self.tree.entry_count())
            .finish()
    }
}
