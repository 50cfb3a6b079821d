use crate::error::{FsError, FsResult};
use crate::tree::{FileMeta, NodeData, NodeId, TreeIndex, ROOT};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};

/// Image layout: fixed header, mount target hint, bincode index, payload.
/// Header: magic (8) + NUL (1) + version (u32 LE) + flags (u32 LE) + built_unix (i64 LE)
/// + target_len (u16 LE) + index_len (u32 LE) + index_crc (u32 LE) + payload_len (u64 LE)
/// + payload_crc (u32 LE)
pub const IMAGE_MAGIC: &[u8] = b"FREEZEFS"; // 8 bytes
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = IMAGE_MAGIC.len() + 1 + 4 + 4 + 8 + 2 + 4 + 4 + 8 + 4;

/// Header flag: at least one file in the payload is deflate-compressed.
pub const FLAG_COMPRESSED: u32 = 1;

/// One serialized tree entry. Records are laid out in pre-order; a folder's
/// `children` records follow it directly (recursively).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum EntryRecord {
    Folder {
        name: String,
        children: u32,
    },
    File {
        name: String,
        raw_size: u64,
        stored_size: u64,
        compressed: bool,
        window_bits: u8,
        level: u8,
        offset: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub flags: u32,
    pub built_unix: i64,
    pub target: String,
    pub index_len: u32,
    pub index_crc: u32,
    pub payload_len: u64,
    pub payload_crc: u32,
}

impl Header {
    /// Bytes taken by the fixed header plus the target hint.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.target.len()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct IndexLimits {
    pub max_index_bytes: usize,
    pub max_entries: usize,
}

impl Default for IndexLimits {
    fn default() -> Self {
        Self { max_index_bytes: 16 * 1024 * 1024, max_entries: 1_000_000 }
    }
}

fn corrupt(msg: impl Into<String>) -> FsError {
    FsError::CorruptImage(msg.into())
}

/// Serialize `tree` into its pre-order record list.
pub fn encode_index(tree: &TreeIndex) -> FsResult<Vec<u8>> {
    let mut records = Vec::with_capacity(tree.len());
    push_records(tree, ROOT, &mut records);
    bincode::serialize(&records).map_err(|e| FsError::InvalidArgument(format!("serialize index: {e}")))
}

fn push_records(tree: &TreeIndex, id: NodeId, out: &mut Vec<EntryRecord>) {
    let node = tree.node(id);
    match &node.data {
        NodeData::Folder { children } => {
            out.push(EntryRecord::Folder { name: node.name.clone(), children: children.len() as u32 });
            for &c in children {
                push_records(tree, c, out);
            }
        }
        NodeData::File(m) => out.push(EntryRecord::File {
            name: node.name.clone(),
            raw_size: m.raw_size,
            stored_size: m.stored_size,
            compressed: m.compressed,
            window_bits: m.window_bits,
            level: m.level,
            offset: m.offset,
        }),
    }
}

/// Decode and structurally validate an index. `payload_len` bounds every file's
/// stored range.
pub fn decode_index(bytes: &[u8], payload_len: u64, limits: &IndexLimits) -> FsResult<TreeIndex> {
    if bytes.len() > limits.max_index_bytes {
        return Err(corrupt(format!("index too large: {} bytes", bytes.len())));
    }
    let records: Vec<EntryRecord> =
        bincode::deserialize(bytes).map_err(|e| corrupt(format!("bincode index decode: {e}")))?;
    if records.len() > limits.max_entries {
        return Err(corrupt("too many index entries"));
    }
    let mut iter = records.into_iter();
    let mut pending = match iter.next() {
        Some(EntryRecord::Folder { name, children }) if name.is_empty() => children,
        _ => return Err(corrupt("index does not start with the root folder")),
    };

    let mut tree = TreeIndex::new();
    // (folder, children still expected)
    let mut stack: Vec<(NodeId, u32)> = Vec::new();
    let mut cur = ROOT;
    for rec in iter {
        while pending == 0 {
            let (parent, left) = stack.pop().ok_or_else(|| corrupt("trailing index records"))?;
            cur = parent;
            pending = left;
        }
        pending -= 1;
        match rec {
            EntryRecord::Folder { name, children } => {
                let id = tree.add_folder(cur, &name).map_err(|e| corrupt(e.to_string()))?;
                stack.push((cur, pending));
                cur = id;
                pending = children;
            }
            EntryRecord::File { name, raw_size, stored_size, compressed, window_bits, level, offset } => {
                let end = offset.checked_add(stored_size).ok_or_else(|| corrupt("payload range overflow"))?;
                if end > payload_len {
                    return Err(corrupt(format!("{name}: payload range {offset}..{end} beyond {payload_len}")));
                }
                if compressed {
                    if !(9..=15).contains(&window_bits) {
                        return Err(corrupt(format!("{name}: window bits {window_bits}")));
                    }
                    if stored_size > raw_size {
                        return Err(corrupt(format!("{name}: compressed size exceeds raw size")));
                    }
                } else if stored_size != raw_size {
                    return Err(corrupt(format!("{name}: stored size differs from raw size")));
                }
                let meta = FileMeta { raw_size, stored_size, compressed, window_bits, level, offset };
                tree.add_file(cur, &name, meta).map_err(|e| corrupt(e.to_string()))?;
            }
        }
    }
    if pending != 0 || stack.iter().any(|&(_, left)| left != 0) {
        return Err(corrupt("index truncated"));
    }
    Ok(tree)
}

/// Assemble a complete image from a tree and its payload section.
pub fn write_image(tree: &TreeIndex, payload: &[u8], target: &str, built_unix: i64) -> FsResult<Vec<u8>> {
    let index = encode_index(tree)?;
    let target_len = u16::try_from(target.len())
        .map_err(|_| FsError::InvalidArgument("target hint too long".to_string()))?;
    let index_len =
        u32::try_from(index.len()).map_err(|_| FsError::InvalidArgument("index too large".to_string()))?;
    let crc = crc32(&index);
    let any_compressed =
        tree.walk().any(|id| tree.node(id).file().map(|m| m.compressed).unwrap_or(false));
    let flags = if any_compressed { FLAG_COMPRESSED } else { 0 };

    let mut out = Vec::with_capacity(HEADER_LEN + target.len() + index.len() + payload.len());
    out.extend_from_slice(IMAGE_MAGIC);
    out.push(0);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&built_unix.to_le_bytes());
    out.extend_from_slice(&target_len.to_le_bytes());
    out.extend_from_slice(&index_len.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&crc32(payload).to_le_bytes());
    out.extend_from_slice(target.as_bytes());
    out.extend_from_slice(&index);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Parse the fixed header and target hint, checking magic, version and that the
/// declared sections fit in `bytes`.
pub fn read_header(bytes: &[u8]) -> FsResult<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(corrupt("too short"));
    }
    if &bytes[..IMAGE_MAGIC.len()] != IMAGE_MAGIC || bytes[IMAGE_MAGIC.len()] != 0 {
        return Err(corrupt("bad image magic"));
    }
    let base = IMAGE_MAGIC.len() + 1;
    let version = u32::from_le_bytes(field(bytes, base));
    let flags = u32::from_le_bytes(field(bytes, base + 4));
    let built_unix = i64::from_le_bytes(field(bytes, base + 8));
    let target_len = u16::from_le_bytes(field(bytes, base + 16)) as usize;
    let index_len = u32::from_le_bytes(field(bytes, base + 18));
    let index_crc = u32::from_le_bytes(field(bytes, base + 22));
    let payload_len = u64::from_le_bytes(field(bytes, base + 26));
    let payload_crc = u32::from_le_bytes(field(bytes, base + 34));

    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let needed = (HEADER_LEN as u64)
        .checked_add(target_len as u64)
        .and_then(|n| n.checked_add(index_len as u64))
        .and_then(|n| n.checked_add(payload_len))
        .ok_or_else(|| corrupt("section lengths overflow"))?;
    if (bytes.len() as u64) < needed {
        return Err(corrupt(format!("image truncated: {} of {} bytes", bytes.len(), needed)));
    }
    let target = std::str::from_utf8(&bytes[HEADER_LEN..HEADER_LEN + target_len])
        .map_err(|_| corrupt("target hint is not UTF-8"))?
        .to_string();
    Ok(Header { version, flags, built_unix, target, index_len, index_crc, payload_len, payload_crc })
}

pub(crate) fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(bytes);
    h.finalize()
}

fn field<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

/// Verify the index checksum and return the index slice.
pub fn index_bytes<'a>(bytes: &'a [u8], header: &Header) -> FsResult<&'a [u8]> {
    let start = header.encoded_len();
    let idx = &bytes[start..start + header.index_len as usize];
    if crc32(idx) != header.index_crc {
        return Err(corrupt("index CRC mismatch"));
    }
    Ok(idx)
}

/// Offset of the payload section from the start of the image.
pub fn payload_start(header: &Header) -> usize {
    header.encoded_len() + header.index_len as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (TreeIndex, Vec<u8>) {
        let mut t = TreeIndex::new();
        let sub = t.add_folder(ROOT, "sub").unwrap();
        let meta = FileMeta { raw_size: 2, stored_size: 2, compressed: false, window_bits: 0, level: 0, offset: 0 };
        t.add_file(sub, "x", meta).unwrap();
        t.add_file(ROOT, "y", FileMeta { offset: 2, ..meta }).unwrap();
        (t, b"abcd".to_vec())
    }

    #[test]
    fn header_fields_survive() {
        let (t, payload) = sample();
        let img = write_image(&t, &payload, "/fz", 1_700_000_000).unwrap();
        let h = read_header(&img).unwrap();
        assert_eq!(h.version, FORMAT_VERSION);
        assert_eq!(h.target, "/fz");
        assert_eq!(h.built_unix, 1_700_000_000);
        assert_eq!(h.payload_len, 4);
        assert_eq!(h.flags & FLAG_COMPRESSED, 0);
        let idx = index_bytes(&img, &h).unwrap();
        let back = decode_index(idx, h.payload_len, &IndexLimits::default()).unwrap();
        assert_eq!(back.path_of(back.resolve("/sub/x").unwrap()), "/sub/x");
        assert_eq!(&img[payload_start(&h)..], b"abcd");
    }

    #[test]
    fn version_mismatch_is_corrupt() {
        let (t, payload) = sample();
        let mut img = write_image(&t, &payload, "/fz", 0).unwrap();
        img[9] = 7;
        assert!(matches!(read_header(&img), Err(FsError::CorruptImage(_))));
    }

    #[test]
    fn truncated_child_count_is_corrupt() {
        let records = vec![
            EntryRecord::Folder { name: String::new(), children: 2 },
            EntryRecord::Folder { name: "a".into(), children: 0 },
        ];
        let bytes = bincode::serialize(&records).unwrap();
        assert!(matches!(decode_index(&bytes, 0, &IndexLimits::default()), Err(FsError::CorruptImage(_))));
    }

    #[test]
    fn payload_out_of_range_is_corrupt() {
        let records = vec![
            EntryRecord::Folder { name: String::new(), children: 1 },
            EntryRecord::File {
                name: "f".into(),
                raw_size: 10,
                stored_size: 10,
                compressed: false,
                window_bits: 0,
                level: 0,
                offset: 5,
            },
        ];
        let bytes = bincode::serialize(&records).unwrap();
        assert!(decode_index(&bytes, 12, &IndexLimits::default()).is_err());
        assert!(decode_index(&bytes, 15, &IndexLimits::default()).is_ok());
    }
}
