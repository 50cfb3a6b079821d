use crate::error::{FsError, FsResult};
use crate::paths;

/// Arena index of a tree entry. The root folder is always `ROOT`.
pub type NodeId = usize;

pub const ROOT: NodeId = 0;

/// Storage facts for a frozen file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileMeta {
    /// Decompressed length; what `stat` reports.
    pub raw_size: u64,
    /// Bytes embedded in the payload section.
    pub stored_size: u64,
    pub compressed: bool,
    pub window_bits: u8,
    pub level: u8,
    /// Offset of the stored bytes within the payload section.
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub enum NodeData {
    Folder { children: Vec<NodeId> },
    File(FileMeta),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    /// Back-reference for navigation only.
    pub parent: Option<NodeId>,
    pub data: NodeData,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.data, NodeData::Folder { .. })
    }

    pub fn file(&self) -> Option<&FileMeta> {
        match &self.data {
            NodeData::File(m) => Some(m),
            NodeData::Folder { .. } => None,
        }
    }

    pub fn raw_size(&self) -> u64 {
        self.file().map(|m| m.raw_size).unwrap_or(0)
    }
}

/// The frozen folder hierarchy. Children keep insertion order; lookups scan
/// the ordered child list rather than hashing so listings match build order.
#[derive(Clone, Debug)]
pub struct TreeIndex {
    nodes: Vec<Node>,
    total_raw: u64,
    files: usize,
}

impl Default for TreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeIndex {
    /// A tree holding only the (unnamed) root folder.
    pub fn new() -> Self {
        let root = Node { name: String::new(), parent: None, data: NodeData::Folder { children: Vec::new() } };
        Self { nodes: vec![root], total_raw: 0, files: 0 }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Number of files and folders, root excluded.
    pub fn entry_count(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn file_count(&self) -> usize {
        self.files
    }

    /// Sum of all decompressed file sizes.
    pub fn total_raw_size(&self) -> u64 {
        self.total_raw
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id].data {
            NodeData::Folder { children } => children,
            NodeData::File(_) => &[],
        }
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent).iter().copied().find(|&c| self.nodes[c].name == name)
    }

    /// Walk from the root following `path` segment by segment.
    pub fn resolve(&self, path: &str) -> FsResult<NodeId> {
        let mut cur = ROOT;
        for seg in paths::normalize(path)? {
            if !self.nodes[cur].is_dir() {
                return Err(FsError::NotADirectory(path.to_string()));
            }
            cur = self.child(cur, seg).ok_or_else(|| FsError::NotFound(path.to_string()))?;
        }
        Ok(cur)
    }

    /// Absolute in-image path of `id` ("/" for the root).
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segs = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n != ROOT {
                segs.push(self.nodes[n].name.as_str());
            }
            cur = self.nodes[n].parent;
        }
        segs.reverse();
        paths::to_absolute(&segs)
    }

    /// Pre-order walk over every entry below the root. Parents come before
    /// their children, siblings in insertion order.
    pub fn walk(&self) -> Walk<'_> {
        let mut stack: Vec<NodeId> = self.children(ROOT).to_vec();
        stack.reverse();
        Walk { tree: self, stack }
    }

    pub(crate) fn add_folder(&mut self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        self.attach(parent, name, NodeData::Folder { children: Vec::new() })
    }

    pub(crate) fn add_file(&mut self, parent: NodeId, name: &str, meta: FileMeta) -> FsResult<NodeId> {
        let id = self.attach(parent, name, NodeData::File(meta))?;
        self.total_raw += meta.raw_size;
        self.files += 1;
        Ok(id)
    }

    fn attach(&mut self, parent: NodeId, name: &str, data: NodeData) -> FsResult<NodeId> {
        paths::validate_name(name)?;
        if self.child(parent, name).is_some() {
            return Err(FsError::AlreadyExists(format!("{}/{}", self.path_of(parent).trim_end_matches('/'), name)));
        }
        let id = self.nodes.len();
        match &mut self.nodes[parent].data {
            NodeData::Folder { children } => children.push(id),
            NodeData::File(_) => return Err(FsError::NotADirectory(self.path_of(parent))),
        }
        self.nodes.push(Node { name: name.to_string(), parent: Some(parent), data });
        Ok(id)
    }
}

pub struct Walk<'a> {
    tree: &'a TreeIndex,
    stack: Vec<NodeId>,
}

impl Iterator for Walk<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack.extend(self.tree.children(id).iter().rev());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: u64) -> FileMeta {
        FileMeta { raw_size: size, stored_size: size, compressed: false, window_bits: 0, level: 0, offset: 0 }
    }

    #[test]
    fn resolve_ignores_extra_separators() {
        let mut t = TreeIndex::new();
        let a = t.add_folder(ROOT, "a").unwrap();
        let b = t.add_file(a, "b", meta(3)).unwrap();
        assert_eq!(t.resolve("/a/b").unwrap(), b);
        assert_eq!(t.resolve("a/b/").unwrap(), b);
        assert_eq!(t.resolve("//a//b").unwrap(), b);
        assert_eq!(t.resolve("/").unwrap(), ROOT);
        assert!(matches!(t.resolve("/A/b"), Err(FsError::NotFound(_))));
        assert!(matches!(t.resolve("/a/b/c"), Err(FsError::NotADirectory(_))));
        assert_eq!(t.path_of(b), "/a/b");
    }

    #[test]
    fn walk_is_preorder_in_insertion_order() {
        let mut t = TreeIndex::new();
        let z = t.add_folder(ROOT, "z").unwrap();
        t.add_file(z, "y", meta(1)).unwrap();
        t.add_file(ROOT, "a", meta(2)).unwrap();
        let names: Vec<String> = t.walk().map(|id| t.path_of(id)).collect();
        assert_eq!(names, vec!["/z", "/z/y", "/a"]);
        assert_eq!(t.total_raw_size(), 3);
        assert_eq!(t.entry_count(), 3);
    }

    #[test]
    fn duplicate_sibling_rejected() {
        let mut t = TreeIndex::new();
        t.add_file(ROOT, "a", meta(1)).unwrap();
        assert!(matches!(t.add_folder(ROOT, "a"), Err(FsError::AlreadyExists(_))));
    }
}
