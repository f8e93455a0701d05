//! File-tree model describing a project to mount into the sandbox.
//!
//! The wire shape matches the manifest provider payload: every entry is
//! tagged either `file` (with `contents`) or `directory` (a mapping from
//! child name to child node), and the root is an untagged directory map.
//!
//! ```json
//! {
//!   "package.json": { "file": { "contents": "{}" } },
//!   "src": { "directory": { "main.jsx": { "file": { "contents": "" } } } }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// File payload, either UTF-8 text or raw bytes (a JSON number array).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContents {
    /// Text contents.
    Text(String),
    /// Raw byte contents.
    Binary(Vec<u8>),
}

impl FileContents {
    /// Borrow the contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Number of content bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for FileContents {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FileContents {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for FileContents {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

/// A single node of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTreeNode {
    /// Regular file.
    File {
        /// File payload.
        contents: FileContents,
    },
    /// Directory with uniquely named children.
    Directory(BTreeMap<String, FileTreeNode>),
}

impl FileTreeNode {
    /// Build a file node.
    #[must_use]
    pub fn file(contents: impl Into<FileContents>) -> Self {
        Self::File {
            contents: contents.into(),
        }
    }

    /// Build a directory node from `(name, node)` pairs.
    #[must_use]
    pub fn directory<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, FileTreeNode)>,
        S: Into<String>,
    {
        Self::Directory(
            children
                .into_iter()
                .map(|(name, node)| (name.into(), node))
                .collect(),
        )
    }
}

/// One entry produced by [`FileTree::entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTreeEntry<'a> {
    /// A directory that must exist before its children are written.
    Directory,
    /// A file with its payload.
    File(&'a FileContents),
}

/// Root directory of a project manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTree(BTreeMap<String, FileTreeNode>);

impl FileTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a top-level entry, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, node: FileTreeNode) -> Self {
        self.0.insert(name.into(), node);
        self
    }

    /// Insert (or replace) a top-level entry.
    pub fn insert(&mut self, name: impl Into<String>, node: FileTreeNode) {
        self.0.insert(name.into(), node);
    }

    /// Top-level entries keyed by name.
    #[must_use]
    pub fn root(&self) -> &BTreeMap<String, FileTreeNode> {
        &self.0
    }

    /// Whether the tree has no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of file nodes anywhere in the tree.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.entries()
            .iter()
            .filter(|(_, entry)| matches!(entry, FileTreeEntry::File(_)))
            .count()
    }

    /// Flatten the tree into relative paths, parents before children.
    #[must_use]
    pub fn entries(&self) -> Vec<(PathBuf, FileTreeEntry<'_>)> {
        let mut out = Vec::new();
        collect_entries(&self.0, Path::new(""), &mut out);
        out
    }

    /// Check that every entry name is a single, non-traversing path segment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Parse` naming the first offending path.
    pub fn validate(&self) -> Result<()> {
        validate_children(&self.0, Path::new(""))
    }
}

fn collect_entries<'a>(
    children: &'a BTreeMap<String, FileTreeNode>,
    prefix: &Path,
    out: &mut Vec<(PathBuf, FileTreeEntry<'a>)>,
) {
    for (name, node) in children {
        let path = prefix.join(name);
        match node {
            FileTreeNode::File { contents } => out.push((path, FileTreeEntry::File(contents))),
            FileTreeNode::Directory(grandchildren) => {
                out.push((path.clone(), FileTreeEntry::Directory));
                collect_entries(grandchildren, &path, out);
            }
        }
    }
}

fn validate_children(children: &BTreeMap<String, FileTreeNode>, prefix: &Path) -> Result<()> {
    for (name, node) in children {
        if !is_valid_segment(name) {
            return Err(AppError::Parse(format!(
                "invalid entry name {name:?} under {:?}",
                prefix.display().to_string()
            )));
        }
        if let FileTreeNode::Directory(grandchildren) = node {
            validate_children(grandchildren, &prefix.join(name))?;
        }
    }
    Ok(())
}

fn is_valid_segment(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
