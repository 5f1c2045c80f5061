//! DAG node types
//!
//! Three node kinds make up an imported tree:
//! - raw leaves hold chunk bytes verbatim (codec `Raw`, no encoding)
//! - file nodes hold ordered links to the chunks/subtrees of one file
//! - directory nodes hold named links to files and subdirectories
//!
//! File and directory nodes are encoded with bincode; the encoding is the
//! canonical form their addresses are computed over.

use crate::model::{Address, Block, Codec};
use crate::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A link to a child node together with the byte size of its subtree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub address: Address,
    pub size: u64,
}

impl Link {
    pub fn new(address: Address, size: u64) -> Self {
        Link { address, size }
    }
}

/// Internal node of a file DAG
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Children in stream order
    pub links: Vec<Link>,
}

impl FileNode {
    pub fn new(links: Vec<Link>) -> Self {
        FileNode { links }
    }

    /// Total file bytes below this node
    pub fn total_size(&self) -> u64 {
        self.links.iter().map(|l| l.size).sum()
    }

    /// Encode into a block
    pub fn to_block(&self) -> Result<Block> {
        let data = bincode::serialize(self)?;
        Ok(Block::new(Codec::File, data))
    }
}

/// A named directory entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub link: Link,
}

/// Directory node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirNode {
    /// Entries in walk order
    pub entries: Vec<DirEntry>,
}

impl DirNode {
    pub fn new(entries: Vec<DirEntry>) -> Self {
        DirNode { entries }
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.link.size).sum()
    }

    pub fn to_block(&self) -> Result<Block> {
        let data = bincode::serialize(self)?;
        Ok(Block::new(Codec::Directory, data))
    }
}

/// A decoded node
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Leaf(Bytes),
    File(FileNode),
    Directory(DirNode),
}

impl Node {
    /// Decode a block according to its address codec
    pub fn decode(block: &Block) -> Result<Self> {
        match block.address().codec() {
            Codec::Raw => Ok(Node::Leaf(block.data().clone())),
            Codec::File => Ok(Node::File(bincode::deserialize(block.data())?)),
            Codec::Directory => Ok(Node::Directory(bincode::deserialize(block.data())?)),
        }
    }

    /// Addresses this node links to, in link order
    pub fn child_addresses(&self) -> Vec<Address> {
        match self {
            Node::Leaf(_) => Vec::new(),
            Node::File(file) => file.links.iter().map(|l| l.address).collect(),
            Node::Directory(dir) => dir.entries.iter().map(|e| e.link.address).collect(),
        }
    }

    /// Content bytes below this node
    pub fn total_size(&self) -> u64 {
        match self {
            Node::Leaf(data) => data.len() as u64,
            Node::File(file) => file.total_size(),
            Node::Directory(dir) => dir.total_size(),
        }
    }
}

/// Check a directory entry name is a single, safe path component
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::Corruption(format!(
            "invalid directory entry name {:?}",
            name
        )));
    }
    Ok(())
}
