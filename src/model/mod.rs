//! Core data model types for blockrepo

mod address;
mod block;
mod node;

pub use address::{Address, Codec, ADDRESS_LEN};
pub use block::Block;
pub use node::{validate_entry_name, DirEntry, DirNode, FileNode, Link, Node};
