//! Export: rebuild files and directories from a root address

use crate::cancel::CancelToken;
use crate::model::{validate_entry_name, Address, DirNode, Node};
use crate::store::BlockStore;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Reads DAGs back out of a block store
#[derive(Clone)]
pub struct Exporter {
    store: BlockStore,
}

impl Exporter {
    pub fn new(store: BlockStore) -> Self {
        Exporter { store }
    }

    fn fetch(&self, address: &Address) -> Result<Node> {
        Node::decode(&self.store.get(address)?)
    }

    /// Write the tree rooted at `root` to `dest`.
    ///
    /// A file root becomes the file `dest`; a directory root becomes the
    /// directory `dest` with its entries below it.
    pub fn export(&self, root: &Address, dest: &Path, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        match self.fetch(root)? {
            Node::Directory(dir) => self.export_dir(dir, dest, cancel)?,
            node => {
                if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                self.export_file(node, dest, cancel)?;
            }
        }
        info!(root = %root, dest = %dest.display(), "export finished");
        Ok(())
    }

    fn export_dir(&self, dir: DirNode, dest: &Path, cancel: &CancelToken) -> Result<()> {
        fs::create_dir_all(dest)?;
        for entry in dir.entries {
            cancel.check()?;
            validate_entry_name(&entry.name)?;
            let target = dest.join(&entry.name);
            match self.fetch(&entry.link.address)? {
                Node::Directory(sub) => self.export_dir(sub, &target, cancel)?,
                node => self.export_file(node, &target, cancel)?,
            }
        }
        debug!(dest = %dest.display(), "exported directory");
        Ok(())
    }

    fn export_file(&self, node: Node, dest: &Path, cancel: &CancelToken) -> Result<()> {
        let mut writer = BufWriter::new(File::create(dest)?);
        self.write_node(node, &mut writer, cancel)?;
        writer.flush()?;
        Ok(())
    }

    /// Stream the file DAG at `address` into `writer`, returning bytes written
    pub fn write_to<W: Write>(
        &self,
        address: &Address,
        writer: &mut W,
        cancel: &CancelToken,
    ) -> Result<u64> {
        cancel.check()?;
        let node = self.fetch(address)?;
        self.write_node(node, writer, cancel)
    }

    fn write_node<W: Write>(&self, node: Node, writer: &mut W, cancel: &CancelToken) -> Result<u64> {
        match node {
            Node::Leaf(data) => {
                writer.write_all(&data)?;
                Ok(data.len() as u64)
            }
            Node::File(file) => {
                let mut written = 0;
                for link in &file.links {
                    written += self.write_to(&link.address, writer, cancel)?;
                }
                if written != file.total_size() {
                    return Err(Error::Corruption(format!(
                        "file node declares {} bytes, children hold {}",
                        file.total_size(),
                        written
                    )));
                }
                Ok(written)
            }
            Node::Directory(_) => Err(Error::InvalidInput(
                "cannot stream a directory as a file".to_string(),
            )),
        }
    }
}
