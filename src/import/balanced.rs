//! Balanced file DAG builder
//!
//! Leaves are filled strictly left to right. Each tree level keeps one open
//! node; once it holds `max_links` children it is sealed and its link moves
//! one level up. At the end of the stream the open nodes are sealed bottom
//! up. A file that fits in one chunk is its own root.

use crate::cancel::CancelToken;
use crate::import::chunker::Chunker;
use crate::import::staging::StagingTree;
use crate::model::{Block, FileNode, Link};
use crate::Result;
use bytes::Bytes;
use std::io::Read;
use tracing::trace;

pub struct BalancedBuilder<'s, 'a> {
    staging: &'s mut StagingTree<'a>,
    max_links: usize,
    /// Open node per level, level 0 holds leaves
    levels: Vec<Vec<Link>>,
    chunks: u64,
}

impl<'s, 'a> BalancedBuilder<'s, 'a> {
    pub fn new(staging: &'s mut StagingTree<'a>, max_links: usize) -> Self {
        BalancedBuilder {
            staging,
            max_links: max_links.max(2),
            levels: vec![Vec::new()],
            chunks: 0,
        }
    }

    /// Append the next chunk of the stream
    pub fn push_chunk(&mut self, chunk: Bytes) -> Result<()> {
        let size = chunk.len() as u64;
        let block = Block::raw(chunk);
        let link = Link::new(*block.address(), size);
        self.staging.stage(block)?;
        self.chunks += 1;
        self.push_link(0, link)
    }

    fn push_link(&mut self, mut level: usize, mut link: Link) -> Result<()> {
        loop {
            if level == self.levels.len() {
                self.levels.push(Vec::new());
            }
            self.levels[level].push(link);
            if self.levels[level].len() < self.max_links {
                return Ok(());
            }
            let full = std::mem::take(&mut self.levels[level]);
            link = self.seal(full)?;
            trace!(level, address = %link.address.short(), "sealed full node");
            level += 1;
        }
    }

    fn seal(&mut self, links: Vec<Link>) -> Result<Link> {
        let node = FileNode::new(links);
        let block = node.to_block()?;
        let link = Link::new(*block.address(), node.total_size());
        self.staging.stage(block)?;
        Ok(link)
    }

    /// Seal every open node and return the root link
    pub fn finish(mut self) -> Result<Link> {
        if self.chunks == 0 {
            let block = Block::raw(Bytes::new());
            let link = Link::new(*block.address(), 0);
            self.staging.stage(block)?;
            return Ok(link);
        }

        let mut level = 0;
        loop {
            let top = level + 1 == self.levels.len();
            let links = std::mem::take(&mut self.levels[level]);
            if top {
                return match links.len() {
                    1 => Ok(links[0]),
                    _ => self.seal(links),
                };
            }
            if !links.is_empty() {
                let link = self.seal(links)?;
                self.push_link(level + 1, link)?;
            }
            level += 1;
        }
    }
}

/// Chunk `reader` and build its DAG, returning the root link
pub fn build_file<R: Read>(
    reader: R,
    chunk_size: usize,
    max_links: usize,
    staging: &mut StagingTree<'_>,
    cancel: &CancelToken,
) -> Result<Link> {
    let mut builder = BalancedBuilder::new(staging, max_links);
    for chunk in Chunker::new(reader, chunk_size) {
        cancel.check()?;
        builder.push_chunk(chunk?)?;
    }
    cancel.check()?;
    builder.finish()
}
