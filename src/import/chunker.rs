//! Fixed-size chunking of byte streams

use crate::Result;
use bytes::Bytes;
use std::io::{ErrorKind, Read};

/// Splits a reader into chunks of exactly `chunk_size` bytes, except
/// possibly the last one.
///
/// The iterator is fused: after the end of the stream or the first error it
/// only yields `None`.
pub struct Chunker<R> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> Chunker<R> {
    /// `chunk_size` must be positive; callers validate it up front
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Chunker {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    /// Fill `buf` as far as the reader allows, returning the bytes read
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = vec![0u8; self.chunk_size];
        match self.fill(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                if n < self.chunk_size {
                    self.done = true;
                }
                buf.truncate(n);
                Some(Ok(Bytes::from(buf)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}
