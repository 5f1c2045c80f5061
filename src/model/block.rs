//! Block type - the unit of content-addressed storage

use crate::model::{Address, Codec};
use crate::{Error, Result};
use bytes::Bytes;

/// An immutable (address, bytes) pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    address: Address,
    data: Bytes,
}

impl Block {
    /// Create a block, computing its address
    pub fn new(codec: Codec, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Block {
            address: Address::compute(codec, &data),
            data,
        }
    }

    /// A raw leaf block
    pub fn raw(data: impl Into<Bytes>) -> Self {
        Self::new(Codec::Raw, data)
    }

    /// Rebuild a block read back from storage, checking the bytes against the address
    pub fn verified(address: Address, data: Bytes) -> Result<Self> {
        let actual = Address::compute(address.codec(), &data);
        if actual != address {
            return Err(Error::Corruption(format!(
                "block {} hashes to {}",
                address, actual
            )));
        }
        Ok(Block { address, data })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size of the encoded bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verified_accepts_matching_bytes() {
        let block = Block::raw(&b"hello world"[..]);
        let again = Block::verified(*block.address(), block.data().clone()).unwrap();
        assert_eq!(block, again);
    }

    #[test]
    fn test_verified_rejects_tampered_bytes() {
        let block = Block::raw(&b"hello world"[..]);
        let result = Block::verified(*block.address(), Bytes::from_static(b"hello w0rld"));
        assert!(matches!(result, Err(Error::Corruption(_))));
    }
}
