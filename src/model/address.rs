//! Self-describing content addresses using BLAKE3
//!
//! Binary layout (36 bytes):
//! ```text
//! [version: 1][codec: 1][hash fn: 1][digest len: 1][digest: 32]
//! ```
//! The text form is the lowercase hex encoding of the binary layout.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address format version
pub const ADDRESS_VERSION: u8 = 1;

/// Hash function id for BLAKE3-256
pub const BLAKE3_ID: u8 = 0x1e;

/// Digest length in bytes
pub const DIGEST_LEN: usize = 32;

/// Encoded address length in bytes
pub const ADDRESS_LEN: usize = 4 + DIGEST_LEN;

/// Encoding tag of the bytes an address points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    /// Raw file bytes (a leaf chunk)
    Raw,
    /// Internal node of a file DAG
    File,
    /// Directory node with named links
    Directory,
}

impl Codec {
    pub fn as_byte(&self) -> u8 {
        match self {
            Codec::Raw => 0x55,
            Codec::File => 0x70,
            Codec::Directory => 0x71,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x55 => Some(Codec::Raw),
            0x70 => Some(Codec::File),
            0x71 => Some(Codec::Directory),
            _ => None,
        }
    }
}

/// A content address: codec tag plus the BLAKE3 digest of the encoded bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    codec: Codec,
    digest: [u8; DIGEST_LEN],
}

impl Address {
    /// Address `data` under `codec`
    pub fn compute(codec: Codec, data: &[u8]) -> Self {
        Address {
            codec,
            digest: *blake3::hash(data).as_bytes(),
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// Encode to the binary layout (also the datastore key)
    pub fn to_bytes(&self) -> [u8; ADDRESS_LEN] {
        let mut out = [0u8; ADDRESS_LEN];
        out[0] = ADDRESS_VERSION;
        out[1] = self.codec.as_byte();
        out[2] = BLAKE3_ID;
        out[3] = DIGEST_LEN as u8;
        out[4..].copy_from_slice(&self.digest);
        out
    }

    /// Decode from the binary layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ADDRESS_LEN {
            return Err(Error::InvalidAddress(format!(
                "expected {} bytes, got {}",
                ADDRESS_LEN,
                bytes.len()
            )));
        }
        if bytes[0] != ADDRESS_VERSION {
            return Err(Error::InvalidAddress(format!(
                "unsupported address version {}",
                bytes[0]
            )));
        }
        let codec = Codec::from_byte(bytes[1])
            .ok_or_else(|| Error::InvalidAddress(format!("unknown codec 0x{:02x}", bytes[1])))?;
        if bytes[2] != BLAKE3_ID || bytes[3] as usize != DIGEST_LEN {
            return Err(Error::InvalidAddress(format!(
                "unsupported hash function 0x{:02x}/{}",
                bytes[2], bytes[3]
            )));
        }

        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&bytes[4..]);
        Ok(Address { codec, digest })
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", s, e)))?;
        Self::from_bytes(&bytes)
    }

    /// Short digest prefix for logs
    pub fn short(&self) -> String {
        hex::encode(&self.digest[..4])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:?}, {})", self.codec, self.short())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Address::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_deterministic() {
        let a1 = Address::compute(Codec::Raw, b"hello");
        let a2 = Address::compute(Codec::Raw, b"hello");
        let a3 = Address::compute(Codec::Raw, b"world");

        assert_eq!(a1, a2);
        assert_ne!(a1, a3);
    }

    #[test]
    fn test_codec_is_part_of_identity() {
        let raw = Address::compute(Codec::Raw, b"data");
        let file = Address::compute(Codec::File, b"data");

        assert_eq!(raw.digest(), file.digest());
        assert_ne!(raw, file);
        assert_ne!(raw.to_hex(), file.to_hex());
    }

    #[test]
    fn test_hex_parse() {
        let addr = Address::compute(Codec::Directory, b"dir");
        let text = addr.to_string();
        assert_eq!(text.len(), ADDRESS_LEN * 2);

        let parsed: Address = text.parse().unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(parsed.codec(), Codec::Directory);
    }

    #[test]
    fn test_malformed_addresses_rejected() {
        assert!(matches!(
            Address::from_hex("not hex"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            Address::from_hex("0155"),
            Err(Error::InvalidAddress(_))
        ));

        let mut bytes = Address::compute(Codec::Raw, b"x").to_bytes();
        bytes[1] = 0x99;
        assert!(matches!(
            Address::from_bytes(&bytes),
            Err(Error::InvalidAddress(_))
        ));
    }
}
