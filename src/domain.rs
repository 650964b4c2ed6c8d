//! Core identifier types for PAR2 recovery sets.
//!
//! Three different 16-byte values flow through the codebase: file
//! identifiers, recovery-set identifiers, and MD5 digests. Wrapping
//! each in its own newtype keeps them from being mixed up at compile
//! time.

use binrw::BinRead;

/// 16-byte PAR2 file identifier: MD5(16k-hash ‖ file-size ‖ filename).
#[derive(Clone, Copy, PartialEq, Eq, Hash, BinRead)]
pub struct FileId([u8; 16]);

impl FileId {
    pub fn new(bytes: [u8; 16]) -> Self {
        FileId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for FileId {
    fn from(bytes: [u8; 16]) -> Self {
        FileId(bytes)
    }
}

impl std::fmt::Debug for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileId({})", hex::encode(self.0))
    }
}

/// 16-byte recovery-set identifier linking packets to one set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BinRead)]
pub struct SetId([u8; 16]);

impl SetId {
    pub fn new(bytes: [u8; 16]) -> Self {
        SetId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for SetId {
    fn from(bytes: [u8; 16]) -> Self {
        SetId(bytes)
    }
}

impl std::fmt::Debug for SetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SetId({})", hex::encode(self.0))
    }
}

/// An MD5 digest, distinct from the identifiers it resembles.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BinRead)]
pub struct Md5Hash([u8; 16]);

impl Md5Hash {
    pub fn new(bytes: [u8; 16]) -> Self {
        Md5Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for Md5Hash {
    fn from(bytes: [u8; 16]) -> Self {
        Md5Hash(bytes)
    }
}

impl std::fmt::Debug for Md5Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Md5Hash({})", hex::encode(self.0))
    }
}
