//! MD5 and CRC32 helpers shared by the packet codec, scanner, and
//! repair verification.

use crate::domain::{FileId, Md5Hash};
use md5::{Digest, Md5};

/// MD5 of a buffer in one shot.
#[inline]
pub fn compute_md5(data: &[u8]) -> Md5Hash {
    Md5Hash::new(Md5::digest(data).into())
}

#[inline]
pub fn new_md5_hasher() -> Md5 {
    Md5::new()
}

#[inline]
pub fn finalize_md5(hasher: Md5) -> Md5Hash {
    Md5Hash::new(hasher.finalize().into())
}

/// CRC32 of a buffer, zero-padded to `block_size` when shorter. PAR2
/// hashes every block at full blocksize; the trailing block of a file
/// is padded before hashing.
pub fn compute_crc32_padded(data: &[u8], block_size: usize) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    if data.len() < block_size {
        let mut remaining = block_size - data.len();
        let zeros = [0u8; 1024];
        while remaining > 0 {
            let take = remaining.min(zeros.len());
            hasher.update(&zeros[..take]);
            remaining -= take;
        }
    }
    hasher.finalize()
}

/// MD5 of a buffer, zero-padded to `block_size` when shorter.
pub fn compute_md5_padded(data: &[u8], block_size: usize) -> Md5Hash {
    let mut hasher = Md5::new();
    hasher.update(data);
    if data.len() < block_size {
        let mut remaining = block_size - data.len();
        let zeros = [0u8; 1024];
        while remaining > 0 {
            let take = remaining.min(zeros.len());
            hasher.update(&zeros[..take]);
            remaining -= take;
        }
    }
    Md5Hash::new(hasher.finalize().into())
}

/// PAR2 file identifier: MD5(16k-hash ‖ little-endian file length ‖
/// filename bytes as stored in the description packet).
pub fn compute_file_id(md5_16k: &Md5Hash, file_length: u64, filename: &[u8]) -> FileId {
    let mut hasher = Md5::new();
    hasher.update(md5_16k.as_bytes());
    hasher.update(file_length.to_le_bytes());
    hasher.update(filename);
    FileId::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_empty_input() {
        let expected = [
            0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8,
            0x42, 0x7e,
        ];
        assert_eq!(*compute_md5(b"").as_bytes(), expected);
    }

    #[test]
    fn padded_hashes_match_manual_padding() {
        let data = b"trailing block";
        let block_size = 64;

        let mut manual = vec![0u8; block_size];
        manual[..data.len()].copy_from_slice(data);

        assert_eq!(compute_crc32_padded(data, block_size), crc32fast::hash(&manual));
        assert_eq!(compute_md5_padded(data, block_size), compute_md5(&manual));
    }

    #[test]
    fn padded_hashes_without_padding_are_plain() {
        let data = b"exactly16bytes!!";
        assert_eq!(compute_crc32_padded(data, data.len()), crc32fast::hash(data));
        assert_eq!(compute_md5_padded(data, data.len()), compute_md5(data));
    }

    #[test]
    fn file_id_depends_on_every_component() {
        let hash = compute_md5(b"head");
        let base = compute_file_id(&hash, 100, b"a.bin");
        assert_eq!(base, compute_file_id(&hash, 100, b"a.bin"));
        assert_ne!(base, compute_file_id(&hash, 101, b"a.bin"));
        assert_ne!(base, compute_file_id(&hash, 100, b"b.bin"));
        assert_ne!(base, compute_file_id(&compute_md5(b"tail"), 100, b"a.bin"));
    }
}
