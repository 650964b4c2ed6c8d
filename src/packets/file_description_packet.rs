//! File description packet: the authoritative name, size and hashes
//! of one protected file.

use binrw::BinRead;

use crate::domain::{FileId, Md5Hash, SetId};

pub const PACKET_TYPE: &[u8; 16] = b"PAR 2.0\0FileDesc";

#[derive(Debug, Clone, BinRead)]
#[br(magic = b"PAR2\0PKT")]
pub struct FileDescriptionPacket {
    pub length: u64,
    pub md5: Md5Hash,
    #[br(pad_after = 16)]
    pub set_id: SetId,
    pub file_id: FileId,
    /// MD5 of the whole file.
    pub hash_full: Md5Hash,
    /// MD5 of the first 16 KiB (of the whole file when shorter).
    pub hash_16k: Md5Hash,
    pub file_length: u64,
    /// Filename as stored on the wire: ASCII, zero-padded to a
    /// multiple of four.
    #[br(count = length.saturating_sub(120))]
    pub file_name: Vec<u8>,
}

impl FileDescriptionPacket {
    /// Filename bytes with the wire padding removed.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .file_name
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        &self.file_name[..end]
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    /// The PAR2 format forbids directory components in packet names.
    pub fn name_has_separator(&self) -> bool {
        self.name_bytes().iter().any(|&b| b == b'/' || b == b'\\')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::BinReaderExt;
    use std::io::Cursor;

    fn raw_description(name: &[u8], file_length: u64) -> Vec<u8> {
        let padded_name_len = name.len().div_ceil(4) * 4;
        let length = 120 + padded_name_len as u64;
        let mut buf = Vec::new();
        buf.extend_from_slice(b"PAR2\0PKT");
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&[1u8; 16]);
        buf.extend_from_slice(PACKET_TYPE);
        buf.extend_from_slice(&[2u8; 16]); // file id
        buf.extend_from_slice(&[3u8; 16]); // full hash
        buf.extend_from_slice(&[4u8; 16]); // 16k hash
        buf.extend_from_slice(&file_length.to_le_bytes());
        buf.extend_from_slice(name);
        buf.resize(length as usize, 0);
        buf
    }

    #[test]
    fn parses_and_trims_name_padding() {
        let raw = raw_description(b"data.bin", 12345);
        let packet: FileDescriptionPacket = Cursor::new(&raw).read_le().unwrap();
        assert_eq!(packet.file_length, 12345);
        assert_eq!(packet.name(), "data.bin");
        assert_eq!(packet.file_id, FileId::new([2u8; 16]));
        assert!(!packet.name_has_separator());
    }

    #[test]
    fn unaligned_name_is_padded_on_the_wire() {
        let raw = raw_description(b"abcde", 10);
        let packet: FileDescriptionPacket = Cursor::new(&raw).read_le().unwrap();
        assert_eq!(packet.file_name.len(), 8);
        assert_eq!(packet.name(), "abcde");
    }

    #[test]
    fn detects_path_separators() {
        for name in [&b"../evil"[..], b"dir/file", b"dir\\file"] {
            let raw = raw_description(name, 1);
            let packet: FileDescriptionPacket = Cursor::new(&raw).read_le().unwrap();
            assert!(packet.name_has_separator(), "{:?}", name);
        }
    }
}
