//! The main packet: block size plus the ordered list of protected
//! file identifiers. Exactly one is retained per recovery set.

use binrw::BinRead;

use crate::domain::{FileId, Md5Hash, SetId};

pub const PACKET_TYPE: &[u8; 16] = b"PAR 2.0\0Main\0\0\0\0";

/// Body layout: u64 block size, u32 count of recoverable files, that
/// many file ids, then the ids of any non-recoverable "other" files
/// filling the rest of the packet.
#[derive(Debug, Clone, BinRead)]
#[br(magic = b"PAR2\0PKT")]
pub struct MainPacket {
    pub length: u64,
    pub md5: Md5Hash,
    #[br(pad_after = 16)]
    pub set_id: SetId,
    pub block_size: u64,
    pub recoverable_count: u32,
    #[br(count = recoverable_count)]
    pub file_ids: Vec<FileId>,
    #[br(count = (length.saturating_sub(76) / 16).saturating_sub(recoverable_count as u64))]
    pub non_recoverable_ids: Vec<FileId>,
}

impl MainPacket {
    /// Recoverable files followed by other files, in main-packet order.
    pub fn all_file_ids(&self) -> impl Iterator<Item = &FileId> {
        self.file_ids.iter().chain(self.non_recoverable_ids.iter())
    }

    pub fn total_file_count(&self) -> usize {
        self.file_ids.len() + self.non_recoverable_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::BinReaderExt;
    use std::io::Cursor;

    fn raw_main_packet(block_size: u64, recoverable: &[[u8; 16]], other: &[[u8; 16]]) -> Vec<u8> {
        let body_len = 12 + 16 * (recoverable.len() + other.len());
        let length = 64 + body_len as u64;
        let mut buf = Vec::new();
        buf.extend_from_slice(b"PAR2\0PKT");
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]); // md5, unchecked here
        buf.extend_from_slice(&[7u8; 16]); // set id
        buf.extend_from_slice(PACKET_TYPE);
        buf.extend_from_slice(&block_size.to_le_bytes());
        buf.extend_from_slice(&(recoverable.len() as u32).to_le_bytes());
        for id in recoverable.iter().chain(other) {
            buf.extend_from_slice(id);
        }
        buf
    }

    #[test]
    fn parses_recoverable_and_other_ids() {
        let raw = raw_main_packet(4096, &[[1u8; 16], [2u8; 16]], &[[3u8; 16]]);
        let packet: MainPacket = Cursor::new(&raw).read_le().unwrap();
        assert_eq!(packet.block_size, 4096);
        assert_eq!(packet.recoverable_count, 2);
        assert_eq!(packet.file_ids, vec![FileId::new([1u8; 16]), FileId::new([2u8; 16])]);
        assert_eq!(packet.non_recoverable_ids, vec![FileId::new([3u8; 16])]);
        assert_eq!(packet.total_file_count(), 3);
    }

    #[test]
    fn parses_without_other_files() {
        let raw = raw_main_packet(1024, &[[9u8; 16]], &[]);
        let packet: MainPacket = Cursor::new(&raw).read_le().unwrap();
        assert!(packet.non_recoverable_ids.is_empty());
        assert_eq!(packet.set_id, SetId::new([7u8; 16]));
    }
}
