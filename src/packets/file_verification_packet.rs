//! File verification packet (type tag `IFSC`): one CRC32 + MD5 pair
//! per source block, hashed over the zero-padded block.

use binrw::BinRead;

use crate::domain::{FileId, Md5Hash, SetId};

pub const PACKET_TYPE: &[u8; 16] = b"PAR 2.0\0IFSC\0\0\0\0";

#[derive(Debug, Clone, Copy, BinRead)]
pub struct BlockChecksum {
    pub md5: Md5Hash,
    pub crc: u32,
}

#[derive(Debug, Clone, BinRead)]
#[br(magic = b"PAR2\0PKT")]
pub struct FileVerificationPacket {
    pub length: u64,
    pub md5: Md5Hash,
    #[br(pad_after = 16)]
    pub set_id: SetId,
    pub file_id: FileId,
    #[br(count = length.saturating_sub(80) / 20)]
    pub block_checksums: Vec<BlockChecksum>,
}

impl FileVerificationPacket {
    pub fn block_count(&self) -> usize {
        self.block_checksums.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::BinReaderExt;
    use std::io::Cursor;

    #[test]
    fn parses_checksum_entries() {
        let entries: &[(Md5Hash, u32)] = &[
            (Md5Hash::new([1u8; 16]), 0xDEADBEEF),
            (Md5Hash::new([2u8; 16]), 0x01020304),
        ];
        let length = 80 + 20 * entries.len() as u64;

        let mut buf = Vec::new();
        buf.extend_from_slice(b"PAR2\0PKT");
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&[9u8; 16]);
        buf.extend_from_slice(PACKET_TYPE);
        buf.extend_from_slice(&[5u8; 16]); // file id
        for (md5, crc) in entries {
            buf.extend_from_slice(md5.as_bytes());
            buf.extend_from_slice(&crc.to_le_bytes());
        }

        let packet: FileVerificationPacket = Cursor::new(&buf).read_le().unwrap();
        assert_eq!(packet.block_count(), 2);
        assert_eq!(packet.block_checksums[0].crc, 0xDEADBEEF);
        assert_eq!(packet.block_checksums[1].md5, Md5Hash::new([2u8; 16]));
    }
}
