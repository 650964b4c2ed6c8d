//! Recovery slice packet: a GF(2^16) linear combination of all source
//! blocks at one exponent.
//!
//! The set loader never materializes these through `binrw`: a
//! recovery body is `blocksize` bytes and only the exponent plus the
//! body's on-disk location are needed (the repair executor reads the
//! coded data chunk-wise). The full parse below serves tests and any
//! caller that wants a small packet in memory.

use binrw::BinRead;

use crate::domain::{Md5Hash, SetId};

pub const PACKET_TYPE: &[u8; 16] = b"PAR 2.0\0RecvSlic";

/// Byte offset of the coded block within the packet: 64-byte header
/// plus the 4-byte exponent.
pub const DATA_OFFSET: u64 = 68;

#[derive(Debug, Clone, BinRead)]
#[br(magic = b"PAR2\0PKT")]
pub struct RecoverySlicePacket {
    pub length: u64,
    pub md5: Md5Hash,
    #[br(pad_after = 16)]
    pub set_id: SetId,
    pub exponent: u32,
    #[br(count = length.saturating_sub(DATA_OFFSET))]
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::BinReaderExt;
    use std::io::Cursor;

    #[test]
    fn parses_exponent_and_body() {
        let data = [0xAAu8; 16];
        let length = DATA_OFFSET + data.len() as u64;
        let mut buf = Vec::new();
        buf.extend_from_slice(b"PAR2\0PKT");
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&[1u8; 16]);
        buf.extend_from_slice(PACKET_TYPE);
        buf.extend_from_slice(&42u32.to_le_bytes());
        buf.extend_from_slice(&data);

        let packet: RecoverySlicePacket = Cursor::new(&buf).read_le().unwrap();
        assert_eq!(packet.exponent, 42);
        assert_eq!(packet.data, data);
    }
}
