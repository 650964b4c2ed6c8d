//! Creator packet: identifies the client that produced the set.

use binrw::BinRead;

use crate::domain::{Md5Hash, SetId};

pub const PACKET_TYPE: &[u8; 16] = b"PAR 2.0\0Creator\0";

#[derive(Debug, Clone, BinRead)]
#[br(magic = b"PAR2\0PKT")]
pub struct CreatorPacket {
    pub length: u64,
    pub md5: Md5Hash,
    #[br(pad_after = 16)]
    pub set_id: SetId,
    #[br(count = length.saturating_sub(64))]
    pub client: Vec<u8>,
}

impl CreatorPacket {
    pub fn client_name(&self) -> String {
        String::from_utf8_lossy(&self.client)
            .trim_end_matches('\0')
            .to_string()
    }
}
