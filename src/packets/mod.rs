//! PAR2 packet codec.
//!
//! Every packet starts with the same 64-byte header: magic, total
//! length, an MD5 over everything after the hash field, the set id,
//! and a 16-byte type tag. The set loader validates packets at the
//! byte level (magic, length bounds, streamed MD5) and only then
//! hands the buffer to the typed `binrw` parsers in the submodules.

use binrw::BinReaderExt;
use std::io::Cursor;

use crate::domain::{Md5Hash, SetId};

pub mod creator_packet;
pub mod file_description_packet;
pub mod file_verification_packet;
pub mod main_packet;
pub mod recovery_slice_packet;

pub use creator_packet::CreatorPacket;
pub use file_description_packet::FileDescriptionPacket;
pub use file_verification_packet::{BlockChecksum, FileVerificationPacket};
pub use main_packet::MainPacket;
pub use recovery_slice_packet::RecoverySlicePacket;

pub const MAGIC_BYTES: &[u8; 8] = b"PAR2\0PKT";
pub const HEADER_SIZE: u64 = 64;

/// The fixed header shared by every packet type.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub length: u64,
    pub hash: Md5Hash,
    pub set_id: SetId,
    pub packet_type: [u8; 16],
}

impl PacketHeader {
    /// Decode a header from 64 raw bytes. Returns `None` when the
    /// magic does not match; all other validation (length bounds,
    /// hash) is the caller's job.
    pub fn from_bytes(bytes: &[u8; 64]) -> Option<PacketHeader> {
        if &bytes[..8] != MAGIC_BYTES {
            return None;
        }
        Some(PacketHeader {
            length: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            hash: Md5Hash::new(bytes[16..32].try_into().unwrap()),
            set_id: SetId::new(bytes[32..48].try_into().unwrap()),
            packet_type: bytes[48..64].try_into().unwrap(),
        })
    }

    /// Structural length checks: a packet is at least one header long,
    /// a multiple of 4, and must fit inside the containing file.
    pub fn length_is_plausible(&self, file_size: u64, offset: u64) -> bool {
        self.length >= HEADER_SIZE
            && self.length % 4 == 0
            && self.length <= file_size
            && offset <= file_size - self.length
    }
}

/// A parsed packet of any known type.
#[derive(Debug, Clone)]
pub enum Packet {
    Main(MainPacket),
    Creator(CreatorPacket),
    FileDescription(FileDescriptionPacket),
    FileVerification(FileVerificationPacket),
    Recovery(RecoverySlicePacket),
}

impl Packet {
    /// Parse a complete, already hash-verified packet buffer into a
    /// typed packet. Unknown type tags yield `None` and are skipped
    /// by the loader; so do buffers the typed parser rejects.
    pub fn parse(buffer: &[u8]) -> Option<Packet> {
        if buffer.len() < HEADER_SIZE as usize {
            return None;
        }
        let packet_type: [u8; 16] = buffer[48..64].try_into().unwrap();
        let mut cursor = Cursor::new(buffer);

        if &packet_type == main_packet::PACKET_TYPE {
            cursor.read_le::<MainPacket>().ok().map(Packet::Main)
        } else if &packet_type == creator_packet::PACKET_TYPE {
            cursor.read_le::<CreatorPacket>().ok().map(Packet::Creator)
        } else if &packet_type == file_description_packet::PACKET_TYPE {
            cursor
                .read_le::<FileDescriptionPacket>()
                .ok()
                .map(Packet::FileDescription)
        } else if &packet_type == file_verification_packet::PACKET_TYPE {
            cursor
                .read_le::<FileVerificationPacket>()
                .ok()
                .map(Packet::FileVerification)
        } else if &packet_type == recovery_slice_packet::PACKET_TYPE {
            cursor
                .read_le::<RecoverySlicePacket>()
                .ok()
                .map(Packet::Recovery)
        } else {
            None
        }
    }

    pub fn set_id(&self) -> SetId {
        match self {
            Packet::Main(p) => p.set_id,
            Packet::Creator(p) => p.set_id,
            Packet::FileDescription(p) => p.set_id,
            Packet::FileVerification(p) => p.set_id,
            Packet::Recovery(p) => p.set_id,
        }
    }
}
