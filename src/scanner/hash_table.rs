//! The verification hash table: every expected block of every
//! recoverable file, indexed for O(1) probing by the scanner.
//!
//! The primary key is the low 16 bits of the block CRC32 ("short
//! CRC"), a dense 65536-bucket array. A probe filters the bucket by
//! full CRC; only then is the window MD5 computed and compared. This
//! two-level scheme is what makes the per-byte scan affordable.

use crate::domain::Md5Hash;
use crate::source_file::SourceFileTable;

/// One expected block.
pub struct VerificationEntry {
    pub crc: u32,
    pub md5: Md5Hash,
    /// Index of the owning file in main-packet order.
    pub file_index: usize,
    /// Global index into the source-block table.
    pub global_block: usize,
    /// Logical block length (truncated for a file's tail block).
    pub block_length: u64,
    /// Whether this is the file's first block.
    pub first_block: bool,
    /// The entry for the next block of the same file, if any. Used to
    /// prefer contiguous matches.
    pub next: Option<u32>,
}

pub struct VerificationHashTable {
    entries: Vec<VerificationEntry>,
    buckets: Vec<Vec<u32>>,
}

impl VerificationHashTable {
    /// Load every block checksum of every recoverable file that has a
    /// verification packet.
    pub fn build(table: &SourceFileTable, block_size: u64) -> Self {
        let mut entries = Vec::new();
        let mut buckets = vec![Vec::new(); 1 << 16];

        for (file_index, meta) in table.recoverable() {
            let Some(verification) = &meta.verification else {
                continue;
            };
            let file_size = meta.file_size();
            let first_entry = entries.len() as u32;
            for (block_number, checksum) in verification.block_checksums.iter().enumerate() {
                let entry_index = entries.len() as u32;
                let length = block_size.min(file_size - block_number as u64 * block_size);
                entries.push(VerificationEntry {
                    crc: checksum.crc,
                    md5: checksum.md5,
                    file_index,
                    global_block: meta.first_block + block_number,
                    block_length: length,
                    first_block: block_number == 0,
                    next: None,
                });
                if block_number > 0 {
                    entries[entry_index as usize - 1].next = Some(entry_index);
                }
                buckets[(checksum.crc & 0xFFFF) as usize].push(entry_index);
            }
            debug_assert!(entries.len() as u32 >= first_entry);
        }

        VerificationHashTable { entries, buckets }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, index: u32) -> &VerificationEntry {
        &self.entries[index as usize]
    }

    /// Entries whose full CRC matches, found through the short-CRC
    /// bucket. Insertion order, which the tie-breaking rules rely on.
    pub fn matches_crc(&self, crc: u32) -> impl Iterator<Item = u32> + '_ {
        self.buckets[(crc & 0xFFFF) as usize]
            .iter()
            .copied()
            .filter(move |&i| self.entries[i as usize].crc == crc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::compute_md5;
    use crate::domain::{FileId, SetId};
    use crate::packets::file_verification_packet::BlockChecksum;
    use crate::packets::{FileDescriptionPacket, FileVerificationPacket, MainPacket};
    use crate::set_loader::SourceFilePackets;
    use crate::source_file::SourceFileTable;
    use rustc_hash::FxHashMap;
    use std::path::Path;

    fn build_table(checksums: Vec<(Md5Hash, u32)>, file_length: u64) -> VerificationHashTable {
        let file_id = FileId::new([1u8; 16]);
        let description = FileDescriptionPacket {
            length: 124,
            md5: Md5Hash::new([0u8; 16]),
            set_id: SetId::new([0u8; 16]),
            file_id,
            hash_full: compute_md5(b"f"),
            hash_16k: compute_md5(b"h"),
            file_length,
            file_name: b"x.bin".to_vec(),
        };
        let verification = FileVerificationPacket {
            length: 80 + 20 * checksums.len() as u64,
            md5: Md5Hash::new([0u8; 16]),
            set_id: SetId::new([0u8; 16]),
            file_id,
            block_checksums: checksums
                .into_iter()
                .map(|(md5, crc)| BlockChecksum { md5, crc })
                .collect(),
        };
        let mut packets = FxHashMap::default();
        packets.insert(
            file_id,
            SourceFilePackets {
                description: Some(description),
                verification: Some(verification),
            },
        );
        let main = MainPacket {
            length: 92,
            md5: Md5Hash::new([0u8; 16]),
            set_id: SetId::new([0u8; 16]),
            block_size: 100,
            recoverable_count: 1,
            file_ids: vec![file_id],
            non_recoverable_ids: Vec::new(),
        };
        let (table, _, _) = SourceFileTable::build(&main, &mut packets, Path::new("."), 100);
        VerificationHashTable::build(&table, 100)
    }

    #[test]
    fn entries_chain_within_a_file() {
        let table = build_table(
            vec![
                (compute_md5(b"0"), 0x11110000),
                (compute_md5(b"1"), 0x22220000),
                (compute_md5(b"2"), 0x33330000),
            ],
            250,
        );
        assert_eq!(table.len(), 3);
        assert!(table.entry(0).first_block);
        assert_eq!(table.entry(0).next, Some(1));
        assert_eq!(table.entry(1).next, Some(2));
        assert_eq!(table.entry(2).next, None);
        // Tail block length is truncated.
        assert_eq!(table.entry(2).block_length, 50);
    }

    #[test]
    fn short_crc_bucket_filters_by_full_crc() {
        // Two entries share the low 16 bits but differ in the high bits.
        let table = build_table(
            vec![
                (compute_md5(b"0"), 0xAAAA1234),
                (compute_md5(b"1"), 0xBBBB1234),
            ],
            200,
        );
        let hits: Vec<u32> = table.matches_crc(0xAAAA1234).collect();
        assert_eq!(hits, vec![0]);
        let hits: Vec<u32> = table.matches_crc(0xBBBB1234).collect();
        assert_eq!(hits, vec![1]);
        assert_eq!(table.matches_crc(0xCCCC1234).count(), 0);
    }
}
