//! The block scanner: given a candidate file on disk, find every
//! source block whose content appears in it, wherever it lies.
//!
//! The scan slides a blocksize window over the file one byte at a
//! time. Each position costs one short-CRC probe; a full CRC match
//! costs one window MD5; a confirmed block claims its location and
//! the window jumps a whole block ahead. Misses advance one byte,
//! duplicates (block already claimed elsewhere) advance a whole block
//! since duplicates cluster.

pub mod checksummer;
pub mod hash_table;

pub use checksummer::{hash_file_contents, FileCheckSummer};
pub use hash_table::{VerificationEntry, VerificationHashTable};

use log::debug;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use crate::checksum::compute_md5;
use crate::disk::DiskFileId;
use crate::domain::Md5Hash;
use crate::reporters::Reporter;
use crate::source_file::{SharedState, SourceFileTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// No block of any source file was found.
    NoMatch,
    /// Some blocks were found; locations were recorded.
    PartialMatch,
    /// The candidate is, byte for byte, one complete source file.
    FullMatch,
}

/// What one candidate-file scan discovered.
pub struct ScanOutcome {
    pub match_type: MatchType,
    /// File (main-packet index) the first matched block belongs to.
    pub matched_file: Option<usize>,
    pub block_count: u32,
    pub duplicate_count: u32,
    /// Blocks from more than one source file were found.
    pub multiple_files: bool,
    pub hash_full: Md5Hash,
    pub hash_16k: Md5Hash,
}

enum Probe {
    Hit(u32),
    Duplicate,
    Miss,
}

/// Shared, read-mostly context for scanning candidate files. Claims
/// go through the `SharedState` mutex; everything else is immutable.
pub struct Scanner<'a> {
    pub files: &'a SourceFileTable,
    pub hash_table: &'a VerificationHashTable,
    pub shared: &'a Mutex<SharedState>,
    pub window_table: &'a [u32; 256],
    pub window_mask: u32,
    pub block_size: u64,
    pub reporter: &'a dyn Reporter,
}

impl<'a> Scanner<'a> {
    /// Sliding-window scan of one candidate file. `preferred` names
    /// the source file this candidate is expected to be (its target),
    /// which wins ties between identical blocks in different files.
    pub fn scan_file(
        &self,
        disk_id: DiskFileId,
        path: &Path,
        file_size: u64,
        preferred: Option<usize>,
    ) -> io::Result<ScanOutcome> {
        if file_size == 0 {
            let empty = compute_md5(b"");
            return Ok(ScanOutcome {
                match_type: MatchType::NoMatch,
                matched_file: None,
                block_count: 0,
                duplicate_count: 0,
                multiple_files: false,
                hash_full: empty,
                hash_16k: empty,
            });
        }

        let file = File::open(path)?;
        let mut summer = FileCheckSummer::new(
            file,
            file_size,
            self.block_size as usize,
            self.window_table,
            self.window_mask,
        )?;

        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let progress_label = format!("Scanning: \"{}\"", display_name);
        let mut last_permille = u32::MAX;

        let mut match_type = MatchType::FullMatch;
        let mut matched_file: Option<usize> = None;
        let mut block_count = 0u32;
        let mut duplicate_count = 0u32;
        let mut multiple_files = false;
        let mut next_entry: Option<u32> = None;

        while summer.offset() < file_size {
            let permille = (1000 * summer.offset() / file_size) as u32;
            if permille != last_permille {
                last_permille = permille;
                self.reporter.progress(&progress_label, permille);
            }

            match self.probe(&mut summer, disk_id, next_entry, matched_file.or(preferred)) {
                Probe::Hit(entry_index) => {
                    let entry = self.hash_table.entry(entry_index);
                    if block_count == 0 {
                        matched_file = Some(entry.file_index);
                        // A perfect match must start with the file's
                        // first block at offset zero.
                        if !entry.first_block || summer.offset() != 0 {
                            match_type = MatchType::PartialMatch;
                        }
                    } else {
                        if Some(entry_index) != next_entry {
                            match_type = MatchType::PartialMatch;
                        }
                        if matched_file != Some(entry.file_index) {
                            multiple_files = true;
                        }
                    }
                    block_count += 1;
                    next_entry = entry.next;
                    let jump = entry.block_length;
                    summer.jump(jump)?;
                }
                Probe::Duplicate => {
                    match_type = MatchType::PartialMatch;
                    duplicate_count += 1;
                    next_entry = None;
                    summer.jump(self.block_size)?;
                }
                Probe::Miss => {
                    match_type = MatchType::PartialMatch;
                    next_entry = None;
                    summer.step()?;
                }
            }
        }
        self.reporter.progress_done();

        let (hash_full, hash_16k) = summer.file_hashes();

        if block_count == 0 {
            return Ok(ScanOutcome {
                match_type: MatchType::NoMatch,
                matched_file: None,
                block_count,
                duplicate_count,
                multiple_files,
                hash_full,
                hash_16k,
            });
        }

        // A run of in-order hits is only a perfect match when the
        // hashes, size and block count all agree with the description.
        let file_index = matched_file.unwrap();
        let meta = self.files.files[file_index]
            .as_ref()
            .expect("matched entry always has metadata");
        if match_type == MatchType::FullMatch
            && (block_count as usize != meta.block_count
                || file_size != meta.file_size()
                || hash_full != meta.description.hash_full
                || hash_16k != meta.description.hash_16k)
        {
            match_type = MatchType::PartialMatch;
        }

        if match_type == MatchType::FullMatch {
            let mut shared = self.shared.lock().unwrap();
            shared.files[file_index].complete_file = Some(disk_id);
        }
        debug!(
            "scan of {}: {:?}, {} blocks, {} duplicates",
            display_name, match_type, block_count, duplicate_count
        );

        Ok(ScanOutcome {
            match_type,
            matched_file,
            block_count,
            duplicate_count,
            multiple_files,
            hash_full,
            hash_16k,
        })
    }

    /// One window position: short CRC → full CRC → MD5 → claim.
    fn probe(
        &self,
        summer: &mut FileCheckSummer<'_>,
        disk_id: DiskFileId,
        next_entry: Option<u32>,
        preferred_file: Option<usize>,
    ) -> Probe {
        let crc = summer.checksum();
        let candidates: Vec<u32> = self.hash_table.matches_crc(crc).collect();
        if candidates.is_empty() {
            return Probe::Miss;
        }

        let window_md5 = summer.window_md5();
        let matching: Vec<u32> = candidates
            .into_iter()
            .filter(|&i| self.hash_table.entry(i).md5 == window_md5)
            .collect();
        if matching.is_empty() {
            return Probe::Miss;
        }

        let offset = summer.offset();
        let mut shared = self.shared.lock().unwrap();

        let mut claim = |shared: &mut SharedState, index: u32| {
            let entry = self.hash_table.entry(index);
            shared.source_blocks[entry.global_block].set_location(disk_id, offset);
            Probe::Hit(index)
        };

        // Contiguity first: the entry following the previous hit.
        if let Some(expected) = next_entry {
            if matching.contains(&expected)
                && !shared.source_blocks[self.hash_table.entry(expected).global_block].is_set()
            {
                return claim(&mut shared, expected);
            }
        }
        // Then the file this candidate is supposed to be.
        if let Some(wanted) = preferred_file {
            for &index in &matching {
                let entry = self.hash_table.entry(index);
                if entry.file_index == wanted && !shared.source_blocks[entry.global_block].is_set()
                {
                    return claim(&mut shared, index);
                }
            }
        }
        // Then any unclaimed entry, in insertion order.
        for &index in &matching {
            if !shared.source_blocks[self.hash_table.entry(index).global_block].is_set() {
                return claim(&mut shared, index);
            }
        }
        Probe::Duplicate
    }

    /// Trust-hint fast path: mark the file complete without reading a
    /// byte and assign its block locations at blocksize boundaries.
    pub fn assign_trusted(&self, disk_id: DiskFileId, file_index: usize) -> ScanOutcome {
        let meta = self.files.files[file_index].as_ref().unwrap();
        let mut shared = self.shared.lock().unwrap();
        for (block_number, global) in meta.blocks().enumerate() {
            shared.source_blocks[global].set_location(disk_id, block_number as u64 * self.block_size);
        }
        shared.files[file_index].complete_file = Some(disk_id);

        ScanOutcome {
            match_type: MatchType::FullMatch,
            matched_file: Some(file_index),
            block_count: meta.block_count as u32,
            duplicate_count: 0,
            multiple_files: false,
            hash_full: meta.description.hash_full,
            hash_16k: meta.description.hash_16k,
        }
    }

    /// Whole-file fallback for source files without a verification
    /// packet: match by size + 16 KiB hash + full hash, then assign
    /// all block locations sequentially.
    pub fn match_unverifiable(
        &self,
        disk_id: DiskFileId,
        file_size: u64,
        hash_full: &Md5Hash,
        hash_16k: &Md5Hash,
    ) -> Option<usize> {
        let mut shared = self.shared.lock().unwrap();
        for (file_index, meta) in self.files.recoverable() {
            if meta.verification.is_some()
                || shared.files[file_index].complete_file.is_some()
                || meta.file_size() != file_size
                || meta.description.hash_16k != *hash_16k
                || meta.description.hash_full != *hash_full
            {
                continue;
            }
            for (block_number, global) in meta.blocks().enumerate() {
                shared.source_blocks[global]
                    .set_location(disk_id, block_number as u64 * self.block_size);
            }
            shared.files[file_index].complete_file = Some(disk_id);
            return Some(file_index);
        }
        None
    }
}
