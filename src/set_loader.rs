//! Recovery-set loading: discover `.par2` files, scan each one for
//! packets with byte-level resynchronization, and merge everything
//! into one consistent set.
//!
//! Scanning is deliberately forgiving. A damaged or truncated file
//! yields whatever valid packets it still contains; unreadable files
//! are skipped; critical packets usually appear in several volumes,
//! so losing one copy rarely matters.

use log::debug;
use md5::{Digest, Md5};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::block::DataBlock;
use crate::disk::{self, DiskFileArena, DiskFileId};
use crate::domain::{FileId, SetId};
use crate::error::RepairError;
use crate::packets::{
    self, CreatorPacket, FileDescriptionPacket, FileVerificationPacket, MainPacket, Packet,
    PacketHeader, HEADER_SIZE,
};
use crate::reporters::Reporter;

/// Read granularity while scanning a packet file.
const LOAD_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Description/verification packets paired up per file identifier.
#[derive(Default)]
pub struct SourceFilePackets {
    pub description: Option<FileDescriptionPacket>,
    pub verification: Option<FileVerificationPacket>,
}

/// Everything gathered from the packet files, before the consistency
/// sweep turns it into a usable set.
#[derive(Default)]
pub struct LoadedSet {
    pub set_id: Option<SetId>,
    pub main: Option<MainPacket>,
    pub creator: Option<CreatorPacket>,
    /// Exponent → on-disk coded block. Ordered so repair consumes
    /// recovery blocks in ascending exponent order.
    pub recovery_blocks: BTreeMap<u32, DataBlock>,
    pub source_packets: FxHashMap<FileId, SourceFilePackets>,
    /// Recovery packets discarded because their exponent was already
    /// taken (first wins).
    pub duplicate_exponents: u64,
}

impl LoadedSet {
    /// Drop everything that contradicts the main packet. Fails only
    /// when no usable main packet exists at all.
    pub fn consistency_sweep(&mut self, reporter: &dyn Reporter) -> Result<(), RepairError> {
        let main = self.main.as_ref().ok_or(RepairError::MissingMainPacket)?;
        let block_size = main.block_size;
        if block_size == 0 || block_size % 4 != 0 {
            return Err(RepairError::InvalidBlockSize(block_size));
        }

        self.recovery_blocks.retain(|exponent, block| {
            let keep = block.length() == block_size;
            if !keep {
                reporter.warning(&format!(
                    "Incorrect sized recovery block for exponent {} discarded",
                    exponent
                ));
            }
            keep
        });

        self.source_packets.retain(|_, entry| {
            let Some(description) = &entry.description else {
                // A verification packet without a description is unusable.
                return false;
            };
            if description.name_has_separator() {
                reporter.warning(&format!(
                    "File name \"{}\" contains a path separator; entry discarded",
                    description.name()
                ));
                return false;
            }
            if let Some(verification) = &entry.verification {
                let expected = description.file_length.div_ceil(block_size);
                if verification.block_count() as u64 != expected {
                    reporter.warning(&format!(
                        "Incorrectly sized verification packet for \"{}\" discarded",
                        description.name()
                    ));
                    return false;
                }
            }
            true
        });

        Ok(())
    }
}

/// Derive the root name a PAR2 family is built from: trim a trailing
/// `.par2` (case-insensitive) and then any `.volNNN+NNN` / `.volNNN-NNN`
/// segment.
fn family_root(file_name: &str) -> String {
    let mut name = file_name.to_string();
    while let Some(dot) = name.rfind('.') {
        let tail = name[dot + 1..].to_ascii_lowercase();
        name.truncate(dot);
        if tail == "par2" {
            break;
        }
    }

    if let Some(dot) = name.rfind('.') {
        let tail = &name[dot + 1..];
        if is_volume_segment(tail) {
            name.truncate(dot);
        }
    }
    name
}

/// Matches `volNNN+NNN` or `volNNN-NNN` (case-insensitive).
fn is_volume_segment(segment: &str) -> bool {
    let lower = segment.to_ascii_lowercase();
    let Some(rest) = lower.strip_prefix("vol") else {
        return false;
    };
    let Some(sep) = rest.find(['+', '-']) else {
        return false;
    };
    let (first, second) = rest.split_at(sep);
    let second = &second[1..];
    !first.is_empty()
        && !second.is_empty()
        && first.bytes().all(|b| b.is_ascii_digit())
        && second.bytes().all(|b| b.is_ascii_digit())
}

/// Find sibling recovery files for the given index file: everything
/// in the same directory matching `root.*.par2`, or any `*.par2` when
/// the root is empty. Case-insensitive, sorted for determinism.
pub fn discover_recovery_files(par2_path: &Path) -> Vec<PathBuf> {
    let directory = match par2_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let root = par2_path
        .file_name()
        .map(|n| family_root(&n.to_string_lossy()).to_ascii_lowercase())
        .unwrap_or_default();

    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(&directory) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_ascii_lowercase())
        else {
            continue;
        };
        if !name.ends_with(".par2") {
            continue;
        }
        if root.is_empty() || name.starts_with(&format!("{}.", root)) {
            found.push(path);
        }
    }
    found.sort();
    found
}

/// Scans packet files and accumulates a [`LoadedSet`].
pub struct SetLoader<'a> {
    arena: &'a mut DiskFileArena,
    reporter: &'a dyn Reporter,
    set: LoadedSet,
}

impl<'a> SetLoader<'a> {
    pub fn new(arena: &'a mut DiskFileArena, reporter: &'a dyn Reporter) -> Self {
        SetLoader {
            arena,
            reporter,
            set: LoadedSet::default(),
        }
    }

    /// Load the primary file, its discovered siblings, and any extra
    /// command-line paths that look like PAR2 files.
    pub fn load(mut self, par2_path: &Path, extra_files: &[PathBuf]) -> LoadedSet {
        self.load_file(par2_path);
        for sibling in discover_recovery_files(par2_path) {
            self.load_file(&sibling);
        }
        for path in extra_files {
            let name = path.to_string_lossy().to_ascii_lowercase();
            if name.contains(".par2") {
                self.load_file(path);
            }
        }
        self.set
    }

    /// Finish without sibling discovery; callers drive `load_file`
    /// themselves.
    pub fn finish(self) -> LoadedSet {
        self.set
    }

    /// Scan one file for packets. I/O problems abandon the file but
    /// never the load as a whole.
    pub fn load_file(&mut self, path: &Path) {
        if self.arena.contains(path) {
            return;
        }
        let Ok(mut file) = File::open(path) else {
            return;
        };
        let Ok(metadata) = file.metadata() else {
            return;
        };
        let file_size = metadata.len();
        let Some(disk_id) = self.arena.insert(path, file_size) else {
            return;
        };

        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.reporter.file_state(&format!("Loading \"{}\".", display_name));

        let mut buffer = vec![0u8; LOAD_BUFFER_SIZE.min(file_size.max(1) as usize)];
        let mut packets = 0usize;
        let mut recovery = 0usize;
        let mut offset = 0u64;
        let mut last_permille = u32::MAX;

        while offset + HEADER_SIZE <= file_size {
            let permille = (1000 * offset / file_size) as u32;
            if permille != last_permille {
                last_permille = permille;
                self.reporter.progress("Loading", permille);
            }

            let mut header_bytes = [0u8; 64];
            match disk::read_at(&mut file, offset, &mut header_bytes) {
                Ok(64) => {}
                _ => break,
            }

            let header = match PacketHeader::from_bytes(&header_bytes) {
                Some(header) => header,
                None => {
                    // Resynchronize on the next magic occurrence.
                    match find_magic(&mut file, offset + 1, file_size, &mut buffer) {
                        Some(next) => {
                            offset = next;
                            continue;
                        }
                        None => break,
                    }
                }
            };

            if !header.length_is_plausible(file_size, offset) {
                offset += 1;
                continue;
            }

            match self.validate_and_accept(&mut file, disk_id, offset, &header, &header_bytes, &mut buffer)
            {
                Ok(true) => {
                    packets += 1;
                    if &header.packet_type == packets::recovery_slice_packet::PACKET_TYPE {
                        recovery += 1;
                    }
                    offset += header.length;
                }
                Ok(false) => {
                    // Valid packet we chose not to keep (duplicate,
                    // foreign set, unknown type): skip it whole.
                    offset += header.length;
                }
                Err(()) => {
                    // Hash mismatch or short read: resync byte-wise.
                    offset += 1;
                }
            }
        }

        self.reporter.progress_done();
        if packets > 0 {
            if recovery > 0 {
                self.reporter.info(&format!(
                    "Loaded {} new packets including {} recovery blocks",
                    packets, recovery
                ));
            } else {
                self.reporter
                    .info(&format!("Loaded {} new packets", packets));
            }
        } else {
            self.reporter.info("No new packets found");
        }
    }

    /// Stream-verify the packet MD5, then merge the packet into the
    /// set. `Ok(true)` = accepted, `Ok(false)` = valid but discarded,
    /// `Err(())` = invalid (caller resyncs).
    fn validate_and_accept(
        &mut self,
        file: &mut File,
        disk_id: DiskFileId,
        offset: u64,
        header: &PacketHeader,
        header_bytes: &[u8; 64],
        buffer: &mut [u8],
    ) -> Result<bool, ()> {
        let is_recovery = &header.packet_type == packets::recovery_slice_packet::PACKET_TYPE;
        let is_critical = [
            packets::main_packet::PACKET_TYPE,
            packets::creator_packet::PACKET_TYPE,
            packets::file_description_packet::PACKET_TYPE,
            packets::file_verification_packet::PACKET_TYPE,
        ]
        .contains(&&header.packet_type);

        // The hash covers everything after the hash field itself.
        let mut hasher = Md5::new();
        hasher.update(&header_bytes[32..]);

        let mut captured = if is_critical {
            let mut vec = Vec::new();
            if vec.try_reserve_exact(header.length as usize).is_err() {
                return Err(());
            }
            vec.extend_from_slice(header_bytes);
            Some(vec)
        } else {
            None
        };

        let mut position = offset + HEADER_SIZE;
        let end = offset + header.length;
        while position < end {
            let want = ((end - position) as usize).min(buffer.len());
            match disk::read_at(file, position, &mut buffer[..want]) {
                Ok(n) if n == want => {}
                _ => return Err(()),
            }
            hasher.update(&buffer[..want]);
            if let Some(vec) = captured.as_mut() {
                vec.extend_from_slice(&buffer[..want]);
            }
            position += want as u64;
        }

        let computed: [u8; 16] = hasher.finalize().into();
        if computed != *header.hash.as_bytes() {
            return Err(());
        }

        // The first valid packet locks the set id; foreign packets
        // are silently discarded from then on.
        let set_id = *self.set.set_id.get_or_insert(header.set_id);
        if set_id != header.set_id {
            debug!("discarding packet from foreign set at offset {}", offset);
            return Ok(false);
        }

        if is_recovery {
            return Ok(self.accept_recovery(file, disk_id, offset, header));
        }
        let Some(bytes) = captured else {
            return Ok(false); // unknown type
        };
        match Packet::parse(&bytes) {
            Some(packet) => Ok(self.accept_critical(packet)),
            None => Ok(false),
        }
    }

    fn accept_recovery(
        &mut self,
        file: &mut File,
        disk_id: DiskFileId,
        offset: u64,
        header: &PacketHeader,
    ) -> bool {
        let mut exponent_bytes = [0u8; 4];
        match disk::read_at(file, offset + HEADER_SIZE, &mut exponent_bytes) {
            Ok(4) => {}
            _ => return false,
        }
        let exponent = u32::from_le_bytes(exponent_bytes);

        if self.set.recovery_blocks.contains_key(&exponent) {
            self.set.duplicate_exponents += 1;
            return false;
        }
        let data_length = header.length - packets::recovery_slice_packet::DATA_OFFSET;
        let mut block = DataBlock::new(data_length);
        block.set_location(disk_id, offset + packets::recovery_slice_packet::DATA_OFFSET);
        self.set.recovery_blocks.insert(exponent, block);
        true
    }

    fn accept_critical(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::Main(main) => {
                if self.set.main.is_some() {
                    return false;
                }
                debug!(
                    "main packet: block size {}, {} recoverable files",
                    main.block_size,
                    main.file_ids.len()
                );
                self.set.main = Some(main);
                true
            }
            Packet::Creator(creator) => {
                if self.set.creator.is_some() {
                    return false;
                }
                self.set.creator = Some(creator);
                true
            }
            Packet::FileDescription(description) => {
                let entry = self
                    .set
                    .source_packets
                    .entry(description.file_id)
                    .or_default();
                if entry.description.is_some() {
                    return false;
                }
                entry.description = Some(description);
                true
            }
            Packet::FileVerification(verification) => {
                let entry = self
                    .set
                    .source_packets
                    .entry(verification.file_id)
                    .or_default();
                if entry.verification.is_some() {
                    return false;
                }
                entry.verification = Some(verification);
                true
            }
            Packet::Recovery(_) => false, // handled without buffering
        }
    }
}

/// Scan forward for the next occurrence of the packet magic, reading
/// through `buffer`-sized chunks with overlap so a magic straddling a
/// chunk boundary is still found. Returns the file offset of the
/// magic, or `None` when the file is exhausted.
fn find_magic(file: &mut File, mut offset: u64, file_size: u64, buffer: &mut [u8]) -> Option<u64> {
    while offset + HEADER_SIZE <= file_size {
        let want = ((file_size - offset) as usize).min(buffer.len());
        if want < packets::MAGIC_BYTES.len() {
            return None;
        }
        match disk::read_at(file, offset, &mut buffer[..want]) {
            Ok(n) if n == want => {}
            _ => return None,
        }
        if let Some(position) = buffer[..want]
            .windows(packets::MAGIC_BYTES.len())
            .position(|window| window == packets::MAGIC_BYTES)
        {
            return Some(offset + position as u64);
        }
        offset += (want - (packets::MAGIC_BYTES.len() - 1)) as u64;
    }
    None
}
