//! The source-file model: per-file metadata in main-packet order,
//! plus the contiguous source/target block tables sliced per file.
//!
//! Metadata is immutable once built, so scanner workers can share it
//! freely. Everything the scan mutates (block locations, per-file
//! target/complete bookkeeping) lives in [`SharedState`] behind the
//! orchestrator's mutex.

use log::debug;
use rustc_hash::FxHashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::block::DataBlock;
use crate::disk::DiskFileId;
use crate::domain::FileId;
use crate::packets::{FileDescriptionPacket, FileVerificationPacket, MainPacket};
use crate::set_loader::SourceFilePackets;

/// Immutable description of one protected file.
pub struct SourceFileMeta {
    pub description: FileDescriptionPacket,
    pub verification: Option<FileVerificationPacket>,
    /// Number of source blocks; zero for non-recoverable files, which
    /// get no block-table slice.
    pub block_count: usize,
    /// Global index of this file's first block in the block tables.
    pub first_block: usize,
    /// Where the repaired or verified file belongs on disk.
    pub target_path: PathBuf,
}

impl SourceFileMeta {
    pub fn file_size(&self) -> u64 {
        self.description.file_length
    }

    pub fn target_name(&self) -> String {
        self.target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Global block range owned by this file.
    pub fn blocks(&self) -> Range<usize> {
        self.first_block..self.first_block + self.block_count
    }
}

/// Mutable per-file scan state.
#[derive(Default)]
pub struct FileState {
    pub target_file: Option<DiskFileId>,
    pub target_exists: bool,
    pub complete_file: Option<DiskFileId>,
}

/// Scanner-mutable state: source-block locations plus per-file
/// bookkeeping, guarded by one mutex in the orchestrator.
pub struct SharedState {
    pub source_blocks: Vec<DataBlock>,
    pub files: Vec<FileState>,
}

/// Source files in main-packet order, with their block tables.
pub struct SourceFileTable {
    /// One slot per file id in the main packet; `None` when neither a
    /// description nor a verification packet survived loading.
    pub files: Vec<Option<SourceFileMeta>>,
    pub recoverable_count: usize,
    pub total_source_blocks: usize,
    pub total_data_size: u64,
}

impl SourceFileTable {
    /// Build the table from the main packet's ordered id list,
    /// consuming the loader's packet pairs. Also allocates the source
    /// and target block vectors (returned through `SharedState` and a
    /// plain target vector).
    pub fn build(
        main: &MainPacket,
        packets: &mut FxHashMap<FileId, SourceFilePackets>,
        search_path: &Path,
        block_size: u64,
    ) -> (SourceFileTable, SharedState, Vec<DataBlock>) {
        let recoverable_count = main.file_ids.len();
        let mut files = Vec::with_capacity(main.total_file_count());
        let mut next_block = 0usize;
        let mut total_data_size = 0u64;

        for (index, file_id) in main.all_file_ids().enumerate() {
            let recoverable = index < recoverable_count;
            let meta = packets.remove(file_id).and_then(|entry| {
                let description = entry.description?;
                let block_count = if recoverable {
                    description.file_length.div_ceil(block_size) as usize
                } else {
                    0
                };
                let target_path = search_path.join(description.name());
                let meta = SourceFileMeta {
                    description,
                    verification: entry.verification,
                    block_count,
                    first_block: next_block,
                    target_path,
                };
                if recoverable {
                    total_data_size += meta.file_size();
                    next_block += block_count;
                }
                Some(meta)
            });
            if meta.is_none() {
                debug!("no packets for file number {}", index + 1);
            }
            files.push(meta);
        }

        let mut source_blocks = Vec::with_capacity(next_block);
        let mut target_blocks = Vec::with_capacity(next_block);
        for meta in files.iter().flatten() {
            if meta.block_count == 0 {
                continue;
            }
            let size = meta.file_size();
            for block_number in 0..meta.block_count as u64 {
                let length = block_size.min(size - block_number * block_size);
                source_blocks.push(DataBlock::new(length));
                target_blocks.push(DataBlock::new(length));
            }
        }

        let states = (0..files.len()).map(|_| FileState::default()).collect();

        (
            SourceFileTable {
                files,
                recoverable_count,
                total_source_blocks: next_block,
                total_data_size,
            },
            SharedState {
                source_blocks,
                files: states,
            },
            target_blocks,
        )
    }

    pub fn recoverable(&self) -> impl Iterator<Item = (usize, &SourceFileMeta)> {
        self.files
            .iter()
            .take(self.recoverable_count)
            .enumerate()
            .filter_map(|(i, meta)| meta.as_ref().map(|m| (i, m)))
    }
}
