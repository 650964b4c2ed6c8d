//! Repair planning and the chunked, memory-bounded executor.
//!
//! Planning partitions the block tables: every located source block
//! becomes an input (and its aligned target block a potential copy),
//! every unlocated source block's target becomes an output, and
//! enough recovery blocks are appended to the inputs to close the
//! gap. Execution then streams `chunksize` bytes of every input
//! through the Reed–Solomon matrix per pass, so peak memory stays
//! within the configured budget regardless of blocksize.

pub mod matrix;

pub use matrix::ReedSolomon;

use log::debug;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs::File;
use std::sync::Mutex;

use crate::block::DataBlock;
use crate::disk::{self, DiskFileArena, DiskFileId};
use crate::error::RepairError;
use crate::reporters::Reporter;

/// The block partition produced by planning.
pub struct RepairPlan {
    /// Present source blocks in global order, then the recovery
    /// blocks consumed (ascending exponent). All locations are set.
    pub input_blocks: Vec<DataBlock>,
    /// Target block aligned with each present source block; unset
    /// locations mean the file is intact and needs no copy.
    pub copy_blocks: Vec<DataBlock>,
    /// Target blocks to recompute, in global order.
    pub output_blocks: Vec<DataBlock>,
    pub available: usize,
    pub missing: usize,
}

/// Partition the blocks and build the solved Reed–Solomon matrix.
/// `recovery` must hold at least `missing` blocks; the orchestrator
/// checks that before committing to a repair.
pub fn build_plan(
    source_blocks: &[DataBlock],
    target_blocks: &[DataBlock],
    recovery_blocks: &BTreeMap<u32, DataBlock>,
) -> Result<(RepairPlan, ReedSolomon), RepairError> {
    assert_eq!(source_blocks.len(), target_blocks.len());

    let mut present = Vec::with_capacity(source_blocks.len());
    let mut input_blocks = Vec::new();
    let mut copy_blocks = Vec::new();
    let mut output_blocks = Vec::new();

    for (source, target) in source_blocks.iter().zip(target_blocks) {
        if source.is_set() {
            present.push(true);
            input_blocks.push(*source);
            copy_blocks.push(*target);
        } else {
            present.push(false);
            output_blocks.push(*target);
        }
    }

    let available = input_blocks.len();
    let missing = output_blocks.len();

    let mut rs = ReedSolomon::new();
    rs.set_input(&present)?;

    for (&exponent, block) in recovery_blocks.iter().take(missing) {
        let exponent = u16::try_from(exponent)
            .map_err(|_| RepairError::Logic(format!("recovery exponent {} out of range", exponent)))?;
        rs.set_output(true, exponent);
        input_blocks.push(*block);
    }

    if missing > 0 {
        if input_blocks.len() != available + missing {
            return Err(RepairError::Logic(
                "not enough recovery blocks for the plan".into(),
            ));
        }
        rs.compute()?;
    }
    debug!(
        "repair plan: {} inputs ({} copies), {} outputs",
        input_blocks.len(),
        available,
        missing
    );

    Ok((
        RepairPlan {
            input_blocks,
            copy_blocks,
            output_blocks,
            available,
            missing,
        },
        rs,
    ))
}

/// Pick the chunk size for the executor: whole blocks when they fit
/// the memory budget, otherwise the largest 4-byte-aligned slice of
/// the budget per missing block.
pub fn choose_chunk_size(block_size: u64, missing: usize, memory_limit: u64) -> u64 {
    if missing == 0 || block_size.saturating_mul(missing as u64) <= memory_limit {
        block_size
    } else {
        (memory_limit / missing as u64) & !3
    }
}

/// Run the plan: read every input chunk-wise, copy located blocks
/// into their targets, fan each input chunk out across the missing
/// outputs, and write the recomputed chunks. Returns the number of
/// bytes written.
pub fn execute_plan(
    plan: &RepairPlan,
    rs: &ReedSolomon,
    arena: &Mutex<DiskFileArena>,
    block_size: u64,
    memory_limit: u64,
    reporter: &dyn Reporter,
) -> Result<u64, RepairError> {
    let chunk_size = choose_chunk_size(block_size, plan.missing, memory_limit);
    if chunk_size == 0 {
        return Err(RepairError::Memory);
    }

    let mut input_buffer = Vec::new();
    input_buffer
        .try_reserve_exact(chunk_size as usize)
        .map_err(|_| RepairError::Memory)?;
    input_buffer.resize(chunk_size as usize, 0u8);

    let mut output_buffer = Vec::new();
    output_buffer
        .try_reserve_exact(chunk_size as usize * plan.missing)
        .map_err(|_| RepairError::Memory)?;
    output_buffer.resize(chunk_size as usize * plan.missing, 0u8);

    let total_data =
        block_size * plan.input_blocks.len() as u64 * plan.missing.max(1) as u64;
    let mut processed = 0u64;
    let mut total_written = 0u64;

    // Write handles stay open across chunks; this is why the
    // orchestrator raises the fd limit before repair.
    let mut writers: FxHashMap<DiskFileId, File> = FxHashMap::default();
    let mut reader: Option<(DiskFileId, File)> = None;

    let mut block_offset = 0u64;
    while block_offset < block_size {
        let chunk_length = chunk_size.min(block_size - block_offset) as usize;

        output_buffer.fill(0);

        for (input_index, input) in plan.input_blocks.iter().enumerate() {
            let copy = plan.copy_blocks.get(input_index).copied();
            if plan.missing == 0 && !copy.is_some_and(|c| c.is_set()) {
                // Pure copy pass; nothing to read for intact files.
                continue;
            }

            let location = input
                .location()
                .ok_or_else(|| RepairError::Logic("unlocated input block".into()))?;

            // Inputs arrive grouped by file; keep one file open at a
            // time, in sequence.
            if reader.as_ref().map(|(id, _)| *id) != Some(location.file) {
                let file = arena.lock().unwrap().open_read(location.file)?;
                reader = Some((location.file, file));
            }
            let file = &mut reader.as_mut().unwrap().1;

            let wanted = (input.length().saturating_sub(block_offset)).min(chunk_length as u64) as usize;
            if wanted > 0 {
                let got = disk::read_at(file, location.offset + block_offset, &mut input_buffer[..wanted])?;
                if got != wanted {
                    return Err(RepairError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "input block shorter than expected",
                    )));
                }
            }
            input_buffer[wanted..chunk_length].fill(0);

            // Straight copy into the rebuilt file, when needed.
            if let Some(copy) = copy {
                if let Some(copy_location) = copy.location() {
                    let write_length =
                        (copy.length().saturating_sub(block_offset)).min(chunk_length as u64) as usize;
                    if write_length > 0 {
                        let writer = open_writer(&mut writers, arena, copy_location.file)?;
                        disk::write_at(
                            writer,
                            copy_location.offset + block_offset,
                            &input_buffer[..write_length],
                        )?;
                        total_written += write_length as u64;
                    }
                }
            }

            // Fan this chunk out across every output. Each rayon
            // worker owns a disjoint slice of the output buffer.
            if plan.missing > 0 {
                let input_chunk = &input_buffer[..chunk_length];
                output_buffer
                    .par_chunks_mut(chunk_size as usize)
                    .enumerate()
                    .for_each(|(output_index, out)| {
                        rs.process(input_index, input_chunk, output_index, &mut out[..chunk_length]);
                    });
            }

            processed += chunk_length as u64 * plan.missing.max(1) as u64;
            reporter.progress("Repairing", (1000 * processed / total_data) as u32);
        }

        // Write the recomputed chunks.
        for (output_index, output) in plan.output_blocks.iter().enumerate() {
            let location = output
                .location()
                .ok_or_else(|| RepairError::Logic("unlocated output block".into()))?;
            let write_length =
                (output.length().saturating_sub(block_offset)).min(chunk_length as u64) as usize;
            if write_length == 0 {
                continue;
            }
            let start = output_index * chunk_size as usize;
            let writer = open_writer(&mut writers, arena, location.file)?;
            disk::write_at(
                writer,
                location.offset + block_offset,
                &output_buffer[start..start + write_length],
            )?;
            total_written += write_length as u64;
        }

        block_offset += chunk_length as u64;
    }
    reporter.progress_done();

    Ok(total_written)
}

fn open_writer<'a>(
    writers: &'a mut FxHashMap<DiskFileId, File>,
    arena: &Mutex<DiskFileArena>,
    id: DiskFileId,
) -> Result<&'a mut File, RepairError> {
    if !writers.contains_key(&id) {
        let file = arena.lock().unwrap().open_write(id)?;
        writers.insert(id, file);
    }
    Ok(writers.get_mut(&id).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_honors_memory_limit() {
        assert_eq!(choose_chunk_size(4096, 0, 1), 4096);
        assert_eq!(choose_chunk_size(4096, 2, 1 << 20), 4096);
        // 10 missing blocks against a 10 KiB budget: 1024 each, and
        // the result stays 4-byte aligned.
        assert_eq!(choose_chunk_size(4096, 10, 10 * 1024), 1024);
        assert_eq!(choose_chunk_size(4096, 3, 4097), 1364);
        assert_eq!(choose_chunk_size(4096, 4096, 2), 0);
    }

    #[test]
    fn plan_partitions_blocks() {
        let mut source = vec![DataBlock::new(100); 4];
        let target = vec![DataBlock::new(100); 4];
        // Partitioning only inspects locations, so one registered
        // file serves every block.
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("x");
        std::fs::write(&path, b"x").unwrap();
        let mut arena = DiskFileArena::new();
        let file_id = arena.insert(&path, 1).unwrap();

        source[0].set_location(file_id, 0);
        source[2].set_location(file_id, 100);

        let mut recovery = BTreeMap::new();
        let mut rec_block = DataBlock::new(100);
        rec_block.set_location(file_id, 300);
        recovery.insert(7u32, rec_block);
        let mut rec_block2 = DataBlock::new(100);
        rec_block2.set_location(file_id, 400);
        recovery.insert(9u32, rec_block2);

        let (plan, rs) = build_plan(&source, &target, &recovery).unwrap();
        assert_eq!(plan.available, 2);
        assert_eq!(plan.missing, 2);
        assert_eq!(plan.input_blocks.len(), 4);
        assert_eq!(plan.copy_blocks.len(), 2);
        assert_eq!(plan.output_blocks.len(), 2);
        assert_eq!(rs.missing_count(), 2);
    }
}
