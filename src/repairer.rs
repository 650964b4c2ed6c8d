//! The orchestrator: drives loading, verification and repair in
//! order, owns every piece of shared state, and is the only place
//! that turns results into user-visible messages and exit statuses.

use log::debug;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::block::DataBlock;
use crate::checksum::compute_md5;
use crate::crc::{compute_window_mask, generate_window_table};
use crate::disk::{self, DiskFileArena, DiskFileId};
use crate::error::{RepairError, Status};
use crate::repair::{build_plan, execute_plan};
use crate::reporters::Reporter;
use crate::scanner::{hash_file_contents, MatchType, ScanOutcome, Scanner, VerificationHashTable};
use crate::set_loader::{LoadedSet, SetLoader};
use crate::source_file::{SharedState, SourceFileTable};

/// Everything the caller chooses; the CLI maps straight onto this.
pub struct Options {
    pub par2_file: PathBuf,
    pub extra_files: Vec<PathBuf>,
    /// Repair working-memory budget in bytes.
    pub memory_limit: u64,
    /// Target file names accepted as intact without reading them.
    pub trusted_files: FxHashSet<String>,
}

impl Options {
    pub fn new(par2_file: PathBuf) -> Self {
        Options {
            par2_file,
            extra_files: Vec::new(),
            memory_limit: 64 * 1024 * 1024,
            trusted_files: FxHashSet::default(),
        }
    }
}

/// Verification bookkeeping over the recoverable files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VerifyCounts {
    pub complete_files: usize,
    pub renamed_files: usize,
    pub damaged_files: usize,
    pub missing_files: usize,
    pub available_blocks: usize,
    pub missing_blocks: usize,
}

/// One verify/repair invocation.
pub struct Repairer<'r> {
    options: Options,
    reporter: &'r dyn Reporter,
    arena: Mutex<DiskFileArena>,
    set: LoadedSet,
    table: SourceFileTable,
    shared: Mutex<SharedState>,
    target_blocks: Vec<DataBlock>,
    hash_table: VerificationHashTable,
    window_table: Box<[u32; 256]>,
    window_mask: u32,
    block_size: u64,
    has_unverifiable: bool,
    counts: VerifyCounts,
    /// Files created during repair, re-verified at the end.
    verify_list: Vec<usize>,
    /// Set by workers on read failures; reaped between phases.
    scan_failed: AtomicBool,
}

/// Load a set and verify it, repairing when `do_repair` is set.
/// This is the whole-program entry point: every error is translated
/// into its exit status here.
pub fn run(options: Options, do_repair: bool, reporter: &dyn Reporter) -> Status {
    match Repairer::new(options, reporter) {
        Ok(mut repairer) => match repairer.process(do_repair) {
            Ok(status) => status,
            Err(error) => {
                reporter.warning(&error.to_string());
                error.status()
            }
        },
        Err(error) => {
            reporter.warning(&error.to_string());
            error.status()
        }
    }
}

impl<'r> Repairer<'r> {
    /// Load packets, reconcile the set, and build every read-only
    /// structure verification needs.
    pub fn new(options: Options, reporter: &'r dyn Reporter) -> Result<Self, RepairError> {
        let search_path = match options.par2_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut arena = DiskFileArena::new();
        let mut set =
            SetLoader::new(&mut arena, reporter).load(&options.par2_file, &options.extra_files);

        if set.main.is_none() {
            reporter.warning("Main packet not found.");
        }
        set.consistency_sweep(reporter)?;
        let main = set.main.as_ref().unwrap();
        let block_size = main.block_size;

        reporter.info(&format!(
            "There are {} recoverable files and {} other files.",
            main.file_ids.len(),
            main.non_recoverable_ids.len()
        ));
        reporter.info(&format!("The block size used was {} bytes.", block_size));

        let mut packets = std::mem::take(&mut set.source_packets);
        let (table, shared, target_blocks) =
            SourceFileTable::build(main, &mut packets, &search_path, block_size);

        reporter.info(&format!(
            "There are a total of {} data blocks.",
            table.total_source_blocks
        ));
        reporter.info(&format!(
            "The total size of the data files is {} bytes.",
            table.total_data_size
        ));

        let hash_table = VerificationHashTable::build(&table, block_size);
        let has_unverifiable = table
            .recoverable()
            .any(|(_, meta)| meta.verification.is_none());

        // The sliding window only exists when some file is block
        // verifiable; building the table costs 256 CRC passes over
        // one blocksize.
        let (window_table, window_mask) = if hash_table.is_empty() {
            (Box::new([0u32; 256]), 0)
        } else {
            (
                generate_window_table(block_size),
                compute_window_mask(block_size),
            )
        };

        Ok(Repairer {
            options,
            reporter,
            arena: Mutex::new(arena),
            set,
            table,
            shared: Mutex::new(shared),
            target_blocks,
            hash_table,
            window_table,
            window_mask,
            block_size,
            has_unverifiable,
            counts: VerifyCounts::default(),
            verify_list: Vec::new(),
            scan_failed: AtomicBool::new(false),
        })
    }

    pub fn counts(&self) -> VerifyCounts {
        self.counts
    }

    pub fn duplicate_exponents(&self) -> u64 {
        self.set.duplicate_exponents
    }

    pub fn recovery_block_count(&self) -> usize {
        self.set.recovery_blocks.len()
    }

    /// Verify, and repair when requested. The returned status is the
    /// process exit status.
    pub fn process(&mut self, do_repair: bool) -> Result<Status, RepairError> {
        // Every recoverable file needs its description packet.
        for index in 0..self.table.recoverable_count {
            if self.table.files[index].is_none() {
                self.reporter.warning(&format!(
                    "No details available for recoverable file number {}.",
                    index + 1
                ));
                self.reporter.warning("Recovery will not be possible.");
                return Err(RepairError::MissingFileDetails(index + 1));
            }
        }

        self.reporter.info("");
        self.reporter.info("Verifying source files:");
        self.reporter.info("");
        self.verify_source_files();
        if self.scan_failed.swap(false, Ordering::SeqCst) {
            return Ok(Status::FileIoError);
        }
        self.counts = self.compute_counts();

        if self.counts.complete_files < self.table.recoverable_count
            && self
                .options
                .extra_files
                .iter()
                .any(|path| !looks_like_par2(path))
        {
            self.reporter.info("");
            self.reporter.info("Scanning extra files:");
            self.reporter.info("");
            self.verify_extra_files();
            self.counts = self.compute_counts();
        }

        let repair_needed = self.report_verification_results();
        if !repair_needed {
            return Ok(Status::Success);
        }
        if self.recovery_block_count() < self.counts.missing_blocks {
            return Ok(Status::RepairNotPossible);
        }
        if !do_repair {
            return Ok(Status::RepairPossible);
        }
        self.repair()
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    fn scanner(&self) -> Scanner<'_> {
        Scanner {
            files: &self.table,
            hash_table: &self.hash_table,
            shared: &self.shared,
            window_table: &self.window_table,
            window_mask: self.window_mask,
            block_size: self.block_size,
            reporter: self.reporter,
        }
    }

    /// Scan every recoverable file's expected target, in parallel.
    fn verify_source_files(&self) {
        // Deterministic scan order: sorted by target name, as ties
        // between identical blocks favor earlier claims.
        let mut order: Vec<usize> = (0..self.table.recoverable_count).collect();
        order.sort_by_key(|&i| self.table.files[i].as_ref().map(|m| m.target_name()));

        order.into_par_iter().for_each(|index| {
            if let Err(error) = self.verify_one_source_file(index) {
                self.reporter.warning(&format!(
                    "Could not read \"{}\": {}",
                    self.table.files[index].as_ref().unwrap().target_name(),
                    error
                ));
                self.scan_failed.store(true, Ordering::SeqCst);
            }
        });
    }

    fn verify_one_source_file(&self, index: usize) -> Result<(), RepairError> {
        let meta = self.table.files[index].as_ref().unwrap();
        let name = meta.target_name();
        let path = &meta.target_path;

        let disk_id = {
            let mut arena = self.arena.lock().unwrap();
            if arena.contains(path) {
                self.reporter
                    .warning(&format!("Source file \"{}\" is a duplicate.", name));
                self.scan_failed.store(true, Ordering::SeqCst);
                return Ok(());
            }
            let Ok(metadata) = std::fs::metadata(path) else {
                drop(arena);
                self.reporter
                    .file_state(&format!("Target: \"{}\" - missing.", name));
                return Ok(());
            };
            arena.insert(path, metadata.len())
        };
        let Some(disk_id) = disk_id else {
            return Ok(());
        };

        {
            let mut shared = self.shared.lock().unwrap();
            shared.files[index].target_exists = true;
            shared.files[index].target_file = Some(disk_id);
        }

        if self.options.trusted_files.contains(&name) {
            self.scanner().assign_trusted(disk_id, index);
            self.reporter
                .file_state(&format!("Target: \"{}\" - found.", name));
            return Ok(());
        }

        let file_size = self.arena.lock().unwrap().get(disk_id).size();
        if file_size == 0 {
            self.reporter
                .file_state(&format!("Target: \"{}\" - empty.", name));
            return Ok(());
        }

        let outcome = self.scan_candidate(disk_id, path, file_size, Some(index))?;
        self.report_scan_outcome(true, &name, Some(index), file_size, &outcome);
        Ok(())
    }

    /// Scan the extra candidate files, stopping early once enough
    /// data has been recovered. The stop flag is advisory; tasks
    /// already running finish their file.
    fn verify_extra_files(&self) {
        let keep_going = AtomicBool::new(true);
        let extra: Vec<&PathBuf> = self
            .options
            .extra_files
            .iter()
            .filter(|path| !looks_like_par2(path))
            .collect();

        extra.into_par_iter().for_each(|path| {
            if !keep_going.load(Ordering::SeqCst) {
                return;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let disk_id = {
                let mut arena = self.arena.lock().unwrap();
                if arena.contains(path) {
                    return;
                }
                let Ok(metadata) = std::fs::metadata(path) else {
                    return;
                };
                arena.insert(path, metadata.len())
            };
            let Some(disk_id) = disk_id else { return };

            let file_size = self.arena.lock().unwrap().get(disk_id).size();
            if file_size == 0 {
                self.reporter
                    .file_state(&format!("File: \"{}\" - empty.", name));
                return;
            }

            match self.scan_candidate(disk_id, path, file_size, None) {
                Ok(outcome) => {
                    self.report_scan_outcome(false, &name, None, file_size, &outcome);
                    let counts = self.compute_counts();
                    if counts.complete_files + counts.renamed_files >= self.table.recoverable_count
                    {
                        keep_going.store(false, Ordering::SeqCst);
                    }
                }
                Err(error) => {
                    self.reporter
                        .warning(&format!("Could not read \"{}\": {}", name, error));
                }
            }
        });
    }

    /// Unified candidate verification: sliding scan when any file is
    /// block verifiable, then the whole-file fallback for files that
    /// only have a description packet.
    fn scan_candidate(
        &self,
        disk_id: DiskFileId,
        path: &Path,
        file_size: u64,
        preferred: Option<usize>,
    ) -> Result<ScanOutcome, RepairError> {
        let mut outcome = if !self.hash_table.is_empty() {
            self.scanner().scan_file(disk_id, path, file_size, preferred)?
        } else {
            let (hash_full, hash_16k, _) = hash_file_contents(File::open(path)?)?;
            ScanOutcome {
                match_type: MatchType::NoMatch,
                matched_file: None,
                block_count: 0,
                duplicate_count: 0,
                multiple_files: false,
                hash_full,
                hash_16k,
            }
        };

        if outcome.match_type == MatchType::NoMatch && self.has_unverifiable {
            if let Some(index) = self.scanner().match_unverifiable(
                disk_id,
                file_size,
                &outcome.hash_full,
                &outcome.hash_16k,
            ) {
                outcome.match_type = MatchType::FullMatch;
                outcome.matched_file = Some(index);
                outcome.block_count =
                    self.table.files[index].as_ref().unwrap().block_count as u32;
            }
        }
        Ok(outcome)
    }

    fn report_scan_outcome(
        &self,
        is_target: bool,
        name: &str,
        preferred: Option<usize>,
        _file_size: u64,
        outcome: &ScanOutcome,
    ) {
        let prefix = if is_target { "Target" } else { "File" };
        match outcome.match_type {
            MatchType::FullMatch => {
                let matched = outcome.matched_file.unwrap();
                if preferred == Some(matched) {
                    self.reporter
                        .file_state(&format!("{}: \"{}\" - found.", prefix, name));
                } else {
                    let target = self.table.files[matched].as_ref().unwrap().target_name();
                    self.reporter.file_state(&format!(
                        "{}: \"{}\" - is a match for \"{}\".",
                        prefix, name, target
                    ));
                }
            }
            MatchType::PartialMatch => {
                let matched = outcome.matched_file.unwrap();
                if outcome.multiple_files {
                    self.reporter.file_state(&format!(
                        "{}: \"{}\" - damaged, found {} data blocks from several target files.",
                        prefix, name, outcome.block_count
                    ));
                } else {
                    let meta = self.table.files[matched].as_ref().unwrap();
                    if preferred == Some(matched) {
                        self.reporter.file_state(&format!(
                            "{}: \"{}\" - damaged. Found {} of {} data blocks.",
                            prefix, name, outcome.block_count, meta.block_count
                        ));
                    } else {
                        self.reporter.file_state(&format!(
                            "{}: \"{}\" - damaged. Found {} of {} data blocks from \"{}\".",
                            prefix,
                            name,
                            outcome.block_count,
                            meta.block_count,
                            meta.target_name()
                        ));
                    }
                }
            }
            MatchType::NoMatch => {
                if outcome.duplicate_count > 0 {
                    self.reporter.file_state(&format!(
                        "File: \"{}\" - found {} duplicate data blocks.",
                        name, outcome.duplicate_count
                    ));
                } else {
                    self.reporter
                        .file_state(&format!("File: \"{}\" - no data found.", name));
                }
            }
        }
    }

    fn compute_counts(&self) -> VerifyCounts {
        let shared = self.shared.lock().unwrap();
        self.compute_counts_locked(&shared)
    }

    fn compute_counts_locked(&self, shared: &SharedState) -> VerifyCounts {
        let mut counts = VerifyCounts::default();
        for (index, meta) in self.table.recoverable() {
            let state = &shared.files[index];
            if let Some(complete) = state.complete_file {
                if Some(complete) == state.target_file {
                    counts.complete_files += 1;
                } else {
                    counts.renamed_files += 1;
                }
                counts.available_blocks += meta.block_count;
            } else {
                counts.available_blocks += meta
                    .blocks()
                    .filter(|&g| shared.source_blocks[g].is_set())
                    .count();
                if state.target_exists {
                    counts.damaged_files += 1;
                } else {
                    counts.missing_files += 1;
                }
            }
        }
        counts.missing_blocks = self.table.total_source_blocks - counts.available_blocks;
        counts
    }

    /// Report the verification summary. Returns whether repair is
    /// needed at all.
    fn report_verification_results(&self) -> bool {
        let counts = self.counts;
        let recoverable = self.table.recoverable_count;
        let repair_needed = counts.complete_files < recoverable
            || counts.renamed_files > 0
            || counts.damaged_files > 0
            || counts.missing_files > 0;

        self.reporter.headline("");
        if !repair_needed {
            self.reporter
                .headline("All files are correct, repair is not required.");
            return false;
        }

        self.reporter.headline("Repair is required.");
        if counts.renamed_files > 0 {
            self.reporter
                .info(&format!("{} file(s) have the wrong name.", counts.renamed_files));
        }
        if counts.missing_files > 0 {
            self.reporter
                .info(&format!("{} file(s) are missing.", counts.missing_files));
        }
        if counts.damaged_files > 0 {
            self.reporter.info(&format!(
                "{} file(s) exist but are damaged.",
                counts.damaged_files
            ));
        }
        if counts.complete_files > 0 {
            self.reporter
                .info(&format!("{} file(s) are ok.", counts.complete_files));
        }
        self.reporter.info(&format!(
            "You have {} out of {} data blocks available.",
            counts.available_blocks, self.table.total_source_blocks
        ));
        if self.recovery_block_count() > 0 {
            self.reporter.info(&format!(
                "You have {} recovery blocks available.",
                self.recovery_block_count()
            ));
        }

        if self.recovery_block_count() >= counts.missing_blocks {
            self.reporter.headline("Repair is possible.");
            if self.recovery_block_count() > counts.missing_blocks {
                self.reporter.info(&format!(
                    "You have an excess of {} recovery blocks.",
                    self.recovery_block_count() - counts.missing_blocks
                ));
            }
            if counts.missing_blocks > 0 {
                self.reporter.info(&format!(
                    "{} recovery blocks will be used to repair.",
                    counts.missing_blocks
                ));
            } else {
                self.reporter
                    .info("None of the recovery blocks will be used for the repair.");
            }
        } else {
            self.reporter.headline("Repair is not possible.");
            self.reporter.headline(&format!(
                "You need {} more recovery blocks to be able to repair.",
                counts.missing_blocks - self.recovery_block_count()
            ));
        }
        repair_needed
    }

    // ------------------------------------------------------------------
    // Repair
    // ------------------------------------------------------------------

    fn repair(&mut self) -> Result<Status, RepairError> {
        disk::raise_file_limit(self.table.files.len() as u64 + 16);

        self.rename_target_files()?;
        self.counts = self.compute_counts();

        if self.counts.complete_files < self.table.recoverable_count {
            self.create_target_files()?;

            if let Err(error) = self.rebuild_and_verify() {
                self.delete_incomplete_targets();
                return Err(error);
            }
            self.counts = self.compute_counts();
        }

        if self.counts.complete_files >= self.table.recoverable_count {
            self.reporter.headline("");
            self.reporter.headline("Repair complete.");
            Ok(Status::Success)
        } else {
            // The partially repaired outputs are left on disk; they
            // may still be useful.
            self.reporter.warning("Repair Failed.");
            Ok(Status::RepairFailed)
        }
    }

    fn rebuild_and_verify(&mut self) -> Result<(), RepairError> {
        let source_blocks = {
            let shared = self.shared.lock().unwrap();
            shared.source_blocks.clone()
        };
        let (plan, rs) = build_plan(&source_blocks, &self.target_blocks, &self.set.recovery_blocks)?;

        let written = execute_plan(
            &plan,
            &rs,
            &self.arena,
            self.block_size,
            self.options.memory_limit,
            self.reporter,
        )?;
        self.reporter
            .info(&format!("Wrote {} bytes to disk", written));

        self.reporter.info("");
        self.reporter.info("Verifying repaired files:");
        self.reporter.info("");
        self.verify_target_files();
        if self.scan_failed.swap(false, Ordering::SeqCst) {
            return Err(RepairError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "repaired file could not be re-read",
            )));
        }
        Ok(())
    }

    /// Move damaged targets aside and put misnamed complete files in
    /// their expected place.
    fn rename_target_files(&mut self) -> Result<(), RepairError> {
        let mut shared = self.shared.lock().unwrap();
        let mut arena = self.arena.lock().unwrap();

        for index in 0..self.table.recoverable_count {
            let state = &mut shared.files[index];
            if state.target_exists && state.target_file != state.complete_file {
                let id = state.target_file.unwrap();
                let new_path = arena.rename_aside(id)?;
                debug!("moved damaged target aside to {}", new_path.display());
                state.target_exists = false;
                state.target_file = None;
            }
        }

        for index in 0..self.table.recoverable_count {
            let meta = self.table.files[index].as_ref().unwrap();
            let state = &mut shared.files[index];
            if state.target_file.is_none() {
                if let Some(id) = state.complete_file {
                    let old_name = arena.get(id).file_name();
                    arena.rename_to(id, &meta.target_path)?;
                    self.reporter.file_state(&format!(
                        "Renamed \"{}\" to \"{}\".",
                        old_name,
                        meta.target_name()
                    ));
                    state.target_exists = true;
                    state.target_file = Some(id);
                }
            }
        }
        Ok(())
    }

    /// Create missing target files and point their target blocks at
    /// the fresh file.
    fn create_target_files(&mut self) -> Result<(), RepairError> {
        let mut shared = self.shared.lock().unwrap();
        let mut arena = self.arena.lock().unwrap();

        for index in 0..self.table.recoverable_count {
            let meta = self.table.files[index].as_ref().unwrap();
            let state = &mut shared.files[index];
            if state.target_exists {
                continue;
            }
            let id = arena.create(&meta.target_path, meta.file_size())?;
            state.target_exists = true;
            state.target_file = Some(id);

            for (block_number, global) in meta.blocks().enumerate() {
                self.target_blocks[global].set_location(id, block_number as u64 * self.block_size);
            }
            self.verify_list.push(index);
        }
        self.verify_list.sort_by_key(|&i| {
            self.table.files[i]
                .as_ref()
                .map(|m| m.target_name())
                .unwrap_or_default()
        });
        Ok(())
    }

    /// Re-verify every file the repair created, exactly like the
    /// initial scan: clear its block locations and scan from scratch.
    fn verify_target_files(&self) {
        self.verify_list.par_iter().for_each(|&index| {
            let meta = self.table.files[index].as_ref().unwrap();
            let disk_id = {
                let mut shared = self.shared.lock().unwrap();
                for global in meta.blocks() {
                    shared.source_blocks[global].clear_location();
                }
                shared.files[index].complete_file = None;
                shared.files[index].target_file
            };
            let Some(disk_id) = disk_id else { return };

            let (path, file_size) = {
                let arena = self.arena.lock().unwrap();
                let file = arena.get(disk_id);
                (file.path().to_path_buf(), file.size())
            };

            match self.scan_candidate(disk_id, &path, file_size, Some(index)) {
                Ok(outcome) => {
                    self.report_scan_outcome(true, &meta.target_name(), Some(index), file_size, &outcome);
                }
                Err(error) => {
                    self.reporter.warning(&format!(
                        "Could not re-read \"{}\": {}",
                        meta.target_name(),
                        error
                    ));
                    self.scan_failed.store(true, Ordering::SeqCst);
                }
            }
        });
    }

    /// Remove every partly written target after a failed repair.
    fn delete_incomplete_targets(&mut self) {
        let mut shared = self.shared.lock().unwrap();
        let mut arena = self.arena.lock().unwrap();
        for &index in &self.verify_list {
            let state = &mut shared.files[index];
            if state.target_exists {
                if let Some(id) = state.target_file {
                    if let Err(error) = arena.delete(id) {
                        self.reporter.warning(&format!(
                            "Could not remove \"{}\": {}",
                            arena.get(id).file_name(),
                            error
                        ));
                    }
                }
                state.target_exists = false;
                state.target_file = None;
            }
        }
    }
}

fn looks_like_par2(path: &Path) -> bool {
    path.to_string_lossy().to_ascii_lowercase().contains(".par2")
}

/// MD5 of a whole on-disk file; handy for tests and callers wanting
/// an independent check of a repair.
pub fn file_md5(path: &Path) -> std::io::Result<crate::domain::Md5Hash> {
    let data = std::fs::read(path)?;
    Ok(compute_md5(&data))
}
