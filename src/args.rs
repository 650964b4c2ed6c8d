//! Command-line surface.
//!
//! `par2mend verify <file.par2> [files...]` checks a recovery set;
//! `par2mend repair` does the same and then rebuilds whatever is
//! missing or damaged. Creation of recovery data and the legacy PAR1
//! format are out of scope, so there is deliberately no `create`
//! subcommand.

use clap::{Args, Parser, Subcommand};
use rustc_hash::FxHashSet;
use std::path::PathBuf;

use crate::repairer::Options;
use crate::reporters::NoiseLevel;

#[derive(Parser)]
#[command(
    name = "par2mend",
    version,
    about = "PAR2 recovery-set verifier and repairer"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Verify files against a PAR2 recovery set
    #[command(alias = "v")]
    Verify(TaskArgs),
    /// Verify, then repair damaged or missing files
    #[command(alias = "r")]
    Repair(TaskArgs),
}

#[derive(Args)]
pub struct TaskArgs {
    /// Working-memory limit for repair, in MiB
    #[arg(short = 'm', long = "memory", value_name = "MIB", default_value_t = 64)]
    pub memory_mib: u64,

    /// Print less (-q) or nothing at all (-qq)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Print more (-v) or debug detail (-vv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Treat the named target file as intact without reading it
    #[arg(long = "assume-ok", value_name = "NAME")]
    pub assume_ok: Vec<String>,

    /// The PAR2 index file
    pub par2_file: PathBuf,

    /// Extra files to scan for recoverable data
    pub extra_files: Vec<PathBuf>,
}

impl TaskArgs {
    pub fn noise_level(&self) -> NoiseLevel {
        match (self.quiet, self.verbose) {
            (q, _) if q >= 2 => NoiseLevel::Silent,
            (1, _) => NoiseLevel::Quiet,
            (_, 0) => NoiseLevel::Normal,
            (_, 1) => NoiseLevel::Noisy,
            _ => NoiseLevel::Debug,
        }
    }

    pub fn options(&self) -> Options {
        Options {
            par2_file: self.par2_file.clone(),
            extra_files: self.extra_files.clone(),
            memory_limit: self.memory_mib.saturating_mul(1024 * 1024),
            trusted_files: self.assume_ok.iter().cloned().collect::<FxHashSet<_>>(),
        }
    }
}
