//! Progress and result reporting.
//!
//! All user-facing output flows through the [`Reporter`] trait so the
//! orchestrator and its rayon workers never print directly. The
//! console implementation reproduces the classic par2 message style
//! and gates everything on the noise level; the silent implementation
//! keeps tests quiet.

mod console;
mod silent;

pub use console::ConsoleReporter;
pub use silent::SilentReporter;

/// How chatty the program should be. Ordering matters: each level
/// includes everything below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoiseLevel {
    Silent,
    Quiet,
    Normal,
    Noisy,
    Debug,
}

/// Sink for all user-visible output. Implementations must be safe to
/// share across the scanner's worker threads.
pub trait Reporter: Send + Sync {
    /// Major state line ("Repair is required.", "Repair complete.").
    /// Suppressed only at Silent.
    fn headline(&self, text: &str);

    /// Statistics and per-file load results. Suppressed at Quiet and
    /// below.
    fn info(&self, text: &str);

    /// Per-file verification state ("Target: \"x\" - missing.").
    /// Suppressed only at Silent.
    fn file_state(&self, text: &str);

    /// Problems that do not stop the run (discarded packets,
    /// unreadable candidate files). Always emitted, on stderr.
    fn warning(&self, text: &str);

    /// Throttled percentage line ("Scanning", "Repairing"). The
    /// fraction is in 0.1% steps; implementations deduplicate.
    fn progress(&self, label: &str, permille: u32);

    /// Clear any pending progress line.
    fn progress_done(&self);
}
