//! PAR2 recovery-set verifier and repairer.
//!
//! Given a `.par2` index file and its sibling volumes, this crate
//! determines which protected files are intact, locates surviving
//! data blocks anywhere inside damaged, renamed or concatenated
//! candidates with a sliding-window CRC32+MD5 scan, and rebuilds
//! missing blocks with Reed–Solomon coding over GF(2^16).

pub mod args;
pub mod block;
pub mod checksum;
pub mod crc;
pub mod disk;
pub mod domain;
pub mod error;
pub mod galois;
pub mod packets;
pub mod repair;
pub mod repairer;
pub mod reporters;
pub mod scanner;
pub mod set_loader;
pub mod source_file;

pub use error::{RepairError, Status};
pub use repairer::{run, Options, Repairer, VerifyCounts};
pub use reporters::{ConsoleReporter, NoiseLevel, Reporter, SilentReporter};
