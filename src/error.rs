//! Error taxonomy and exit-status mapping.
//!
//! Leaf operations return `RepairError`; only the orchestrator turns
//! an error (or a verification outcome) into a `Status`, which is
//! what the binary hands back to the shell.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("main packet not found")]
    MissingMainPacket,

    #[error("invalid block size {0} in main packet")]
    InvalidBlockSize(u64),

    #[error("no details available for recoverable file number {0}")]
    MissingFileDetails(usize),

    #[error("Reed-Solomon matrix is singular")]
    SingularMatrix,

    #[error("could not allocate buffer memory")]
    Memory,

    #[error("internal error: {0}")]
    Logic(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepairError {
    pub fn status(&self) -> Status {
        match self {
            RepairError::MissingMainPacket
            | RepairError::InvalidBlockSize(_)
            | RepairError::MissingFileDetails(_) => Status::InsufficientCriticalData,
            RepairError::SingularMatrix | RepairError::Logic(_) => Status::LogicError,
            RepairError::Memory => Status::MemoryError,
            RepairError::Io(_) => Status::FileIoError,
        }
    }
}

/// Process outcome, in the order of the documented exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// All files verified, or repair succeeded.
    Success,
    /// Repair is needed and possible, but was not requested.
    RepairPossible,
    /// Not enough recovery blocks to repair.
    RepairNotPossible,
    /// Repair ran but the rebuilt files did not verify.
    RepairFailed,
    FileIoError,
    LogicError,
    MemoryError,
    InvalidCommandLine,
    /// Critical packets (main packet, file descriptions) missing.
    InsufficientCriticalData,
}

impl Status {
    pub fn exit_code(&self) -> i32 {
        match self {
            Status::Success => 0,
            Status::RepairPossible => 1,
            Status::RepairNotPossible => 2,
            Status::RepairFailed => 3,
            Status::FileIoError => 4,
            Status::LogicError => 5,
            Status::MemoryError => 6,
            Status::InvalidCommandLine => 7,
            Status::InsufficientCriticalData => 8,
        }
    }
}
