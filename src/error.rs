use thiserror::Error;

#[derive(Error, Debug)]
pub enum TwoPhaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("object not in prerequisite state: {0}")]
    ObjectNotInPrerequisiteState(String),

    #[error("duplicate object: {0}")]
    DuplicateObject(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("undefined object: {0}")]
    UndefinedObject(String),

    #[error("insufficient privilege: {0}")]
    InsufficientPrivilege(String),

    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),

    #[error("data corrupted: {0} (operator hint: check WAL/storage integrity; failover may be required)")]
    DataCorrupted(String),

    #[error("program limit exceeded: {0}")]
    ProgramLimitExceeded(String),

    #[error("PANIC: {0} (on-disk state is ahead of memory; process must restart and replay recovery)")]
    Panic(String),

    #[error("WAL error: {0}")]
    Wal(String),
}

pub type Result<T> = std::result::Result<T, TwoPhaseError>;
