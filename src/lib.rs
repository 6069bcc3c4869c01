//! twophase-core: the in-memory coordination core of a two-phase-commit
//! subsystem embedded in a transactional database.
//!
//! This crate owns GID reservation, the shared table of in-flight prepared
//! transactions, the on-disk prepare-record binary layout, the commit/
//! rollback state machine, and crash recovery via post-checkpoint-index
//! replay. Everything else a PREPARE/COMMIT PREPARED/ROLLBACK PREPARED
//! implementation needs — the WAL writer, the commit log, the process
//! array, storage-file unlinking, subtransaction tracking, resource-manager
//! callbacks, and distributed-transaction GID cracking — is modeled as a
//! collaborator trait in [`collab`]; a file-backed WAL and in-memory
//! defaults for the rest ship in this crate so [`TwoPhaseCoordinator`] is
//! runnable end-to-end without a host database.

pub mod backend;
pub mod checkpoint;
pub mod collab;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gxact;
pub mod ids;
pub mod payload;
pub mod recovery;
pub mod view;
pub mod wal;

pub use backend::BackendLockedGXact;
pub use checkpoint::PostCheckpointIndex;
pub use config::TwoPhaseConfig;
pub use coordinator::{PrepareInput, RmInput, TwoPhaseCoordinator};
pub use error::{Result, TwoPhaseError};
pub use gxact::{GXactRef, GXactTable};
pub use view::{list_prepared_xacts, PreparedXactRow};
