//! Storage front end for hearth
//!
//! This crate wires the durability layer into a usable store:
//!
//! - `WalDriver`: lifecycle owner: cache hydration on open, totally
//!   ordered commits, snapshot scheduling, compaction triggers, blobs
//! - `Transaction`: buffered ops with read-your-writes semantics
//! - `MaintenanceRunner`: the background thread cleanup and snapshots
//!   run on
//! - `StorageDriver` and the driver-kind marker: the seam between engine
//!   variants; only the WAL variant lives here

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod driver;
pub mod maintenance;
pub mod registry;
pub mod transaction;

pub use blob::BlobStore;
pub use driver::{DriverConfig, WalDriver};
pub use maintenance::{MaintenanceClosed, MaintenanceRunner};
pub use registry::{
    read_marker, verify_wal_marker, DriverKind, StorageDriver, DRIVER_MARKER_FILENAME,
};
pub use transaction::Transaction;
