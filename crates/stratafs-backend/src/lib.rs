#![warn(missing_docs)]

//! StrataFS backend subsystem: per-backend adapters behind one capability
//! interface.
//!
//! Three variants implement the same contract: direct local I/O (the
//! staging file is the final file), memory-mapped local I/O (mapped
//! regions with explicit cursors), and remote object-store I/O (true
//! temp staging plus network transfer). Sessions depend only on the
//! [`BackendAdapter`] trait.

pub mod adapter;
pub mod compression;
pub mod descriptor;
pub mod local;
pub mod mapped;
pub mod remote;
pub mod staging;

pub use adapter::{BackendAdapter, FileWriteChannel, ReadChannel, WriteChannel};
pub use compression::{compress, compress_file, decompress, decompress_file, CompressionAlgorithm};
pub use descriptor::PathDescriptor;
pub use local::LocalAdapter;
pub use mapped::{MappedAdapter, MappedReadRegion, MappedWriteRegion};
pub use remote::{MemoryObjectStore, MemoryObjectStoreStats, ObjectStore, RemoteAdapter};
pub use staging::StagingArea;
