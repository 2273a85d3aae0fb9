#![warn(missing_docs)]

//! StrataFS engine: sessions, watcher, and the filesystem facade.
//!
//! Callers interact with [`StrataFs`], which resolves each operation to
//! the registered domain's backend adapter. Writer sessions implement
//! the staged-commit protocol (lock, stage, measure, push, record);
//! reader sessions serve committed content; the sync watcher reconciles
//! external changes on locally backed domains. Everything here is
//! synchronous and caller-driven.

pub mod facade;
pub mod reader;
pub mod watcher;
pub mod writer;

pub use facade::StrataFs;
pub use reader::ReaderSession;
pub use watcher::{SyncWatcher, WatcherStats};
pub use writer::WriterSession;
