//! Sync record stores.
//!
//! | Store | Durability |
//! |-------|------------|
//! | [`MemoryRecordStore`] | process lifetime; tests and dry runs |
//! | [`JsonFileStore`] | a JSON file replaced atomically on every write |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Implements [`pipeline::SyncRecordStore`]; contains no
//! synchronization rules.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryRecordStore;
