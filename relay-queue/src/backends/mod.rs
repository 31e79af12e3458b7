//! Record and blob store implementations
//!
//! - `memory`: in-process maps, for tests and spool-less runs
//! - `file`: directory-backed stores for production
//! - `test`: memory stores with switchable failures

pub mod file;
pub mod memory;
pub mod test;

pub use file::{FileBlobStore, FileRecordStore};
pub use memory::{MemoryBlobStore, MemoryRecordStore};
pub use test::{TestBlobStore, TestRecordStore};
