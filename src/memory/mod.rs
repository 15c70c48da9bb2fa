//! Durable associative memory: symbol records, blob persistence, and the
//! dual-write vault.

pub mod blob;
pub mod store;
pub mod types;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use store::MemoryStore;
pub use types::MemorySymbol;
