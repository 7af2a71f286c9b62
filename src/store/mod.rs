//! Storage backends
//!
//! - `memory` - Concurrent in-memory ledger and journal (always available)
//! - `mongo` - MongoDB replica-set backend (feature `mongodb`)

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

pub use memory::{MemorySession, MemoryStore};
#[cfg(feature = "mongodb")]
pub use mongo::{MongoConfig, MongoStore};
