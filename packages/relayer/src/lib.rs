//! Sifchain Peggy bridge relayer - Library interface
//!
//! Re-exports internal modules for use by the binary and integration tests.

pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod contracts;
pub mod destination;
pub mod listener;
pub mod metrics;
pub mod replay;
pub mod scanner;
pub mod server;
pub mod source;
pub mod submitter;
pub mod supervisor;
pub mod types;

// In-memory ledgers (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;
