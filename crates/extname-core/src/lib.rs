// # extname-core
//
// Core library for keeping a Kubernetes ExternalName Service pointed at a
// dynamic IPv4 address.
//
// ## Architecture Overview
//
// - **address**: Validates candidate addresses (IPv4 literals only)
// - **ChangeDetector**: Remembers the last applied address on the poll path
// - **RecordStore**: Trait for reading and version-checked writing of the record
// - **Updater**: Optimistic-concurrency read-modify-write with bounded retry
// - **AddressSource**: Trait for asking "what is my address"
// - **Poller**: Timer-driven loop feeding the source into the updater
//
// The push receiver (`extname-webhook`) calls `address::validate` and
// `Updater::apply` directly and never touches the detector.
//
// ## Design Principles
//
// 1. **Never write an unchanged or malformed address**
// 2. **Never clobber concurrent edits**: every write is version-checked
// 3. **Never livelock**: conflicts are retried a bounded number of times
// 4. **Never block forever**: every external call carries a timeout

pub mod address;
pub mod config;
pub mod detector;
pub mod error;
pub mod poller;
pub mod store;
pub mod traits;
pub mod updater;

// Re-export core types for convenience
pub use address::Address;
pub use config::{AddressSourceConfig, ReceiverConfig, RetryConfig, StoreConfig, SyncConfig};
pub use detector::ChangeDetector;
pub use error::{Error, Result};
pub use poller::{Poller, TickOutcome};
pub use store::MemoryRecordStore;
pub use traits::{AddressSource, ManagedRecord, RecordStore, ServiceRef};
pub use updater::{Applied, RetryPolicy, Updater};
