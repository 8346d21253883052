//! Record store implementations bundled with the core
//!
//! The Kubernetes-backed store lives in `extname-store-kube`.

pub mod memory;

pub use memory::MemoryRecordStore;
