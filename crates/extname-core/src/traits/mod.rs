//! Core traits for the extname system
//!
//! These are the capability boundaries the core talks through.
//!
//! - [`RecordStore`]: Read and conditionally write the managed record
//! - [`AddressSource`]: Fetch the current candidate address

pub mod address_source;
pub mod record_store;

pub use address_source::AddressSource;
pub use record_store::{
    ManagedRecord, RecordStore, ServiceRef, is_valid_namespace, is_valid_service_name,
};
