// # Address Source Trait
//
// Defines the interface for asking an external service "what is my address".
//
// ## Implementations
//
// - HTTP text fetch (icanhazip.com and friends): `extname-ip-http` crate
//
// ## Usage
//
// ```rust,ignore
// use extname_core::{address, AddressSource};
//
// let raw = source.current().await?;
// let addr = address::validate(&raw)?;
// ```

use async_trait::async_trait;

/// Trait for address source implementations
///
/// A source reports the raw candidate text exactly as the external service
/// returned it. It does not validate, cache, or compare; those decisions
/// belong to the [`crate::poller::Poller`].
///
/// Implementations must bound every call with a timeout so that an
/// unresponsive service cannot pile up stuck poll ticks.
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Fetch the current candidate address
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The raw response text (untrimmed, unvalidated)
    /// - `Err(Error)`: Transport failure, non-success status, or timeout
    async fn current(&self) -> Result<String, crate::Error>;

    /// Short name used in logs
    fn source_name(&self) -> &str {
        "address-source"
    }
}
