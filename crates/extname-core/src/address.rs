//! Address validation
//!
//! Every candidate address, whether it came from the poller's address source
//! or from a push request, passes through [`validate`] before anything else
//! looks at it. Only IPv4 host literals are accepted; the validated value is
//! kept in normalized textual form.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::{Error, Result};

/// A validated IPv4 address in normalized form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    ip: Ipv4Addr,
    text: String,
}

impl Address {
    /// The normalized textual form
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The parsed IPv4 value
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            text: ip.to_string(),
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        validate(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// Validate a raw candidate address
///
/// Surrounding whitespace is trimmed. The remainder must parse as an IP
/// literal expressible in four octets; IPv6 literals (including
/// IPv4-mapped ones) are rejected rather than converted.
///
/// # Example
///
/// ```rust
/// use extname_core::address::validate;
///
/// let addr = validate(" 12.34.56.78\n").unwrap();
/// assert_eq!(addr.as_str(), "12.34.56.78");
/// assert!(validate("::1").is_err());
/// ```
pub fn validate(raw: &str) -> Result<Address> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_address("empty address"));
    }

    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(Address::from(ip)),
        Ok(IpAddr::V6(ip)) => Err(Error::invalid_address(format!(
            "{} is not an IPv4 address",
            ip
        ))),
        Err(_) => Err(Error::invalid_address(format!(
            "{:?} is not an IP address",
            trimmed
        ))),
    }
}
