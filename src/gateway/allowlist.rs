//! IP allowlist matching.
//!
//! Entries are either a single address (`203.0.113.7`, `2001:db8::1`) or a
//! CIDR range (`203.0.113.0/24`, `2001:db8::/32`). Entries are parsed on
//! demand and evaluated in order; the first match wins.
//!
//! IPv4-mapped IPv6 addresses (`::ffff:203.0.113.7`) are compared as their
//! IPv4 form, so a dual-stack listener does not silently bypass IPv4 rules.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, error};

/// A malformed allowlist entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{entry}': {reason}")]
pub struct InvalidAddressEntry {
    /// The entry as written in configuration
    pub entry: String,
    /// Why it was rejected
    pub reason: String,
}

impl InvalidAddressEntry {
    fn new(entry: &str, reason: impl Into<String>) -> Self {
        Self {
            entry: entry.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parsed form of one allowlist entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRange {
    /// A single address, matched on equality
    Exact(IpAddr),
    /// A CIDR block; `base` has its host bits cleared
    Network {
        /// Network address
        base: IpAddr,
        /// Prefix length in bits
        prefix: u8,
    },
}

impl AddressRange {
    /// Whether `addr` is this address or falls inside this range
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        match *self {
            Self::Exact(expected) => expected.to_canonical() == addr,
            Self::Network { base, prefix } => match (base, addr) {
                (IpAddr::V4(base), IpAddr::V4(addr)) => {
                    let mask = v4_mask(prefix);
                    u32::from(base) & mask == u32::from(addr) & mask
                }
                (IpAddr::V6(base), IpAddr::V6(addr)) => {
                    let mask = v6_mask(prefix);
                    u128::from(base) & mask == u128::from(addr) & mask
                }
                _ => false,
            },
        }
    }
}

impl FromStr for AddressRange {
    type Err = InvalidAddressEntry;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entry = s.trim();

        let Some((base, prefix)) = entry.split_once('/') else {
            return entry
                .parse::<IpAddr>()
                .map(Self::Exact)
                .map_err(|_| InvalidAddressEntry::new(entry, "not a valid IP address"));
        };

        let base: IpAddr = base
            .parse()
            .map_err(|_| InvalidAddressEntry::new(entry, "invalid CIDR base address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| InvalidAddressEntry::new(entry, "invalid CIDR prefix length"))?;

        let base = match base {
            IpAddr::V4(v4) => {
                if prefix > 32 {
                    return Err(InvalidAddressEntry::new(
                        entry,
                        "IPv4 prefix length must be at most 32",
                    ));
                }
                IpAddr::V4((u32::from(v4) & v4_mask(prefix)).into())
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return Err(InvalidAddressEntry::new(
                        entry,
                        "IPv6 prefix length must be at most 128",
                    ));
                }
                // Mapped ranges compare against canonical IPv4 clients
                if let Some(v4) = v6.to_ipv4_mapped().filter(|_| prefix >= 96) {
                    let prefix = prefix - 96;
                    return Ok(Self::Network {
                        base: IpAddr::V4((u32::from(v4) & v4_mask(prefix)).into()),
                        prefix,
                    });
                }
                IpAddr::V6((u128::from(v6) & v6_mask(prefix)).into())
            }
        };

        Ok(Self::Network { base, prefix })
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(addr) => write!(f, "{addr}"),
            Self::Network { base, prefix } => write!(f, "{base}/{prefix}"),
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn v6_mask(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}

/// Check whether `address` is allowed by any entry in `allowlist`.
///
/// A malformed `address` never matches. Malformed entries are logged and
/// skipped; they do not fail the whole check. An empty allowlist matches
/// nothing.
#[must_use]
pub fn matches(address: &str, allowlist: &[String]) -> bool {
    let Ok(client) = address.trim().parse::<IpAddr>() else {
        error!(address = %address, "Invalid client IP address");
        return false;
    };

    for entry in allowlist {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        match entry.parse::<AddressRange>() {
            Ok(range) if range.contains(client) => {
                debug!(client = %client, rule = %range, "Client IP matches allowlist entry");
                return true;
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Invalid IP whitelist entry"),
        }
    }

    false
}
