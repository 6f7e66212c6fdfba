//! Per-session configuration for peers and relays.
//!
//! Everything a session needs is passed in through these structs, so several
//! sessions can run side by side in one process.

use std::time::Duration;

use strandkex::codec::ParameterEncoding;
use strandkex::crypto::group::{GroupSpec, ValidationPolicy};

use crate::error::Result;

/// Endpoint the relay binds and peers connect to by default.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:2001";

/// Modulus size the relay generates by default.
pub const DEFAULT_KEY_SIZE_BITS: u64 = 2048;

/// Largest parameter message a peer will read by default. Three decimal
/// fields of a 4096-bit group fit comfortably.
pub const DEFAULT_RECV_CAPACITY: usize = 4096;

/// Configuration for a relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on.
    pub endpoint: String,
    /// Modulus size for generated parameters.
    pub key_size_bits: u64,
    /// Subgroup order size; derived from `key_size_bits` when unset.
    pub subgroup_bits: Option<u64>,
    /// Parameter message layout. Must match the peers'.
    pub encoding: ParameterEncoding,
    /// Deadline for each blocking transport call. `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            key_size_bits: DEFAULT_KEY_SIZE_BITS,
            subgroup_bits: None,
            encoding: ParameterEncoding::default(),
            io_timeout: None,
        }
    }
}

impl RelayConfig {
    /// Sizes to generate parameters with.
    pub fn group_spec(&self) -> Result<GroupSpec> {
        let spec = match self.subgroup_bits {
            Some(subgroup_bits) => GroupSpec::new(self.key_size_bits, subgroup_bits)?,
            None => GroupSpec::for_key_size(self.key_size_bits)?,
        };
        Ok(spec)
    }
}

/// Configuration for a peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Relay address to connect to.
    pub endpoint: String,
    /// Parameter message layout. Must match the relay's.
    pub encoding: ParameterEncoding,
    /// Upper bound on the size of the parameter message.
    pub recv_capacity: usize,
    /// How hard to check the received group before trusting it.
    pub validation: ValidationPolicy,
    /// Deadline for each blocking transport call. `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            encoding: ParameterEncoding::default(),
            recv_capacity: DEFAULT_RECV_CAPACITY,
            validation: ValidationPolicy::default(),
            io_timeout: None,
        }
    }
}
