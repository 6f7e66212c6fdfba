// StrandKex: finite-field Diffie-Hellman for the relayed Strand handshake
//
// Crate root: module declarations and public re-exports.
//
// Everything here is synchronous and free of I/O; the async peer and relay
// drivers live in `strandrelay`.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod handshake;

// Re-export key types at crate root for convenience.
pub use codec::{decode_parameters, encode_parameters, ParameterEncoding};
pub use crypto::dh::{KeyPair, SharedSecret};
pub use crypto::group::{DomainParameters, GroupSpec};
pub use error::{KexError, Result};
pub use handshake::state::{PeerState, RelayState};
