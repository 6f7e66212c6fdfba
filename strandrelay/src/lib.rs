//! StrandRelay -- relayed three-party Diffie-Hellman handshake.
//!
//! A relay generates a finite-field DH group, sends it to two peers, and
//! cross-forwards their public keys so the peers end up with the same
//! shared secret. The relay never learns the secret, but nothing
//! authenticates it either: a relay that swaps in its own keys can read the
//! traffic.
//!
//! - [`relay`]: the relay's state machine and its two-slot peer collection
//! - [`peer`]: a peer's state machine
//! - [`transport`]: the byte-stream contract both sides run over, with TCP
//!   and in-memory implementations

pub mod config;
pub mod error;
pub mod peer;
pub mod relay;
pub mod transport;

// Re-export key public types at crate root.
pub use config::{PeerConfig, RelayConfig};
pub use error::{ErrorKind, HandshakeError, Result, Step};
pub use peer::Peer;
pub use relay::{generate_parameters, PeerPublicKeys, PeerSlot, PeerSlots, Relay};
pub use transport::{Listener, TcpAcceptor, TcpTransport, Transport};
