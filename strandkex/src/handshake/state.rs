// Handshake state machines for the two roles.
//
//   Peer:  AwaitingParameters -> ValidatingParameters -> GeneratingKeyPair
//          -> AwaitingPeerPublicKey -> ComputingSecret -> Done
//   Relay: AwaitingPeerA -> AwaitingPeerB -> DistributingParameters
//          -> CollectingPublicKeys -> ForwardingPublicKeys -> Done
//
// Either machine can drop into Failed(reason) from any non-terminal state.

use std::fmt;

use crate::error::{KexError, Result};

/// The current state of a peer's handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    /// Connected, waiting for the relay's parameter message.
    AwaitingParameters,
    /// Parameters decoded but not yet trusted.
    ValidatingParameters,
    /// Group validated; key pair being generated and sent.
    GeneratingKeyPair,
    /// Own public key sent, waiting for the other peer's.
    AwaitingPeerPublicKey,
    /// Other peer's public key received.
    ComputingSecret,
    /// Shared secret computed.
    Done,
    /// Handshake aborted.
    Failed(String),
}

impl PeerState {
    /// Human-readable label for the current state (used in error messages).
    pub fn label(&self) -> &'static str {
        match self {
            PeerState::AwaitingParameters => "AwaitingParameters",
            PeerState::ValidatingParameters => "ValidatingParameters",
            PeerState::GeneratingKeyPair => "GeneratingKeyPair",
            PeerState::AwaitingPeerPublicKey => "AwaitingPeerPublicKey",
            PeerState::ComputingSecret => "ComputingSecret",
            PeerState::Done => "Done",
            PeerState::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Done | PeerState::Failed(_))
    }

    /// Succeeds only if the machine is in `expected`; otherwise reports the
    /// attempted move to `to`.
    pub fn require(&self, expected: &PeerState, to: &str) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(KexError::InvalidStateTransition {
                from: self.label().into(),
                to: to.into(),
            })
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Failed(reason) => write!(f, "Failed({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// The current state of the relay's handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    /// Listening, no peer connected yet.
    AwaitingPeerA,
    /// First peer connected.
    AwaitingPeerB,
    /// Both peers connected; parameters being generated and sent.
    DistributingParameters,
    /// Parameters delivered to both peers.
    CollectingPublicKeys,
    /// Both public keys held.
    ForwardingPublicKeys,
    /// Each peer has the other's public key.
    Done,
    /// Handshake aborted.
    Failed(String),
}

impl RelayState {
    /// Human-readable label for the current state (used in error messages).
    pub fn label(&self) -> &'static str {
        match self {
            RelayState::AwaitingPeerA => "AwaitingPeerA",
            RelayState::AwaitingPeerB => "AwaitingPeerB",
            RelayState::DistributingParameters => "DistributingParameters",
            RelayState::CollectingPublicKeys => "CollectingPublicKeys",
            RelayState::ForwardingPublicKeys => "ForwardingPublicKeys",
            RelayState::Done => "Done",
            RelayState::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayState::Done | RelayState::Failed(_))
    }

    /// Succeeds only if the machine is in `expected`; otherwise reports the
    /// attempted move to `to`.
    pub fn require(&self, expected: &RelayState, to: &str) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(KexError::InvalidStateTransition {
                from: self.label().into(),
                to: to.into(),
            })
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::Failed(reason) => write!(f, "Failed({reason})"),
            other => f.write_str(other.label()),
        }
    }
}
