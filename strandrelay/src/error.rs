use std::fmt;
use std::time::Duration;

use strandkex::KexError;
use thiserror::Error;

use crate::relay::PeerSlot;

/// The blocking transport call a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Bind,
    Accept,
    RecvParameters,
    SendPublicKey,
    RecvPeerPublicKey,
    SendParameters(PeerSlot),
    RecvPublicKey(PeerSlot),
    ForwardPublicKey(PeerSlot),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Connect => write!(f, "connect to relay"),
            Step::Bind => write!(f, "bind listener"),
            Step::Accept => write!(f, "accept peer connection"),
            Step::RecvParameters => write!(f, "receive parameters from relay"),
            Step::SendPublicKey => write!(f, "send public key to relay"),
            Step::RecvPeerPublicKey => write!(f, "receive peer public key from relay"),
            Step::SendParameters(slot) => write!(f, "send parameters to peer {slot}"),
            Step::RecvPublicKey(slot) => write!(f, "receive public key from peer {slot}"),
            Step::ForwardPublicKey(slot) => write!(f, "forward public key to peer {slot}"),
        }
    }
}

/// All errors produced while running a handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("transport error during {step}: {source}")]
    Transport {
        step: Step,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed during {step}")]
    TransportClosed { step: Step },

    #[error("timed out after {after:?} during {step}")]
    Timeout { step: Step, after: Duration },

    #[error(transparent)]
    Kex(#[from] KexError),
}

/// Coarse classification of a [`HandshakeError`], one per failure class
/// the protocol distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportError,
    TransportClosed,
    MalformedParameters,
    InvalidGroup,
    KeyAgreementFailure,
    /// Misuse of the API or configuration, not a protocol failure.
    Protocol,
}

impl HandshakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandshakeError::Transport { .. } | HandshakeError::Timeout { .. } => {
                ErrorKind::TransportError
            }
            HandshakeError::TransportClosed { .. } => ErrorKind::TransportClosed,
            HandshakeError::Kex(err) => match err {
                KexError::MalformedParameters(_) => ErrorKind::MalformedParameters,
                KexError::InvalidGroup(_) => ErrorKind::InvalidGroup,
                KexError::KeyAgreement(_) | KexError::InvalidKeyLength { .. } => {
                    ErrorKind::KeyAgreementFailure
                }
                KexError::InvalidDelimiter(_)
                | KexError::ParameterGeneration(_)
                | KexError::InvalidStateTransition { .. } => ErrorKind::Protocol,
            },
        }
    }

    pub(crate) fn transport(step: Step) -> impl FnOnce(std::io::Error) -> HandshakeError {
        move |source| HandshakeError::Transport { step, source }
    }
}

pub type Result<T> = std::result::Result<T, HandshakeError>;
