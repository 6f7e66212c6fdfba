//! One of the two key-agreeing parties.
//!
//! A peer receives the group from the relay, validates it, sends a fresh
//! public key back, receives the other peer's public key through the relay
//! and derives the shared secret. Each step is a separate method so callers
//! (and tests) can drive the state machine by hand; [`Peer::run`] drives the
//! whole sequence.
//!
//! The relay is not authenticated. A relay that substitutes its own public
//! keys ends up sharing one secret with each peer and nothing here can
//! notice.

use bytes::Bytes;
use rand::rngs::OsRng;
use strandkex::codec::{framed_body_len, FRAME_HEADER_LEN};
use strandkex::{DomainParameters, KexError, KeyPair, PeerState, SharedSecret};
use tracing::{debug, info, warn};

use crate::config::PeerConfig;
use crate::error::{HandshakeError, Result, Step};
use crate::transport::{self, recv_exact, recv_message, send_all, Transport, TcpTransport};

/// A peer's side of one handshake.
pub struct Peer<T> {
    config: PeerConfig,
    transport: T,
    state: PeerState,
    params: Option<DomainParameters>,
    key_pair: Option<KeyPair>,
    peer_public_key: Option<Bytes>,
}

impl Peer<TcpTransport> {
    /// Connect to the relay at `config.endpoint`.
    pub async fn connect(config: PeerConfig) -> Result<Self> {
        let conn = transport::with_deadline(Step::Connect, config.io_timeout, async {
            transport::connect(config.endpoint.as_str())
                .await
                .map_err(HandshakeError::transport(Step::Connect))
        })
        .await?;
        info!(endpoint = %config.endpoint, "connected to relay");
        Ok(Self::new(config, conn))
    }
}

impl<T: Transport> Peer<T> {
    pub fn new(config: PeerConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            state: PeerState::AwaitingParameters,
            params: None,
            key_pair: None,
            peer_public_key: None,
        }
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    /// The group received from the relay, once decoded.
    pub fn parameters(&self) -> Option<&DomainParameters> {
        self.params.as_ref()
    }

    /// Our public key, once generated.
    pub fn public_key(&self) -> Option<&[u8]> {
        self.key_pair.as_ref().map(KeyPair::public_key_bytes)
    }

    /// Drive the whole handshake and close the connection afterwards,
    /// whatever the outcome.
    pub async fn run(mut self) -> Result<SharedSecret> {
        let outcome = self.drive().await;
        self.close().await;
        outcome
    }

    async fn drive(&mut self) -> Result<SharedSecret> {
        self.receive_parameters().await?;
        self.validate()?;
        self.generate_key_pair()?;
        self.send_public_key().await?;
        self.receive_peer_public_key().await?;
        self.compute_secret()
    }

    /// Read and decode the relay's parameter message. The group is not
    /// trusted until [`Peer::validate`] passes.
    pub async fn receive_parameters(&mut self) -> Result<DomainParameters> {
        self.state
            .require(&PeerState::AwaitingParameters, "ValidatingParameters")?;
        match self.read_parameters().await {
            Ok(params) => {
                debug!(modulus_bits = params.modulus_bits(), "received domain parameters");
                self.params = Some(params.clone());
                self.state = PeerState::ValidatingParameters;
                Ok(params)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn read_parameters(&mut self) -> Result<DomainParameters> {
        let step = Step::RecvParameters;
        let deadline = self.config.io_timeout;
        let encoding = self.config.encoding;

        let message = if encoding.is_framed() {
            let header = recv_exact(&mut self.transport, FRAME_HEADER_LEN, step, deadline).await?;
            let body_len = framed_body_len(&header)?;
            if body_len > self.config.recv_capacity {
                return Err(KexError::MalformedParameters(format!(
                    "declared body length {body_len} exceeds capacity {}",
                    self.config.recv_capacity
                ))
                .into());
            }
            let body = recv_exact(&mut self.transport, body_len, step, deadline).await?;
            let mut message = header.to_vec();
            message.extend_from_slice(&body);
            Bytes::from(message)
        } else {
            // A delimited message has no length prefix, so a read that fills
            // the buffer may have cut the generator short.
            let message =
                recv_message(&mut self.transport, self.config.recv_capacity, step, deadline).await?;
            if message.len() >= self.config.recv_capacity {
                return Err(KexError::MalformedParameters(format!(
                    "parameter message may be truncated at capacity {}",
                    self.config.recv_capacity
                ))
                .into());
            }
            message
        };

        Ok(encoding.decode(&message)?)
    }

    /// Check the received group. Nothing is generated over a group that has
    /// not passed this gate.
    pub fn validate(&mut self) -> Result<()> {
        self.state
            .require(&PeerState::ValidatingParameters, "GeneratingKeyPair")?;
        let params = self.params.as_ref().ok_or_else(|| missing("parameters"))?;
        match params.validate(&self.config.validation) {
            Ok(()) => {
                debug!(
                    modulus_bits = params.modulus_bits(),
                    rounds = self.config.validation.rounds,
                    "domain parameters validated"
                );
                self.state = PeerState::GeneratingKeyPair;
                Ok(())
            }
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Generate our ephemeral key pair over the validated group and return
    /// the public half.
    pub fn generate_key_pair(&mut self) -> Result<&[u8]> {
        self.state
            .require(&PeerState::GeneratingKeyPair, "GeneratingKeyPair")?;
        if self.key_pair.is_some() {
            return Err(KexError::InvalidStateTransition {
                from: "GeneratingKeyPair (key pair present)".into(),
                to: "GeneratingKeyPair".into(),
            }
            .into());
        }
        let params = self.params.as_ref().ok_or_else(|| missing("parameters"))?;
        match KeyPair::generate(params, &mut OsRng) {
            Ok(key_pair) => {
                debug!(public_key_len = key_pair.public_key_bytes().len(), "generated key pair");
                Ok(self.key_pair.insert(key_pair).public_key_bytes())
            }
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Send our public key to the relay.
    pub async fn send_public_key(&mut self) -> Result<()> {
        self.state
            .require(&PeerState::GeneratingKeyPair, "AwaitingPeerPublicKey")?;
        let key_pair = self.key_pair.as_ref().ok_or_else(|| missing("key pair"))?;

        let step = Step::SendPublicKey;
        let sent = send_all(
            &mut self.transport,
            key_pair.public_key_bytes(),
            step,
            self.config.io_timeout,
        )
        .await;
        match sent {
            Ok(()) => {
                self.state = PeerState::AwaitingPeerPublicKey;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Receive the other peer's public key, forwarded by the relay.
    pub async fn receive_peer_public_key(&mut self) -> Result<()> {
        self.state
            .require(&PeerState::AwaitingPeerPublicKey, "ComputingSecret")?;
        let len = self
            .params
            .as_ref()
            .ok_or_else(|| missing("parameters"))?
            .public_key_len();

        let step = Step::RecvPeerPublicKey;
        let received = recv_exact(&mut self.transport, len, step, self.config.io_timeout).await;
        let key = match received {
            Ok(key) => key,
            Err(err) => return Err(self.fail(err)),
        };

        if self.public_key() == Some(&key[..]) {
            let err = KexError::KeyAgreement("relay returned our own public key".into());
            return Err(self.fail(err.into()));
        }
        self.peer_public_key = Some(key);
        self.state = PeerState::ComputingSecret;
        Ok(())
    }

    /// Derive the shared secret from our private key and the other peer's
    /// public key.
    pub fn compute_secret(&mut self) -> Result<SharedSecret> {
        self.state.require(&PeerState::ComputingSecret, "Done")?;
        let params = self.params.as_ref().ok_or_else(|| missing("parameters"))?;
        let key_pair = self.key_pair.as_ref().ok_or_else(|| missing("key pair"))?;
        let peer_key = self
            .peer_public_key
            .as_ref()
            .ok_or_else(|| missing("peer public key"))?;

        match key_pair.agree(params, peer_key) {
            Ok(secret) => {
                info!(
                    secret_len = secret.len(),
                    fingerprint = %secret.fingerprint(),
                    "shared secret computed"
                );
                self.state = PeerState::Done;
                Ok(secret)
            }
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Close the connection to the relay.
    pub async fn close(&mut self) {
        if let Err(err) = self.transport.close().await {
            debug!(error = %err, "error closing relay connection");
        }
    }

    fn fail(&mut self, err: HandshakeError) -> HandshakeError {
        warn!(state = self.state.label(), error = %err, "peer handshake failed");
        self.state = PeerState::Failed(err.to_string());
        err
    }
}

fn missing(what: &str) -> HandshakeError {
    KexError::InvalidStateTransition {
        from: format!("no {what}"),
        to: "next step".into(),
    }
    .into()
}
