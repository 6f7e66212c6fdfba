//! The relay: generates the group, hands it to both peers and swaps their
//! public keys.
//!
//! The relay services its two connections concurrently but keeps the
//! protocol's barriers: the parameter message reaches both peers before any
//! key is read, and both keys are in hand before either is forwarded. Any
//! failure on either side closes both connections.

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use rand::rngs::OsRng;
use strandkex::{DomainParameters, GroupSpec, KexError, RelayState};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{HandshakeError, Result, Step};
use crate::transport::{self, recv_exact, send_all, Listener, Transport};

/// Which of the two peer connections, in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerSlot {
    A,
    B,
}

impl PeerSlot {
    pub const ALL: [PeerSlot; 2] = [PeerSlot::A, PeerSlot::B];

    /// The slot whose public key this slot receives.
    pub fn other(self) -> PeerSlot {
        match self {
            PeerSlot::A => PeerSlot::B,
            PeerSlot::B => PeerSlot::A,
        }
    }

    fn index(self) -> usize {
        match self {
            PeerSlot::A => 0,
            PeerSlot::B => 1,
        }
    }
}

impl fmt::Display for PeerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerSlot::A => write!(f, "A"),
            PeerSlot::B => write!(f, "B"),
        }
    }
}

/// The relay's two peer connections.
#[derive(Debug)]
pub struct PeerSlots<T> {
    slots: [Option<T>; 2],
}

impl<T> Default for PeerSlots<T> {
    fn default() -> Self {
        Self { slots: [None, None] }
    }
}

impl<T> PeerSlots<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `conn` in `slot`, returning whatever was there.
    pub fn insert(&mut self, slot: PeerSlot, conn: T) -> Option<T> {
        self.slots[slot.index()].replace(conn)
    }

    pub fn get_mut(&mut self, slot: PeerSlot) -> Option<&mut T> {
        self.slots[slot.index()].as_mut()
    }

    pub fn take(&mut self, slot: PeerSlot) -> Option<T> {
        self.slots[slot.index()].take()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Both connections at once, so they can be driven concurrently.
    pub fn both_mut(&mut self) -> Option<(&mut T, &mut T)> {
        let [a, b] = &mut self.slots;
        match (a.as_mut(), b.as_mut()) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }
}

/// Both peers' public keys, held only between collection and forwarding.
///
/// Consumed by [`Relay::forward_public_keys`].
#[derive(Clone, PartialEq, Eq)]
pub struct PeerPublicKeys {
    pub peer_a_public_key: Bytes,
    pub peer_b_public_key: Bytes,
}

impl PeerPublicKeys {
    /// The key received from `slot`.
    pub fn from_slot(&self, slot: PeerSlot) -> &Bytes {
        match slot {
            PeerSlot::A => &self.peer_a_public_key,
            PeerSlot::B => &self.peer_b_public_key,
        }
    }
}

impl fmt::Debug for PeerPublicKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerPublicKeys")
            .field("peer_a_public_key_len", &self.peer_a_public_key.len())
            .field("peer_b_public_key_len", &self.peer_b_public_key.len())
            .finish()
    }
}

/// Generate fresh domain parameters on tokio's blocking pool.
///
/// Generation has no deadline: a 2048-bit group takes seconds and the time
/// is unbounded in principle.
pub async fn generate_parameters(spec: GroupSpec) -> Result<DomainParameters> {
    let started = Instant::now();
    let params = tokio::task::spawn_blocking(move || DomainParameters::generate(&spec, &mut OsRng))
        .await
        .map_err(|e| KexError::ParameterGeneration(format!("generation task failed: {e}")))??;
    info!(
        bits = params.modulus_bits(),
        subgroup_bits = params.q().bits(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "domain parameters generated"
    );
    Ok(params)
}

/// The relay's side of one handshake.
pub struct Relay<T> {
    config: RelayConfig,
    peers: PeerSlots<T>,
    state: RelayState,
    public_key_len: Option<usize>,
}

impl<T: Transport> Relay<T> {
    /// A relay with no peers attached yet.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            peers: PeerSlots::new(),
            state: RelayState::AwaitingPeerA,
            public_key_len: None,
        }
    }

    /// A relay over two already-connected peers, `a` first.
    pub fn with_peers(config: RelayConfig, a: T, b: T) -> Self {
        let mut peers = PeerSlots::new();
        peers.insert(PeerSlot::A, a);
        peers.insert(PeerSlot::B, b);
        Self {
            config,
            peers,
            state: RelayState::DistributingParameters,
            public_key_len: None,
        }
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Attach the next peer connection; the first becomes A, the second B.
    pub fn attach(&mut self, conn: T) -> Result<PeerSlot> {
        let (slot, next) = match self.state {
            RelayState::AwaitingPeerA => (PeerSlot::A, RelayState::AwaitingPeerB),
            RelayState::AwaitingPeerB => (PeerSlot::B, RelayState::DistributingParameters),
            _ => {
                return Err(KexError::InvalidStateTransition {
                    from: self.state.label().into(),
                    to: "AwaitingPeerB".into(),
                }
                .into())
            }
        };
        self.peers.insert(slot, conn);
        self.state = next;
        Ok(slot)
    }

    /// Accept connections from `listener` until both slots are filled.
    pub async fn accept_peers<L>(&mut self, listener: &mut L) -> Result<()>
    where
        L: Listener<Conn = T>,
    {
        let deadline = self.config.io_timeout;
        while !self.peers.is_full() {
            let accepted = transport::with_deadline(Step::Accept, deadline, async {
                listener
                    .accept()
                    .await
                    .map_err(HandshakeError::transport(Step::Accept))
            })
            .await;
            let (conn, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => return Err(self.fail(err).await),
            };
            let slot = self.attach(conn)?;
            info!(slot = %slot, addr = %addr, "peer connected");
        }
        Ok(())
    }

    /// Generate parameters, distribute them, swap the public keys, then
    /// close both connections.
    pub async fn run(mut self) -> Result<()> {
        let outcome = self.drive().await;
        self.close_all().await;
        if outcome.is_ok() {
            info!("relay handshake complete");
        }
        outcome
    }

    async fn drive(&mut self) -> Result<()> {
        self.state
            .require(&RelayState::DistributingParameters, "DistributingParameters")?;
        let generated = match self.config.group_spec() {
            Ok(spec) => generate_parameters(spec).await,
            Err(err) => Err(err),
        };
        let params = match generated {
            Ok(params) => params,
            Err(err) => return Err(self.fail(err).await),
        };
        self.distribute(&params).await?;
        let keys = self.collect_public_keys().await?;
        self.forward_public_keys(keys).await
    }

    /// Encode `params` once and send the same bytes to both peers. Failing
    /// to reach either peer fails the session.
    pub async fn distribute(&mut self, params: &DomainParameters) -> Result<()> {
        self.state
            .require(&RelayState::DistributingParameters, "CollectingPublicKeys")?;
        let message = self.config.encoding.encode(params);
        let deadline = self.config.io_timeout;

        let sent = match self.peers.both_mut() {
            Some((a, b)) => tokio::try_join!(
                send_all(a, &message, Step::SendParameters(PeerSlot::A), deadline),
                send_all(b, &message, Step::SendParameters(PeerSlot::B), deadline),
            )
            .map(|_| ()),
            None => Err(missing_peers(&self.state)),
        };
        if let Err(err) = sent {
            return Err(self.fail(err).await);
        }

        debug!(len = message.len(), "parameters sent to both peers");
        self.public_key_len = Some(params.public_key_len());
        self.state = RelayState::CollectingPublicKeys;
        Ok(())
    }

    /// Read one public key from each peer, in whatever order they arrive.
    pub async fn collect_public_keys(&mut self) -> Result<PeerPublicKeys> {
        self.state
            .require(&RelayState::CollectingPublicKeys, "ForwardingPublicKeys")?;
        let len = match self.public_key_len {
            Some(len) => len,
            None => return Err(missing_peers(&self.state)),
        };
        let deadline = self.config.io_timeout;

        let received = match self.peers.both_mut() {
            Some((a, b)) => tokio::try_join!(
                recv_exact(a, len, Step::RecvPublicKey(PeerSlot::A), deadline),
                recv_exact(b, len, Step::RecvPublicKey(PeerSlot::B), deadline),
            ),
            None => Err(missing_peers(&self.state)),
        };
        let (peer_a_public_key, peer_b_public_key) = match received {
            Ok(keys) => keys,
            Err(err) => return Err(self.fail(err).await),
        };

        debug!(len, "public keys collected from both peers");
        self.state = RelayState::ForwardingPublicKeys;
        Ok(PeerPublicKeys {
            peer_a_public_key,
            peer_b_public_key,
        })
    }

    /// Send A's key to B and B's key to A.
    pub async fn forward_public_keys(&mut self, keys: PeerPublicKeys) -> Result<()> {
        self.state.require(&RelayState::ForwardingPublicKeys, "Done")?;
        let deadline = self.config.io_timeout;

        let forwarded = match self.peers.both_mut() {
            Some((a, b)) => tokio::try_join!(
                send_all(
                    a,
                    keys.from_slot(PeerSlot::A.other()),
                    Step::ForwardPublicKey(PeerSlot::A),
                    deadline
                ),
                send_all(
                    b,
                    keys.from_slot(PeerSlot::B.other()),
                    Step::ForwardPublicKey(PeerSlot::B),
                    deadline
                ),
            )
            .map(|_| ()),
            None => Err(missing_peers(&self.state)),
        };
        drop(keys);
        if let Err(err) = forwarded {
            return Err(self.fail(err).await);
        }

        debug!("public keys forwarded");
        self.state = RelayState::Done;
        Ok(())
    }

    /// Close whichever connections are still held.
    pub async fn close_all(&mut self) {
        for slot in PeerSlot::ALL {
            if let Some(mut conn) = self.peers.take(slot) {
                if let Err(err) = conn.close().await {
                    debug!(slot = %slot, error = %err, "error closing peer connection");
                }
            }
        }
    }

    async fn fail(&mut self, err: HandshakeError) -> HandshakeError {
        warn!(state = self.state.label(), error = %err, "relay handshake failed; closing both peers");
        self.state = RelayState::Failed(err.to_string());
        self.close_all().await;
        err
    }
}

fn missing_peers(state: &RelayState) -> HandshakeError {
    KexError::InvalidStateTransition {
        from: format!("{} (peers missing)", state.label()),
        to: "next step".into(),
    }
    .into()
}
