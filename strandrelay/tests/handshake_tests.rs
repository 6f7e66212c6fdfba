//! End-to-end handshakes between a relay and two peers, plus peers facing a
//! misbehaving relay.

use std::time::Duration;

use num_bigint::BigUint;
use strandkex::{DomainParameters, GroupSpec, KeyPair, ParameterEncoding, PeerState};
use strandrelay::transport::{duplex_pair, StreamTransport};
use strandrelay::{
    generate_parameters, ErrorKind, HandshakeError, Peer, PeerConfig, Relay, RelayConfig, Step,
    TcpAcceptor, Transport,
};
use tokio::io::DuplexStream;

type Conn = StreamTransport<DuplexStream>;

const CAPACITY: usize = 8192;

fn small_relay_config() -> RelayConfig {
    RelayConfig {
        key_size_bits: 512,
        ..RelayConfig::default()
    }
}

async fn small_group() -> DomainParameters {
    generate_parameters(GroupSpec::new(512, 160).unwrap())
        .await
        .unwrap()
}

async fn write_all(conn: &mut Conn, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let n = conn.send(bytes).await.unwrap();
        assert!(n > 0);
        bytes = &bytes[n..];
    }
}

async fn read_exact(conn: &mut Conn, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let chunk = conn.recv(len - out.len()).await.unwrap();
        assert!(!chunk.is_empty(), "connection closed early");
        out.extend_from_slice(&chunk);
    }
    out
}

// ---------------------------------------------------------------------------
// Honest relay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_handshake_2048_bit() {
    let (relay_a, peer_a) = duplex_pair(CAPACITY);
    let (relay_b, peer_b) = duplex_pair(CAPACITY);

    let relay = Relay::with_peers(RelayConfig::default(), relay_a, relay_b);
    let (relayed, secret_a, secret_b) = tokio::join!(
        relay.run(),
        Peer::new(PeerConfig::default(), peer_a).run(),
        Peer::new(PeerConfig::default(), peer_b).run(),
    );
    relayed.unwrap();
    let secret_a = secret_a.unwrap();
    let secret_b = secret_b.unwrap();

    assert_eq!(secret_a, secret_b);
    assert_eq!(secret_a.len(), 256);
    assert!(BigUint::from_bytes_be(secret_a.as_bytes()) > BigUint::from(1u32));
}

#[tokio::test]
async fn full_handshake_over_tcp() {
    let mut listener = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();

    let relay = tokio::spawn(async move {
        let mut relay = Relay::new(small_relay_config());
        relay.accept_peers(&mut listener).await?;
        relay.run().await
    });

    let peer_config = PeerConfig {
        endpoint,
        io_timeout: Some(Duration::from_secs(30)),
        ..PeerConfig::default()
    };
    let a = Peer::connect(peer_config.clone()).await.unwrap();
    let b = Peer::connect(peer_config).await.unwrap();
    let (secret_a, secret_b) = tokio::join!(a.run(), b.run());

    relay.await.unwrap().unwrap();
    let secret_a = secret_a.unwrap();
    assert_eq!(secret_a, secret_b.unwrap());
    assert_eq!(secret_a.len(), 64);
}

#[tokio::test]
async fn full_handshake_framed() {
    let (relay_a, peer_a) = duplex_pair(CAPACITY);
    let (relay_b, peer_b) = duplex_pair(CAPACITY);

    let relay_config = RelayConfig {
        encoding: ParameterEncoding::LengthPrefixed,
        ..small_relay_config()
    };
    let peer_config = PeerConfig {
        encoding: ParameterEncoding::LengthPrefixed,
        ..PeerConfig::default()
    };

    let relay = Relay::with_peers(relay_config, relay_a, relay_b);
    let (relayed, secret_a, secret_b) = tokio::join!(
        relay.run(),
        Peer::new(peer_config.clone(), peer_a).run(),
        Peer::new(peer_config, peer_b).run(),
    );
    relayed.unwrap();
    assert_eq!(secret_a.unwrap(), secret_b.unwrap());
}

#[tokio::test]
async fn derived_session_keys_match() {
    let (relay_a, peer_a) = duplex_pair(CAPACITY);
    let (relay_b, peer_b) = duplex_pair(CAPACITY);

    let relay = Relay::with_peers(small_relay_config(), relay_a, relay_b);
    let (_, secret_a, secret_b) = tokio::join!(
        relay.run(),
        Peer::new(PeerConfig::default(), peer_a).run(),
        Peer::new(PeerConfig::default(), peer_b).run(),
    );
    let (secret_a, secret_b) = (secret_a.unwrap(), secret_b.unwrap());
    assert_eq!(secret_a.fingerprint(), secret_b.fingerprint());
    assert_eq!(
        secret_a.derive_key(b"session").unwrap(),
        secret_b.derive_key(b"session").unwrap()
    );
}

// ---------------------------------------------------------------------------
// Misbehaving relay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn key_substituting_relay_goes_undetected() {
    let params = small_group().await;
    let key_len = params.public_key_len();
    let (mut relay_a, peer_a) = duplex_pair(CAPACITY);
    let (mut relay_b, peer_b) = duplex_pair(CAPACITY);

    let peer_a = tokio::spawn(Peer::new(PeerConfig::default(), peer_a).run());
    let peer_b = tokio::spawn(Peer::new(PeerConfig::default(), peer_b).run());

    let message = ParameterEncoding::default().encode(&params);
    write_all(&mut relay_a, &message).await;
    write_all(&mut relay_b, &message).await;
    let key_a = read_exact(&mut relay_a, key_len).await;
    let key_b = read_exact(&mut relay_b, key_len).await;

    // One key pair per victim; each peer ends up agreeing with the relay.
    let mallory_a = KeyPair::generate(&params, &mut rand::rngs::OsRng).unwrap();
    let mallory_b = KeyPair::generate(&params, &mut rand::rngs::OsRng).unwrap();
    write_all(&mut relay_a, mallory_a.public_key_bytes()).await;
    write_all(&mut relay_b, mallory_b.public_key_bytes()).await;

    let secret_a = peer_a.await.unwrap().expect("peer A should not notice");
    let secret_b = peer_b.await.unwrap().expect("peer B should not notice");

    assert_eq!(secret_a, mallory_a.agree(&params, &key_a).unwrap());
    assert_eq!(secret_b, mallory_b.agree(&params, &key_b).unwrap());
    assert_ne!(secret_a, secret_b);
}

#[tokio::test]
async fn tampered_generator_is_invalid_group() {
    let params = small_group().await;
    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let mut peer = Peer::new(PeerConfig::default(), peer_end);

    let p_minus_one = params.p() - 1u32;
    let message = strandkex::encode_parameters(
        params.p(),
        params.q(),
        &p_minus_one,
        Default::default(),
    );
    write_all(&mut relay_end, &message).await;

    peer.receive_parameters().await.unwrap();
    let err = peer.validate().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidGroup);
    assert!(matches!(peer.state(), PeerState::Failed(_)));
    assert!(peer.public_key().is_none());
}

#[tokio::test]
async fn group_below_minimum_size_is_invalid_group() {
    let params = generate_parameters(GroupSpec::new(256, 64).unwrap())
        .await
        .unwrap();
    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let peer = tokio::spawn(Peer::new(PeerConfig::default(), peer_end).run());

    write_all(&mut relay_end, &ParameterEncoding::default().encode(&params)).await;
    let err = peer.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidGroup);

    // The peer closes without ever sending a key.
    assert!(relay_end.recv(64).await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_parameters_reported() {
    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let mut peer = Peer::new(PeerConfig::default(), peer_end);

    write_all(&mut relay_end, b"23.eleven.4").await;
    let err = peer.receive_parameters().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedParameters);
    assert!(matches!(peer.state(), PeerState::Failed(_)));
}

#[tokio::test]
async fn delimited_message_filling_capacity_rejected() {
    let mut message = b"23.11.".to_vec();
    message.extend(std::iter::repeat(b'4').take(5000));

    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let mut peer = Peer::new(PeerConfig::default(), peer_end);
    write_all(&mut relay_end, &message).await;
    let err = peer.receive_parameters().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedParameters);
    assert!(err.to_string().contains("truncated"));
    assert!(matches!(peer.state(), PeerState::Failed(_)));

    // The same message fits once the peer reads more.
    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let config = PeerConfig {
        recv_capacity: CAPACITY,
        ..PeerConfig::default()
    };
    let mut peer = Peer::new(config, peer_end);
    write_all(&mut relay_end, &message).await;
    let params = peer.receive_parameters().await.unwrap();
    assert_eq!(params.g().to_string().len(), 5000);
}

#[tokio::test]
async fn oversized_frame_rejected_before_reading_body() {
    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let config = PeerConfig {
        encoding: ParameterEncoding::LengthPrefixed,
        ..PeerConfig::default()
    };
    let mut peer = Peer::new(config, peer_end);

    write_all(&mut relay_end, &u32::MAX.to_be_bytes()).await;
    let err = peer.receive_parameters().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedParameters);
}

#[tokio::test]
async fn relay_hangup_is_transport_closed() {
    let (relay_end, peer_end) = duplex_pair(CAPACITY);
    drop(relay_end);

    let err = Peer::new(PeerConfig::default(), peer_end)
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportClosed);
    assert!(matches!(
        err,
        HandshakeError::TransportClosed {
            step: Step::RecvParameters
        }
    ));
}

#[tokio::test]
async fn hangup_after_parameters_is_transport_closed() {
    let params = small_group().await;
    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let peer = tokio::spawn(Peer::new(PeerConfig::default(), peer_end).run());

    write_all(&mut relay_end, &ParameterEncoding::default().encode(&params)).await;
    read_exact(&mut relay_end, params.public_key_len()).await;
    drop(relay_end);

    let err = peer.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::TransportClosed {
            step: Step::RecvPeerPublicKey
        }
    ));
}

#[tokio::test]
async fn reflected_public_key_rejected() {
    let params = small_group().await;
    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let peer = tokio::spawn(Peer::new(PeerConfig::default(), peer_end).run());

    write_all(&mut relay_end, &ParameterEncoding::default().encode(&params)).await;
    let own_key = read_exact(&mut relay_end, params.public_key_len()).await;
    write_all(&mut relay_end, &own_key).await;

    let err = peer.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyAgreementFailure);
}

#[tokio::test]
async fn degenerate_forwarded_key_rejected() {
    let params = small_group().await;
    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let peer = tokio::spawn(Peer::new(PeerConfig::default(), peer_end).run());

    write_all(&mut relay_end, &ParameterEncoding::default().encode(&params)).await;
    let len = params.public_key_len();
    read_exact(&mut relay_end, len).await;

    let mut one = vec![0u8; len];
    one[len - 1] = 1;
    write_all(&mut relay_end, &one).await;

    let err = peer.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyAgreementFailure);
}

#[tokio::test(start_paused = true)]
async fn silent_relay_times_out() {
    let (_relay_end, peer_end) = duplex_pair(CAPACITY);
    let config = PeerConfig {
        io_timeout: Some(Duration::from_secs(10)),
        ..PeerConfig::default()
    };

    let err = Peer::new(config, peer_end).run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportError);
    match err {
        HandshakeError::Timeout { step, after } => {
            assert_eq!(step, Step::RecvParameters);
            assert_eq!(after, Duration::from_secs(10));
        }
        other => panic!("expected timeout, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Peer state machine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn out_of_order_calls_rejected() {
    let (_relay_end, peer_end) = duplex_pair(CAPACITY);
    let mut peer = Peer::new(PeerConfig::default(), peer_end);

    assert_eq!(peer.validate().unwrap_err().kind(), ErrorKind::Protocol);
    assert_eq!(peer.generate_key_pair().unwrap_err().kind(), ErrorKind::Protocol);
    assert_eq!(peer.send_public_key().await.unwrap_err().kind(), ErrorKind::Protocol);
    assert_eq!(peer.compute_secret().unwrap_err().kind(), ErrorKind::Protocol);

    // Misuse does not poison the session.
    assert_eq!(peer.state(), &PeerState::AwaitingParameters);
}

#[tokio::test]
async fn key_pair_generated_once() {
    let params = small_group().await;
    let (mut relay_end, peer_end) = duplex_pair(CAPACITY);
    let mut peer = Peer::new(PeerConfig::default(), peer_end);

    write_all(&mut relay_end, &ParameterEncoding::default().encode(&params)).await;
    peer.receive_parameters().await.unwrap();
    peer.validate().unwrap();
    let first = peer.generate_key_pair().unwrap().to_vec();
    assert_eq!(first.len(), params.public_key_len());

    assert_eq!(peer.generate_key_pair().unwrap_err().kind(), ErrorKind::Protocol);
    assert_eq!(peer.public_key(), Some(&first[..]));

    peer.send_public_key().await.unwrap();
    assert_eq!(peer.state(), &PeerState::AwaitingPeerPublicKey);
    assert_eq!(read_exact(&mut relay_end, first.len()).await, first);
}
