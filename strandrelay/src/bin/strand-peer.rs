use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use strandkex::crypto::group::ValidationPolicy;
use strandkex::ParameterEncoding;
use strandrelay::{Peer, PeerConfig};
use tracing::info;

/// Peer for a relayed Diffie-Hellman handshake.
#[derive(Parser, Debug)]
#[command(name = "strand-peer", version, about)]
struct Args {
    /// Relay address to connect to
    #[arg(long, env = "STRAND_PEER_CONNECT", default_value = strandrelay::config::DEFAULT_ENDPOINT)]
    connect: String,

    /// Miller-Rabin rounds when validating the group (at least 3)
    #[arg(long, env = "STRAND_VALIDATION_ROUNDS", default_value_t = 3)]
    rounds: usize,

    /// Smallest modulus, in bits, this peer will accept
    #[arg(long, env = "STRAND_MIN_MODULUS_BITS", default_value_t = 512)]
    min_modulus_bits: u64,

    /// Expect length-prefixed parameters instead of delimited
    #[arg(long, env = "STRAND_FRAMED", default_value_t = false)]
    framed: bool,

    /// Largest parameter message, in bytes, this peer will read
    #[arg(long, env = "STRAND_RECV_CAPACITY", default_value_t = strandrelay::config::DEFAULT_RECV_CAPACITY)]
    recv_capacity: usize,

    /// Deadline in seconds for each network call
    #[arg(long, env = "STRAND_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Log level
    #[arg(long, env = "STRAND_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!("{},tokio=warn", args.log_level))
        .init();

    let config = PeerConfig {
        endpoint: args.connect,
        encoding: if args.framed {
            ParameterEncoding::LengthPrefixed
        } else {
            ParameterEncoding::default()
        },
        validation: ValidationPolicy {
            rounds: args.rounds,
            min_modulus_bits: args.min_modulus_bits,
        },
        recv_capacity: args.recv_capacity,
        io_timeout: args.timeout_secs.map(Duration::from_secs),
        ..PeerConfig::default()
    };
    let endpoint = config.endpoint.clone();

    let peer = Peer::connect(config)
        .await
        .with_context(|| format!("failed to connect to relay at {endpoint}"))?;
    let secret = peer.run().await.context("handshake failed")?;

    info!("strand-peer v{} handshake complete", env!("CARGO_PKG_VERSION"));
    println!("shared secret: {} bytes, fingerprint {}", secret.len(), secret.fingerprint());
    Ok(())
}
