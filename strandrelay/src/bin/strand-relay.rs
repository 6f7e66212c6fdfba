use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use strandkex::ParameterEncoding;
use strandrelay::{Relay, RelayConfig, TcpAcceptor};
use tracing::info;

/// Relay for a two-peer Diffie-Hellman handshake.
#[derive(Parser, Debug)]
#[command(name = "strand-relay", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "STRAND_RELAY_LISTEN", default_value = strandrelay::config::DEFAULT_ENDPOINT)]
    listen: String,

    /// Modulus size in bits for the generated group
    #[arg(long, env = "STRAND_KEY_SIZE", default_value_t = strandrelay::config::DEFAULT_KEY_SIZE_BITS)]
    key_size: u64,

    /// Subgroup order size in bits (derived from --key-size when unset)
    #[arg(long, env = "STRAND_SUBGROUP_BITS")]
    subgroup_bits: Option<u64>,

    /// Send parameters length-prefixed instead of delimited
    #[arg(long, env = "STRAND_FRAMED", default_value_t = false)]
    framed: bool,

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

    let config = RelayConfig {
        endpoint: args.listen,
        key_size_bits: args.key_size,
        subgroup_bits: args.subgroup_bits,
        encoding: if args.framed {
            ParameterEncoding::LengthPrefixed
        } else {
            ParameterEncoding::default()
        },
        io_timeout: args.timeout_secs.map(Duration::from_secs),
    };
    // Reject bad sizes before anyone connects.
    config.group_spec().context("invalid group size")?;

    let mut listener = TcpAcceptor::bind(config.endpoint.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.endpoint))?;
    info!(
        "strand-relay v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        listener.local_addr().context("listener has no local address")?
    );

    let mut relay = Relay::new(config);
    relay
        .accept_peers(&mut listener)
        .await
        .context("failed to accept peers")?;
    relay.run().await.context("handshake failed")?;
    Ok(())
}
