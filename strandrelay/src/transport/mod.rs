//! Transport contract consumed by the peer and relay drivers.
//!
//! A [`Transport`] is one connected, ordered byte stream: `send` may write
//! fewer bytes than offered and `recv` returns at most `max_len` bytes, with
//! an empty result meaning the other side closed. The helpers in this module
//! layer the protocol's needs on top: write-all, read-exact, single-message
//! reads, and an optional deadline on each of them.

pub mod stream;

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::{HandshakeError, Result, Step};

pub use stream::{connect, duplex_pair, StreamTransport, TcpAcceptor, TcpTransport};

/// A connected byte stream.
pub trait Transport: Send {
    /// Write some prefix of `bytes`, returning how many were written.
    fn send(&mut self, bytes: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Read at most `max_len` bytes. An empty result means the peer closed.
    fn recv(&mut self, max_len: usize) -> impl Future<Output = io::Result<Bytes>> + Send;

    /// Shut down the write half; the other side observes end-of-stream.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// A source of inbound connections.
pub trait Listener: Send {
    type Conn: Transport;

    /// Wait for the next connection; also returns a printable peer address.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Conn, String)>> + Send;
}

/// Await `fut`, bounded by `deadline` when one is configured.
pub(crate) async fn with_deadline<F, T>(step: Step, deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| HandshakeError::Timeout { step, after })?,
        None => fut.await,
    }
}

/// Write all of `bytes`.
pub(crate) async fn send_all<T: Transport>(
    conn: &mut T,
    bytes: &[u8],
    step: Step,
    deadline: Option<Duration>,
) -> Result<()> {
    with_deadline(step, deadline, async {
        let mut sent = 0;
        while sent < bytes.len() {
            let n = conn
                .send(&bytes[sent..])
                .await
                .map_err(HandshakeError::transport(step))?;
            if n == 0 {
                return Err(HandshakeError::TransportClosed { step });
            }
            sent += n;
        }
        Ok(())
    })
    .await
}

/// Read exactly `len` bytes. End-of-stream before `len` is `TransportClosed`.
pub(crate) async fn recv_exact<T: Transport>(
    conn: &mut T,
    len: usize,
    step: Step,
    deadline: Option<Duration>,
) -> Result<Bytes> {
    with_deadline(step, deadline, async {
        let mut buf = BytesMut::with_capacity(len);
        while buf.len() < len {
            let chunk = conn
                .recv(len - buf.len())
                .await
                .map_err(HandshakeError::transport(step))?;
            if chunk.is_empty() {
                return Err(HandshakeError::TransportClosed { step });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    })
    .await
}

/// Read one unframed message of at most `max_len` bytes.
pub(crate) async fn recv_message<T: Transport>(
    conn: &mut T,
    max_len: usize,
    step: Step,
    deadline: Option<Duration>,
) -> Result<Bytes> {
    with_deadline(step, deadline, async {
        let msg = conn
            .recv(max_len)
            .await
            .map_err(HandshakeError::transport(step))?;
        if msg.is_empty() {
            return Err(HandshakeError::TransportClosed { step });
        }
        Ok(msg)
    })
    .await
}
