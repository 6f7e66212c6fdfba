//! [`Transport`] over any tokio byte stream: TCP for deployments, in-memory
//! duplex pipes for tests and single-process demos.

use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::transport::{Listener, Transport};

/// Adapts an `AsyncRead + AsyncWrite` stream to the [`Transport`] contract.
#[derive(Debug)]
pub struct StreamTransport<S> {
    inner: S,
}

/// A TCP connection.
pub type TcpTransport = StreamTransport<TcpStream>;

impl<S> StreamTransport<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.inner.write(bytes).await
    }

    async fn recv(&mut self, max_len: usize) -> io::Result<Bytes> {
        let mut buf = BytesMut::zeroed(max_len);
        let n = self.inner.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf.freeze())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// Connect to a listening relay.
pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<TcpTransport> {
    let stream = TcpStream::connect(addr).await?;
    // Keys are small single writes; don't let Nagle hold them back.
    stream.set_nodelay(true)?;
    Ok(StreamTransport::new(stream))
}

/// A pair of connected in-memory transports, each buffering up to
/// `capacity` bytes in flight.
pub fn duplex_pair(
    capacity: usize,
) -> (StreamTransport<DuplexStream>, StreamTransport<DuplexStream>) {
    let (a, b) = tokio::io::duplex(capacity);
    (StreamTransport::new(a), StreamTransport::new(b))
}

/// TCP listener handing out [`TcpTransport`]s.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for TcpAcceptor {
    type Conn = TcpTransport;

    async fn accept(&mut self) -> io::Result<(TcpTransport, String)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((StreamTransport::new(stream), addr.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplex_send_recv() {
        let (mut a, mut b) = duplex_pair(64);
        assert_eq!(a.send(b"hello").await.unwrap(), 5);
        let got = b.recv(16).await.unwrap();
        assert_eq!(&got[..], b"hello");
    }

    #[tokio::test]
    async fn recv_respects_max_len() {
        let (mut a, mut b) = duplex_pair(64);
        a.send(b"abcdef").await.unwrap();
        assert_eq!(&b.recv(4).await.unwrap()[..], b"abcd");
        assert_eq!(&b.recv(4).await.unwrap()[..], b"ef");
    }

    #[tokio::test]
    async fn close_yields_empty_recv() {
        let (mut a, mut b) = duplex_pair(64);
        a.close().await.unwrap();
        assert!(b.recv(16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tcp_accept_and_connect() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut conn = connect(addr).await.unwrap();
            conn.send(b"ping").await.unwrap();
            conn
        });

        let (mut server, peer_addr) = acceptor.accept().await.unwrap();
        assert!(peer_addr.starts_with("127.0.0.1:"));
        assert_eq!(&server.recv(16).await.unwrap()[..], b"ping");
        drop(client.await.unwrap());
    }
}
