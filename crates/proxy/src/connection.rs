//! Byte-stream abstraction over plain and TLS sockets.
//!
//! A [`Connection`] is a bidirectional byte stream owned by exactly one
//! transaction at a time (or briefly by the pool between accept and
//! transaction start). It hides whether the underlying transport is a
//! plain TCP socket or a client-side TLS stream; the TLS variant exists to
//! type the tunnel endpoint and is not used for interception — `CONNECT`
//! traffic is relayed opaquely.
//!
//! The enum delegates [`AsyncRead`]/[`AsyncWrite`] to its transport, so a
//! connection can be handed to `tokio::io::split` when the tunnel pump
//! needs independent read and write halves.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// A handle to one bidirectional byte stream.
///
/// Dropping a connection shuts the underlying socket down cleanly.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection {
    /// Reads at least 1 byte into `buf`, up to `buf.len()`.
    ///
    /// A return of `Ok(0)` means the peer closed the stream; callers
    /// translate that into the direction-specific disconnect error.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf).await
    }

    /// Writes all of `data`, or fails.
    pub async fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data).await?;
        self.flush().await
    }

    /// Shuts the stream down. Safe to call more than once; errors from an
    /// already-closed socket are discarded.
    pub async fn close(&mut self) {
        let _ = self.shutdown().await;
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            Connection::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Connection::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            Connection::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Connection::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Connection::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Connection::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Connection::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Connection::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
