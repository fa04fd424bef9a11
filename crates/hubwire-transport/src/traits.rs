use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

/// A connected byte stream with a stable connection identifier.
///
/// This is the fundamental I/O type handed to the hub layer. It implements
/// `AsyncRead + AsyncWrite` regardless of the underlying transport.
pub struct ConnectionStream {
    id: String,
    inner: StreamInner,
}

enum StreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    Memory(DuplexStream),
}

impl ConnectionStream {
    /// Wrap a connected TCP stream.
    pub fn tcp(stream: TcpStream, id: impl Into<String>) -> Self {
        let id = id.into();
        // Frames are small and latency-sensitive.
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(connection_id = %id, error = %err, "could not disable nagle");
        }
        Self {
            id,
            inner: StreamInner::Tcp(stream),
        }
    }

    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn unix(stream: tokio::net::UnixStream, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: StreamInner::Unix(stream),
        }
    }

    /// Create an in-memory connection.
    ///
    /// Returns the server-side `ConnectionStream` and the raw client end of
    /// the pipe. `capacity` is the per-direction buffer size in bytes.
    pub fn memory(id: impl Into<String>, capacity: usize) -> (Self, DuplexStream) {
        let (server, client) = tokio::io::duplex(capacity);
        (
            Self {
                id: id.into(),
                inner: StreamInner::Memory(server),
            },
            client,
        )
    }

    /// Stable identifier of this connection.
    pub fn connection_id(&self) -> &str {
        &self.id
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            StreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            StreamInner::Unix(_) => "unix-domain-socket",
            StreamInner::Memory(_) => "memory",
        }
    }
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            StreamInner::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            StreamInner::Memory(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            StreamInner::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            StreamInner::Memory(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            StreamInner::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            StreamInner::Unix(stream) => Pin::new(stream).poll_flush(cx),
            StreamInner::Memory(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            StreamInner::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            StreamInner::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            StreamInner::Memory(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for ConnectionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStream")
            .field("id", &self.id)
            .field("type", &self.transport_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn memory_stream_is_bidirectional() {
        let (mut server, mut client) = ConnectionStream::memory("conn-mem", 64);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn memory_stream_reports_identity() {
        let (server, _client) = ConnectionStream::memory("conn-42", 16);
        assert_eq!(server.connection_id(), "conn-42");
        assert_eq!(server.transport_name(), "memory");

        let dbg = format!("{server:?}");
        assert!(dbg.contains("conn-42"));
        assert!(dbg.contains("memory"));
    }

    #[tokio::test]
    async fn tcp_stream_disables_nagle() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        let stream = ConnectionStream::tcp(accepted, "conn-tcp");
        assert_eq!(stream.connection_id(), "conn-tcp");
        let StreamInner::Tcp(inner) = &stream.inner else {
            panic!("expected a tcp stream");
        };
        assert!(inner.nodelay().unwrap());
        drop(client);
    }

    #[tokio::test]
    async fn memory_stream_eof_after_client_drop() {
        let (mut server, client) = ConnectionStream::memory("conn-eof", 16);
        drop(client);

        let mut buf = [0u8; 8];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
