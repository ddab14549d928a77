//! Connection to the agent daemon.
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tunnel_agent_common::{AgentError, Endpoint, Network};

/// A socket to the daemon, either a control connection or, after a
/// successful `connect` handshake, a raw data channel through the tunnel.
#[derive(Debug)]
pub enum AgentStream {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl AgentStream {
    /// Open a new connection to `endpoint`
    pub async fn open(endpoint: &Endpoint) -> Result<Self, AgentError> {
        let connect_error = |source| AgentError::Connect {
            address: endpoint.to_string(),
            source,
        };

        match endpoint.network {
            #[cfg(unix)]
            Network::Unix => UnixStream::connect(&endpoint.address)
                .await
                .map(AgentStream::Unix)
                .map_err(connect_error),
            #[cfg(not(unix))]
            Network::Unix => Err(connect_error(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            ))),
            Network::Tcp => TcpStream::connect(&endpoint.address)
                .await
                .map(AgentStream::Tcp)
                .map_err(connect_error),
        }
    }
}

#[cfg(unix)]
impl From<UnixStream> for AgentStream {
    fn from(stream: UnixStream) -> Self {
        AgentStream::Unix(stream)
    }
}

impl From<TcpStream> for AgentStream {
    fn from(stream: TcpStream) -> Self {
        AgentStream::Tcp(stream)
    }
}

impl AsyncRead for AgentStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            AgentStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
            AgentStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AgentStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            #[cfg(unix)]
            AgentStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
            AgentStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            AgentStream::Unix(s) => Pin::new(s).poll_flush(cx),
            AgentStream::Tcp(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            AgentStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
            AgentStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_open_missing_socket_is_connect_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::unix(temp_dir.path().join("missing.sock"));

        let err = AgentStream::open(&endpoint).await.unwrap_err();
        assert!(matches!(err, AgentError::Connect { .. }));
        assert!(err.to_string().contains("missing.sock"));
    }

    #[tokio::test]
    async fn test_unix_stream_io() {
        let temp_dir = tempfile::tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let mut stream = AgentStream::open(&Endpoint::unix(&socket_path)).await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        server.await.unwrap();
    }
}
