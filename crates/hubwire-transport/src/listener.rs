use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::ConnectionStream;

/// Where a listener binds or a client connects.
///
/// Accepted forms:
/// - `tcp://host:port` or a bare `host:port`
/// - `unix:///path/to.sock` or a bare path containing `/` (Unix only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl FromStr for ListenAddr {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::InvalidAddress(input.to_string()));
        }

        if let Some(rest) = input.strip_prefix("tcp://") {
            return parse_tcp(rest);
        }

        if let Some(rest) = input.strip_prefix("unix://") {
            return parse_unix(rest);
        }

        if input.contains('/') {
            return parse_unix(input);
        }

        parse_tcp(input)
    }
}

fn parse_tcp(addr: &str) -> Result<ListenAddr> {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(ListenAddr::Tcp(addr.to_string()))
        }
        _ => Err(TransportError::InvalidAddress(addr.to_string())),
    }
}

#[cfg(unix)]
fn parse_unix(path: &str) -> Result<ListenAddr> {
    if path.is_empty() {
        return Err(TransportError::InvalidAddress(path.to_string()));
    }
    Ok(ListenAddr::Unix(PathBuf::from(path)))
}

#[cfg(not(unix))]
fn parse_unix(path: &str) -> Result<ListenAddr> {
    Err(TransportError::InvalidAddress(format!(
        "{path} (unix sockets unsupported on this platform)"
    )))
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            ListenAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Listens for and accepts hub connections.
///
/// Every accepted stream gets an auto-generated connection id (`conn-N`).
pub struct HubListener {
    inner: ListenerInner,
    next_connection_id: AtomicU64,
}

enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixSocketListener),
}

impl HubListener {
    /// Bind to a `tcp://` or `unix://` address.
    pub async fn bind(addr: &str) -> Result<Self> {
        let inner = match addr.parse::<ListenAddr>()? {
            ListenAddr::Tcp(addr) => {
                let listener =
                    TcpListener::bind(&addr)
                        .await
                        .map_err(|source| TransportError::Bind {
                            addr: addr.clone(),
                            source,
                        })?;
                info!(%addr, "listening on tcp");
                ListenerInner::Tcp(listener)
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => ListenerInner::Unix(UnixSocketListener::bind(path)?),
        };

        Ok(Self {
            inner,
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Accept the next connection and assign an auto-generated id.
    pub async fn accept(&self) -> Result<ConnectionStream> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("conn-{id}");

        match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await.map_err(TransportError::Accept)?;
                debug!(connection_id = %id, %peer, "accepted tcp connection");
                Ok(ConnectionStream::tcp(stream, id))
            }
            #[cfg(unix)]
            ListenerInner::Unix(listener) => {
                let (stream, _addr) = listener
                    .listener
                    .accept()
                    .await
                    .map_err(TransportError::Accept)?;
                debug!(connection_id = %id, "accepted unix connection");
                Ok(ConnectionStream::unix(stream, id))
            }
        }
    }

    /// The bound address, with the OS-assigned port for `:0` TCP binds.
    pub fn local_addr(&self) -> Result<ListenAddr> {
        match &self.inner {
            ListenerInner::Tcp(listener) => Ok(ListenAddr::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            ListenerInner::Unix(listener) => Ok(ListenAddr::Unix(listener.path.clone())),
        }
    }
}

/// Connect to a listening hub as a client.
pub async fn connect(addr: &str) -> Result<ConnectionStream> {
    match addr.parse::<ListenAddr>()? {
        ListenAddr::Tcp(addr) => {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|source| TransportError::Connect {
                    addr: addr.clone(),
                    source,
                })?;
            debug!(%addr, "connected over tcp");
            Ok(ConnectionStream::tcp(stream, format!("client-{addr}")))
        }
        #[cfg(unix)]
        ListenAddr::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(&path).await.map_err(|source| {
                TransportError::Connect {
                    addr: path.display().to_string(),
                    source,
                }
            })?;
            debug!(?path, "connected to unix domain socket");
            Ok(ConnectionStream::unix(
                stream,
                format!("client-{}", path.display()),
            ))
        }
    }
}

/// Filesystem-path Unix socket listener with stale-socket cleanup.
#[cfg(unix)]
struct UnixSocketListener {
    listener: tokio::net::UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

#[cfg(unix)]
impl UnixSocketListener {
    const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    fn bind(path: PathBuf) -> Result<Self> {
        use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};

        let bind_err = |path: &PathBuf, source: std::io::Error| TransportError::Bind {
            addr: path.display().to_string(),
            source,
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Remove stale socket if it exists, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = tokio::net::UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(|e| bind_err(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: Some((created.dev(), created.ino())),
            path,
        })
    }
}

#[cfg(unix)]
impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        use std::os::unix::fs::{FileTypeExt, MetadataExt};

        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}
