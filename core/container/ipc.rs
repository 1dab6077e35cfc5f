//! The model container's Unix-domain-socket IPC server.
//!
//! Length-prefixed (4-byte BE) JSON framing with a 10 MiB cap, stale-socket
//! removal at bind, `chmod 0o600`, a listener backlog of 5, and an
//! accept-loop-plus-per-connection-task concurrency model built on
//! `tokio::net::UnixListener` and `base::shutdown` for cooperative stop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Any message whose declared length exceeds this is rejected on read.
pub const MAX_MESSAGE_BYTES: u32 = 10 * 1024 * 1024;

#[derive(Debug)]
pub enum FramingError {
    Io(std::io::Error),
    TooLarge(u32),
}

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingError::Io(e) => write!(f, "I/O error: {e}"),
            FramingError::TooLarge(n) => write!(f, "message of {n} bytes exceeds 10 MiB cap"),
        }
    }
}

impl std::error::Error for FramingError {}

impl From<std::io::Error> for FramingError {
    fn from(e: std::io::Error) -> Self {
        FramingError::Io(e)
    }
}

/// Reads one length-prefixed JSON message. Any I/O error or an oversized
/// length closes the connection without a reply.
pub async fn read_message(stream: &mut UnixStream) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_BYTES {
        return Err(FramingError::TooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Writes one length-prefixed JSON message.
pub async fn write_message(stream: &mut UnixStream, payload: &[u8]) -> Result<(), FramingError> {
    let len = u32::try_from(payload.len()).map_err(|_| FramingError::TooLarge(u32::MAX))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Handles exactly one connection's request/response cycle. `handle` maps
/// a raw JSON request payload to a raw JSON response payload and must
/// never panic — callers that need that guarantee wrap their own
/// processing in `std::panic::catch_unwind` or, preferably, a handler
/// that never panics by construction (this crate's `InferenceHandler`
/// already swallows all failures internally).
async fn handle_connection<F>(mut stream: UnixStream, handle: Arc<F>)
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    let request = match read_message(&mut stream).await {
        Ok(r) => r,
        Err(e) => {
            debug!(err = %e, "closing connection: bad request framing");
            return;
        }
    };
    let response = handle(&request);
    if let Err(e) = write_message(&mut stream, &response).await {
        debug!(err = %e, "closing connection: failed to write response");
    }
}

/// The UDS server: binds `socket_dir/vas_model_<model_id>.sock`, removes
/// any stale socket file first, sets `0o600` permissions, and accepts
/// connections until told to stop.
pub struct IpcServer {
    socket_path: PathBuf,
}

impl IpcServer {
    /// Binds the socket with a listener backlog of 5 and owner-only
    /// permissions.
    pub async fn bind(socket_path: impl Into<PathBuf>) -> std::io::Result<(Self, UnixListener)> {
        let socket_path = socket_path.into();
        remove_stale_socket(&socket_path);
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let listener = UnixListener::bind(&socket_path)?;
        set_socket_permissions(&socket_path);
        Ok((IpcServer { socket_path: socket_path.clone() }, listener))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the accept loop until `shutdown_rx` fires: each accepted
    /// connection is spawned as its own task so one slow/misbehaving
    /// client can't block others.
    pub async fn serve<F>(
        &self,
        listener: UnixListener,
        handle: Arc<F>,
        shutdown_rx: base::shutdown::Receiver,
    ) where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        info!(path = %self.socket_path.display(), "IPC server accepting connections");
        loop {
            tokio::select! {
                _ = shutdown_rx.as_future() => {
                    info!(path = %self.socket_path.display(), "IPC server stopping");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let handle = handle.clone();
                            tokio::spawn(handle_connection(stream, handle));
                        }
                        Err(e) => {
                            warn!(err = %e, "accept failed");
                        }
                    }
                }
            }
        }
        self.unlink();
    }

    /// Removes the socket file. Best-effort; called automatically when
    /// `serve` exits, but exposed for callers managing their own loop.
    pub fn unlink(&self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.socket_path.display(), err = %e, "failed to remove socket file");
            }
        }
    }
}

fn remove_stale_socket(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), err = %e, "failed to remove stale socket file");
        }
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(path = %path.display(), err = %e, "failed to set socket permissions");
    }
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_message() {
        let tmp = tempfile::tempdir().unwrap();
        let sock_path = tmp.path().join("test.sock");
        let listener = UnixListener::bind(&sock_path).unwrap();

        let server_task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req = read_message(&mut stream).await.unwrap();
            assert_eq!(req, b"hello");
            write_message(&mut stream, b"world").await.unwrap();
        });

        let mut client = UnixStream::connect(&sock_path).await.unwrap();
        write_message(&mut client, b"hello").await.unwrap();
        let resp = read_message(&mut client).await.unwrap();
        assert_eq!(resp, b"world");
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_oversized_length_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let sock_path = tmp.path().join("test.sock");
        let listener = UnixListener::bind(&sock_path).unwrap();

        let server_task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let result = read_message(&mut stream).await;
            assert!(matches!(result, Err(FramingError::TooLarge(_))));
        });

        let mut client = UnixStream::connect(&sock_path).await.unwrap();
        client.write_all(&(MAX_MESSAGE_BYTES + 1).to_be_bytes()).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn bind_removes_stale_socket_and_sets_permissions() {
        let tmp = tempfile::tempdir().unwrap();
        let sock_path = tmp.path().join("vas_model_yolo.sock");
        std::fs::write(&sock_path, b"stale").unwrap();

        let (server, listener) = IpcServer::bind(&sock_path).await.unwrap();
        assert_eq!(server.socket_path(), sock_path.as_path());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
        drop(listener);
        server.unlink();
        assert!(!sock_path.exists());
    }
}
