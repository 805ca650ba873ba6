use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::config::AppConfig;
use crate::core::error::ServerError;
use crate::core::types::PublisherId;
use crate::storage::StorageLayout;

use super::session::Session;
use super::tls;

// ---------------------------------------------------------------------------
// Single-instance guard
// ---------------------------------------------------------------------------

/// Process-wide lock backed by a bound local-domain socket.
///
/// Binding fails while another process holds the same path, which is the
/// whole mechanism: whoever binds first is the instance. The socket file is
/// unlinked when the lock is dropped.
pub struct InstanceLock {
    path: PathBuf,
    _listener: UnixListener,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> std::io::Result<Self> {
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "instance lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            _listener: listener,
        })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "instance lock released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to unlink lock socket");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

/// The HLS server: accepts connections and spawns one session task each.
///
/// Every session value is moved into its task and owned there exclusively
/// until the connection closes; the listener keeps no registry of live
/// sessions and imposes no concurrency bound of its own.
pub struct HlsServer {
    config: Arc<AppConfig>,
    layout: Arc<StorageLayout>,
    cancel: CancellationToken,
}

impl HlsServer {
    pub fn new(
        config: Arc<AppConfig>,
        layout: Arc<StorageLayout>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            layout,
            cancel,
        }
    }

    /// Acquire the instance lock, bind, and serve until cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        let lock_path = &self.config.server.lock_socket_path;
        let _lock = InstanceLock::acquire(lock_path).map_err(|source| ServerError::LockHeld {
            path: lock_path.clone(),
            source,
        })?;

        let acceptor = tls::build_acceptor(&self.config.server)?;

        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let bind_addr: SocketAddr = addr.parse().map_err(|source| ServerError::BindAddr {
            addr: addr.clone(),
            source,
        })?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(ServerError::Bind)?;
        info!(%bind_addr, "HLS server listening");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("listener shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    let (socket, peer_addr) = match accept_result {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    info!(%peer_addr, "accepted connection");

                    let session = Session::new(
                        PublisherId::from_peer(peer_addr),
                        self.layout.clone(),
                        self.config.clone(),
                    );
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        session.run(socket, acceptor).await;
                    });
                }
            }
        }

        // The lock drops here, unlinking the socket file.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lock_is_exclusive_and_released_on_drop() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("server.lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        assert!(InstanceLock::acquire(&path).is_err());

        drop(lock);
        assert!(!path.exists());
        let relocked = InstanceLock::acquire(&path).unwrap();
        drop(relocked);
    }

    #[tokio::test]
    async fn second_server_instance_is_refused() {
        let tmp = tempdir().unwrap();
        let lock_path = tmp.path().join("server.lock");
        let _held = InstanceLock::acquire(&lock_path).unwrap();

        let mut config = AppConfig::default();
        config.server.lock_socket_path = lock_path.clone();
        config.storage.storage_root = tmp.path().join("hls_storage");
        config.storage.temp_root = tmp.path().join("hls_temp");

        let layout = StorageLayout::new(&config.storage);
        layout.ensure_roots().unwrap();

        let server = HlsServer::new(
            Arc::new(config),
            Arc::new(layout),
            CancellationToken::new(),
        );
        let err = server.run().await.unwrap_err();
        assert!(matches!(err, ServerError::LockHeld { .. }));
        // The refused instance must not unlink the holder's socket.
        assert!(lock_path.exists());
    }
}
