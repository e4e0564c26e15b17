//! Unix socket listeners for the gate and supervisor channels.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approval::BroadcastApprovalChannel;
use crate::connection::serve_connection;
use crate::error::{GateError, GateResult};
use crate::service::GateService;
use crate::supervisor::supervise_connection;

/// A bound socket file, removed again when dropped.
#[derive(Debug)]
pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
}

impl SocketListener {
    /// Bind `path` with owner-only permissions.
    ///
    /// The parent directory is created if needed. A stale socket file is
    /// replaced; a socket another process still answers on is not.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Bind`] if the socket is in use or cannot be
    /// created.
    pub fn bind(path: impl Into<PathBuf>) -> GateResult<Self> {
        let path = path.into();
        let bind_err = |source: std::io::Error| GateError::Bind {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(bind_err)?;
        }

        if path.exists() {
            if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "another process is listening on this socket",
                )));
            }
            debug!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .map_err(bind_err)?;

        info!(path = %path.display(), "listening on Unix socket");
        Ok(Self { listener, path })
    }

    /// Path of the socket file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn accept(&self) -> std::io::Result<UnixStream> {
        self.listener.accept().await.map(|(stream, _)| stream)
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
        }
    }
}

/// Accept adapter connections until `shutdown` fires.
///
/// Open connections are closed (and their sessions torn down) before this
/// returns.
///
/// # Errors
///
/// Currently always returns `Ok`; accept failures are logged and skipped.
pub async fn serve_gate(
    listener: SocketListener,
    service: Arc<GateService>,
    shutdown: CancellationToken,
) -> GateResult<()> {
    let token = shutdown.clone();
    accept_loop(&listener, "gate", &shutdown, move |stream| {
        serve_connection(stream, Arc::clone(&service), token.clone())
    })
    .await;
    Ok(())
}

/// Accept supervisor connections until `shutdown` fires.
///
/// # Errors
///
/// Currently always returns `Ok`; accept failures are logged and skipped.
pub async fn serve_supervisor(
    listener: SocketListener,
    service: Arc<GateService>,
    channel: BroadcastApprovalChannel,
    shutdown: CancellationToken,
) -> GateResult<()> {
    let token = shutdown.clone();
    accept_loop(&listener, "supervisor", &shutdown, move |stream| {
        // Subscribe before the handler takes its snapshot so nothing falls
        // between the two.
        supervise_connection(stream, Arc::clone(&service), channel.subscribe(), token.clone())
    })
    .await;
    Ok(())
}

async fn accept_loop<F, Fut>(
    listener: &SocketListener,
    kind: &'static str,
    shutdown: &CancellationToken,
    handler: F,
) where
    F: Fn(UnixStream) -> Fut,
    Fut: Future<Output = GateResult<()>> + Send + 'static,
{
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    debug!(kind, "connection accepted");
                    let conn = handler(stream);
                    connections.spawn(async move {
                        if let Err(e) = conn.await {
                            warn!(kind, error = %e, "connection ended with error");
                        }
                    });
                },
                Err(e) => warn!(kind, error = %e, "failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {},
        }
    }

    // Handlers watch the same token and wind down on their own.
    while connections.join_next().await.is_some() {}
    info!(kind, path = %listener.path().display(), "listener stopped");
}
