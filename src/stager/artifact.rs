use crate::error::{Error, Result};
use crate::runtime::ContainerRuntime;
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Removes a container at most once
///
/// Removal happens on [`release`](Self::release), or on drop when a tokio runtime is
/// available to run it.
pub(crate) struct ContainerGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: Option<String>,
}

impl ContainerGuard {
    pub(crate) fn new(runtime: Arc<dyn ContainerRuntime>, id: String) -> Self {
        Self {
            runtime,
            id: Some(id),
        }
    }

    pub(crate) fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Removes the container. Later calls are no-ops.
    pub(crate) async fn release(&mut self) -> Result<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        debug!(id = %id, "Removing container");
        self.runtime
            .remove(&id)
            .await
            .map_err(Error::runtime("remove container"))
    }

    /// Releases, logging instead of returning a failure.
    pub(crate) async fn release_quietly(&mut self) {
        if let Err(e) = self.release().await {
            warn!(error = %e, "Failed to remove container");
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                let runtime = self.runtime.clone();
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&id).await {
                        warn!(id = %id, error = %e, "Failed to remove container");
                    }
                });
            }
            Err(_) => warn!(id = %id, "Container leaked: dropped outside a tokio runtime"),
        }
    }
}

/// An in-memory file produced by a container, holding that container until closed
///
/// [`size`](Self::size) is exact and known before the first read.
pub struct Artifact {
    data: Cursor<Vec<u8>>,
    size: u64,
    guard: ContainerGuard,
}

/// A staged, gzip-compressed application archive
pub type Droplet = Artifact;

/// A file copied out of the stack image
pub type FetchedFile = Artifact;

impl Artifact {
    pub(crate) fn new(data: Vec<u8>, guard: ContainerGuard) -> Self {
        Self {
            size: data.len() as u64,
            data: Cursor::new(data),
            guard,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Handle of the container backing this artifact
    pub fn container_id(&self) -> &str {
        self.guard.id()
    }

    /// Removes the backing container.
    pub async fn close(mut self) -> Result<()> {
        self.guard.release().await
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("size", &self.size)
            .field("container", &self.guard.id)
            .finish()
    }
}

impl AsyncRead for Artifact {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.data).poll_read(cx, buf)
    }
}
