//! Container runtime capability
//!
//! Staging and artifact fetching only ever talk to a [`ContainerRuntime`]. The Docker
//! implementation lives in [`docker`]; tests substitute a process-backed runtime.

use async_trait::async_trait;
use bytes::Bytes;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

pub mod docker;

pub use docker::DockerRuntime;

/// A readable byte stream handed out by the runtime
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Errors reported by a container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The requested path does not exist inside the container
    #[error("Path not found in container: {0}")]
    PathNotFound(String),

    /// The container handle is unknown to the runtime
    #[error("No such container: {0}")]
    NoSuchContainer(String),

    /// Any other engine failure
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

/// What to create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, if the runtime supports naming
    pub name: Option<String>,
    pub image: String,
    /// Command and arguments; empty keeps the image default
    pub cmd: Vec<String>,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    /// Directories mounted empty and writable (tmpfs on Docker)
    pub scratch_dirs: Vec<String>,
}

/// Lifecycle operations on ephemeral containers
///
/// Every container returned by `create` must eventually be passed to `remove`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a container without starting it and returns its handle.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Extracts a tar archive into `dir`, which must already exist in the container.
    async fn copy_in(&self, id: &str, dir: &str, archive: Bytes) -> Result<(), RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Combined stdout/stderr as a framed stream (see [`crate::stream`]).
    async fn attach(&self, id: &str) -> Result<ByteStream, RuntimeError>;

    /// Blocks until the container's process exits and returns its exit status.
    async fn wait(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Tar archive of `path`, rooted at the path's final component.
    async fn copy_out(&self, id: &str, path: &str) -> Result<ByteStream, RuntimeError>;

    /// Kills (if running) and removes the container.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;
}
