//! localstage - local buildpack staging
//!
//! Runs the buildpack detect, compile and release phases for an application inside an
//! ephemeral container and packages the result as a droplet: a gzip-compressed tar of the
//! compiled application plus its start command and staging environment.
//!
//! # Core Concepts
//!
//! - **Container runtime**: an injected [`ContainerRuntime`] capability; [`DockerRuntime`]
//!   talks to a local Docker-compatible daemon
//! - **Stager**: the orchestrator behind [`Stager::stage`] and [`Stager::download`]
//! - **Framed output**: container stdout/stderr arrive as length-prefixed frames and are
//!   copied to a [`FrameSink`] with a per-application prefix
//!
//! # Example Usage
//!
//! ```no_run
//! use localstage::{AppConfig, ConsoleUi, DockerRuntime, LogColor, StageRequest, Stager, StagerConfig};
//! use std::sync::Arc;
//! use tokio::io::AsyncReadExt;
//! use tokio::sync::Mutex;
//!
//! # async fn run(source: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! let stager = Stager::new(
//!     StagerConfig::default(),
//!     Arc::new(DockerRuntime::connect()?),
//!     Arc::new(ConsoleUi::detect()),
//!     Arc::new(Mutex::new(tokio::io::stdout())),
//! );
//!
//! let request = StageRequest::new(
//!     std::io::Cursor::new(source),
//!     vec!["ruby_buildpack".to_string()],
//!     AppConfig::new("some-app"),
//! );
//! let mut droplet = stager.stage(request, LogColor::Cyan).await?;
//!
//! let mut bytes = Vec::with_capacity(droplet.size() as usize);
//! droplet.read_to_end(&mut bytes).await?;
//! droplet.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`stager`]: staging and artifact fetching
//! - [`runtime`]: container runtime capability and the Docker adapter
//! - [`stream`]: framed output demultiplexing
//! - [`archive`]: single-entry archives and archive splicing

pub mod app;
pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod runtime;
pub mod stager;
pub mod stream;
pub mod ui;
pub mod util;

pub use app::{AppConfig, LocalConfig, Service, Services};
pub use archive::{read_named_entry, single_file_archive, ArchiveEntry};
pub use config::{ConfigError, StagerConfig};
pub use error::{Error, Result};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime, RuntimeError};
pub use stager::{Artifact, Droplet, FetchedFile, StageRequest, Stager, StagingInfo};
pub use stream::{copy_stream, Frame, FrameSink, StreamKind};
pub use ui::{ConsoleUi, LogColor, Ui};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
