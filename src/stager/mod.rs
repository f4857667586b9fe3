//! Buildpack staging
//!
//! [`Stager::stage`] runs detect, compile and release for an application inside an
//! ephemeral build container and packages the result as a [`Droplet`].
//! [`Stager::download`] copies a single file out of the stack image.
//!
//! Both operations own exactly one private container. It is removed when the returned
//! artifact is closed, or immediately when the operation fails.

mod artifact;
pub mod droplet;
pub mod env;
pub mod script;

pub use artifact::{Artifact, Droplet, FetchedFile};
pub use droplet::StagingInfo;

use crate::app::AppConfig;
use crate::archive;
use crate::config::StagerConfig;
use crate::error::{Error, Result};
use crate::runtime::{ByteStream, ContainerRuntime, ContainerSpec, RuntimeError};
use crate::stream::{copy_stream_until, FrameSink, TailSink};
use crate::ui::{LogColor, Ui};
use artifact::ContainerGuard;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bytes of container output kept for [`Error::StagingFailed`]
pub const OUTPUT_TAIL_BYTES: usize = 4096;

/// How long to wait for the log drain once the container is gone
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// One staging attempt
pub struct StageRequest {
    pub app_source: ByteStream,
    /// Candidate buildpacks in detection order
    pub buildpacks: Vec<String>,
    pub app: AppConfig,
    pub cancel: CancellationToken,
}

impl StageRequest {
    /// `app_source` is a tar archive of the application directory.
    pub fn new<R>(app_source: R, buildpacks: Vec<String>, app: AppConfig) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            app_source: Box::pin(app_source),
            buildpacks,
            app,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.app.name.trim().is_empty() {
            return Err(Error::Validation("Application name must not be empty".to_string()));
        }
        if self.buildpacks.is_empty() {
            return Err(Error::Validation("At least one buildpack is required".to_string()));
        }
        if self.buildpacks.iter().any(|b| b.trim().is_empty()) {
            return Err(Error::Validation("Buildpack names must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Drives staging and artifact fetching against a [`ContainerRuntime`]
pub struct Stager {
    config: StagerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    ui: Arc<dyn Ui>,
    logs: Arc<dyn FrameSink>,
}

impl Stager {
    /// `logs` receives the prefixed output of every stage; share one sink between
    /// concurrent stages to keep their frames whole.
    pub fn new(
        config: StagerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        ui: Arc<dyn Ui>,
        logs: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            config,
            runtime,
            ui,
            logs,
        }
    }

    pub fn config(&self) -> &StagerConfig {
        &self.config
    }

    /// Stages `request` and returns the droplet.
    ///
    /// Container output is written to the log sink prefixed with `[<app>] % ` in `color`.
    pub async fn stage(&self, request: StageRequest, color: LogColor) -> Result<Droplet> {
        request.validate()?;
        let StageRequest {
            mut app_source,
            buildpacks,
            app,
            cancel,
        } = request;

        let mut source = Vec::new();
        app_source
            .read_to_end(&mut source)
            .await
            .map_err(|e| Error::Validation(format!("App source is not readable: {}", e)))?;

        let (parent, root) = split_dir(&self.config.build_dir)?;
        let upload = droplet::blocking(move || droplet::source_archive(&source, &root)).await?;

        let env = env::staging_env(&app, &self.config)
            .map_err(|e| Error::Validation(format!("Invalid services: {}", e)))?;

        let spec = ContainerSpec {
            name: Some(container_name(&app.name, "staging")),
            image: self.config.stack_image.clone(),
            cmd: script::command(script::staging_script(&buildpacks, &self.config)),
            env: env::to_pairs(&env),
            working_dir: Some(self.config.build_dir.clone()),
            scratch_dirs: vec![self.config.cache_dir.clone()],
        };

        info!(app = %app.name, buildpacks = ?buildpacks, "Staging application");
        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(Error::runtime("create container"))?;
        let mut guard = ContainerGuard::new(self.runtime.clone(), id);

        let staged = self
            .run(&mut guard, &parent, upload, &env, &app.name, color, &cancel)
            .await;
        match staged {
            Ok(droplet) => {
                info!(app = %app.name, size = droplet.len(), "Staged application");
                Ok(Artifact::new(droplet, guard))
            }
            Err(e) => {
                guard.release_quietly().await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        guard: &mut ContainerGuard,
        upload_dir: &str,
        upload: Vec<u8>,
        env: &BTreeMap<String, String>,
        app_name: &str,
        color: LogColor,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let id = guard.id().to_string();

        self.runtime
            .copy_in(&id, upload_dir, Bytes::from(upload))
            .await
            .map_err(Error::runtime("copy app source"))?;

        let mut output = self
            .runtime
            .attach(&id)
            .await
            .map_err(Error::runtime("attach to container"))?;

        let tail = Arc::new(TailSink::new(self.logs.clone(), OUTPUT_TAIL_BYTES));
        let prefix = format!("{} ", color.paint(&format!("[{}] %", app_name)));
        let mut drain = {
            let tail = tail.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                copy_stream_until(&*tail, &mut output, &prefix, &cancel).await;
            })
        };

        if let Err(e) = self.runtime.start(&id).await {
            drain.abort();
            return Err(Error::runtime("start container")(e));
        }
        debug!(id = %id, "Started build container");

        let status = tokio::select! {
            status = self.runtime.wait(&id) => status,
            _ = cancel.cancelled() => {
                info!(app = %app_name, "Staging cancelled");
                guard.release_quietly().await;
                join_drain(&mut drain).await;
                return Err(Error::Cancelled);
            }
        };
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                drain.abort();
                return Err(Error::runtime("wait for container")(e));
            }
        };
        join_drain(&mut drain).await;
        debug!(id = %id, status, "Build container exited");

        match status {
            0 => {}
            script::EXIT_NOT_DETECTED => return Err(Error::BuildpackNotDetected),
            exit_code => {
                return Err(Error::StagingFailed {
                    exit_code,
                    output: tail.tail(),
                })
            }
        }

        let _loading = self.ui.loading(&format!("Packaging {}", app_name));

        let results = self.read_out(&id, &self.config.output_dir).await?;
        let (_, results_root) = split_dir(&self.config.output_dir)?;
        let release = archive::read_named_entry(
            &format!("{}/{}", results_root, script::RELEASE_FILE),
            results.as_slice(),
        )?;
        let buildpack = archive::read_named_entry(
            &format!("{}/{}", results_root, script::BUILDPACK_FILE),
            results.as_slice(),
        )?;
        let info = StagingInfo::from_release(
            String::from_utf8_lossy(&buildpack.contents).into_owned(),
            &release.contents,
        )?;
        debug!(buildpack = %info.detected_buildpack, start_command = %info.start_command, "Release complete");

        let build = self.read_out(&id, &self.config.build_dir).await?;
        let env_file = env::render_env_file(env);
        droplet::blocking(move || droplet::assemble(&build, &env_file, &info)).await
    }

    /// Copies a single regular file out of the stack image.
    ///
    /// Directories and symlinks are reported as [`Error::NotFound`].
    pub async fn download(&self, path: &str) -> Result<FetchedFile> {
        let _loading = self.ui.loading(&format!("Downloading {}", path));

        let spec = ContainerSpec {
            name: Some(container_name("localstage", "download")),
            image: self.config.stack_image.clone(),
            ..Default::default()
        };
        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(Error::runtime("create container"))?;
        let mut guard = ContainerGuard::new(self.runtime.clone(), id);

        let fetched = self.fetch(guard.id(), path).await;
        match fetched {
            Ok(contents) => {
                info!(path, size = contents.len(), "Downloaded file");
                Ok(Artifact::new(contents, guard))
            }
            Err(e) => {
                guard.release_quietly().await;
                Err(e)
            }
        }
    }

    async fn fetch(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        let archive = self.read_out(id, path).await?;
        match archive::read_named_entry(name, archive.as_slice()) {
            Ok(entry) if entry.entry_type.is_file() => Ok(entry.contents),
            Ok(entry) => {
                debug!(path, entry_type = ?entry.entry_type, "Not a regular file");
                Err(Error::NotFound(path.to_string()))
            }
            Err(Error::NotFound(_)) => Err(Error::NotFound(path.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn read_out(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let mut stream = self
            .runtime
            .copy_out(id, path)
            .await
            .map_err(Error::runtime("copy out"))?;

        let mut contents = Vec::new();
        stream
            .read_to_end(&mut contents)
            .await
            .map_err(|e| Error::runtime("copy out")(RuntimeError::Engine(e.into())))?;
        Ok(contents)
    }
}

async fn join_drain(drain: &mut JoinHandle<()>) {
    if tokio::time::timeout(DRAIN_GRACE, &mut *drain).await.is_err() {
        warn!("Container output did not close, abandoning log drain");
        drain.abort();
    }
}

/// Splits a container directory into its parent and final component.
fn split_dir(dir: &str) -> Result<(String, String)> {
    let path = Path::new(dir);
    match (path.parent(), path.file_name().and_then(|n| n.to_str())) {
        (Some(parent), Some(name)) => Ok((parent.display().to_string(), name.to_string())),
        _ => Err(Error::Validation(format!(
            "Container directory must be below /: {}",
            dir
        ))),
    }
}

/// `<app>-<purpose>-<uuid>`, restricted to characters container engines accept
fn container_name(app: &str, purpose: &str) -> String {
    let app: String = app
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let app = app.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    let app = if app.is_empty() { "app" } else { app };
    format!("{}-{}-{}", app, purpose, Uuid::new_v4())
}
