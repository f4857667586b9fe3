use super::{ByteStream, ContainerRuntime, ContainerSpec, RuntimeError};
use crate::stream::{Frame, StreamKind};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, DownloadFromContainerOptions,
    LogOutput, RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

const DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";

/// [`ContainerRuntime`] backed by a Docker-compatible daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the local defaults (`DOCKER_HOST` or the local socket)
    pub fn connect() -> anyhow::Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker/Podman")?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Whether a daemon answers on the local socket
    pub async fn is_available() -> bool {
        if std::env::var_os("DOCKER_HOST").is_none() && !Path::new(DOCKER_SOCKET_PATH).exists() {
            debug!("Docker socket not found at {}", DOCKER_SOCKET_PATH);
            return false;
        }

        let Ok(runtime) = Self::connect() else {
            return false;
        };
        match runtime.docker.version().await {
            Ok(v) => {
                debug!(
                    "Docker API version: {}",
                    v.api_version.unwrap_or_else(|| "unknown".to_string())
                );
                true
            }
            Err(e) => {
                debug!("Failed to get Docker version: {}", e);
                false
            }
        }
    }

    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image, "Pulling stack image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = Box::pin(self.docker.create_image(Some(options), None, None));
        while let Some(update) = progress.next().await {
            let update = update.with_context(|| format!("Failed to pull image {}", image))?;
            if let Some(status) = update.status {
                debug!(image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let tmpfs: HashMap<String, String> = spec
            .scratch_dirs
            .iter()
            .map(|dir| (dir.clone(), "exec".to_string()))
            .collect();

        Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: Some(spec.env.clone()),
            working_dir: spec.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(HostConfig {
                tmpfs: (!tmpfs.is_empty()).then_some(tmpfs),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn engine(err: DockerError, what: impl FnOnce() -> String) -> RuntimeError {
    RuntimeError::Engine(anyhow::Error::new(err).context(what()))
}

fn to_io(err: DockerError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = || {
            spec.name.as_ref().map(|name| CreateContainerOptions {
                name: name.clone(),
                platform: None,
            })
        };

        let response = match self
            .docker
            .create_container(options(), Self::container_config(spec))
            .await
        {
            Err(e) if is_not_found(&e) => {
                self.pull(&spec.image).await?;
                self.docker
                    .create_container(options(), Self::container_config(spec))
                    .await
            }
            other => other,
        }
        .map_err(|e| engine(e, || format!("Failed to create container from {}", spec.image)))?;

        debug!(id = %response.id, image = %spec.image, "Created container");
        Ok(response.id)
    }

    async fn copy_in(&self, id: &str, dir: &str, archive: Bytes) -> Result<(), RuntimeError> {
        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), archive)
            .await
            .map_err(|e| engine(e, || format!("Failed to copy archive into {}", dir)))
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine(e, || "Failed to start container".to_string()))
    }

    async fn attach(&self, id: &str) -> Result<ByteStream, RuntimeError> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let attached = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| engine(e, || "Failed to attach to container".to_string()))?;

        // bollard decodes the multiplexed stream; re-frame it so every runtime hands the
        // drain loop the same wire format
        let frames = attached.output.map_ok(|output| {
            let frame = match output {
                LogOutput::StdErr { message } => Frame::new(StreamKind::Stderr, message),
                LogOutput::StdIn { message } => Frame::new(StreamKind::Stdin, message),
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    Frame::new(StreamKind::Stdout, message)
                }
            };
            frame.encode()
        });

        Ok(Box::pin(StreamReader::new(frames.map_err(to_io))))
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut responses = Box::pin(self.docker.wait_container(id, Some(options)));

        match responses.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as errors
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(engine(e, || "Failed to wait for container".to_string())),
            None => Err(RuntimeError::Engine(anyhow!(
                "Container {} wait stream ended without a status",
                id
            ))),
        }
    }

    async fn copy_out(&self, id: &str, path: &str) -> Result<ByteStream, RuntimeError> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut chunks = Box::pin(self.docker.download_from_container(id, Some(options)));

        // A missing path only shows up as the first item of the body stream
        let first = match chunks.next().await {
            Some(Err(e)) if is_not_found(&e) => {
                return Err(RuntimeError::PathNotFound(path.to_string()))
            }
            Some(Err(e)) => return Err(engine(e, || format!("Failed to copy {} out", path))),
            Some(Ok(chunk)) => Some(Ok::<Bytes, DockerError>(chunk)),
            None => None,
        };

        let body = stream::iter(first).chain(chunks).map_err(to_io);
        Ok(Box::pin(StreamReader::new(body)))
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => {
                debug!(id, "Removed container");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Err(RuntimeError::NoSuchContainer(id.to_string())),
            Err(e) => Err(engine(e, || "Failed to remove container".to_string())),
        }
    }
}
