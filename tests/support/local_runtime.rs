//! Process-backed [`ContainerRuntime`] for tests
//!
//! Every "container" is a directory under a temp root. Container paths starting with
//! [`CONTAINER_ROOT`] map into that directory, both in copy paths and inside the command
//! line; other absolute paths are used as-is on the host. `start` runs the command with
//! `sh`, framing stdout and stderr chunks onto the attach stream.

use async_trait::async_trait;
use bytes::Bytes;
use localstage::runtime::{ByteStream, ContainerRuntime, ContainerSpec, RuntimeError};
use localstage::stream::{Frame, StreamKind};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::process::Command;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Prefix of paths that live inside a container
pub const CONTAINER_ROOT: &str = "/container";

struct Container {
    dir: PathBuf,
    spec: ContainerSpec,
    writer: Option<DuplexStream>,
    reader: Option<DuplexStream>,
    exit: Option<oneshot::Receiver<i64>>,
    task: Option<AbortHandle>,
}

#[allow(dead_code)]
pub struct LocalRuntime {
    root: TempDir,
    images: HashMap<String, Vec<(String, Vec<u8>)>>,
    links: HashMap<String, Vec<(String, String)>>,
    next_id: AtomicUsize,
    containers: Mutex<HashMap<String, Container>>,
    created: Mutex<Vec<ContainerSpec>>,
    removed: Mutex<Vec<String>>,
    fail_on: Mutex<Option<&'static str>>,
}

#[allow(dead_code)]
impl LocalRuntime {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("temp root"),
            images: HashMap::new(),
            links: HashMap::new(),
            next_id: AtomicUsize::new(0),
            containers: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        }
    }

    /// Adds a file every container created from `image` starts with.
    pub fn with_image_file(mut self, image: &str, path: &str, contents: &[u8]) -> Self {
        self.images
            .entry(image.to_string())
            .or_default()
            .push((path.to_string(), contents.to_vec()));
        self
    }

    /// Adds a symlink at `path` pointing at `target` to every container from `image`.
    pub fn with_image_symlink(mut self, image: &str, path: &str, target: &str) -> Self {
        self.links
            .entry(image.to_string())
            .or_default()
            .push((path.to_string(), target.to_string()));
        self
    }

    /// Makes the named operation fail from now on.
    pub fn fail_on(&self, operation: &'static str) {
        *self.fail_on.lock().unwrap() = Some(operation);
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    /// Containers created and not yet removed
    pub fn live(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    fn check(&self, operation: &'static str) -> Result<(), RuntimeError> {
        if *self.fail_on.lock().unwrap() == Some(operation) {
            return Err(RuntimeError::Engine(anyhow::anyhow!(
                "injected {} failure",
                operation
            )));
        }
        Ok(())
    }

    fn dir(&self, id: &str) -> Result<PathBuf, RuntimeError> {
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .map(|c| c.dir.clone())
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))
    }
}

fn host_path(dir: &Path, path: &str) -> PathBuf {
    match path.strip_prefix(CONTAINER_ROOT) {
        Some(rest) => dir.join(rest.trim_start_matches('/')),
        None => PathBuf::from(path),
    }
}

fn localize(dir: &Path, value: &str) -> String {
    value.replace(&format!("{}/", CONTAINER_ROOT), &format!("{}/", dir.display()))
}

fn engine(err: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::Engine(anyhow::anyhow!("{}", err))
}

/// Frames every chunk read from `pipe` until it closes.
async fn pump<R: AsyncRead + Unpin>(pipe: Option<R>, kind: StreamKind, tx: UnboundedSender<Frame>) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut buf = [0u8; 4096];
    loop {
        let chunk = match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => Bytes::copy_from_slice(&buf[..n]),
        };
        if tx.send(Frame::new(kind, chunk)).is_err() {
            break;
        }
    }
}

#[async_trait]
impl ContainerRuntime for LocalRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.check("create")?;
        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let dir = self.root.path().join(&id);
        std::fs::create_dir_all(&dir).map_err(engine)?;

        for scratch in &spec.scratch_dirs {
            std::fs::create_dir_all(host_path(&dir, scratch)).map_err(engine)?;
        }
        for (path, contents) in self.images.get(&spec.image).into_iter().flatten() {
            let target = host_path(&dir, path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(engine)?;
            }
            std::fs::write(target, contents).map_err(engine)?;
        }
        for (path, target) in self.links.get(&spec.image).into_iter().flatten() {
            let link = host_path(&dir, path);
            if let Some(parent) = link.parent() {
                std::fs::create_dir_all(parent).map_err(engine)?;
            }
            std::os::unix::fs::symlink(target, link).map_err(engine)?;
        }

        let (writer, reader) = tokio::io::duplex(64 * 1024);
        self.created.lock().unwrap().push(spec.clone());
        self.containers.lock().unwrap().insert(
            id.clone(),
            Container {
                dir,
                spec: spec.clone(),
                writer: Some(writer),
                reader: Some(reader),
                exit: None,
                task: None,
            },
        );
        Ok(id)
    }

    async fn copy_in(&self, id: &str, dir: &str, archive: Bytes) -> Result<(), RuntimeError> {
        self.check("copy_in")?;
        let target = host_path(&self.dir(id)?, dir);
        tar::Archive::new(&archive[..])
            .unpack(&target)
            .map_err(engine)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.check("start")?;
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?;
        let mut writer = container
            .writer
            .take()
            .ok_or_else(|| engine("container already started"))?;

        let cmd: Vec<String> = container
            .spec
            .cmd
            .iter()
            .map(|arg| localize(&container.dir, arg))
            .collect();
        let (program, args) = cmd.split_first().ok_or_else(|| engine("no command"))?;
        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(std::env::var_os("PATH").map(|p| ("PATH", p)))
            .envs(container.spec.env.iter().filter_map(|pair| {
                pair.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            }))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(working_dir) = &container.spec.working_dir {
            command.current_dir(host_path(&container.dir, working_dir));
        }
        let mut child = command.spawn().map_err(engine)?;

        let (exit_tx, exit_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let stdout = pump(child.stdout.take(), StreamKind::Stdout, tx.clone());
            let stderr = pump(child.stderr.take(), StreamKind::Stderr, tx);
            let write = async {
                while let Some(frame) = rx.recv().await {
                    let _ = writer.write_all(&Frame::encode(&frame)).await;
                }
            };
            tokio::join!(stdout, stderr, write);

            let code = match child.wait().await {
                Ok(status) => status.code().map(i64::from).unwrap_or(-1),
                Err(_) => -1,
            };
            drop(writer);
            let _ = exit_tx.send(code);
        });

        container.exit = Some(exit_rx);
        container.task = Some(task.abort_handle());
        Ok(())
    }

    async fn attach(&self, id: &str) -> Result<ByteStream, RuntimeError> {
        self.check("attach")?;
        let reader = self
            .containers
            .lock()
            .unwrap()
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?
            .reader
            .take()
            .ok_or_else(|| engine("already attached"))?;
        Ok(Box::pin(reader))
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        self.check("wait")?;
        let exit = self
            .containers
            .lock()
            .unwrap()
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?
            .exit
            .take()
            .ok_or_else(|| engine("container not started"))?;
        exit.await.map_err(|_| engine("container was removed"))
    }

    async fn copy_out(&self, id: &str, path: &str) -> Result<ByteStream, RuntimeError> {
        self.check("copy_out")?;
        let source = host_path(&self.dir(id)?, path);
        if std::fs::symlink_metadata(&source).is_err() {
            return Err(RuntimeError::PathNotFound(path.to_string()));
        }
        let name = Path::new(path)
            .file_name()
            .ok_or_else(|| engine("path has no final component"))?;

        // Like a container engine, archive symlinks as links
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        if source.is_dir() {
            builder.append_dir_all(name, &source).map_err(engine)?;
        } else {
            builder.append_path_with_name(&source, name).map_err(engine)?;
        }
        let archive = builder.into_inner().map_err(engine)?;
        Ok(Box::pin(Cursor::new(archive)))
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.removed.lock().unwrap().push(id.to_string());
        self.check("remove")?;
        let container = self
            .containers
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?;
        if let Some(task) = container.task {
            task.abort();
        }
        let _ = std::fs::remove_dir_all(container.dir);
        Ok(())
    }
}
