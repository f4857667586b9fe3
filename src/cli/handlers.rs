use super::commands::{DownloadArgs, StageArgs};
use crate::app::LocalConfig;
use crate::config::StagerConfig;
use crate::error::Error;
use crate::runtime::DockerRuntime;
use crate::stager::{Artifact, StageRequest, Stager};
use crate::ui::{ConsoleUi, LogColor, Ui};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const EXIT_FAILURE: i32 = 1;
const EXIT_CANCELLED: i32 = 130;

fn stager(config: StagerConfig, ui: Arc<dyn Ui>) -> Result<Stager, i32> {
    if let Err(e) = config.validate() {
        error!("{}", e);
        ui.error(&e);
        return Err(EXIT_FAILURE);
    }
    debug!("{}", config);

    let runtime = match DockerRuntime::connect() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Container runtime unavailable: {:#}", e);
            ui.error(&*e);
            return Err(EXIT_FAILURE);
        }
    };
    let logs = Arc::new(Mutex::new(tokio::io::stdout()));

    Ok(Stager::new(config, Arc::new(runtime), ui, logs))
}

/// Archives `dir` with paths relative to it.
pub fn tar_directory(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

async fn save(mut artifact: Artifact, destination: &Path) -> Result<u64, Error> {
    let mut file = tokio::fs::File::create(destination).await?;
    let written = tokio::io::copy(&mut artifact, &mut file).await?;
    file.flush().await?;
    artifact.close().await?;
    Ok(written)
}

fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Cancelled => EXIT_CANCELLED,
        _ => EXIT_FAILURE,
    }
}

pub async fn handle_stage(args: &StageArgs, quiet: bool) -> i32 {
    let ui: Arc<dyn Ui> = Arc::new(ConsoleUi::detect());

    let manifest = match LocalConfig::load_or_default(&args.config) {
        Ok(manifest) => manifest,
        Err(e) => {
            ui.error(&e);
            return EXIT_FAILURE;
        }
    };
    let app = manifest.app_config(&args.name);
    let buildpacks = if args.buildpacks.is_empty() {
        app.buildpacks.clone()
    } else {
        args.buildpacks.clone()
    };

    let stager = match stager(StagerConfig::default(), ui.clone()) {
        Ok(stager) => stager,
        Err(code) => return code,
    };

    let dir: PathBuf = args.path.clone();
    let source = match tokio::task::spawn_blocking(move || tar_directory(&dir)).await {
        Ok(Ok(source)) => source,
        Ok(Err(e)) => {
            ui.error(&Error::Validation(format!(
                "Cannot archive {}: {}",
                args.path.display(),
                e
            )));
            return EXIT_FAILURE;
        }
        Err(e) => {
            error!("Archiving task failed: {}", e);
            return EXIT_FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling staging");
            on_interrupt.cancel();
        }
    });

    let color = if atty::is(atty::Stream::Stdout) {
        LogColor::for_index(0)
    } else {
        LogColor::Plain
    };
    let request =
        StageRequest::new(Cursor::new(source), buildpacks, app).with_cancellation(cancel);

    let droplet = match stager.stage(request, color).await {
        Ok(droplet) => droplet,
        Err(e) => {
            if let Error::StagingFailed { output, .. } = &e {
                debug!(tail = %output, "Staging output tail");
            }
            ui.error(&e);
            return exit_code(&e);
        }
    };

    let destination = args.droplet_path();
    match save(droplet, &destination).await {
        Ok(size) => {
            info!(path = %destination.display(), size, "Wrote droplet");
            if !quiet {
                ui.output(&format!("Successfully staged: {}", args.name));
            }
            0
        }
        Err(e) => {
            ui.error(&e);
            exit_code(&e)
        }
    }
}

pub async fn handle_download(args: &DownloadArgs, quiet: bool) -> i32 {
    let ui: Arc<dyn Ui> = Arc::new(ConsoleUi::detect());
    let stager = match stager(StagerConfig::default(), ui.clone()) {
        Ok(stager) => stager,
        Err(code) => return code,
    };

    let file = match stager.download(&args.path).await {
        Ok(file) => file,
        Err(e) => {
            ui.error(&e);
            return exit_code(&e);
        }
    };

    let destination = args.destination();
    match save(file, &destination).await {
        Ok(size) => {
            if !quiet {
                ui.output(&format!(
                    "Downloaded {} ({} bytes) to {}",
                    args.path,
                    size,
                    destination.display()
                ));
            }
            0
        }
        Err(e) => {
            ui.error(&e);
            EXIT_FAILURE
        }
    }
}
