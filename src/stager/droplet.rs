//! Archives moving in and out of the build container

use crate::archive::{self, Owner, Splice};
use crate::error::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io;

/// Owner of every file in a droplet (the in-container runtime user)
pub const DROPLET_OWNER: Owner = Owner::new(2000, 2000);

/// Root directory of the application inside a droplet
pub const APP_DIR: &str = "app";

/// Staging environment entry; replaces any file of the same name in the build dir
pub const ENV_ENTRY: &str = "app/env";

/// Droplet metadata entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingInfo {
    pub detected_buildpack: String,
    pub start_command: String,
}

impl StagingInfo {
    pub const FILE_NAME: &'static str = "staging_info.yml";

    /// Reads the start command from a buildpack's release output.
    pub fn from_release(detected_buildpack: String, release: &[u8]) -> Result<Self> {
        let release: serde_yaml::Value = if release.iter().all(u8::is_ascii_whitespace) {
            serde_yaml::Value::Null
        } else {
            serde_yaml::from_slice(release)?
        };
        let start_command = release
            .get("default_process_types")
            .and_then(|types| types.get("web"))
            .and_then(|web| web.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            detected_buildpack,
            start_command,
        })
    }
}

/// Re-roots an application source archive under `root` for upload next to the build dir.
pub fn source_archive(source: &[u8], root: &str) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    archive::append_dir(&mut builder, root, Some(DROPLET_OWNER))?;
    archive::splice(
        &mut builder,
        source,
        &Splice {
            prefix: root,
            strip_root: false,
            owner: Some(DROPLET_OWNER),
            exclude: &[],
        },
    )
    .map_err(|e| Error::Validation(format!("App source is not a valid archive: {}", e)))?;
    Ok(builder.into_inner()?)
}

/// Builds the gzip-compressed droplet from a copy-out of the build directory.
pub fn assemble(build_dir: &[u8], env_file: &str, info: &StagingInfo) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    archive::append_dir(&mut builder, APP_DIR, Some(DROPLET_OWNER))?;
    archive::splice(
        &mut builder,
        build_dir,
        &Splice {
            prefix: APP_DIR,
            strip_root: true,
            owner: Some(DROPLET_OWNER),
            exclude: &[ENV_ENTRY],
        },
    )?;

    let env = archive::single_file_archive("env", env_file.as_bytes())?;
    archive::splice(
        &mut builder,
        env.as_slice(),
        &Splice {
            prefix: APP_DIR,
            strip_root: false,
            owner: Some(DROPLET_OWNER),
            exclude: &[],
        },
    )?;

    let info = serde_yaml::to_string(info)?;
    let info = archive::single_file_archive(StagingInfo::FILE_NAME, info.as_bytes())?;
    archive::splice(
        &mut builder,
        info.as_slice(),
        &Splice {
            prefix: ".",
            strip_root: false,
            owner: Some(DROPLET_OWNER),
            exclude: &[],
        },
    )?;

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Runs a blocking archive job off the async workers.
pub async fn blocking<T, F>(job: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?
}
