#![allow(dead_code)]

pub mod local_runtime;

pub use local_runtime::{LocalRuntime, CONTAINER_ROOT};

use flate2::read::GzDecoder;
use localstage::stager::script::buildpack_key;
use localstage::ui::{Loading, Ui};
use localstage::StagerConfig;
use std::error::Error as StdError;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Mutex;

pub const STACK_IMAGE: &str = "local/stack:test";

/// Records what the stager reports
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingUi {
    pub lines: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    pub loading: Mutex<Vec<String>>,
}

impl Ui for RecordingUi {
    fn output(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn error(&self, err: &(dyn StdError + 'static)) {
        self.errors.lock().unwrap().push(err.to_string());
    }

    fn loading(&self, message: &str) -> Loading {
        self.loading.lock().unwrap().push(message.to_string());
        Loading::hidden()
    }
}

/// Container layout rooted in the local runtime, buildpacks on the host
#[allow(dead_code)]
pub fn stager_config(buildpacks_dir: &Path) -> StagerConfig {
    StagerConfig {
        stack_image: STACK_IMAGE.to_string(),
        stack_name: "cflinuxfs2".to_string(),
        build_dir: format!("{}/tmp/app", CONTAINER_ROOT),
        cache_dir: format!("{}/tmp/cache", CONTAINER_ROOT),
        output_dir: format!("{}/tmp/staging", CONTAINER_ROOT),
        buildpacks_dir: buildpacks_dir.display().to_string(),
        memory_limit: "1024m".to_string(),
        log_level: "info".to_string(),
    }
}

/// Scripts for one buildpack; each is the body of a `sh` script
#[allow(dead_code)]
pub struct Buildpack<'a> {
    pub detect: &'a str,
    pub compile: &'a str,
    pub release: &'a str,
}

impl Default for Buildpack<'_> {
    fn default() -> Self {
        Self {
            detect: "exit 0",
            compile: "echo compiled",
            release: "printf 'default_process_types:\\n  web: some-start-command\\n'",
        }
    }
}

#[allow(dead_code)]
pub fn install_buildpack(buildpacks_dir: &Path, id: &str, buildpack: &Buildpack<'_>) {
    let bin = buildpacks_dir.join(buildpack_key(id)).join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    for (name, body) in [
        ("detect", buildpack.detect),
        ("compile", buildpack.compile),
        ("release", buildpack.release),
    ] {
        let path = bin.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Tar of regular files, owned by an arbitrary non-runtime user
#[allow(dead_code)]
pub fn source_tar(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_uid(501);
        header.set_gid(20);
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

/// One droplet entry: path, uid, gid, contents
#[allow(dead_code)]
pub type DropletEntry = (String, u64, u64, Vec<u8>);

#[allow(dead_code)]
pub fn droplet_entries(droplet: &[u8]) -> Vec<DropletEntry> {
    let mut archive = tar::Archive::new(GzDecoder::new(droplet));
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            (
                entry.path().unwrap().display().to_string(),
                entry.header().uid().unwrap(),
                entry.header().gid().unwrap(),
                contents,
            )
        })
        .collect()
}

#[allow(dead_code)]
pub fn entry<'a>(entries: &'a [DropletEntry], name: &str) -> &'a DropletEntry {
    entries
        .iter()
        .find(|e| e.0 == name)
        .unwrap_or_else(|| panic!("missing droplet entry {name}"))
}
