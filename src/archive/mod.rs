//! Minimal tar helpers for splicing synthetic files into archives
//!
//! [`single_file_archive`] and [`read_named_entry`] build and read one-entry archives.
//! [`splice`] copies the entries of one archive into a [`tar::Builder`], re-rooting paths
//! and optionally forcing ownership, which is how droplets and uploaded app sources are
//! assembled.

use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{EntryType, Header};
use tracing::{debug, warn};

/// Permission bits given to synthetic files
pub const FILE_MODE: u32 = 0o644;

/// Permission bits given to synthetic directories
pub const DIR_MODE: u32 = 0o755;

/// A file read out of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub contents: Vec<u8>,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
}

/// Numeric owner forced onto spliced entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u64,
    pub gid: u64,
}

impl Owner {
    pub const fn new(uid: u64, gid: u64) -> Self {
        Self { uid, gid }
    }
}

/// Builds a tar containing exactly one regular file.
///
/// The entry gets [`FILE_MODE`] and zero-valued metadata otherwise.
pub fn single_file_archive(name: &str, contents: &[u8]) -> Result<Vec<u8>> {
    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::Regular);
    header.set_size(contents.len() as u64);
    header.set_mode(FILE_MODE);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, contents)?;
    Ok(builder.into_inner()?)
}

/// Scans `archive` from the start and returns the first entry named exactly `name`.
pub fn read_named_entry<R: Read>(name: &str, archive: R) -> Result<ArchiveEntry> {
    let mut archive = tar::Archive::new(archive);

    for entry in archive.entries()? {
        let mut entry = entry?;
        if &*entry.path_bytes() != name.as_bytes() {
            continue;
        }

        let header = entry.header();
        let entry_type = header.entry_type();
        let mode = header.mode()?;
        let uid = header.uid()?;
        let gid = header.gid()?;

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;

        return Ok(ArchiveEntry {
            name: name.to_string(),
            entry_type,
            contents,
            mode,
            uid,
            gid,
        });
    }

    Err(Error::NotFound(name.to_string()))
}

/// How [`splice`] rewrites the entries it copies
#[derive(Debug, Clone, Copy)]
pub struct Splice<'a> {
    /// Prepended to every entry path; `"."` keeps entries at the archive root
    pub prefix: &'a str,
    /// Drop the first path component (the directory a runtime copy-out is rooted at)
    pub strip_root: bool,
    /// Ownership forced onto every entry
    pub owner: Option<Owner>,
    /// Rewritten paths left out of the output, along with everything below them
    pub exclude: &'a [&'a str],
}

impl Splice<'_> {
    fn rewrite(&self, path: &Path) -> Option<PathBuf> {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => components.push(part),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => return None,
            }
        }

        let rest = if self.strip_root {
            components.get(1..)?
        } else {
            &components[..]
        };
        if rest.is_empty() {
            return None;
        }

        let mut rewritten: PathBuf = Path::new(self.prefix)
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        rewritten.extend(rest);
        Some(rewritten)
    }

    fn excludes(&self, path: &Path) -> bool {
        self.exclude.iter().any(|excluded| path.starts_with(excluded))
    }
}

/// Appends a directory entry.
pub fn append_dir<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    owner: Option<Owner>,
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(DIR_MODE);
    if let Some(owner) = owner {
        header.set_uid(owner.uid);
        header.set_gid(owner.gid);
    }
    builder.append_data(&mut header, path, io::empty())?;
    Ok(())
}

/// Copies every entry of `archive` into `builder`, rewritten per `rule`.
///
/// Entries that would land outside the prefix (`..` components) are skipped, as is the
/// stripped root itself. Returns the number of entries written.
pub fn splice<R: Read, W: Write>(
    builder: &mut tar::Builder<W>,
    archive: R,
    rule: &Splice<'_>,
) -> Result<usize> {
    let mut archive = tar::Archive::new(archive);
    let mut written = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let mut header = entry.header().clone();
        let entry_type = header.entry_type();

        if matches!(
            entry_type,
            EntryType::XGlobalHeader
                | EntryType::XHeader
                | EntryType::GNULongName
                | EntryType::GNULongLink
        ) {
            continue;
        }

        let original = entry.path()?.into_owned();
        let Some(path) = rule.rewrite(&original) else {
            if original.components().any(|c| c == Component::ParentDir) {
                warn!(path = %original.display(), "Skipping archive entry outside its root");
            }
            continue;
        };
        if rule.excludes(&path) {
            debug!(path = %path.display(), "Skipping excluded archive entry");
            continue;
        }

        if let Some(owner) = rule.owner {
            header.set_uid(owner.uid);
            header.set_gid(owner.gid);
        }

        match entry_type {
            EntryType::Symlink => {
                let target = entry
                    .link_name()?
                    .map(|t| t.into_owned())
                    .unwrap_or_default();
                builder.append_link(&mut header, &path, &target)?;
            }
            EntryType::Link => {
                // Hard link targets are archive paths and move with the entries
                let target = entry.link_name()?.map(|t| t.into_owned());
                match target
                    .as_deref()
                    .and_then(|t| rule.rewrite(t))
                    .filter(|t| !rule.excludes(t))
                {
                    Some(target) => builder.append_link(&mut header, &path, &target)?,
                    None => {
                        warn!(path = %path.display(), "Skipping hard link with unresolvable target");
                        continue;
                    }
                }
            }
            _ => builder.append_data(&mut header, &path, &mut entry)?,
        }
        written += 1;
    }

    Ok(written)
}
