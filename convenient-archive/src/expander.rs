//! Tarball and zip expansion into a directory tree

use crate::{ArchiveError, ArchiveKind, Result};
use flate2::read::GzDecoder;
use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::EntryType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use xz2::read::XzDecoder;

const PERMISSION_BITS: u32 = 0o7777;

/// Expands compressed archives, checking a cancellation token between entries
#[derive(Debug, Clone)]
pub struct Expander {
    cancel: CancellationToken,
}

impl Expander {
    /// Create an expander bound to the job's cancellation token
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Expand `body` into `dest`, choosing the decoder from `name`'s suffix
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::UnsupportedFormat` naming the file when the suffix
    /// is not one of `.tar.gz`, `.tar.xz` or `.zip`.
    pub fn expand<R: Read>(&self, name: &str, body: R, dest: &Path) -> Result<()> {
        let kind = ArchiveKind::classify(name);
        info!("Given file {} is a {}", name, kind);

        match kind {
            ArchiveKind::TarGz => self.expand_tarball(GzDecoder::new(body), dest),
            ArchiveKind::TarXz => self.expand_tarball(XzDecoder::new(body), dest),
            ArchiveKind::Zip => self.expand_zip(body, dest),
            ArchiveKind::Plain => Err(ArchiveError::UnsupportedFormat(name.to_string())),
        }
    }

    /// Expand an uncompressed tar stream entry by entry
    ///
    /// Directories and regular files keep their declared modes, missing parent
    /// directories are created on demand. Directory modes are applied once the
    /// last entry is written. The token is checked before every entry; end of
    /// stream finishes without error.
    pub fn expand_tarball<R: Read>(&self, reader: R, dir: &Path) -> Result<()> {
        info!("Expanding the tarball to {}", dir.display());

        let mut archive = tar::Archive::new(reader);
        let mut entries = archive.entries()?;
        let mut dir_modes = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }
            let Some(entry) = entries.next() else {
                break;
            };
            let mut entry = entry?;

            let relative = entry.path()?.into_owned();
            let target = safe_join(dir, &relative)?;
            let mode = entry.header().mode()? & PERMISSION_BITS;

            match entry.header().entry_type() {
                EntryType::Directory => {
                    create_dir(&target)?;
                    dir_modes.push((target, mode));
                }
                EntryType::Symlink => {
                    if let Some(link) = entry.link_name()? {
                        ensure_parent(&target)?;
                        debug!("Linking {} -> {}", target.display(), link.display());
                        std::os::unix::fs::symlink(&link, &target)?;
                    }
                }
                kind if kind.is_file() => write_file(&target, mode, &mut entry)?,
                kind => debug!("Skipping {:?} entry {}", kind, relative.display()),
            }
        }

        apply_dir_modes(dir_modes)?;
        info!("Finished expanding the tarball to {}", dir.display());
        Ok(())
    }

    /// Expand a zip stream
    ///
    /// The stream is spooled to a temporary file first because the central
    /// directory sits at the end of the archive. The spool file is removed
    /// when this returns, whatever the outcome.
    pub fn expand_zip<R: Read>(&self, mut reader: R, dir: &Path) -> Result<()> {
        let mut spool = tempfile::NamedTempFile::new()?;
        info!("Storing the zip file to {}", spool.path().display());
        let _ = io::copy(&mut reader, spool.as_file_mut())?;

        let size = spool.as_file().metadata()?.len();
        debug!("Analyzing the zip file ({} bytes)", size);
        let mut archive = zip::ZipArchive::new(spool.reopen()?)?;

        info!("Expanding the zip file to {}", dir.display());
        let mut dir_modes = Vec::new();
        for index in 0..archive.len() {
            if self.cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }

            let mut entry = archive.by_index(index)?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(ArchiveError::UnsafeEntry(entry.name().to_string()));
            };
            let target = dir.join(&relative);

            if entry.is_dir() {
                create_dir(&target)?;
                dir_modes.push((target, entry.unix_mode().unwrap_or(0o755) & PERMISSION_BITS));
                continue;
            }
            let mode = entry.unix_mode().unwrap_or(0o644) & PERMISSION_BITS;
            write_file(&target, mode, &mut entry)?;
        }

        apply_dir_modes(dir_modes)?;
        info!("Finished expanding the zip file to {}", dir.display());
        Ok(())
    }
}

/// Join an archive entry path onto `dir`, refusing absolute paths and `..`
fn safe_join(dir: &Path, entry: &Path) -> Result<PathBuf> {
    let mut joined = dir.to_path_buf();
    for component in entry.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => return Err(ArchiveError::UnsafeEntry(entry.display().to_string())),
        }
    }
    Ok(joined)
}

fn create_dir(path: &Path) -> io::Result<()> {
    debug!("Creating directories {}", path.display());
    fs::create_dir_all(path)
}

/// Set declared directory modes, deepest first so a read-only parent
/// does not block its children
fn apply_dir_modes(mut dir_modes: Vec<(PathBuf, u32)>) -> io::Result<()> {
    dir_modes.sort_by(|(a, _), (b, _)| b.components().count().cmp(&a.components().count()));
    for (path, mode) in dir_modes {
        fs::set_permissions(&path, Permissions::from_mode(mode))?;
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.exists() => {
            debug!("Creating directories {}", parent.display());
            fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}

fn write_file(path: &Path, mode: u32, body: &mut impl Read) -> io::Result<()> {
    ensure_parent(path)?;

    debug!("Writing file {}", path.display());
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let _ = io::copy(body, &mut file)?;
    fs::set_permissions(path, Permissions::from_mode(mode))
}
