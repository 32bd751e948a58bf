use crate::template::{DOCKERFILE_PATH, ENTRYPOINT_PATH};
use crate::{Result, SandboxError};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

const GENERATED_MODE: u32 = 0o755;

/// Write the build context for `source_root` into `writer`
///
/// Every regular file below `source_root` is archived depth-first under its
/// relative path (directories are implicit), followed by the entrypoint and
/// the Dockerfile at their reserved paths. The whole stream is gzipped at
/// best compression. Source files that collide with a reserved path are
/// left out. The token is checked before each file.
///
/// Blocking; run it on a blocking thread when `writer` is a pipe.
pub fn write_build_context<W: Write>(
    source_root: &Path,
    dockerfile: &str,
    entrypoint: &str,
    writer: W,
    cancel: &CancellationToken,
) -> Result<W> {
    let mut archive = tar::Builder::new(GzEncoder::new(writer, Compression::best()));
    archive.follow_symlinks(true);

    for entry in WalkDir::new(source_root).follow_links(true).sort_by_file_name() {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source_root) else {
            continue;
        };
        if relative == Path::new(DOCKERFILE_PATH) || relative == Path::new(ENTRYPOINT_PATH) {
            warn!("Skipping {}: the path is reserved for generated files", relative.display());
            continue;
        }

        debug!("Archiving {}", relative.display());
        archive.append_path_with_name(entry.path(), relative)?;
    }

    if cancel.is_cancelled() {
        return Err(SandboxError::Cancelled);
    }
    append_generated(&mut archive, ENTRYPOINT_PATH, entrypoint)?;
    append_generated(&mut archive, DOCKERFILE_PATH, dockerfile)?;

    let encoder = archive.into_inner()?;
    Ok(encoder.finish()?)
}

fn append_generated<W: Write>(archive: &mut tar::Builder<W>, path: &str, body: &str) -> Result<()> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(body.len() as u64);
    header.set_mode(GENERATED_MODE);
    header.set_mtime(mtime);
    header.set_cksum();
    archive.append_data(&mut header, path, body.as_bytes())?;
    Ok(())
}
