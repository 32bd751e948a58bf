use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};

/// Suffix appended to the name of anything compressed by [`gzip_copy`]
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Gzip everything from `reader` into `writer` at best compression
///
/// Returns the writer once the gzip trailer has been written, so callers
/// owning a pipe can close it.
pub fn gzip_copy<R: Read, W: Write>(mut reader: R, writer: W) -> io::Result<W> {
    let mut encoder = GzEncoder::new(writer, Compression::best());
    let _ = io::copy(&mut reader, &mut encoder)?;
    encoder.finish()
}
