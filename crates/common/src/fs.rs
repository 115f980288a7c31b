//! Write-temp-then-rename file replacement.
//!
//! Readers never observe a half-written file: the new content is written to a
//! temporary file in the destination directory and renamed over the target.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::trace;

/// Atomically replace `path` with `contents`.
///
/// When `mode` is given (unix only) the permissions are applied before the
/// rename, so the file never exists with looser permissions.
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.persist(path).map_err(|e| e.error)?;
    trace!(path = %path.display(), bytes = contents.len(), "Replaced file");
    Ok(())
}
