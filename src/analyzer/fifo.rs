//! Named pipe lifecycle for the analyzer's raw output.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::Path;

/// Create the FIFO at `path` unless one already exists.
pub fn ensure_fifo(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => anyhow::bail!("{} exists and is not a named pipe", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to stat {}", path.display()));
        }
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("Invalid pipe path: {}", path.display()))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
    if rc != 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("mkfifo failed for {}", path.display()));
    }
    log::debug!("Created named pipe {}", path.display());
    Ok(())
}

/// Remove the FIFO. A missing file is fine.
pub fn remove_fifo(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Briefly open the write end so a reader parked in `open()` sees end-of-stream.
///
/// Without a reader the non-blocking open fails with ENXIO, which is ignored.
pub fn wake_reader(path: &Path) {
    let result = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path);
    match result {
        Ok(file) => drop(file),
        Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => log::debug!("Could not wake pipe reader on {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_removes_fifo() {
        let path = std::env::temp_dir().join(format!("cavalcade-fifo-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        ensure_fifo(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());
        ensure_fifo(&path).unwrap();

        // nobody is reading: must not block or fail
        wake_reader(&path);

        remove_fifo(&path).unwrap();
        assert!(!path.exists());
        remove_fifo(&path).unwrap();
    }

    #[test]
    fn refuses_regular_file() {
        let path = std::env::temp_dir().join(format!("cavalcade-notfifo-{}", std::process::id()));
        std::fs::write(&path, b"x").unwrap();
        assert!(ensure_fifo(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
