//! File handling for key material and signed output
//!
//! Key files are read with a permission check: on Unix, a key readable by the
//! group or by others is still used, but a warning is logged.
//!
//! Signed archives are persisted with [`write_atomic`]: the bytes go to a
//! temporary file next to the destination, which is then renamed over it.
//! A reader never observes a truncated archive, and a failed write leaves
//! whatever was at the destination untouched.
//!
//! # Example
//!
//! ```no_run
//! use plugsign::secure_file;
//! use std::path::Path;
//!
//! let key = secure_file::read_secure(Path::new("signing.asc"))?;
//! secure_file::write_atomic(Path::new("signed.zip"), b"PK\x05\x06")?;
//! # Ok::<(), plugsign::PSError>(())
//! ```

use crate::error::PSError;
use log::*;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// Owner read/write only
#[cfg(unix)]
pub const SECURE_FILE_MODE: u32 = 0o600;

/// Warn if a key file is accessible to the group or to others (Unix only).
#[cfg(unix)]
pub fn check_permissions(path: &Path) -> Result<(), PSError> {
    use std::os::unix::fs::PermissionsExt;

    let perm_bits = fs::metadata(path)?.permissions().mode() & 0o777;
    if perm_bits & 0o077 != 0 {
        warn!(
            "Key file '{}' has overly permissive permissions (mode {:o}). \
             Consider running: chmod 600 '{}'",
            path.display(),
            perm_bits,
            path.display()
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_permissions(path: &Path) -> Result<(), PSError> {
    debug!(
        "Permission check skipped for '{}': not supported on this platform",
        path.display()
    );
    Ok(())
}

/// Read a key file, checking its permissions first.
pub fn read_secure(path: &Path) -> Result<Vec<u8>, PSError> {
    check_permissions(path)?;
    let mut file = File::open(path)?;
    let mut contents = vec![];
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Write a file only the owner can read (mode 0600 on Unix, set at creation).
pub fn write_secure(path: &Path, data: &[u8]) -> Result<(), PSError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(SECURE_FILE_MODE);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Atomically replace `path` with `data`.
///
/// The parent directory must exist. On error the temporary file is removed.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PSError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".plugsign-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PSError::IOError(e.error))?;
    debug!("Wrote {} bytes to '{}'", data.len(), path.display());
    Ok(())
}
