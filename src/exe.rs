// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Launcher executable handling.
//!
//! Every installed application gets a tiny launcher script placed somewhere
//! on the user's `PATH`. The launcher does nothing but call back into dip:
//!
//! ```bash
//! #!/bin/bash
//! dip run <name> -- $@
//! ```

use std::{
    fs::{remove_file, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Interpreter line of every launcher.
pub const SHEBANG: &str = "#!/bin/bash";

/// Permission bits of every launcher.
pub const MODE: u32 = 0o755;

/// Render launcher script body for application.
pub fn script(name: &str) -> String {
    format!("{SHEBANG}\ndip run {name} -- $@\n")
}

/// Write launcher for application into target directory.
///
/// Overwrites any existing file of the same name. Returns the full path of
/// the written launcher.
///
/// # Errors
///
/// - Return [`ExeError::Write`] if the directory is missing or not writable.
/// - Return [`ExeError::Permissions`] if launcher cannot be made executable.
#[instrument(skip(dir), level = "debug")]
pub fn write_exe(dir: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    let exe = dir.as_ref().join(name);
    debug!("write launcher {:?}", exe.display());
    write(&exe, script(name)).map_err(|source| ExeError::Write {
        source,
        path: exe.clone(),
    })?;
    set_executable(&exe)?;

    Ok(exe)
}

/// Remove launcher of application from target directory.
///
/// A launcher that does not exist counts as removed.
///
/// # Errors
///
/// - Return [`ExeError::Remove`] if launcher exists but cannot be removed.
#[instrument(skip(dir), level = "debug")]
pub fn remove_exe(dir: impl AsRef<Path>, name: &str) -> Result<()> {
    let exe = dir.as_ref().join(name);
    match remove_file(&exe) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!("launcher {:?} already gone", exe.display());
            Ok(())
        }
        Err(source) => Err(ExeError::Remove { source, path: exe }),
    }
}

#[cfg(unix)]
fn set_executable(exe: &Path) -> Result<()> {
    use std::{
        fs::{set_permissions, Permissions},
        os::unix::fs::PermissionsExt,
    };

    set_permissions(exe, Permissions::from_mode(MODE)).map_err(|source| {
        ExeError::Permissions {
            source,
            path: exe.to_path_buf(),
        }
    })
}

#[cfg(not(unix))]
fn set_executable(_exe: &Path) -> Result<()> {
    Ok(())
}

/// Launcher error types.
#[derive(Debug, thiserror::Error)]
pub enum ExeError {
    /// Launcher cannot be written.
    #[error("failed to write executable {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Launcher cannot be made executable.
    #[error("failed to set permissions of executable {:?}", path.display())]
    Permissions {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Launcher cannot be removed.
    #[error("failed to remove executable {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ExeError> = std::result::Result<T, E>;
