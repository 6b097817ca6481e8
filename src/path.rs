// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where dip keeps its settings file, and where launcher
//! executables get installed by default. Both locations can be overridden
//! through the environment:
//!
//! - `DIP_HOME` points at the settings file itself.
//! - `DIP_PATH` points at the directory executables are written to.
//!
//! Values pulled from the environment are shell expanded, so `~/bin` or
//! `$HOME/.local/bin` work as expected.

use std::{
    env::{self, VarError},
    path::{Path, PathBuf},
};

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "DIP_HOME";

/// Environment variable overriding the default executable directory.
pub const EXE_DIR_ENV: &str = "DIP_PATH";

/// Name of the settings file inside a settings directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Executable directory used when `DIP_PATH` is unset.
pub const DEFAULT_EXE_DIR: &str = "/usr/local/bin";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if home directory path cannot be
///   determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(PathError::NoWayHome)
}

/// Determine absolute path to the settings file.
///
/// Resolution order:
///
/// 1. `$DIP_HOME` if set.
/// 2. `settings.json` inside the first existing directory of
///    `$XDG_CONFIG_HOME/dip` and `~/.dip`.
/// 3. `$XDG_DATA_HOME/dip/settings.json`.
///
/// Does not check if the file returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if `$DIP_HOME` cannot be expanded.
/// - Return [`PathError::NoWayHome`] if no fallback location can be
///   determined.
pub fn default_settings_file() -> Result<PathBuf> {
    if let Some(path) = env_path(SETTINGS_ENV)? {
        return Ok(path);
    }

    let candidates = [
        dirs::config_dir().map(|dir| dir.join("dip")),
        home_dir().ok().map(|dir| dir.join(".dip")),
    ];
    if let Some(dir) = candidates.into_iter().flatten().find(|dir| dir.is_dir()) {
        return Ok(dir.join(SETTINGS_FILE));
    }

    dirs::data_dir()
        .map(|dir| dir.join("dip").join(SETTINGS_FILE))
        .ok_or(PathError::NoWayHome)
}

/// Determine default directory to install launcher executables into.
///
/// Uses `$DIP_PATH` if set, or `/usr/local/bin` otherwise.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if `$DIP_PATH` cannot be expanded.
pub fn default_exe_dir() -> Result<PathBuf> {
    Ok(env_path(EXE_DIR_ENV)?.unwrap_or_else(|| PathBuf::from(DEFAULT_EXE_DIR)))
}

/// Perform shell expansion on a path.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] for undefined variables.
pub fn expand(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref().to_string_lossy();
    Ok(PathBuf::from(shellexpand::full(&path)?.into_owned()))
}

/// Replace leading home directory of path with `~`.
pub fn contract_user(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    match home_dir() {
        Ok(home) => match path.strip_prefix(&home) {
            Ok(rest) if rest.as_os_str().is_empty() => "~".into(),
            Ok(rest) => format!("~/{}", rest.display()),
            Err(_) => path.display().to_string(),
        },
        Err(_) => path.display().to_string(),
    }
}

fn env_path(key: &str) -> Result<Option<PathBuf>> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(Some(expand(value)?)),
        _ => Ok(None),
    }
}

/// Path resolution error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine user's home directory.
    ///
    /// # See Also
    ///
    /// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
    #[error("cannot determine absolute path to user's home directory")]
    NoWayHome,

    /// Failed to perform shell expansion on path.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<VarError>),
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("DIP_HOME", "$BLAH/settings.json"), ("BLAH", "/home/blah")])]
    fn settings_file_from_env() -> anyhow::Result<()> {
        assert_eq!(
            default_settings_file()?,
            PathBuf::from("/home/blah/settings.json")
        );
        Ok(())
    }

    #[sealed_test(env = [("DIP_PATH", "/opt/bin")])]
    fn exe_dir_from_env() -> anyhow::Result<()> {
        assert_eq!(default_exe_dir()?, PathBuf::from("/opt/bin"));
        Ok(())
    }

    #[sealed_test(env = [("DIP_PATH", "")])]
    fn exe_dir_fallback() -> anyhow::Result<()> {
        assert_eq!(default_exe_dir()?, PathBuf::from(DEFAULT_EXE_DIR));
        Ok(())
    }

    #[sealed_test(env = [("DIP_HOME", "$DIP_NOPE/settings.json")])]
    fn settings_file_bad_expansion() {
        env::remove_var("DIP_NOPE");
        assert!(matches!(
            default_settings_file(),
            Err(PathError::ShellExpansion(_))
        ));
    }

    #[test]
    fn contract_user_outside_home() {
        assert_eq!(contract_user("/definitely/not/home"), "/definitely/not/home");
    }

    #[test]
    fn contract_user_inside_home() -> anyhow::Result<()> {
        let home = home_dir()?;
        assert_eq!(contract_user(home.join("fizz")), "~/fizz");
        assert_eq!(contract_user(&home), "~");
        Ok(())
    }
}
