// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git tracking of application configuration.
//!
//! An application can optionally track a remote branch of the git repository
//! its home lives in. Before the application is run, the compose files of
//! the local working tree are compared to their copies on the remote branch.
//! If they differ, then the local configuration is considered __stale__.
//!
//! Repository discovery, remote lookup, and fetching go through libgit2.
//! Diffing and pulling are handed to the git binary, because its diff output
//! is meant to be read by the user.

use crate::{compose::default_config_files, config::GitSettings};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{Config, FetchOptions, Remote, RemoteCallbacks, Repository};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{self, Duration},
};
use tracing::{debug, info, instrument, warn};

/// Environment variable overriding the fallback sleep time.
pub const SLEEP_ENV: &str = "DIP_SLEEP";

/// Seconds to sleep on stale configuration when nothing else is configured.
pub const DEFAULT_SLEEP: u64 = 5;

/// Fallback sleep time in seconds.
///
/// Uses `$DIP_SLEEP` if it holds a valid number of seconds, or
/// [`DEFAULT_SLEEP`] otherwise.
pub fn default_sleep() -> u64 {
    match env::var(SLEEP_ENV) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring invalid {SLEEP_ENV} value {value:?}");
            DEFAULT_SLEEP
        }),
        Err(_) => DEFAULT_SLEEP,
    }
}

/// Git repository an application's home lives in.
///
/// Never persisted. Rebuilt from the git settings of the owning application
/// whenever it is needed.
pub struct Repo {
    path: PathBuf,
    remote: String,
    branch: Option<String>,
    sleep: Option<u64>,
    auto_upgrade: bool,
    repository: Repository,
}

impl Repo {
    /// Open repository containing target path.
    ///
    /// Parent directories are searched for the repository, so the path can
    /// point anywhere inside a working tree.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NoSuchPath`] if path does not exist.
    /// - Return [`RepoError::InvalidGitRepository`] if path is not inside a
    ///   git working tree.
    #[instrument(skip_all, level = "debug")]
    pub fn open(
        path: impl Into<PathBuf>,
        remote: impl Into<String>,
        settings: &GitSettings,
    ) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(RepoError::NoSuchPath { path });
        }

        debug!("open repository at {:?}", path.display());
        let repository = Repository::discover(&path).map_err(|source| {
            RepoError::InvalidGitRepository {
                source,
                path: path.clone(),
            }
        })?;

        // INVARIANT: Bare repositories have no working tree to compare.
        if repository.workdir().is_none() {
            return Err(RepoError::InvalidGitRepository {
                source: git2::Error::from_str("repository is bare"),
                path,
            });
        }

        Ok(Self {
            path,
            remote: remote.into(),
            branch: settings.branch.clone(),
            sleep: settings.sleep,
            auto_upgrade: settings.auto_upgrade,
            repository,
        })
    }

    /// Pull remote changes automatically on stale configuration.
    pub fn auto_upgrade(&self) -> bool {
        self.auto_upgrade
    }

    /// Resolve tracked remote.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NoSuchRemote`] if remote is not configured.
    pub fn remote(&self) -> Result<Remote<'_>> {
        self.repository
            .find_remote(&self.remote)
            .map_err(|source| RepoError::NoSuchRemote {
                source,
                name: self.remote.clone(),
            })
    }

    /// Tracked branch name.
    ///
    /// Falls back to the currently checked out branch if no branch was
    /// configured.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NoActiveBranch`] if HEAD is detached or unborn.
    pub fn branch(&self) -> Result<String> {
        if let Some(branch) = &self.branch {
            return Ok(branch.clone());
        }

        let no_branch = |source| RepoError::NoActiveBranch {
            source,
            path: self.path.clone(),
        };
        let head = self.repository.head().map_err(no_branch)?;
        if !head.is_branch() {
            return Err(no_branch(git2::Error::from_str("HEAD is detached")));
        }

        head.shorthand()
            .map(str::to_owned)
            .ok_or_else(|| no_branch(git2::Error::from_str("branch name is not UTF-8")))
    }

    /// Seconds to sleep on stale configuration.
    ///
    /// A configured sleep of zero falls back to [`default_sleep`].
    pub fn sleeptime(&self) -> u64 {
        self.sleep.filter(|sleep| *sleep > 0).unwrap_or_else(default_sleep)
    }

    /// Fetch tracked remote.
    ///
    /// Progress is displayed through a progress bar. If any credentials are
    /// required, then the user will be prompted for them, and the progress
    /// bar will be blocked for user input.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NoSuchRemote`] if remote is not configured.
    /// - Return [`RepoError::Fetch`] if fetch fails for any reason.
    #[instrument(skip(self), level = "debug")]
    pub fn fetch(&self) -> Result<()> {
        let mut remote = self.remote()?;
        let fetch_error = |source| RepoError::Fetch {
            source,
            name: self.remote.clone(),
        };

        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(format!("fetch {}", self.remote));
        bar.enable_steady_tick(Duration::from_millis(100));

        let prompter = IndicatifPrompter::new(bar);
        let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
        let config = Config::open_default().map_err(fetch_error)?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let stats = progress.to_owned();
            if throttle.elapsed() > Duration::from_millis(10) {
                throttle = time::Instant::now();
                prompter.bar.set_length(stats.total_objects() as u64);
                prompter.bar.set_position(stats.received_objects() as u64);
            }
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        let result = remote.fetch::<&str>(&[], Some(&mut fo), None);
        prompter.bar.finish_and_clear();
        result.map_err(fetch_error)?;

        Ok(())
    }

    /// Compare compose files of working tree against tracked remote branch.
    ///
    /// Fetches the remote first, then lazily diffs each compose file,
    /// yielding `true` for every file that differs from its remote copy.
    /// Diff output is displayed unless `quiet` is set.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Fetch`] if remote cannot be fetched.
    /// - Return [`RepoError::NoActiveBranch`] if no branch can be determined.
    pub fn diffs(&self, quiet: bool) -> Result<impl Iterator<Item = Result<bool>> + '_> {
        self.fetch()?;
        let branch = self.branch()?;
        let workdir = self.workdir()?;

        Ok(default_config_files(&self.path)
            .into_iter()
            .map(move |local| self.diff_file(&workdir, &branch, &local, quiet)))
    }

    /// Check if any compose file differs from tracked remote branch.
    ///
    /// Stops at the first differing compose file.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Repo::diffs`].
    pub fn diverged(&self, quiet: bool) -> Result<bool> {
        for diff in self.diffs(quiet)? {
            if diff? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Pull tracked remote branch into working tree.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NoActiveBranch`] if no branch can be determined.
    /// - Return [`RepoError::Syscall`] if git cannot be called, or fails.
    #[instrument(skip(self), level = "debug")]
    pub fn pull(&self) -> Result<()> {
        let branch = self.branch()?;
        info!("pull {}/{branch} into {:?}", self.remote, self.path.display());
        let status = git_command(&self.path, ["pull", self.remote.as_str(), branch.as_str()])
            .status()
            .map_err(RepoError::Syscall)?;

        if !status.success() {
            return Err(RepoError::Syscall(std::io::Error::other(format!(
                "git pull {} {branch} exited with {status}",
                self.remote
            ))));
        }

        Ok(())
    }

    fn workdir(&self) -> Result<PathBuf> {
        // INVARIANT: Compare canonical paths, so symlinked homes still match.
        let workdir = self.repository.workdir().unwrap_or(&self.path);
        workdir.canonicalize().map_err(RepoError::Syscall)
    }

    fn diff_file(&self, workdir: &Path, branch: &str, local: &Path, quiet: bool) -> Result<bool> {
        let canonical = local.canonicalize().map_err(RepoError::Syscall)?;
        let relative = canonical
            .strip_prefix(workdir)
            .map_err(|_| RepoError::OutsideWorkTree {
                path: local.to_path_buf(),
            })?;

        // INVARIANT: Git revision paths always use forward slashes.
        let relative = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let revision = format!("{}/{branch}:{relative}", self.remote);
        debug!("diff {revision} against {:?}", local.display());

        let mut command = git_command(
            &self.path,
            [
                OsStr::new("diff"),
                OsStr::new("--exit-code"),
                OsStr::new(&revision),
                canonical.as_os_str(),
            ],
        );
        if quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let status = command.status().map_err(RepoError::Syscall)?;

        Ok(!status.success())
    }
}

fn git_command(dir: &Path, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Command {
    let mut command = Command::new("git");
    command.current_dir(dir).args(args);
    command
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Git tracking error types.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Home of application does not exist.
    #[error("path does not exist {:?}", path.display())]
    NoSuchPath { path: PathBuf },

    /// Home of application is not inside a git working tree.
    #[error("no git repository found in {:?}", path.display())]
    InvalidGitRepository {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Tracked remote is not configured in repository.
    #[error("remote does not exist {name:?}")]
    NoSuchRemote {
        #[source]
        source: git2::Error,
        name: String,
    },

    /// Fetching tracked remote failed.
    #[error("error fetching remote {name:?}")]
    Fetch {
        #[source]
        source: git2::Error,
        name: String,
    },

    /// No branch configured, and none checked out.
    #[error("no active branch in {:?}", path.display())]
    NoActiveBranch {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Compose file lives outside of the working tree.
    #[error("compose file {:?} is outside of git working tree", path.display())]
    OutsideWorkTree { path: PathBuf },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Call to git binary failed.
    #[error(transparent)]
    Syscall(std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{env::current_dir, fs::create_dir_all};

    fn origin() -> GitSettings {
        GitSettings {
            remote: Some("origin".into()),
            ..Default::default()
        }
    }

    #[sealed_test]
    fn open_missing_path() -> anyhow::Result<()> {
        let path = current_dir()?.join("nope");
        let result = Repo::open(&path, "origin", &origin());
        assert!(matches!(result, Err(RepoError::NoSuchPath { .. })));
        Ok(())
    }

    #[sealed_test]
    fn open_non_repository() -> anyhow::Result<()> {
        let path = current_dir()?.join("fizz");
        create_dir_all(&path)?;
        let result = Repo::open(&path, "origin", &origin());
        assert!(matches!(
            result,
            Err(RepoError::InvalidGitRepository { .. })
        ));
        Ok(())
    }

    #[sealed_test]
    fn resolve_remote_and_branch() -> anyhow::Result<()> {
        let path = current_dir()?;
        let repository = Repository::init(&path)?;
        repository.remote("origin", "https://example.com/fizz.git")?;

        let repo = Repo::open(&path, "origin", &origin())?;
        assert_eq!(repo.remote()?.name(), Some("origin"));

        let repo = Repo::open(&path, "upstream", &origin())?;
        assert!(matches!(repo.remote(), Err(RepoError::NoSuchRemote { .. })));

        let settings = GitSettings {
            branch: Some("stable".into()),
            sleep: Some(12),
            ..origin()
        };
        let repo = Repo::open(&path, "origin", &settings)?;
        assert_eq!(repo.branch()?, "stable");
        assert_eq!(repo.sleeptime(), 12);

        Ok(())
    }

    #[sealed_test(env = [("DIP_SLEEP", "7")])]
    fn sleeptime_from_env() -> anyhow::Result<()> {
        let path = current_dir()?;
        Repository::init(&path)?;
        let repo = Repo::open(&path, "origin", &origin())?;
        assert_eq!(repo.sleeptime(), 7);
        Ok(())
    }

    #[sealed_test(env = [("DIP_SLEEP", "soon")])]
    fn sleeptime_invalid_env() {
        assert_eq!(default_sleep(), DEFAULT_SLEEP);
    }
}
