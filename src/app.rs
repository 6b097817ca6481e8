// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installed application representation.
//!
//! A __dip__ is a named shortcut to a docker-compose service. It knows the
//! directory holding the compose file of the service (its __home__), where
//! its launcher executable lives, which environment variables to pass into
//! the container, and optionally which git remote its configuration tracks.
//!
//! The compose project, compose service, and git repository of a dip are
//! never stored. They are resolved fresh from the filesystem each time they
//! are asked for, so they always reflect the current state of the home.

use crate::{
    compose::{ComposeError, Project, COMPOSE_BIN},
    config::{AppDefinition, GitSettings},
    exe::{remove_exe, write_exe, ExeError},
    repo::{Repo, RepoError},
};

use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::{stdin, stdout, IsTerminal},
    path::{absolute, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument, warn};

/// An installed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dip {
    pub name: String,
    pub home: PathBuf,
    pub path: PathBuf,
    pub env: BTreeMap<String, String>,
    pub git: Option<GitSettings>,
}

impl Dip {
    /// Construct new application.
    ///
    /// The home and executable directories are made absolute. Environment
    /// variables with empty values are dropped, a sleep of zero counts as no
    /// sleep, and git settings without a remote are dropped.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::EmptyName`] if name is empty.
    /// - Return [`AppError::Home`] if home cannot be made absolute.
    /// - Return [`AppError::ExeDir`] if executable directory cannot be made
    ///   absolute.
    pub fn new(
        name: impl Into<String>,
        home: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        env: BTreeMap<String, String>,
        git: Option<GitSettings>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(AppError::EmptyName);
        }

        let home = home.into();
        let home = absolute(&home).map_err(|source| AppError::Home { source, path: home })?;

        let path = path.into();
        let path = absolute(&path).map_err(|source| AppError::ExeDir { source, path })?;

        let git = git.filter(GitSettings::is_tracking).map(|mut git| {
            git.sleep = git.sleep.filter(|sleep| *sleep > 0);
            git
        });

        Ok(Self {
            name,
            home,
            path,
            env: env.into_iter().filter(|(_, value)| !value.is_empty()).collect(),
            git,
        })
    }

    /// Construct application from its serialized definition.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Dip::new`].
    pub fn from_definition(definition: AppDefinition) -> Result<Self> {
        Self::new(
            definition.name,
            definition.home,
            definition.path,
            definition.env,
            definition.git,
        )
    }

    /// Flatten application into its serialized definition.
    pub fn to_definition(&self) -> AppDefinition {
        AppDefinition {
            env: self.env.clone(),
            git: self.git.clone(),
            home: self.home.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }

    /// Full path of launcher executable.
    pub fn executable(&self) -> PathBuf {
        self.path.join(&self.name)
    }

    /// Git repository of home, if a remote is tracked.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NoSuchPath`] if home does not exist.
    /// - Return [`RepoError::InvalidGitRepository`] if home is not inside a
    ///   git working tree.
    pub fn repo(&self) -> Result<Option<Repo>, RepoError> {
        let Some(git) = &self.git else {
            return Ok(None);
        };

        match git.remote.as_deref() {
            Some(remote) => Repo::open(&self.home, remote, git).map(Some),
            None => Ok(None),
        }
    }

    /// Compose project of home.
    ///
    /// # Errors
    ///
    /// - Return [`ComposeError::ComposeFileNotFound`] if home has no compose
    ///   file.
    pub fn project(&self) -> Result<Project, ComposeError> {
        Project::open(&self.home)
    }

    /// Contents of all compose files of home.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Compose`] if compose files cannot be read.
    pub fn definitions(&self) -> Result<Vec<String>> {
        let project = self.project()?;
        project
            .files()
            .iter()
            .map(|file| {
                read_to_string(file).map_err(|source| {
                    AppError::Compose(ComposeError::Read {
                        source,
                        path: file.clone(),
                    })
                })
            })
            .collect()
    }

    /// Write launcher executable.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Exe`] if launcher cannot be written.
    #[instrument(skip(self), fields(name = %self.name), level = "debug")]
    pub fn install(&self) -> Result<()> {
        write_exe(&self.path, &self.name)?;
        Ok(())
    }

    /// Remove launcher executable, and tear down compose networks.
    ///
    /// Both steps are best-effort. Failures are logged, but never stop the
    /// uninstall, because the application may already be partially broken.
    #[instrument(skip(self), fields(name = %self.name), level = "debug")]
    pub fn uninstall(&self) {
        if let Err(error) = remove_exe(&self.path, &self.name) {
            warn!("{error}");
        }

        match self.project() {
            Ok(project) => {
                if let Err(error) = project.remove_networks() {
                    warn!("cannot remove networks of {:?}: {error}", self.name);
                }
            }
            Err(error) => debug!("skip network teardown of {:?}: {error}", self.name),
        }
    }

    /// Validate git repository and compose service.
    ///
    /// Git tracking is only checked if configured and not skipped.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Repo`] if repository or remote cannot be
    ///   resolved.
    /// - Return [`AppError::Compose`] if compose file or service cannot be
    ///   resolved.
    pub fn validate(&self, skip_git: bool) -> Result<()> {
        if !skip_git {
            self.validate_git()?;
        }

        self.validate_service()
    }

    /// Validate that tracked remote resolves.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Repo`] if repository or remote cannot be
    ///   resolved.
    pub fn validate_git(&self) -> Result<()> {
        if let Some(repo) = self.repo()? {
            repo.remote()?;
        }

        Ok(())
    }

    /// Validate that home resolves to a service named after application.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Compose`] if compose file or service cannot be
    ///   resolved.
    pub fn validate_service(&self) -> Result<()> {
        self.project()?.service(&self.name)?;
        Ok(())
    }

    /// Check if local configuration differs from tracked remote.
    ///
    /// Always `false` without git tracking, and no repository is touched.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Repo`] if fetching or diffing fails.
    pub fn diff(&self, quiet: bool) -> Result<bool> {
        match self.repo()? {
            Some(repo) => Ok(repo.diverged(quiet)?),
            None => Ok(false),
        }
    }

    /// Command line flags for environment variables.
    pub fn env_flags(&self) -> Vec<String> {
        self.env
            .iter()
            .flat_map(|(key, value)| ["-e".to_string(), format!("{key}={value}")])
            .collect()
    }

    /// Build docker-compose command to run application.
    ///
    /// Adds `-T` to disable pseudo-TTY allocation when not `interactive`.
    /// Standard streams are inherited from the current process.
    pub fn run_command(
        &self,
        interactive: bool,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Command {
        let mut command = Command::new(COMPOSE_BIN);
        command.current_dir(&self.home).args(["run", "--rm"]);
        if !interactive {
            command.arg("-T");
        }
        command.args(self.env_flags()).arg(&self.name).args(args);
        command
    }

    /// Run application, and return its exit code.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Syscall`] if docker-compose cannot be called.
    #[instrument(skip(self, args), fields(name = %self.name), level = "debug")]
    pub fn run(&self, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Result<i32> {
        let interactive = stdin().is_terminal() && stdout().is_terminal();
        let mut command = self.run_command(interactive, args);
        info!("{:?}", command);
        let status = command.status().map_err(|source| AppError::Syscall {
            source,
            name: self.name.clone(),
        })?;

        Ok(status.code().unwrap_or(1))
    }
}

impl Display for Dip {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.name)
    }
}

/// Application error types.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Application name is empty.
    #[error("application name cannot be empty")]
    EmptyName,

    /// Home cannot be made absolute.
    #[error("invalid home {:?}", path.display())]
    Home {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Executable directory cannot be made absolute.
    #[error("invalid executable directory {:?}", path.display())]
    ExeDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Launcher handling fails.
    #[error(transparent)]
    Exe(#[from] ExeError),

    /// Git tracking fails.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Compose project resolution fails.
    #[error(transparent)]
    Compose(#[from] ComposeError),

    /// Call to docker-compose fails.
    #[error("failed to run {name:?}")]
    Syscall {
        #[source]
        source: std::io::Error,
        name: String,
    },
}

/// Friendly result alias :3
type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;
    use std::{
        env::current_dir,
        fs::{create_dir_all, read_to_string, write},
    };

    fn write_compose(home: &std::path::Path) -> anyhow::Result<()> {
        create_dir_all(home)?;
        write(
            home.join("docker-compose.yml"),
            indoc! {r#"
                services:
                  fizz:
                    image: fizz
            "#},
        )?;
        Ok(())
    }

    #[test]
    fn new_normalizes_fields() -> anyhow::Result<()> {
        let env = BTreeMap::from([
            ("FIZZ".to_string(), "BUZZ".to_string()),
            ("EMPTY".to_string(), String::new()),
        ]);
        let git = Some(GitSettings {
            branch: Some("main".into()),
            ..Default::default()
        });
        let dip = Dip::new("fizz", "relative/home", "relative/bin", env, git)?;

        assert!(dip.home.is_absolute());
        assert!(dip.home.ends_with("relative/home"));
        assert!(dip.path.is_absolute());
        assert!(dip.path.ends_with("relative/bin"));
        assert_eq!(
            dip.env,
            BTreeMap::from([("FIZZ".to_string(), "BUZZ".to_string())])
        );
        assert_eq!(dip.git, None);
        assert_eq!(dip.to_string(), "fizz");

        Ok(())
    }

    #[test_case(Some(0), None; "zero means unset")]
    #[test_case(Some(3), Some(3); "positive kept")]
    #[test_case(None, None; "unset kept")]
    #[test]
    fn new_normalizes_sleep(sleep: Option<u64>, expect: Option<u64>) {
        use pretty_assertions::assert_eq;
        let git = Some(GitSettings {
            remote: Some("origin".into()),
            sleep,
            ..Default::default()
        });
        let dip = Dip::new("fizz", "/tmp/fizz", "/bin", BTreeMap::new(), git).unwrap();
        assert_eq!(dip.git.and_then(|git| git.sleep), expect);
    }

    #[test]
    fn new_rejects_empty_name() {
        let result = Dip::new("", "/tmp/fizz", "/bin", BTreeMap::new(), None);
        assert!(matches!(result, Err(AppError::EmptyName)));
    }

    #[test]
    fn definition_round_trip() -> anyhow::Result<()> {
        let git = Some(GitSettings {
            remote: Some("origin".into()),
            sleep: Some(3),
            ..Default::default()
        });
        let dip = Dip::new("fizz", "/tmp/fizz", "/bin", BTreeMap::new(), git)?;
        assert_eq!(Dip::from_definition(dip.to_definition())?, dip);
        Ok(())
    }

    #[test]
    fn diff_without_git() -> anyhow::Result<()> {
        let dip = Dip::new("fizz", "/does/not/exist", "/bin", BTreeMap::new(), None)?;
        assert!(!dip.diff(false)?);
        Ok(())
    }

    #[sealed_test]
    fn install_writes_launcher() -> anyhow::Result<()> {
        let bin = current_dir()?;
        let dip = Dip::new("fizz", "/tmp/fizz", &bin, BTreeMap::new(), None)?;
        dip.install()?;
        assert_eq!(read_to_string(dip.executable())?, "#!/bin/bash\ndip run fizz -- $@\n");
        Ok(())
    }

    #[sealed_test]
    fn uninstall_without_compose_file() -> anyhow::Result<()> {
        let root = current_dir()?;
        let home = root.join("gone");
        let dip = Dip::new("fizz", &home, &root, BTreeMap::new(), None)?;
        dip.install()?;

        dip.uninstall();
        assert!(!dip.executable().exists());

        // Missing launcher is tolerated too.
        dip.uninstall();

        Ok(())
    }

    #[sealed_test]
    fn validate_service() -> anyhow::Result<()> {
        let home = current_dir()?.join("fizz");
        write_compose(&home)?;

        let dip = Dip::new("fizz", &home, "/bin", BTreeMap::new(), None)?;
        dip.validate(false)?;

        let dip = Dip::new("buzz", &home, "/bin", BTreeMap::new(), None)?;
        assert!(matches!(
            dip.validate(false),
            Err(AppError::Compose(ComposeError::NoSuchService { .. }))
        ));

        let empty = current_dir()?.join("empty");
        create_dir_all(&empty)?;
        let dip = Dip::new("fizz", &empty, "/bin", BTreeMap::new(), None)?;
        assert!(matches!(
            dip.validate(false),
            Err(AppError::Compose(ComposeError::ComposeFileNotFound { .. }))
        ));

        Ok(())
    }

    #[sealed_test]
    fn validate_git_outside_repository() -> anyhow::Result<()> {
        let home = current_dir()?.join("fizz");
        write_compose(&home)?;
        let git = Some(GitSettings {
            remote: Some("origin".into()),
            ..Default::default()
        });
        let dip = Dip::new("fizz", &home, "/bin", BTreeMap::new(), git)?;

        assert!(matches!(
            dip.validate(false),
            Err(AppError::Repo(RepoError::InvalidGitRepository { .. }))
        ));
        dip.validate(true)?;

        Ok(())
    }

    #[test]
    fn run_command_layout() -> anyhow::Result<()> {
        let env = BTreeMap::from([
            ("FIZZ".to_string(), "BUZZ".to_string()),
            ("JAZZ".to_string(), "RAZZ".to_string()),
        ]);
        let dip = Dip::new("fizz", "/path/to/fizz", "/bin", env, None)?;

        let command = dip.run_command(false, ["--help"]);
        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(command.get_program(), COMPOSE_BIN);
        assert_eq!(
            args,
            ["run", "--rm", "-T", "-e", "FIZZ=BUZZ", "-e", "JAZZ=RAZZ", "fizz", "--help"]
        );
        assert_eq!(
            command.get_current_dir(),
            Some(std::path::Path::new("/path/to/fizz"))
        );

        let command = dip.run_command(true, Vec::<String>::new());
        assert_eq!(command.get_args().count(), 7);

        Ok(())
    }
}
