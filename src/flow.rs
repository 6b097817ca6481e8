// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reconcile an application with its tracked remote before using it.
//!
//! Every git-aware operation (`run`, `pull`, `show`) goes through the same
//! sequence:
//!
//! 1. Load the application from the registry.
//! 2. Validate its git remote and compose service.
//! 3. Diff its compose files against the tracked remote branch.
//! 4. Apply a [`Staleness`] policy if the local configuration diverged.
//!
//! Only after that does the caller perform the requested operation on the
//! returned application.

use crate::{
    app::{AppError, Dip},
    repo::{Repo, RepoError},
    settings::{Settings, SettingsError},
};

use inquire::{Confirm, InquireError};
use std::{thread, time::Duration};
use tracing::{info, instrument, warn};

/// What to do when local configuration diverged from its remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Pull remote changes without asking.
    AutoUpgrade,

    /// Warn, wait, and continue without pulling.
    Backoff(Duration),

    /// Ask operator whether to pull.
    Prompt,
}

impl Staleness {
    /// Pick policy from git settings of an application.
    ///
    /// Auto-upgrade wins over a configured sleep, and prompting is the
    /// fallback when neither is configured.
    pub fn new(auto_upgrade: bool, sleep: Option<u64>) -> Self {
        match (auto_upgrade, sleep) {
            (true, _) => Self::AutoUpgrade,
            (false, Some(secs)) => Self::Backoff(Duration::from_secs(secs)),
            (false, None) => Self::Prompt,
        }
    }
}

/// Interaction with whoever invoked dip.
pub trait Operator {
    /// Ask a yes or no question.
    ///
    /// # Errors
    ///
    /// - Return [`FlowError::Prompt`] if no answer can be obtained.
    fn confirm(&mut self, message: &str) -> Result<bool>;

    /// Block for a while.
    fn sleep(&mut self, duration: Duration);
}

/// Operator sitting at a terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct Terminal;

impl Operator for Terminal {
    fn confirm(&mut self, message: &str) -> Result<bool> {
        Ok(Confirm::new(message).with_default(false).prompt()?)
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Source of remote changes that can be pulled into local configuration.
pub trait Upstream {
    /// Pull remote changes.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError`] if pull fails.
    fn pull(&self) -> Result<(), RepoError>;
}

impl Upstream for Repo {
    fn pull(&self) -> Result<(), RepoError> {
        Repo::pull(self)
    }
}

/// Apply staleness policy to diverged application.
///
/// # Errors
///
/// - Return [`FlowError::Repo`] if pull fails.
/// - Return [`FlowError::Aborted`] if operator declines both upgrading and
///   continuing without upgrade.
pub fn resolve(
    policy: Staleness,
    name: &str,
    upstream: &impl Upstream,
    operator: &mut impl Operator,
) -> Result<()> {
    match policy {
        Staleness::AutoUpgrade => {
            info!("local configuration of {name:?} diverged from remote, upgrading");
            upstream.pull()?;
        }
        Staleness::Backoff(duration) => {
            warn!(
                "local configuration of {name:?} diverged from remote, sleeping for {}s",
                duration.as_secs()
            );
            operator.sleep(duration);
        }
        Staleness::Prompt => {
            warn!("local configuration of {name:?} diverged from remote");
            if operator.confirm(&format!("Upgrade {name} now?"))? {
                upstream.pull()?;
            } else if !operator.confirm("Continue without upgrading?")? {
                return Err(FlowError::Aborted { name: name.into() });
            }
        }
    }

    Ok(())
}

/// Load application, and bring it up to date with its tracked remote.
///
/// A home that is missing, or that is not a git working tree, only produces
/// a warning, and the application is used as is. A fetch failure also only
/// produces a warning.
///
/// # Errors
///
/// - Return [`FlowError::Settings`] if application is not installed.
/// - Return [`FlowError::Repo`] if tracked remote does not exist.
/// - Return [`FlowError::App`] if compose service cannot be resolved.
/// - Return any error of [`resolve`].
#[instrument(skip(settings, operator), level = "debug")]
pub fn reconcile(settings: &Settings, name: &str, operator: &mut impl Operator) -> Result<Dip> {
    let app = settings.get(name)?;

    let repo = match app.repo() {
        Ok(repo) => repo,
        Err(error @ (RepoError::NoSuchPath { .. } | RepoError::InvalidGitRepository { .. })) => {
            warn!("{error}");
            None
        }
        Err(error) => return Err(error.into()),
    };

    if let Some(repo) = &repo {
        repo.remote()?;
    }
    app.validate(true)?;

    let Some(repo) = repo else {
        return Ok(app);
    };

    let diverged = repo.diverged(false).unwrap_or_else(|error| {
        warn!("cannot check {:?} for remote changes: {error}", app.name);
        false
    });

    if diverged {
        let sleep = app
            .git
            .as_ref()
            .and_then(|git| git.sleep)
            .map(|_| repo.sleeptime());
        let policy = Staleness::new(repo.auto_upgrade(), sleep);
        resolve(policy, &app.name, &repo, operator)?;
    }

    Ok(app)
}

/// Reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Registry access fails.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Application validation fails.
    #[error(transparent)]
    App(#[from] AppError),

    /// Git tracking fails.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Operator refused to continue with stale configuration.
    #[error("aborted {name:?} with stale configuration")]
    Aborted { name: String },

    /// Operator cannot be asked.
    #[error(transparent)]
    Prompt(#[from] InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = FlowError> = std::result::Result<T, E>;
