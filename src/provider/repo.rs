// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration repository strategy.
//!
//! External configuration, e.g., a file manager's theme and keymaps, can be
//! kept in its own Git repository and synced into place. Installing clones the
//! repository if it is absent, and pulls it otherwise. Updating only pulls.
//!
//! # Local Edits Win
//!
//! A pull never overwrites local edits. If the work tree of the clone is dirty
//! the pull is not attempted at all, and the operation succeeds with a warning
//! diagnostic instead. Pulls are fast-forward only. A clone whose branch has
//! diverged from its remote is reported as a failure, and left untouched.
//!
//! All libgit2 work is blocking, so it runs on a blocking worker thread under
//! the custom bound.

use crate::{
    component::ConfigRepoParams,
    provider::{worker::run_blocking, Dispatcher, FailureDetail, Operation, OperationResult},
};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Config, FetchOptions, RemoteCallbacks, Repository, StatusOptions,
};
use inquire::{Password, Text};
use std::{
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

#[instrument(skip(dispatcher, params), fields(path = %params.path.display()), level = "debug")]
pub(crate) async fn dispatch(
    dispatcher: &Dispatcher,
    params: &ConfigRepoParams,
    operation: Operation,
) -> OperationResult {
    let bound = dispatcher.settings().timeouts.custom();
    let interactive = dispatcher.interactive;
    let description = describe(params, operation);
    let params = params.clone();

    let work = move || -> Result<Synced> {
        match operation {
            Operation::Validate => validate(&params),
            Operation::Install | Operation::Update => sync(&params, interactive),
        }
    };

    match run_blocking(bound, work).await {
        Ok(Ok(synced)) => synced.into_result(),
        Ok(Err(error)) => OperationResult::failed(FailureDetail::new(description, error.to_string())),
        Err(error) => OperationResult::failed(FailureDetail::from_worker(description, error)),
    }
}

fn describe(params: &ConfigRepoParams, operation: Operation) -> String {
    let target = params.path.display();
    match operation {
        Operation::Validate => format!("verify {target} is a clone of {}", params.url),
        Operation::Install | Operation::Update => match &params.branch {
            Some(branch) => format!("sync {target} with {} (branch {branch})", params.url),
            None => format!("sync {target} with {}", params.url),
        },
    }
}

/// What syncing did to the clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Synced {
    /// Repository was absent, and got cloned.
    Cloned { head: String },

    /// Clone already matches its remote.
    UpToDate { head: String },

    /// Clone was fast-forwarded.
    FastForwarded { from: String, to: String },

    /// Clone has local edits, and was left alone.
    Dirty { head: String, path: PathBuf },

    /// Clone is the expected repository.
    Valid { head: String },
}

impl Synced {
    fn into_result(self) -> OperationResult {
        match self {
            Self::Cloned { head } => OperationResult::success().with_version(Some(head)),
            Self::UpToDate { head } | Self::Valid { head } => OperationResult::satisfied(Some(head)),
            Self::FastForwarded { from, to } => OperationResult::success()
                .with_version(Some(to.clone()))
                .with_diagnostics([format!("fast-forwarded {from}..{to}")]),
            Self::Dirty { head, path } => OperationResult::satisfied(Some(head)).with_diagnostics([
                format!("{} has local changes, not pulled", path.display()),
            ]),
        }
    }
}

/// Clone repository if absent, otherwise pull it if clean.
///
/// # Errors
///
/// - Return [`RepoError::NotARepository`] if path holds something else.
/// - Return [`RepoError::OriginMismatch`] if clone tracks another remote.
/// - Return [`RepoError::Diverged`] if clone cannot be fast-forwarded.
/// - Return [`RepoError::Git2`] if libgit2 operations fail.
#[instrument(skip(params), level = "debug")]
pub fn sync(params: &ConfigRepoParams, interactive: bool) -> Result<Synced> {
    if is_vacant(&params.path) {
        return clone(params, interactive);
    }

    let repository = open(&params.path)?;
    check_origin(&repository, &params.url)?;
    pull(&repository, params, interactive)
}

/// Verify clone exists, and tracks expected remote.
///
/// # Errors
///
/// - Return [`RepoError::NotARepository`] if path is not a Git repository.
/// - Return [`RepoError::OriginMismatch`] if clone tracks another remote.
/// - Return [`RepoError::Git2`] if libgit2 operations fail.
#[instrument(skip(params), level = "debug")]
pub fn validate(params: &ConfigRepoParams) -> Result<Synced> {
    let repository = open(&params.path)?;
    check_origin(&repository, &params.url)?;
    Ok(Synced::Valid {
        head: short_head(&repository)?,
    })
}

fn is_vacant(path: &Path) -> bool {
    match path.read_dir() {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => !path.exists(),
    }
}

fn open(path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(|source| RepoError::NotARepository {
        source,
        path: path.to_path_buf(),
    })
}

fn check_origin(repository: &Repository, url: &str) -> Result<()> {
    let remote = repository.find_remote("origin")?;
    let found = remote.url().unwrap_or_default();
    if found != url {
        return Err(RepoError::OriginMismatch {
            found: found.to_string(),
            expected: url.to_string(),
        });
    }

    Ok(())
}

fn short_head(repository: &Repository) -> Result<String> {
    let commit = repository.head()?.peel_to_commit()?;
    let short = commit.as_object().short_id()?;
    Ok(short.as_str().unwrap_or_default().to_string())
}

fn is_dirty(repository: &Repository) -> Result<bool> {
    let mut options = StatusOptions::new();
    options.include_untracked(true).include_ignored(false);
    Ok(!repository.statuses(Some(&mut options))?.is_empty())
}

fn fetch_options<'cb>(
    authenticator: &'cb GitAuthenticator,
    config: &'cb Config,
) -> FetchOptions<'cb> {
    let mut throttle = time::Instant::now();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(authenticator.credentials(config));
    callbacks.transfer_progress(move |progress| {
        if throttle.elapsed() > time::Duration::from_millis(500) {
            throttle = time::Instant::now();
            debug!(
                "received {}/{} objects",
                progress.received_objects(),
                progress.total_objects()
            );
        }
        true
    });

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

fn authenticator(interactive: bool) -> GitAuthenticator {
    let authenticator = GitAuthenticator::default();
    if interactive {
        authenticator.set_prompter(InquirePrompter)
    } else {
        authenticator.try_password_prompt(0)
    }
}

fn clone(params: &ConfigRepoParams, interactive: bool) -> Result<Synced> {
    info!("clone {} into {:?}", params.url, params.path.display());
    let authenticator = authenticator(interactive);
    let config = Config::open_default()?;

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options(&authenticator, &config));
    if let Some(branch) = &params.branch {
        builder.branch(branch);
    }

    let repository = builder.clone(&params.url, &params.path)?;
    Ok(Synced::Cloned {
        head: short_head(&repository)?,
    })
}

fn pull(repository: &Repository, params: &ConfigRepoParams, interactive: bool) -> Result<Synced> {
    let head = short_head(repository)?;
    if is_dirty(repository)? {
        return Ok(Synced::Dirty {
            head,
            path: params.path.clone(),
        });
    }

    let branch = match &params.branch {
        Some(branch) => branch.clone(),
        None => repository
            .head()?
            .shorthand()
            .map(ToString::to_string)
            .ok_or(RepoError::DetachedHead)?,
    };

    let authenticator = authenticator(interactive);
    let config = Config::open_default()?;
    let mut remote = repository.find_remote("origin")?;
    remote.fetch(&[branch.as_str()], Some(&mut fetch_options(&authenticator, &config)), None)?;

    let fetch_head = repository.find_reference("FETCH_HEAD")?;
    let incoming = repository.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repository.merge_analysis(&[&incoming])?;

    if analysis.is_up_to_date() {
        return Ok(Synced::UpToDate { head });
    }

    if !analysis.is_fast_forward() {
        return Err(RepoError::Diverged {
            path: params.path.clone(),
            branch,
        });
    }

    // INVARIANT: Move branch first, then check out, so HEAD never points past the work tree.
    let refname = format!("refs/heads/{branch}");
    let mut reference = repository.find_reference(&refname)?;
    reference.set_target(incoming.id(), "dotboot: fast-forward")?;
    repository.set_head(&refname)?;
    repository.checkout_head(Some(CheckoutBuilder::default().force()))?;

    Ok(Synced::FastForwarded {
        from: head,
        to: short_head(repository)?,
    })
}

/// Git2 authentication prompter for the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        let username = Text::new("username").prompt().ok()?;
        let password = Password::new("password")
            .without_confirmation()
            .prompt()
            .ok()?;
        Some((username, password))
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        Password::new("password")
            .without_confirmation()
            .prompt()
            .ok()
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required with ssh key at {}", ssh_key_path.display());
        Password::new("passphrase")
            .without_confirmation()
            .prompt()
            .ok()
    }
}

/// Configuration repository error types.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Path exists but holds no repository.
    #[error("{:?} is not a git repository", path.display())]
    NotARepository {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Clone tracks some other remote.
    #[error("origin is {found:?}, expected {expected:?}")]
    OriginMismatch { found: String, expected: String },

    /// Local branch and remote branch have diverged.
    #[error("{:?} has diverged from origin/{branch}, resolve it by hand", path.display())]
    Diverged { path: PathBuf, branch: String },

    /// HEAD does not name a branch to pull.
    #[error("HEAD is detached, set a branch to pull")]
    DetachedHead,

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn params(path: &str) -> ConfigRepoParams {
        ConfigRepoParams {
            url: "https://blah.org/yazi.git".into(),
            path: PathBuf::from(path),
            branch: None,
        }
    }

    #[test]
    fn describe_names_target() {
        let mut params = params("/home/blah/yazi");
        assert_eq!(
            describe(&params, Operation::Install),
            "sync /home/blah/yazi with https://blah.org/yazi.git"
        );
        params.branch = Some("main".into());
        assert_eq!(
            describe(&params, Operation::Update),
            "sync /home/blah/yazi with https://blah.org/yazi.git (branch main)"
        );
        assert_eq!(
            describe(&params, Operation::Validate),
            "verify /home/blah/yazi is a clone of https://blah.org/yazi.git"
        );
    }

    #[test]
    fn dirty_clone_is_satisfied_with_warning() {
        let result = Synced::Dirty {
            head: "abc1234".into(),
            path: PathBuf::from("/home/blah/yazi"),
        }
        .into_result();

        assert!(result.already_satisfied);
        assert_eq!(result.diagnostics, vec!["/home/blah/yazi has local changes, not pulled"]);
    }

    #[sealed_test]
    fn validate_rejects_plain_directory() -> anyhow::Result<()> {
        std::fs::create_dir_all("yazi")?;
        std::fs::write("yazi/theme.toml", "blah")?;
        let result = validate(&params("yazi"));
        assert!(matches!(result, Err(RepoError::NotARepository { .. })));

        let result = sync(&params("yazi"), false);
        assert!(matches!(result, Err(RepoError::NotARepository { .. })));

        Ok(())
    }

    #[sealed_test]
    fn validate_rejects_foreign_origin() -> anyhow::Result<()> {
        let repository = Repository::init("yazi")?;
        repository.remote("origin", "https://elsewhere.org/yazi.git")?;

        let result = validate(&params("yazi"));
        assert!(matches!(result, Err(RepoError::OriginMismatch { .. })));

        Ok(())
    }
}
