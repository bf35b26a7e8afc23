// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host capability checks.
//!
//! Missing host capabilities are the only fatal errors of a run. If the OS
//! package manager cannot be reached, or the module gallery host is too old,
//! nothing in the registry can be trusted to work, so the run is aborted before
//! the registry is touched.

use crate::{
    component::ProviderKind,
    config::Settings,
    provider::{
        shell::{CommandSpec, Shell},
        worker::run_detached,
    },
    registry::Registry,
};

use regex::Regex;
use std::{cmp::Ordering, process::Command, sync::LazyLock, time::Duration};
use tracing::{debug, instrument};

static VERSION: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)*"));

/// Extract first dotted numeric version from text.
///
/// `"PowerShell 7.4.1-preview"` yields `[7, 4, 1]`.
pub fn parse_version(text: &str) -> Option<Vec<u64>> {
    let pattern = VERSION.as_ref().ok()?;
    let found = pattern.find(text)?;
    found
        .as_str()
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Compare dotted numeric versions, padding the shorter one with zeros.
pub fn compare_versions(left: &[u64], right: &[u64]) -> Ordering {
    let width = left.len().max(right.len());
    let pad = |version: &[u64], at: usize| version.get(at).copied().unwrap_or(0);
    (0..width)
        .map(|at| pad(left, at).cmp(&pad(right, at)))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Check if version text satisfies a minimum version.
///
/// Unparsable text never satisfies anything.
pub fn version_at_least(found: &str, required: &str) -> bool {
    match (parse_version(found), parse_version(required)) {
        (Some(found), Some(required)) => compare_versions(&found, &required).is_ge(),
        _ => false,
    }
}

/// Check if current process runs with elevated rights.
#[cfg(unix)]
pub fn is_privileged() -> bool {
    match Command::new("id").arg("-u").output() {
        Ok(output) => {
            output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "0"
        }
        Err(err) => {
            debug!("cannot determine privilege level: {err}");
            false
        }
    }
}

/// Check if current process runs with elevated rights.
///
/// Only administrators may query sessions, so success means elevation.
#[cfg(windows)]
pub fn is_privileged() -> bool {
    match Command::new("net").arg("session").output() {
        Ok(output) => output.status.success(),
        Err(err) => {
            debug!("cannot determine privilege level: {err}");
            false
        }
    }
}

/// Verify host can run the registry at all.
///
/// Only the managers that the registry actually uses are checked. Absence of
/// the secondary package manager is never fatal.
///
/// # Errors
///
/// - Return [`PrerequisiteError::NativeManagerMissing`] if OS package manager
///   does not answer.
/// - Return [`PrerequisiteError::GalleryHostMissing`] if gallery host does not
///   answer.
/// - Return [`PrerequisiteError::HostTooOld`] if gallery host is older than
///   required.
#[instrument(skip_all, level = "debug")]
pub async fn check_prerequisites(
    shell: &dyn Shell,
    settings: &Settings,
    registry: &Registry,
) -> Result<()> {
    let bound = settings.timeouts.check();

    if registry.uses(ProviderKind::NativePackage) {
        let program = settings.native.program.clone();
        let answer = ask(shell, CommandSpec::new(&program, ["--version"]), bound).await;
        match answer {
            Ok(version) => debug!("{program} answers with {version}"),
            Err(reason) => return Err(PrerequisiteError::NativeManagerMissing { program, reason }),
        }
    }

    if registry.uses(ProviderKind::GalleryModule) {
        let gallery = &settings.gallery;
        let program = gallery.program.clone();
        let answer = ask(shell, CommandSpec::new(&program, gallery.version.iter()), bound).await;
        let found = match answer {
            Ok(found) => found,
            Err(reason) => return Err(PrerequisiteError::GalleryHostMissing { program, reason }),
        };

        if !version_at_least(&found, &gallery.min_host_version) {
            return Err(PrerequisiteError::HostTooOld {
                program,
                found,
                required: gallery.min_host_version.clone(),
            });
        }
    }

    Ok(())
}

async fn ask(
    shell: &dyn Shell,
    command: CommandSpec,
    bound: Duration,
) -> std::result::Result<String, String> {
    match run_detached(bound, shell.run(command)).await {
        Ok(Ok(output)) if output.success() => Ok(output.stdout.trim().to_string()),
        Ok(Ok(output)) => Err(output.headline().unwrap_or_else(|| "no output".into())),
        Ok(Err(err)) => Err(err.to_string()),
        Err(err) => Err(err.to_string()),
    }
}

/// Prerequisite error types.
#[derive(Debug, thiserror::Error)]
pub enum PrerequisiteError {
    /// OS package manager cannot be reached.
    #[error("package manager {program:?} is not reachable ({reason}); install it and put it on PATH")]
    NativeManagerMissing { program: String, reason: String },

    /// Module gallery host cannot be reached.
    #[error("module gallery host {program:?} is not reachable ({reason}); install it and put it on PATH")]
    GalleryHostMissing { program: String, reason: String },

    /// Module gallery host is too old.
    #[error("{program:?} version {found:?} is older than required {required:?}; upgrade it first")]
    HostTooOld {
        program: String,
        found: String,
        required: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PrerequisiteError> = std::result::Result<T, E>;
