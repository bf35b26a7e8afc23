// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remediation advice.
//!
//! The [`Advisor`] maps a failure to a short remediation hint. Rules are
//! consulted in three tiers, and the first match wins:
//!
//! 1. Privilege rules: access-denied errors depend on whether the run was
//!    elevated.
//! 2. Component hints: exact component name lookup. Hints declared in the
//!    registry override the built-in table.
//! 3. Generic categories: regular expressions over the error message.
//!
//! No match means no suggestion, which is never an error. The advisor is a
//! pure function of its inputs and its rule tables.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use tracing::warn;

const ACCESS_DENIED: &str = r"access (is )?denied|permission denied|unauthorized ?access|requires elevation|0x80070005|\b(eacces|eperm)\b";

const RERUN_ELEVATED: &str =
    "re-run from an elevated (administrator) shell, or install the component for the current user only";

const FILE_LOCKED: &str =
    "a file is in use or locked; close running terminals and editors using it, then retry";

const BUILTIN_HINTS: &[(&str, &str)] = &[
    (
        "oh-my-posh",
        "restart the terminal so oh-my-posh lands on PATH, then run `oh-my-posh --version`",
    ),
    (
        "nerd-font",
        "fonts need oh-my-posh installed first; try `oh-my-posh font install` by hand to see the error",
    ),
    (
        "yazi",
        "yazi needs `file` for previews; install Git for Windows, which ships it",
    ),
    (
        "fzf",
        "make sure fzf is on PATH, then restart the shell",
    ),
    (
        "psfzf",
        "PSFzf needs fzf installed first; install fzf, then re-run",
    ),
    (
        "terminal-icons",
        "remove stale copies with `Uninstall-Module Terminal-Icons -AllVersions`, then re-run",
    ),
    (
        "zoxide",
        "add `zoxide init` to the shell profile after installing",
    ),
];

const CATEGORIES: &[(&str, &str)] = &[
    (
        r"timed out|timeout|could not resolve host|name resolution|network|connection (was )?(reset|refused|closed)|unable to connect|0x80072ee7|\bssl\b",
        "check the network connection and proxy settings, then retry",
    ),
    (
        r"execution ?policy|running scripts is disabled|not digitally signed",
        "allow local scripts with `Set-ExecutionPolicy -Scope CurrentUser RemoteSigned`",
    ),
    (
        r"no match was found|module .* not (found|installed)|could not load (file or )?assembly|is not recognized as (the name of )?a cmdlet|cannot find module",
        "the module could not be resolved; check that the gallery is registered with `Get-PSRepository`",
    ),
    (
        r"another install(ation)? is (already )?in progress|0x80070652",
        "another installer is running; wait for it to finish, then retry",
    ),
    (
        r"hash (mismatch|does not match)|installer hash",
        "the installer hash does not match; refresh the package source, then retry",
    ),
    (
        r"not enough (disk )?space|no space left|disk full|0x80070070",
        "free up disk space, then retry",
    ),
];

/// Rule-based remediation lookup.
#[derive(Debug, Clone)]
pub struct Advisor {
    access_denied: Option<Regex>,
    hints: HashMap<String, String>,
    categories: Vec<(Regex, String)>,
}

impl Advisor {
    /// Construct new advisor with built-in rule tables.
    pub fn new() -> Self {
        let hints = BUILTIN_HINTS
            .iter()
            .map(|(name, hint)| (name.to_string(), hint.to_string()))
            .collect();
        let categories = CATEGORIES
            .iter()
            .filter_map(|(pattern, hint)| Some((compile(pattern)?, hint.to_string())))
            .collect();

        Self {
            access_denied: compile(ACCESS_DENIED),
            hints,
            categories,
        }
    }

    /// Overlay per-component hints, e.g., those declared in the registry.
    pub fn with_hints<'a>(mut self, hints: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        for (name, hint) in hints {
            self.hints.insert(name.to_string(), hint.to_string());
        }
        self
    }

    /// Suggest remediation for failure of component.
    pub fn suggest(
        &self,
        component_name: &str,
        error_message: &str,
        is_privileged: bool,
    ) -> Option<String> {
        let denied = self
            .access_denied
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(error_message));
        if denied {
            let hint = if is_privileged { FILE_LOCKED } else { RERUN_ELEVATED };
            return Some(hint.to_string());
        }

        if let Some(hint) = self.hints.get(component_name) {
            return Some(hint.clone());
        }

        self.categories
            .iter()
            .find(|(pattern, _)| pattern.is_match(error_message))
            .map(|(_, hint)| hint.clone())
    }
}

impl Default for Advisor {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(error) => {
            warn!("skip broken advisor rule {pattern:?}: {error}");
            None
        }
    }
}
