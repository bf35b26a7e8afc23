// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::PathBuf;

/// Determine default absolute path to component registry file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/dotboot/components.toml` as
/// the default. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_registry_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("dotboot").join("components.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to failure log.
///
/// Uses `$XDG_DATA_HOME/dotboot/failures.json`. Does not check if the path
/// returned actually exists, because a missing failure log is just an empty
/// one.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory cannot be determined.
pub fn default_failure_log_path() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("dotboot").join("failures.json"))
        .ok_or(NoWayHome)
}

/// No way to determine user's configuration or data directories.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration or data directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[cfg(target_os = "linux")]
    #[sealed_test(env = [("HOME", "/home/blah"), ("XDG_CONFIG_HOME", "/home/blah/.config")])]
    fn default_registry_path_follows_xdg() -> anyhow::Result<()> {
        let result = default_registry_path()?;
        let expect = PathBuf::from("/home/blah/.config/dotboot/components.toml");
        assert_eq!(result, expect);

        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[sealed_test(env = [("HOME", "/home/blah"), ("XDG_DATA_HOME", "/home/blah/.local/share")])]
    fn default_failure_log_path_follows_xdg() -> anyhow::Result<()> {
        let result = default_failure_log_path()?;
        let expect = PathBuf::from("/home/blah/.local/share/dotboot/failures.json");
        assert_eq!(result, expect);

        Ok(())
    }
}
