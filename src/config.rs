// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the component registry file that dotboot uses to
//! simplify the process of serialization and deserialization. File I/O is left
//! to the caller to figure out.
//!
//! # General Layout
//!
//! The registry file is composed of two basic parts: settings and components.
//! The settings section describes how to talk to the external package managers
//! that do the actual work, and how long dotboot is willing to wait on them.
//! The component section is an ordered listing of everything that should be
//! installed, validated, or updated.
//!
//! ```toml
//! [settings.timeouts]
//! install = 120
//!
//! [[component]]
//! name = "git"
//! provider = "native-package"
//! package_id = "Git.Git"
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

/// Registry file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Settings for external collaborators.
    #[serde(default)]
    pub settings: Settings,

    /// Ordered listing of components.
    #[serde(default, rename = "component", skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentDefinition>,
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;
        check_component_keys(data, &config.components)?;

        // INVARIANT: Perform shell expansion on every path field.
        if let Some(path) = config.settings.failure_log.take() {
            config.settings.failure_log = Some(expand_path(path)?);
        }

        for component in config.components.iter_mut() {
            if let ProviderDefinition::ConfigRepo { path, .. } = &mut component.provider {
                *path = expand_path(std::mem::take(path))?;
            }
        }

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

const COMPONENT_KEYS: &[&str] = &[
    "name",
    "optional",
    "depends_on",
    "variants",
    "default_variant",
    "hint",
    "provider",
];

impl ProviderDefinition {
    /// Keys that this provider accepts in a component entry.
    fn keys(&self) -> &'static [&'static str] {
        match self {
            Self::NativePackage { .. } | Self::SecondaryPackage { .. } => &["package_id"],
            Self::GalleryModule { .. } => &["module_name", "min_version"],
            Self::ConfigRepo { .. } => &["url", "path", "branch"],
            Self::Custom { .. } => &["install", "validate", "update"],
        }
    }
}

// INVARIANT: Flattened provider parameters cannot deny unknown fields, so
//   component entries are checked against their provider by hand.
fn check_component_keys(data: &str, components: &[ComponentDefinition]) -> Result<()> {
    let table: toml::Table = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;
    let Some(entries) = table.get("component").and_then(toml::Value::as_array) else {
        return Ok(());
    };

    for (entry, component) in entries.iter().zip(components) {
        let Some(entry) = entry.as_table() else {
            continue;
        };

        let allowed = component.provider.keys();
        if let Some(key) = entry
            .keys()
            .find(|key| !COMPONENT_KEYS.contains(&key.as_str()) && !allowed.contains(&key.as_str()))
        {
            return Err(ConfigError::UnknownField {
                component: component.name.clone(),
                field: key.clone(),
            });
        }
    }

    Ok(())
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Settings of external collaborators.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Override location of the failure log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_log: Option<PathBuf>,

    /// Wall-clock bounds for detached workers.
    #[serde(default)]
    pub timeouts: Timeouts,

    /// OS package manager.
    #[serde(default = "Backend::native")]
    pub native: Backend,

    /// Language module gallery.
    #[serde(default)]
    pub gallery: GalleryBackend,

    /// Secondary package manager for niche tools.
    #[serde(default = "Backend::secondary")]
    pub secondary: Backend,

    /// Behavior after a successful install run.
    #[serde(default)]
    pub post_install: PostInstall,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            failure_log: None,
            timeouts: Timeouts::default(),
            native: Backend::native(),
            gallery: GalleryBackend::default(),
            secondary: Backend::secondary(),
            post_install: PostInstall::default(),
        }
    }
}

/// Wall-clock bounds in seconds.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct Timeouts {
    /// Bound on "is it already there?" queries.
    pub check: u64,

    /// Bound on package installs and updates.
    pub install: u64,

    /// Bound on gallery module installs and updates.
    pub gallery: u64,

    /// Bound on custom actions and config repository syncs.
    pub custom: u64,
}

impl Timeouts {
    pub fn check(&self) -> Duration {
        Duration::from_secs(self.check)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install)
    }

    pub fn gallery(&self) -> Duration {
        Duration::from_secs(self.gallery)
    }

    pub fn custom(&self) -> Duration {
        Duration::from_secs(self.custom)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            check: 15,
            install: 60,
            gallery: 120,
            custom: 300,
        }
    }
}

/// Command templates of an external package manager.
///
/// Arguments may contain the `{id}` placeholder, which is replaced by the
/// package identifier of the component being processed.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Backend {
    /// Executable to invoke.
    pub program: String,

    /// Arguments of presence query.
    pub check: Vec<String>,

    /// Arguments of silent install.
    pub install: Vec<String>,

    /// Arguments of single package update.
    pub update: Vec<String>,

    /// Arguments of bulk "update everything" call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_all: Option<Vec<String>>,

    /// Exit codes of update meaning "nothing to update".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub up_to_date_codes: Vec<i32>,
}

impl Backend {
    /// Default OS package manager: winget.
    pub fn native() -> Self {
        Self {
            program: "winget".into(),
            check: args(&["list", "--id", "{id}", "--exact", "--accept-source-agreements"]),
            install: args(&[
                "install",
                "--id",
                "{id}",
                "--exact",
                "--silent",
                "--accept-package-agreements",
                "--accept-source-agreements",
            ]),
            update: args(&[
                "upgrade",
                "--id",
                "{id}",
                "--exact",
                "--silent",
                "--accept-package-agreements",
                "--accept-source-agreements",
            ]),
            update_all: None,

            // APPINSTALLER_CLI_ERROR_UPDATE_NOT_APPLICABLE
            up_to_date_codes: vec![-1978335189],
        }
    }

    /// Default secondary package manager: scoop.
    ///
    /// Scoop is installed as a `scoop.cmd` shim rather than an executable, and
    /// process spawning only resolves bare names to `.exe` files. Set
    /// `[settings.secondary] program` to override.
    pub fn secondary() -> Self {
        Self {
            program: "scoop.cmd".into(),
            check: args(&["list", "{id}"]),
            install: args(&["install", "{id}"]),
            update: args(&["update", "{id}"]),
            update_all: Some(args(&["update", "*"])),
            up_to_date_codes: Vec::new(),
        }
    }
}

/// Command templates of the module gallery host.
///
/// Arguments may contain the `{module}` placeholder.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct GalleryBackend {
    /// Host executable.
    pub program: String,

    /// Arguments printing locally available module versions, one per line.
    pub check: Vec<String>,

    /// Arguments of current-user scoped install.
    pub install: Vec<String>,

    /// Arguments of module update.
    pub update: Vec<String>,

    /// Arguments printing the host version.
    pub version: Vec<String>,

    /// Minimum host version required to run at all.
    pub min_host_version: String,
}

impl Default for GalleryBackend {
    fn default() -> Self {
        let command = |script: &str| {
            args(&["-NoProfile", "-NonInteractive", "-Command", script])
        };

        Self {
            program: "pwsh".into(),
            check: command(
                "Get-Module -ListAvailable -Name '{module}' | ForEach-Object { $_.Version.ToString() }",
            ),
            install: command(
                "Install-Module -Name '{module}' -Scope CurrentUser -Force -AllowClobber -ErrorAction Stop",
            ),
            update: command("Update-Module -Name '{module}' -Force -ErrorAction Stop"),
            version: command("$PSVersionTable.PSVersion.ToString()"),
            min_host_version: "7.0".into(),
        }
    }
}

/// What to offer after a successful install run.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PostInstall {
    /// Command that starts a fresh shell with the new profile loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_command: Option<Vec<String>>,
}

/// Component entry layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ComponentDefinition {
    /// Unique name of component.
    pub name: String,

    /// Failures are downgraded to skips, and the entry can be bypassed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,

    /// Components that must succeed before this one is attempted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Interchangeable flavors substituted into `{variant}` placeholders.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,

    /// Flavor to use when the preferred variant is not offered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_variant: Option<String>,

    /// Remediation hint shown when this component fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// Provider specific parameters.
    #[serde(flatten)]
    pub provider: ProviderDefinition,
}

/// Provider specific parameters of a component entry.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(tag = "provider", rename_all = "kebab-case")]
pub enum ProviderDefinition {
    /// Package of the OS package manager.
    NativePackage { package_id: String },

    /// Module of the language module gallery.
    GalleryModule {
        module_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_version: Option<String>,
    },

    /// Package of the secondary package manager.
    SecondaryPackage { package_id: String },

    /// Git repository holding synced external configuration.
    ConfigRepo {
        url: String,
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },

    /// Script commands for install and validate.
    Custom {
        install: Vec<String>,
        validate: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        update: Option<Vec<String>>,
    },
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Component entry holds a key its provider does not know.
    #[error("component {component:?} has unknown field {field:?}")]
    UnknownField { component: String, field: String },

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
