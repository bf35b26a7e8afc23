// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Component descriptors.
//!
//! A __component__ is one installable unit of the environment: a package of
//! the OS package manager, a module of the language module gallery, a package
//! of the secondary package manager, a synced configuration repository, or
//! something entirely custom. Each component is described by a
//! [`ComponentDescriptor`] that names exactly one [`Provider`]. The provider
//! carries the parameters its strategy needs, so a native package cannot be
//! declared without a package identifier, and a custom component cannot be
//! declared without both an install and a validate action.
//!
//! # Custom Actions
//!
//! Custom components are driven by [`Action`] implementations. Registry files
//! declare [`ScriptAction`]s, which run a command and succeed if and only if
//! it exits with zero. Code can plug in any other installer through
//! [`FnAction`]. An action reports success or failure through its return type,
//! never through the content of its output.

use crate::provider::shell::{CommandSpec, Shell};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    future::Future,
    path::PathBuf,
    sync::Arc,
};

/// Static declaration of one installable unit.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    /// Unique human-readable identifier.
    pub name: String,

    /// Failures are reported as skipped, and the component can be bypassed.
    pub is_optional: bool,

    /// Components that must succeed before this one is attempted.
    pub depends_on: Vec<String>,

    /// Interchangeable flavors for the `{variant}` placeholder.
    pub variants: Vec<String>,

    /// Flavor used when the preferred variant is not offered.
    pub default_variant: Option<String>,

    /// Remediation hint shown on failure.
    pub hint: Option<String>,

    /// Strategy and its parameters.
    pub provider: Provider,
}

impl ComponentDescriptor {
    /// Construct new required component without dependencies.
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self {
            name: name.into(),
            is_optional: false,
            depends_on: Vec::new(),
            variants: Vec::new(),
            default_variant: None,
            hint: None,
            provider,
        }
    }

    /// Mark component as optional.
    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    /// Declare dependencies of component.
    pub fn depends_on(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declare interchangeable flavors of component.
    pub fn with_variants(
        mut self,
        variants: impl IntoIterator<Item = impl Into<String>>,
        default: Option<String>,
    ) -> Self {
        self.variants = variants.into_iter().map(Into::into).collect();
        self.default_variant = default;
        self
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    /// Select flavor to use given the user's preferred variant.
    ///
    /// Preferred variant wins if offered. Otherwise fall back to the default
    /// variant, then to the first offered one. Components without variants
    /// have nothing to select.
    pub fn select_variant(&self, preferred: Option<&str>) -> Option<&str> {
        if self.variants.is_empty() {
            return None;
        }

        if let Some(preferred) = preferred {
            if let Some(found) = self.variants.iter().find(|variant| *variant == preferred) {
                return Some(found.as_str());
            }
        }

        self.default_variant
            .as_deref()
            .or_else(|| self.variants.first().map(String::as_str))
    }
}

/// Provider kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    NativePackage,
    GalleryModule,
    SecondaryPackage,
    ConfigRepo,
    Custom,
}

impl Display for ProviderKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::NativePackage => "native-package",
            Self::GalleryModule => "gallery-module",
            Self::SecondaryPackage => "secondary-package",
            Self::ConfigRepo => "config-repo",
            Self::Custom => "custom",
        };
        fmt.write_str(label)
    }
}

/// Strategy of a component with its required parameters.
#[derive(Debug, Clone)]
pub enum Provider {
    NativePackage(NativePackageParams),
    GalleryModule(GalleryModuleParams),
    SecondaryPackage(SecondaryPackageParams),
    ConfigRepo(ConfigRepoParams),
    Custom(CustomParams),
}

impl Provider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::NativePackage(_) => ProviderKind::NativePackage,
            Self::GalleryModule(_) => ProviderKind::GalleryModule,
            Self::SecondaryPackage(_) => ProviderKind::SecondaryPackage,
            Self::ConfigRepo(_) => ProviderKind::ConfigRepo,
            Self::Custom(_) => ProviderKind::Custom,
        }
    }

    /// Shorthand for native package provider.
    pub fn native(package_id: impl Into<String>) -> Self {
        Self::NativePackage(NativePackageParams {
            package_id: package_id.into(),
        })
    }

    /// Shorthand for gallery module provider.
    pub fn gallery(module_name: impl Into<String>, min_version: Option<String>) -> Self {
        Self::GalleryModule(GalleryModuleParams {
            module_name: module_name.into(),
            min_version,
        })
    }

    /// Shorthand for secondary package provider.
    pub fn secondary(package_id: impl Into<String>) -> Self {
        Self::SecondaryPackage(SecondaryPackageParams {
            package_id: package_id.into(),
        })
    }

    /// Shorthand for custom provider.
    pub fn custom(install: impl Action, validate: impl Action) -> Self {
        Self::Custom(CustomParams {
            install: Arc::new(install),
            validate: Arc::new(validate),
            update: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativePackageParams {
    pub package_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryModuleParams {
    pub module_name: String,
    pub min_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryPackageParams {
    pub package_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRepoParams {
    /// Remote to clone from.
    pub url: String,

    /// Local clone location.
    pub path: PathBuf,

    /// Branch to check out instead of the remote's default.
    pub branch: Option<String>,
}

/// Actions of a custom component.
///
/// Install and validate are mandatory. Update falls back to install.
#[derive(Clone)]
pub struct CustomParams {
    pub install: Arc<dyn Action>,
    pub validate: Arc<dyn Action>,
    pub update: Option<Arc<dyn Action>>,
}

impl Debug for CustomParams {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("CustomParams")
            .field("install", &self.install.describe())
            .field("validate", &self.validate.describe())
            .field("update", &self.update.as_ref().map(|action| action.describe()))
            .finish()
    }
}

/// Everything an action may need while it runs.
#[derive(Clone)]
pub struct ActionContext {
    /// Name of component being processed.
    pub component: String,

    /// Selected flavor, if component declares any.
    pub variant: Option<String>,

    /// Shell to run subprocesses through.
    pub shell: Arc<dyn Shell>,
}

/// Successful action outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActionReport {
    /// Version observed by a validate action.
    pub version: Option<String>,

    /// Warnings worth showing even on success.
    pub diagnostics: Vec<String>,
}

impl ActionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostics.push(diagnostic.into());
        self
    }
}

/// Failed action outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    pub output: Option<String>,
    pub exit_code: Option<i32>,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: None,
            exit_code: None,
        }
    }
}

/// Friendly result alias :3
pub type ActionResult = std::result::Result<ActionReport, ActionError>;

/// Ad hoc install, validate, or update logic.
pub trait Action: Send + Sync + 'static {
    /// Perform the action.
    fn call(&self, ctx: ActionContext) -> BoxFuture<'static, ActionResult>;

    /// Describe what the action attempts, for logs.
    fn describe(&self) -> String;
}

/// Action that runs a command template.
///
/// Succeeds if and only if the command exits with zero. Arguments may use the
/// `{variant}` and `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptAction {
    argv: Vec<String>,
    reports_version: bool,
}

impl ScriptAction {
    /// Construct new script action from argv template, program first.
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            reports_version: false,
        }
    }

    /// Treat first non-empty line of stdout as the reported version.
    pub fn reporting_version(mut self) -> Self {
        self.reports_version = true;
        self
    }

    fn command(&self, ctx: &ActionContext) -> Option<CommandSpec> {
        let variant = ctx.variant.as_deref().unwrap_or_default();
        CommandSpec::from_argv(&self.argv, &[("variant", variant), ("name", &ctx.component)])
    }
}

impl Action for ScriptAction {
    fn call(&self, ctx: ActionContext) -> BoxFuture<'static, ActionResult> {
        let command = self.command(&ctx);
        let reports_version = self.reports_version;
        Box::pin(async move {
            let Some(command) = command else {
                return Err(ActionError::new("script action has no command"));
            };

            let output = ctx
                .shell
                .run(command.clone())
                .await
                .map_err(|err| ActionError::new(format!("failed to run {command}: {err}")))?;

            if !output.success() {
                return Err(ActionError {
                    message: output.headline().unwrap_or_else(|| {
                        format!("{} exited with {:?}", command.program, output.code)
                    }),
                    output: Some(output.combined()),
                    exit_code: output.code,
                });
            }

            let mut report = ActionReport::new();
            if reports_version {
                report.version = output
                    .stdout
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(ToString::to_string);
            }

            Ok(report)
        })
    }

    fn describe(&self) -> String {
        CommandSpec::from_argv(&self.argv, &[])
            .map(|command| command.to_string())
            .unwrap_or_default()
    }
}

/// Action backed by an async closure.
pub struct FnAction<F> {
    label: String,
    func: F,
}

impl<F> FnAction<F> {
    /// Construct new closure action with a label used in logs.
    pub fn new(label: impl Into<String>, func: F) -> Self {
        Self {
            label: label.into(),
            func,
        }
    }
}

impl<F, Fut> Action for FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    fn call(&self, ctx: ActionContext) -> BoxFuture<'static, ActionResult> {
        Box::pin((self.func)(ctx))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
