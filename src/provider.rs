// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provider dispatch.
//!
//! Given a component descriptor and a requested [`Operation`], the
//! [`Dispatcher`] executes the strategy of the component's provider and
//! returns an [`OperationResult`]. It never returns an error: everything that
//! can go wrong with a single component is folded into a failed result at this
//! boundary.
//!
//! # Check Before Work
//!
//! Every strategy follows the same state machine. The current state is queried
//! first under the check bound. If the component is already in place, the
//! operation short-circuits to success without doing any work. Otherwise the
//! install or update command runs under its own bound.
//!
//! ```text
//! PENDING -> CHECKING -> ALREADY_SATISFIED -> Success
//! CHECKING -> NEEDS_WORK -> EXECUTING -> Success | Failed
//! CHECKING -> TIMED_OUT -> EXECUTING
//! EXECUTING -> TIMED_OUT -> Failed
//! ```
//!
//! A check that cannot answer fails open: the work is attempted anyway.
//!
//! # Detached Workers
//!
//! All checks, installs, and updates of every provider run through
//! [`worker::run_detached`] or [`worker::run_blocking`], so one stalled
//! subprocess can never hang the whole run.

pub mod custom;
pub mod gallery;
pub mod native;
pub mod repo;
pub mod secondary;
pub mod shell;
pub mod worker;

use crate::{
    component::{ComponentDescriptor, Provider},
    config::Settings,
    failure::TIMEOUT_EXIT_CODE,
    provider::{
        shell::{CommandOutput, CommandSpec, Shell, TokioShell},
        worker::{run_detached, WorkerError},
    },
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::Arc,
    time::Duration,
};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// Operation applied to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Install,
    Validate,
    Update,
}

impl Display for Operation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::Install => "install",
            Self::Validate => "validate",
            Self::Update => "update",
        };
        fmt.write_str(label)
    }
}

/// Final classification of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Failed,
    Skipped,
}

/// Context of a failed operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    /// Exactly what was attempted, e.g., the literal command.
    pub operation_description: String,
    pub error_message: String,
    pub full_output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl FailureDetail {
    /// Construct new failure detail.
    pub fn new(operation_description: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            operation_description: operation_description.into(),
            error_message: error_message.into(),
            ..Default::default()
        }
    }

    /// Failure of a worker killed by its bound.
    pub fn timed_out(operation_description: impl Into<String>, bound: Duration) -> Self {
        Self {
            operation_description: operation_description.into(),
            error_message: WorkerError::TimedOut(bound).to_string(),
            exit_code: Some(TIMEOUT_EXIT_CODE),
            timed_out: true,
            ..Default::default()
        }
    }

    /// Failure of a command that ran to completion with non-zero exit.
    pub fn from_output(command: &CommandSpec, output: &CommandOutput) -> Self {
        let error_message = output.headline().unwrap_or_else(|| match output.code {
            Some(code) => format!("{} exited with code {code}", command.program),
            None => format!("{} was terminated by signal", command.program),
        });

        Self {
            operation_description: command.to_string(),
            error_message,
            full_output: output.combined(),
            exit_code: output.code,
            timed_out: false,
        }
    }

    /// Failure of a detached worker that did not return.
    pub fn from_worker(operation_description: impl Into<String>, error: WorkerError) -> Self {
        match error {
            WorkerError::TimedOut(bound) => Self::timed_out(operation_description, bound),
            WorkerError::Panicked(message) => Self::new(operation_description, message),
            WorkerError::Cancelled => Self::new(operation_description, "worker was cancelled"),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.full_output = output.into();
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }
}

/// Outcome of applying one operation to one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub status: Status,

    /// Version observed while checking or validating.
    pub reported_version: Option<String>,

    /// Warnings attached even on success.
    pub diagnostics: Vec<String>,

    /// Component was already in place, so no work was done.
    pub already_satisfied: bool,

    /// Why the component was skipped.
    pub skip_reason: Option<String>,

    /// Why the component failed.
    pub failure: Option<FailureDetail>,
}

impl OperationResult {
    /// Work was done and succeeded.
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            reported_version: None,
            diagnostics: Vec::new(),
            already_satisfied: false,
            skip_reason: None,
            failure: None,
        }
    }

    /// Nothing needed to be done.
    pub fn satisfied(version: Option<String>) -> Self {
        Self {
            reported_version: version,
            already_satisfied: true,
            ..Self::success()
        }
    }

    /// Component was not attempted.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Skipped,
            skip_reason: Some(reason.into()),
            ..Self::success()
        }
    }

    /// Component was attempted and failed.
    pub fn failed(detail: FailureDetail) -> Self {
        Self {
            status: Status::Failed,
            failure: Some(detail),
            ..Self::success()
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.reported_version = version;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: impl IntoIterator<Item = String>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }
}

/// Answer of a presence query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Probe {
    /// Component is in place.
    Satisfied { version: Option<String> },

    /// Component is not installed at all.
    Absent(String),

    /// Component is installed but does not satisfy requirements.
    Stale(String),

    /// Query could not answer.
    Unknown(FailureDetail),
}

/// Commands needed to converge a package-like component.
#[derive(Debug, Clone)]
pub(crate) struct Converge {
    /// Presence query, only used for descriptions.
    pub check: CommandSpec,
    pub install: CommandSpec,
    pub update: CommandSpec,

    /// Bound on install and update.
    pub bound: Duration,

    /// Exit codes of update that mean "nothing to update".
    pub up_to_date_codes: Vec<i32>,
}

/// Executes provider strategies.
pub struct Dispatcher {
    pub(crate) shell: Arc<dyn Shell>,
    pub(crate) settings: Settings,
    pub(crate) interactive: bool,
    pub(crate) secondary_available: OnceCell<bool>,
    pub(crate) secondary_update_all: OnceCell<std::result::Result<(), FailureDetail>>,
}

impl Dispatcher {
    /// Construct new dispatcher over target shell.
    pub fn new(shell: Arc<dyn Shell>, settings: Settings) -> Self {
        Self {
            shell,
            settings,
            interactive: false,
            secondary_available: OnceCell::new(),
            secondary_update_all: OnceCell::new(),
        }
    }

    /// Construct new dispatcher that runs real subprocesses.
    pub fn with_system_shell(settings: Settings) -> Self {
        Self::new(Arc::new(TokioShell), settings)
    }

    /// Allow strategies to prompt the user, e.g., for credentials.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Apply operation to component.
    ///
    /// The preferred variant is substituted into `{variant}` placeholders for
    /// components that offer it, otherwise their default variant is used.
    #[instrument(skip(self, descriptor), fields(component = %descriptor.name), level = "debug")]
    pub async fn dispatch(
        &self,
        descriptor: &ComponentDescriptor,
        operation: Operation,
        preferred_variant: Option<&str>,
    ) -> OperationResult {
        let variant = descriptor.select_variant(preferred_variant);
        let result = match &descriptor.provider {
            Provider::NativePackage(params) => {
                native::dispatch(self, params, operation, variant).await
            }
            Provider::GalleryModule(params) => {
                gallery::dispatch(self, params, operation, variant).await
            }
            Provider::SecondaryPackage(params) => {
                secondary::dispatch(self, params, operation, variant).await
            }
            Provider::ConfigRepo(params) => repo::dispatch(self, params, operation).await,
            Provider::Custom(params) => {
                custom::dispatch(self, &descriptor.name, params, operation, variant).await
            }
        };

        debug!("{operation} {} -> {:?}", descriptor.name, result.status);
        result
    }

    /// Run command under bound, treating non-zero exit as failure.
    pub(crate) async fn execute(
        &self,
        command: &CommandSpec,
        bound: Duration,
    ) -> std::result::Result<CommandOutput, FailureDetail> {
        match self.query(command, bound).await? {
            output if output.success() => Ok(output),
            output => Err(FailureDetail::from_output(command, &output)),
        }
    }

    /// Run command under bound, returning output whatever its exit code.
    pub(crate) async fn query(
        &self,
        command: &CommandSpec,
        bound: Duration,
    ) -> std::result::Result<CommandOutput, FailureDetail> {
        match run_detached(bound, self.shell.run(command.clone())).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(FailureDetail::new(
                command.to_string(),
                format!("failed to run {}: {err}", command.program),
            )),
            Err(err) => Err(FailureDetail::from_worker(command.to_string(), err)),
        }
    }

    /// Drive package-like component from probe answer to final result.
    pub(crate) async fn converge(
        &self,
        operation: Operation,
        probe: Probe,
        plan: Converge,
    ) -> OperationResult {
        match (operation, probe) {
            (Operation::Validate, Probe::Satisfied { version }) => {
                OperationResult::success().with_version(version)
            }
            (Operation::Validate, Probe::Absent(reason) | Probe::Stale(reason)) => {
                OperationResult::failed(FailureDetail::new(plan.check.to_string(), reason))
            }
            (Operation::Validate, Probe::Unknown(detail)) => OperationResult::failed(detail),

            (Operation::Install, Probe::Satisfied { version }) => OperationResult::satisfied(version),
            (Operation::Install, probe) | (Operation::Update, probe @ Probe::Absent(_)) => {
                if let Probe::Unknown(detail) = &probe {
                    debug!("check failed open: {}", detail.error_message);
                }
                self.run_step(&plan.install, plan.bound, &[]).await
            }
            (Operation::Update, _) => {
                self.run_step(&plan.update, plan.bound, &plan.up_to_date_codes).await
            }
        }
    }

    async fn run_step(
        &self,
        command: &CommandSpec,
        bound: Duration,
        up_to_date_codes: &[i32],
    ) -> OperationResult {
        match self.execute(command, bound).await {
            Ok(_) => OperationResult::success(),
            Err(detail)
                if detail
                    .exit_code
                    .is_some_and(|code| !detail.timed_out && up_to_date_codes.contains(&code)) =>
            {
                OperationResult::satisfied(None)
            }
            Err(detail) => OperationResult::failed(detail),
        }
    }
}
