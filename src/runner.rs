// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Operation runner.
//!
//! The [`Runner`] drives one full pass of an operation across the registry.
//! Components are processed one at a time in plan order, i.e., dependencies
//! first and declaration order otherwise.
//!
//! # Fail Soft
//!
//! A failing component never stops the run. Every component is attempted,
//! except those whose dependencies did not succeed: attempting them would only
//! produce noise. Every failed outcome is handed to the [`Recorder`] with a
//! description of exactly what was attempted.
//!
//! # Interruption
//!
//! The runner polls an interrupt flag between components. Once it is raised,
//! the remaining components are skipped. Work on the current component is
//! never abandoned half way by the runner itself.

use crate::{
    component::{ComponentDescriptor, ProviderKind},
    failure::{FailureLogEntry, Recorder},
    provider::{Dispatcher, FailureDetail, Operation, OperationResult, Status},
    registry::{Registry, RegistryError},
    report::{Progress, TracingProgress},
};

use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{info, instrument, warn};

/// Explicit configuration of one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Do not attempt optional components at all.
    pub skip_optional: bool,

    /// Flavor to use for components that offer variants.
    pub preferred_variant: Option<String>,
}

/// Result of one component within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub name: String,
    pub provider_kind: ProviderKind,
    pub is_optional: bool,
    pub result: OperationResult,
}

/// Aggregate of a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub operation: Operation,

    /// Components that ended in success.
    pub successes: Vec<String>,

    /// Required components that failed.
    pub failures: Vec<String>,

    /// Components that were not attempted, or optional ones that failed,
    /// labeled with the reason.
    pub skipped: Vec<String>,

    /// Successes that needed no work.
    pub already_satisfied: usize,

    /// Run was cut short by an interrupt.
    pub interrupted: bool,

    /// Every outcome in plan order.
    pub outcomes: Vec<Outcome>,
}

impl Summary {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            successes: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            already_satisfied: 0,
            interrupted: false,
            outcomes: Vec::new(),
        }
    }

    /// Every required component is satisfied.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }

    /// Outcomes that failed, including optional ones.
    pub fn failed_outcomes(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_failed())
    }

    fn push(&mut self, outcome: Outcome) {
        let name = outcome.name.clone();
        match (outcome.result.status, outcome.is_optional) {
            (Status::Success, _) => {
                if outcome.result.already_satisfied {
                    self.already_satisfied += 1;
                }
                self.successes.push(name);
            }
            (Status::Failed, false) => self.failures.push(name),
            (Status::Failed, true) => self.skipped.push(format!("{name} (failed, optional)")),
            (Status::Skipped, _) => {
                let reason = outcome.result.skip_reason.as_deref().unwrap_or("skipped");
                self.skipped.push(format!("{name} ({reason})"));
            }
        }
        self.outcomes.push(outcome);
    }
}

impl Display for Summary {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let bucket = |fmt: &mut Formatter<'_>, label: &str, names: &[String]| -> FmtResult {
            if names.is_empty() {
                writeln!(fmt, "{label} (0)")
            } else {
                writeln!(fmt, "{label} ({}): {}", names.len(), names.join(", "))
            }
        };

        bucket(fmt, "succeeded", &self.successes)?;
        bucket(fmt, "skipped", &self.skipped)?;
        bucket(fmt, "failed", &self.failures)?;
        if self.already_satisfied > 0 {
            writeln!(fmt, "{} already satisfied", self.already_satisfied)?;
        }

        Ok(())
    }
}

/// Drives operations across the registry.
pub struct Runner<'a> {
    dispatcher: &'a Dispatcher,
    recorder: &'a mut dyn Recorder,
    progress: Box<dyn Progress + 'a>,
    interrupt: Arc<AtomicBool>,
    is_privileged: bool,
}

impl<'a> Runner<'a> {
    /// Construct new runner that records failures into target recorder.
    pub fn new(dispatcher: &'a Dispatcher, recorder: &'a mut dyn Recorder) -> Self {
        Self {
            dispatcher,
            recorder,
            progress: Box::new(TracingProgress),
            interrupt: Arc::new(AtomicBool::new(false)),
            is_privileged: false,
        }
    }

    /// Report progress through target reporter.
    pub fn with_progress(mut self, progress: impl Progress + 'a) -> Self {
        self.progress = Box::new(progress);
        self
    }

    /// Stop scheduling components once flag is raised.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Mark recorded failures as coming from an elevated run.
    pub fn privileged(mut self, is_privileged: bool) -> Self {
        self.is_privileged = is_privileged;
        self
    }

    /// Apply operation to every component of registry.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::UnknownDependency`],
    ///   [`RegistryError::RequiredOnOptional`], or
    ///   [`RegistryError::CycleDetected`] if no plan can be made. Nothing is
    ///   attempted in that case.
    #[instrument(skip(self, registry), level = "debug")]
    pub async fn run(
        &mut self,
        operation: Operation,
        registry: &Registry,
        config: &RunConfig,
    ) -> Result<Summary, RegistryError> {
        let plan = registry.plan()?;
        let mut summary = Summary::new(operation);
        let mut succeeded: HashSet<&str> = HashSet::new();
        info!("{operation} {} components", plan.len());

        for descriptor in plan {
            if self.interrupt.load(Ordering::SeqCst) {
                summary.interrupted = true;
            }

            let result = if summary.interrupted {
                OperationResult::skipped("interrupted")
            } else if descriptor.is_optional && config.skip_optional {
                OperationResult::skipped("optional")
            } else if let Some(dependency) = descriptor
                .depends_on
                .iter()
                .find(|dependency| !succeeded.contains(dependency.as_str()))
            {
                blocked(descriptor, operation, dependency)
            } else {
                self.progress.start(&descriptor.name, operation);
                self.dispatcher
                    .dispatch(descriptor, operation, config.preferred_variant.as_deref())
                    .await
            };

            self.progress.finish(&descriptor.name, &result);
            if result.status == Status::Success {
                succeeded.insert(descriptor.name.as_str());
            }

            if let Some(failure) = result.failure.as_ref().filter(|_| result.is_failed()) {
                self.record(descriptor, failure);
            }

            summary.push(Outcome {
                name: descriptor.name.clone(),
                provider_kind: descriptor.provider_kind(),
                is_optional: descriptor.is_optional,
                result,
            });
        }

        if summary.interrupted {
            warn!("{operation} interrupted, remaining components were skipped");
        }

        Ok(summary)
    }

    fn record(&mut self, descriptor: &ComponentDescriptor, failure: &FailureDetail) {
        self.recorder.record(FailureLogEntry::new(
            &descriptor.name,
            descriptor.provider_kind(),
            &failure.operation_description,
            &failure.error_message,
            &failure.full_output,
            failure.exit_code,
            self.is_privileged,
        ));
    }
}

/// Outcome of a component whose dependency did not succeed.
fn blocked(descriptor: &ComponentDescriptor, operation: Operation, dependency: &str) -> OperationResult {
    let reason = format!("blocked by {dependency}");
    if descriptor.is_optional {
        return OperationResult::skipped(reason);
    }

    OperationResult::failed(FailureDetail::new(
        format!("{operation} {} after {dependency}", descriptor.name),
        reason,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        component::{ActionContext, ActionError, ActionReport, FnAction, Provider},
        failure::FailureHistory,
        provider::tests::{dispatcher, fail, ok, FakeShell, Reply},
    };
    use pretty_assertions::assert_eq;

    fn registry(components: impl IntoIterator<Item = ComponentDescriptor>) -> Registry {
        let mut registry = Registry::new();
        for component in components {
            if let Err(error) = registry.push(component) {
                panic!("bad fixture: {error}");
            }
        }
        registry
    }

    fn native(name: &str) -> ComponentDescriptor {
        ComponentDescriptor::new(name, Provider::native(name))
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn present_components_only_run_checks() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        for name in ["A", "B", "C"] {
            shell.on(&format!("--id {name} --exact --accept"), [ok(&format!("{name} {name} 1.0\n"))]);
        }

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let registry = registry([native("A"), native("B"), native("C")]);
        let summary = Runner::new(&dispatcher, &mut history)
            .run(Operation::Install, &registry, &RunConfig::default())
            .await?;

        assert_eq!(summary.successes, names(&["A", "B", "C"]));
        assert!(summary.failures.is_empty());
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.already_satisfied, 3);
        assert_eq!(shell.calls().len(), 3);
        assert!(shell.calls().iter().all(|call| call.starts_with("winget list")));
        assert!(summary.is_success());

        Ok(())
    }

    #[tokio::test]
    async fn optional_failure_is_skipped_but_recorded() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        let validate = FnAction::new("probe", |_ctx: ActionContext| async move {
            Err::<ActionReport, _>(ActionError::new("missing"))
        });
        let install = FnAction::new("install X", |_ctx: ActionContext| async move {
            Err::<ActionReport, _>(ActionError::new("installer said no"))
        });
        let registry = registry([ComponentDescriptor::new("X", Provider::custom(install, validate)).optional()]);

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let summary = Runner::new(&dispatcher, &mut history)
            .run(Operation::Install, &registry, &RunConfig::default())
            .await?;

        assert!(summary.failures.is_empty());
        assert_eq!(summary.skipped, names(&["X (failed, optional)"]));
        assert!(summary.is_success());

        let entries = history.entries().collect::<Vec<_>>();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].component_name, "X");
        assert_eq!(entries[0].error_message, "installer said no");
        assert_eq!(entries[0].provider_kind, ProviderKind::Custom);

        Ok(())
    }

    #[tokio::test]
    async fn panicking_action_does_not_stop_run() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        shell.on("winget list", [ok("B B 1.0\n")]);
        let validate = FnAction::new("probe", |_ctx: ActionContext| async move {
            Err::<ActionReport, _>(ActionError::new("missing"))
        });
        let install = FnAction::new("explode", |_ctx: ActionContext| async move {
            if true {
                panic!("zip archive is truncated");
            }
            Ok::<_, ActionError>(ActionReport::new())
        });
        let registry = registry([
            ComponentDescriptor::new("A", Provider::custom(install, validate)),
            native("B"),
        ]);

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let summary = Runner::new(&dispatcher, &mut history)
            .run(Operation::Install, &registry, &RunConfig::default())
            .await?;

        assert_eq!(summary.failures, names(&["A"]));
        assert_eq!(summary.successes, names(&["B"]));
        assert!(!summary.is_success());

        let failed = summary.failed_outcomes().collect::<Vec<_>>();
        let message = failed[0].result.failure.as_ref().map(|f| f.error_message.as_str());
        assert_eq!(message, Some("zip archive is truncated"));

        Ok(())
    }

    #[tokio::test]
    async fn second_run_is_idempotent() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        for name in ["A", "B", "C"] {
            shell.on(
                &format!("winget list --id {name} "),
                [fail(1, "No installed package found"), ok(&format!("{name} {name} 1.0\n"))],
            );
        }

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let registry = registry([native("A"), native("B"), native("C")]);

        let first = Runner::new(&dispatcher, &mut history)
            .run(Operation::Install, &registry, &RunConfig::default())
            .await?;
        assert_eq!(first.successes, names(&["A", "B", "C"]));
        assert_eq!(first.already_satisfied, 0);
        assert_eq!(shell.count("winget install"), 3);

        let second = Runner::new(&dispatcher, &mut history)
            .run(Operation::Install, &registry, &RunConfig::default())
            .await?;
        assert_eq!(second.successes, names(&["A", "B", "C"]));
        assert_eq!(second.already_satisfied, 3);
        assert_eq!(shell.count("winget install"), 3);
        assert!(history.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn dependents_of_failures_are_blocked() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        shell.on("winget list", [fail(1, "")]);
        shell.on("winget install --id A ", [fail(2, "Installer failed with exit code: 1603")]);
        let registry = registry([
            native("A"),
            native("B").depends_on(["A"]),
            native("C").depends_on(["A"]).optional(),
            native("D"),
        ]);

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let summary = Runner::new(&dispatcher, &mut history)
            .run(Operation::Install, &registry, &RunConfig::default())
            .await?;

        assert_eq!(summary.failures, names(&["A", "B"]));
        assert_eq!(summary.skipped, names(&["C (blocked by A)"]));
        assert_eq!(summary.successes, names(&["D"]));
        assert_eq!(shell.count("--id B "), 0);
        assert_eq!(shell.count("--id C "), 0);
        assert_eq!(history.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn dependencies_run_first() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        shell.on("winget list", [ok("posh 1.0\nposh-font 1.0\n")]);
        let registry = registry([native("posh-font").depends_on(["posh"]), native("posh")]);

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let summary = Runner::new(&dispatcher, &mut history)
            .run(Operation::Validate, &registry, &RunConfig::default())
            .await?;

        assert_eq!(summary.successes, names(&["posh", "posh-font"]));
        let calls = shell.calls();
        assert!(calls[0].contains("--id posh "));
        assert!(calls[1].contains("--id posh-font "));

        Ok(())
    }

    #[tokio::test]
    async fn skip_optional_does_not_dispatch() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        let registry = registry([native("A").optional(), native("B")]);
        let config = RunConfig {
            skip_optional: true,
            ..Default::default()
        };

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let summary = Runner::new(&dispatcher, &mut history)
            .run(Operation::Install, &registry, &config)
            .await?;

        assert_eq!(summary.skipped, names(&["A (optional)"]));
        assert_eq!(summary.successes, names(&["B"]));
        assert_eq!(shell.count("--id A "), 0);

        Ok(())
    }

    #[tokio::test]
    async fn interrupt_skips_remaining_components() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        let registry = registry([native("A"), native("B")]);
        let interrupt = Arc::new(AtomicBool::new(true));

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let summary = Runner::new(&dispatcher, &mut history)
            .with_interrupt(interrupt)
            .run(Operation::Update, &registry, &RunConfig::default())
            .await?;

        assert_eq!(summary.skipped, names(&["A (interrupted)", "B (interrupted)"]));
        assert!(summary.interrupted);
        assert!(!summary.is_success());
        assert!(shell.calls().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn same_tool_under_two_providers_runs_twice() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        shell.on("winget list", [ok("fzf junegunn.fzf 0.56.3\n")]);
        shell.on("scoop.cmd list", [ok("fzf 0.56.3\n")]);
        let registry = registry([
            ComponentDescriptor::new("fzf", Provider::native("junegunn.fzf")),
            ComponentDescriptor::new("fzf-scoop", Provider::secondary("fzf")),
        ]);

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let summary = Runner::new(&dispatcher, &mut history)
            .run(Operation::Install, &registry, &RunConfig::default())
            .await?;

        assert_eq!(summary.successes, names(&["fzf", "fzf-scoop"]));
        assert_eq!(summary.already_satisfied, 2);

        Ok(())
    }

    #[tokio::test]
    async fn install_timeout_is_failure_and_recorded() -> anyhow::Result<()> {
        let shell = FakeShell::new();
        shell.on("winget list", [fail(1, "")]);
        shell.on("winget install", [Reply::Hang]);
        let registry = registry([native("A")]);

        let dispatcher = dispatcher(&shell);
        let mut history = FailureHistory::new();
        let summary = Runner::new(&dispatcher, &mut history)
            .privileged(true)
            .run(Operation::Install, &registry, &RunConfig::default())
            .await?;

        assert_eq!(summary.failures, names(&["A"]));
        let entry = history.entries().next().cloned();
        assert!(entry.as_ref().is_some_and(|entry| entry.error_message.contains("timed out")));
        assert!(entry.as_ref().is_some_and(|entry| entry.exit_code == Some(124)));
        assert!(entry.is_some_and(|entry| entry.is_privileged));

        Ok(())
    }

    #[test]
    fn summary_lists_three_buckets() {
        let mut summary = Summary::new(Operation::Install);
        summary.successes = names(&["git", "fzf"]);
        summary.skipped = names(&["yazi (failed, optional)"]);
        summary.already_satisfied = 1;

        assert_eq!(
            summary.to_string(),
            "succeeded (2): git, fzf\nskipped (1): yazi (failed, optional)\nfailed (0)\n1 already satisfied\n"
        );
    }
}
