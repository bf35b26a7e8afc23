// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! User facing reports.
//!
//! Progress of a run is reported per component through the [`Progress`]
//! trait. The end of run summary is rendered by [`render_summary`], and the
//! failure log listing by [`render_failures`].

use crate::{
    failure::{advisor::Advisor, FailureGroup},
    provider::{Operation, OperationResult, Status},
    runner::Summary,
};

use indicatif::{ProgressBar, ProgressStyle};
use std::{fmt::Write, time::Duration};
use tracing::{debug, info, warn};

/// Per component progress reporting.
pub trait Progress {
    /// Component is about to be dispatched.
    fn start(&mut self, name: &str, operation: Operation);

    /// Component reached its final outcome.
    fn finish(&mut self, name: &str, result: &OperationResult);
}

/// Progress reported through tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn start(&mut self, name: &str, operation: Operation) {
        debug!("{operation} {name}");
    }

    fn finish(&mut self, name: &str, result: &OperationResult) {
        for diagnostic in &result.diagnostics {
            warn!("{name}: {diagnostic}");
        }
        info!("{}", outcome_line(name, result));
    }
}

/// Progress reported through terminal spinners.
#[derive(Debug, Default)]
pub struct IndicatifProgress {
    bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Progress for IndicatifProgress {
    fn start(&mut self, name: &str, operation: Operation) {
        let bar = ProgressBar::new_spinner();
        match ProgressStyle::with_template("{spinner:.green} {elapsed:.dim} {msg}") {
            Ok(style) => bar.set_style(style.tick_chars("-\\|/ ")),
            Err(error) => debug!("fall back to default spinner: {error}"),
        }
        bar.set_message(format!("{operation} {name}"));
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bar = Some(bar);
    }

    fn finish(&mut self, name: &str, result: &OperationResult) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }

        for diagnostic in &result.diagnostics {
            warn!("{name}: {diagnostic}");
        }
        info!("{}", outcome_line(name, result));
    }
}

fn outcome_line(name: &str, result: &OperationResult) -> String {
    let version = result
        .reported_version
        .as_deref()
        .map(|version| format!(" {version}"))
        .unwrap_or_default();

    match result.status {
        Status::Success if result.already_satisfied => format!("ok   {name}{version} (already satisfied)"),
        Status::Success => format!("ok   {name}{version}"),
        Status::Skipped => format!(
            "skip {name} ({})",
            result.skip_reason.as_deref().unwrap_or("skipped")
        ),
        Status::Failed => format!(
            "fail {name}: {}",
            result
                .failure
                .as_ref()
                .map(|failure| failure.error_message.as_str())
                .unwrap_or("failed")
        ),
    }
}

/// Render end of run summary.
///
/// Lists the three outcome buckets. Each failure gets the advisor's
/// suggestion when one exists, and a single pointer to the failure details
/// command closes the report.
pub fn render_summary(summary: &Summary, advisor: &Advisor, is_privileged: bool) -> String {
    let mut report = format!("{} summary\n{summary}", summary.operation);

    let mut failed = summary.failed_outcomes().peekable();
    if failed.peek().is_none() {
        return report;
    }

    for outcome in failed {
        let message = outcome
            .result
            .failure
            .as_ref()
            .map(|failure| failure.error_message.as_str())
            .unwrap_or_default();
        if let Some(hint) = advisor.suggest(&outcome.name, message, is_privileged) {
            let _ = writeln!(report, "hint for {}: {hint}", outcome.name);
        }
    }

    report.push_str("run `dotboot failures` for details\n");
    report
}

/// Render grouped failure log listing.
pub fn render_failures(groups: &[FailureGroup], window_days: u32) -> String {
    if groups.is_empty() {
        return format!("no failures in the last {window_days} days\n");
    }

    let mut report = format!("failures in the last {window_days} days\n");
    for group in groups {
        let latest = &group.latest;
        let _ = writeln!(
            report,
            "\n{} ({}) failed {} time(s), last at {}",
            group.component_name,
            latest.provider_kind,
            group.count,
            latest.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        let _ = writeln!(report, "  attempted: {}", latest.operation_description);
        let _ = writeln!(report, "  error: {}", latest.error_message);
        if let Some(code) = latest.exit_code {
            let _ = writeln!(report, "  exit code: {code}");
        }
        if latest.is_privileged {
            let _ = writeln!(report, "  elevated: yes");
        }
        if !latest.full_output.is_empty() {
            let _ = writeln!(report, "  output:");
            for line in latest.full_output.lines() {
                let _ = writeln!(report, "    {line}");
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        component::ProviderKind,
        failure::FailureLogEntry,
        provider::FailureDetail,
        runner::Outcome,
    };
    use chrono::{TimeZone, Utc};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn outcome_lines() {
        assert_eq!(
            outcome_line("git", &OperationResult::satisfied(Some("2.47.1".into()))),
            "ok   git 2.47.1 (already satisfied)"
        );
        assert_eq!(
            outcome_line("yazi", &OperationResult::skipped("manager unavailable")),
            "skip yazi (manager unavailable)"
        );
        assert_eq!(
            outcome_line("fzf", &OperationResult::failed(FailureDetail::new("x", "exit 1"))),
            "fail fzf: exit 1"
        );
    }

    #[test]
    fn failures_listing() -> anyhow::Result<()> {
        let timestamp = Utc
            .with_ymd_and_hms(2025, 3, 14, 9, 26, 53)
            .single()
            .ok_or_else(|| anyhow::anyhow!("bad timestamp"))?;
        let latest = FailureLogEntry::new(
            "psfzf",
            ProviderKind::GalleryModule,
            "pwsh -Command \"Install-Module -Name 'PSFzf'\"",
            "No match was found",
            "stderr: No match was found\nfor PSFzf",
            Some(1),
            true,
        )
        .at(timestamp);
        let groups = vec![FailureGroup {
            component_name: "psfzf".into(),
            latest,
            count: 3,
        }];

        let expect = indoc! {r#"
            failures in the last 7 days

            psfzf (gallery-module) failed 3 time(s), last at 2025-03-14 09:26:53 UTC
              attempted: pwsh -Command "Install-Module -Name 'PSFzf'"
              error: No match was found
              exit code: 1
              elevated: yes
              output:
                stderr: No match was found
                for PSFzf
        "#};
        assert_eq!(render_failures(&groups, 7), expect);
        assert_eq!(render_failures(&[], 7), "no failures in the last 7 days\n");

        Ok(())
    }

    #[test]
    fn summary_points_at_failure_details() {
        let failure = OperationResult::failed(FailureDetail::new(
            "winget install --id Git.Git",
            "Access is denied.",
        ));
        let summary = Summary {
            operation: Operation::Install,
            successes: vec!["fzf".into()],
            failures: vec!["git".into()],
            skipped: vec![],
            already_satisfied: 1,
            interrupted: false,
            outcomes: vec![Outcome {
                name: "git".into(),
                provider_kind: ProviderKind::NativePackage,
                is_optional: false,
                result: failure,
            }],
        };

        let expect = indoc! {"
            install summary
            succeeded (1): fzf
            skipped (0)
            failed (1): git
            1 already satisfied
            hint for git: re-run from an elevated (administrator) shell, or install the component for the current user only
            run `dotboot failures` for details
        "};
        assert_eq!(render_summary(&summary, &Advisor::new(), false), expect);
    }
}
