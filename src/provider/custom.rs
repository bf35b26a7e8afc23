// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Custom action strategy.
//!
//! The validate action doubles as the presence check. Installing a component
//! whose validate action already succeeds does nothing. Every action runs in
//! a detached worker under the custom bound, and its typed result is taken at
//! face value.

use crate::{
    component::{Action, ActionContext, ActionReport, CustomParams},
    provider::{worker::run_detached, Dispatcher, FailureDetail, Operation, OperationResult},
};

use std::sync::Arc;
use tracing::{debug, instrument};

#[instrument(skip(dispatcher, params), level = "debug")]
pub(crate) async fn dispatch(
    dispatcher: &Dispatcher,
    name: &str,
    params: &CustomParams,
    operation: Operation,
    variant: Option<&str>,
) -> OperationResult {
    let ctx = ActionContext {
        component: name.to_string(),
        variant: variant.map(ToString::to_string),
        shell: dispatcher.shell.clone(),
    };

    match operation {
        Operation::Validate => match call(dispatcher, "validate", &params.validate, ctx).await {
            Ok(report) => succeeded(report),
            Err(detail) => OperationResult::failed(detail),
        },
        Operation::Install => {
            match call(dispatcher, "validate", &params.validate, ctx.clone()).await {
                Ok(report) => {
                    return OperationResult::satisfied(report.version)
                        .with_diagnostics(report.diagnostics)
                }
                Err(detail) => debug!("{name} needs install: {}", detail.error_message),
            }

            match call(dispatcher, "install", &params.install, ctx).await {
                Ok(report) => succeeded(report),
                Err(detail) => OperationResult::failed(detail),
            }
        }
        Operation::Update => {
            let (label, action) = match &params.update {
                Some(update) => ("update", update),
                None => ("install", &params.install),
            };

            match call(dispatcher, label, action, ctx).await {
                Ok(report) => succeeded(report),
                Err(detail) => OperationResult::failed(detail),
            }
        }
    }
}

fn succeeded(report: ActionReport) -> OperationResult {
    OperationResult::success()
        .with_version(report.version)
        .with_diagnostics(report.diagnostics)
}

/// Invoke action inside a bounded detached worker.
async fn call(
    dispatcher: &Dispatcher,
    label: &str,
    action: &Arc<dyn Action>,
    ctx: ActionContext,
) -> std::result::Result<ActionReport, FailureDetail> {
    let description = format!(
        "custom {label} action for '{}': {}",
        ctx.component,
        action.describe()
    );
    let bound = dispatcher.settings().timeouts.custom();

    match run_detached(bound, action.call(ctx)).await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(error)) => Err(FailureDetail::new(description, error.message)
            .with_output(error.output.unwrap_or_default())
            .with_exit_code(error.exit_code)),
        Err(error) => Err(FailureDetail::from_worker(description, error)),
    }
}
