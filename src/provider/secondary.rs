// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Secondary package manager strategy.
//!
//! The secondary package manager is optional on the host. If it cannot be
//! reached, its components are skipped rather than failed. Updates go through
//! the manager's bulk "update everything" call, which runs at most once per
//! dispatcher. Every later component reuses its outcome.

use crate::{
    component::SecondaryPackageParams,
    provider::{
        native::{package_id, plan, probe},
        shell::CommandSpec,
        Dispatcher, FailureDetail, Operation, OperationResult, Probe,
    },
};

use tracing::{info, instrument, warn};

#[instrument(skip(dispatcher, params), fields(package = %params.package_id), level = "debug")]
pub(crate) async fn dispatch(
    dispatcher: &Dispatcher,
    params: &SecondaryPackageParams,
    operation: Operation,
    variant: Option<&str>,
) -> OperationResult {
    if !is_available(dispatcher).await {
        return OperationResult::skipped("manager unavailable");
    }

    let settings = dispatcher.settings();
    let backend = &settings.secondary;
    let package_id = package_id(&params.package_id, variant);
    let plan = plan(backend, &package_id, settings.timeouts.install());
    let probe = probe(dispatcher, &plan.check, &package_id).await;

    let Some(update_all) = backend.update_all.as_ref() else {
        return dispatcher.converge(operation, probe, plan).await;
    };

    match (operation, probe) {
        (Operation::Update, probe @ (Probe::Satisfied { .. } | Probe::Stale(_))) => {
            let version = match probe {
                Probe::Satisfied { version } => version,
                _ => None,
            };

            let command = CommandSpec::from_template(&backend.program, update_all, &[]);
            match bulk_update(dispatcher, command).await {
                Ok(()) => OperationResult::success().with_version(version),
                Err(detail) => OperationResult::failed(detail),
            }
        }
        (operation, probe) => dispatcher.converge(operation, probe, plan).await,
    }
}

/// Check once if the secondary package manager can be reached at all.
async fn is_available(dispatcher: &Dispatcher) -> bool {
    *dispatcher
        .secondary_available
        .get_or_init(|| async {
            let program = dispatcher.settings().secondary.program.clone();
            let command = CommandSpec::new(&program, ["--version"]);
            let bound = dispatcher.settings().timeouts.check();
            match dispatcher.query(&command, bound).await {
                Ok(_) => true,
                Err(detail) if detail.timed_out => true,
                Err(detail) => {
                    warn!("{program} unavailable, skipping its components: {}", detail.error_message);
                    false
                }
            }
        })
        .await
}

/// Run bulk update once, sharing its outcome.
async fn bulk_update(
    dispatcher: &Dispatcher,
    command: CommandSpec,
) -> std::result::Result<(), FailureDetail> {
    dispatcher
        .secondary_update_all
        .get_or_init(|| async {
            info!("run bulk update: {command}");
            let bound = dispatcher.settings().timeouts.install();
            dispatcher.execute(&command, bound).await.map(|_| ())
        })
        .await
        .clone()
}
