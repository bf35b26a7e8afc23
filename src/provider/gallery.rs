// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Language module gallery strategy.
//!
//! Presence is decided by a local availability query that prints every
//! installed version of the module, one per line. No network access is
//! needed to check. Installs are scoped to the current user.

use crate::{
    component::GalleryModuleParams,
    host::{compare_versions, parse_version, version_at_least},
    provider::{shell::CommandSpec, Converge, Dispatcher, Operation, OperationResult, Probe},
};

use tracing::instrument;

#[instrument(skip(dispatcher, params), fields(module = %params.module_name), level = "debug")]
pub(crate) async fn dispatch(
    dispatcher: &Dispatcher,
    params: &GalleryModuleParams,
    operation: Operation,
    variant: Option<&str>,
) -> OperationResult {
    let settings = dispatcher.settings();
    let gallery = &settings.gallery;
    let module = match variant {
        Some(variant) => params.module_name.replace("{variant}", variant),
        None => params.module_name.clone(),
    };

    let vars = [("module", module.as_str())];
    let plan = Converge {
        check: CommandSpec::from_template(&gallery.program, &gallery.check, &vars),
        install: CommandSpec::from_template(&gallery.program, &gallery.install, &vars),
        update: CommandSpec::from_template(&gallery.program, &gallery.update, &vars),
        bound: settings.timeouts.gallery(),
        up_to_date_codes: Vec::new(),
    };

    let probe = match dispatcher.query(&plan.check, settings.timeouts.check()).await {
        Ok(output) if output.success() => {
            judge(&module, &output.stdout, params.min_version.as_deref())
        }
        Ok(output) => Probe::Absent(format!(
            "module {module} is not available: {}",
            output.headline().unwrap_or_default()
        )),
        Err(detail) => Probe::Unknown(detail),
    };

    dispatcher.converge(operation, probe, plan).await
}

/// Decide if installed versions satisfy minimum version.
fn judge(module: &str, listing: &str, min_version: Option<&str>) -> Probe {
    let newest = listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_version(line).map(|parsed| (parsed, line)))
        .max_by(|(left, _), (right, _)| compare_versions(left, right))
        .map(|(_, line)| line.to_string());

    let Some(newest) = newest else {
        return Probe::Absent(format!("module {module} is not installed"));
    };

    match min_version {
        Some(required) if !version_at_least(&newest, required) => Probe::Stale(format!(
            "module {module} version {newest} is older than required {required}"
        )),
        _ => Probe::Satisfied {
            version: Some(newest),
        },
    }
}
