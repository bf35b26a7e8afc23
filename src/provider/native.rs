// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! OS package manager strategy.
//!
//! A native package is present if and only if the presence query exits with
//! zero and mentions the package identifier. Some managers exit with zero
//! even when nothing matched, so the exit code alone is not trusted.

use crate::{
    component::NativePackageParams,
    config::Backend,
    host::parse_version,
    provider::{shell::CommandSpec, Converge, Dispatcher, Operation, OperationResult, Probe},
};

use tracing::instrument;

#[instrument(skip(dispatcher, params), fields(package = %params.package_id), level = "debug")]
pub(crate) async fn dispatch(
    dispatcher: &Dispatcher,
    params: &NativePackageParams,
    operation: Operation,
    variant: Option<&str>,
) -> OperationResult {
    let settings = dispatcher.settings();
    let package_id = package_id(&params.package_id, variant);
    let plan = plan(&settings.native, &package_id, settings.timeouts.install());
    let probe = probe(dispatcher, &plan.check, &package_id).await;
    dispatcher.converge(operation, probe, plan).await
}

/// Substitute selected variant into package identifier.
pub(crate) fn package_id(template: &str, variant: Option<&str>) -> String {
    match variant {
        Some(variant) => template.replace("{variant}", variant),
        None => template.to_string(),
    }
}

/// Render every command of a package manager backend.
pub(crate) fn plan(backend: &Backend, package_id: &str, bound: std::time::Duration) -> Converge {
    let vars = [("id", package_id)];
    Converge {
        check: CommandSpec::from_template(&backend.program, &backend.check, &vars),
        install: CommandSpec::from_template(&backend.program, &backend.install, &vars),
        update: CommandSpec::from_template(&backend.program, &backend.update, &vars),
        bound,
        up_to_date_codes: backend.up_to_date_codes.clone(),
    }
}

/// Ask package manager whether package is present.
pub(crate) async fn probe(dispatcher: &Dispatcher, check: &CommandSpec, package_id: &str) -> Probe {
    let bound = dispatcher.settings().timeouts.check();
    let output = match dispatcher.query(check, bound).await {
        Ok(output) => output,
        Err(detail) => return Probe::Unknown(detail),
    };

    if !output.success() {
        return Probe::Absent(format!("package {package_id} is not installed"));
    }

    match listed_version(&output.stdout, package_id) {
        Some(version) => Probe::Satisfied { version },
        None => Probe::Absent(format!("package {package_id} is not installed")),
    }
}

/// Find package in listing, and pick out its version column if any.
///
/// The identifier must appear as a whole column, compared without regard to
/// case, so `git` is not found in a listing of `lazygit`. Returns `None` if
/// package is not listed at all.
fn listed_version(listing: &str, package_id: &str) -> Option<Option<String>> {
    listing.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.position(|token| token.eq_ignore_ascii_case(package_id))?;
        let version = tokens
            .find(|token| {
                token.starts_with(|c: char| c.is_ascii_digit()) && parse_version(token).is_some()
            })
            .map(ToString::to_string);
        Some(version)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use simple_test_case::test_case;

    #[test_case(
        indoc! {"
            Name   Id        Version  Source
            -----------------------------------
            Git    Git.Git   2.47.1   winget
        "},
        "Git.Git",
        Some(Some("2.47.1".to_string()));
        "winget table"
    )]
    #[test_case("yazi 0.4.2 main\n", "yazi", Some(Some("0.4.2".to_string())); "scoop listing")]
    #[test_case("fzf\n", "fzf", Some(None); "no version column")]
    #[test_case("No installed package found.\n", "Git.Git", None; "not listed")]
    #[test_case("Git  GIT.GIT  2.0\n", "Git.Git", Some(Some("2.0".to_string())); "case insensitive")]
    #[test_case("lazygit 0.44.1 extras\n", "git", None; "longer name containing id")]
    #[test_case("psfzf 2.6.1 main\nfzf 0.56.3 main\n", "fzf", Some(Some("0.56.3".to_string())); "id after similar name")]
    #[test_case("psfzf 2.6.1 main\n", "fzf", None; "only similar name")]
    #[test]
    fn find_listed_version(listing: &str, package_id: &str, expect: Option<Option<String>>) {
        assert_eq!(listed_version(listing, package_id), expect);
    }

    #[test]
    fn substitute_variant() {
        assert_eq!(package_id("NerdFonts.{variant}", Some("Meslo")), "NerdFonts.Meslo");
        assert_eq!(package_id("Git.Git", Some("Meslo")), "Git.Git");
        assert_eq!(package_id("NerdFonts.{variant}", None), "NerdFonts.{variant}");
    }

    #[test]
    fn plan_renders_backend_templates() {
        let plan = plan(&Backend::native(), "Git.Git", std::time::Duration::from_secs(60));
        assert_eq!(
            plan.check.to_string(),
            "winget list --id Git.Git --exact --accept-source-agreements"
        );
        assert_eq!(plan.install.args[..3], ["install", "--id", "Git.Git"]);
        assert_eq!(plan.update.args[..3], ["upgrade", "--id", "Git.Git"]);
        assert_eq!(plan.up_to_date_codes, vec![-1978335189]);
    }
}
