// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Subprocess plumbing.
//!
//! Every external package manager is driven as a plain subprocess. The
//! [`Shell`] trait is the seam between providers and the operating system, so
//! providers can be exercised against a scripted shell in tests.

use futures::future::BoxFuture;
use std::{
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    io,
    process::{Command as StdCommand, Stdio},
};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Program plus arguments to execute.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Construct new command specification.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Construct command from argument template.
    ///
    /// Each `{key}` placeholder in the template is replaced with its value.
    pub fn from_template(
        program: impl Into<String>,
        template: &[String],
        vars: &[(&str, &str)],
    ) -> Self {
        Self {
            program: program.into(),
            args: render(template, vars),
        }
    }

    /// Construct command from a full argv template, i.e., program first.
    ///
    /// Returns `None` if template is empty.
    pub fn from_argv(argv: &[String], vars: &[(&str, &str)]) -> Option<Self> {
        let mut argv = render(argv, vars).into_iter();
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
        })
    }
}

impl Display for CommandSpec {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(fmt, " \"{arg}\"")?;
            } else {
                write!(fmt, " {arg}")?;
            }
        }

        Ok(())
    }
}

/// Replace `{key}` placeholders of each argument.
pub fn render(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |arg, (key, value)| {
                arg.replace(&format!("{{{key}}}"), value)
            })
        })
        .collect()
}

/// Captured result of a finished subprocess.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Construct new successful output.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Construct new failed output.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Merge stdout and stderr into one message.
    pub fn combined(&self) -> String {
        let mut message = String::new();
        if !self.stdout.is_empty() {
            message.push_str(format!("stdout: {}", self.stdout).as_str());
        }

        if !self.stderr.is_empty() {
            if !message.is_empty() && !message.ends_with('\n') {
                message.push('\n');
            }
            message.push_str(format!("stderr: {}", self.stderr).as_str());
        }

        // INVARIANT: Chomp trailing newlines.
        message.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Most informative single line of output.
    ///
    /// Prefers the last non-empty line of stderr, then stdout.
    pub fn headline(&self) -> Option<String> {
        [&self.stderr, &self.stdout]
            .into_iter()
            .flat_map(|text| text.lines().rev().map(str::trim).find(|line| !line.is_empty()))
            .next()
            .map(ToString::to_string)
    }
}

/// Run subprocesses.
pub trait Shell: Send + Sync + 'static {
    /// Run command to completion, capturing its output.
    ///
    /// Dropping the returned future before it resolves must terminate the
    /// subprocess.
    fn run(&self, command: CommandSpec) -> BoxFuture<'static, io::Result<CommandOutput>>;
}

/// Shell backed by tokio's process API.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioShell;

impl Shell for TokioShell {
    fn run(&self, command: CommandSpec) -> BoxFuture<'static, io::Result<CommandOutput>> {
        Box::pin(async move {
            debug!("run {command}");
            let output = Command::new(&command.program)
                .args(&command.args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
                stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
            })
        })
    }
}

/// Run command through current process, handing over the terminal.
///
/// # Errors
///
/// - Return [`io::Error`] if command cannot be spawned, or exits with failure.
#[instrument(skip(args), level = "debug")]
pub fn syscall_interactive(
    cmd: impl AsRef<OsStr> + std::fmt::Debug,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> io::Result<()> {
    let status = StdCommand::new(cmd.as_ref()).args(args).spawn()?.wait()?;
    if !status.success() {
        return Err(io::Error::other(format!("command {:?} failed", cmd.as_ref())));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn render_placeholders() {
        let template = vec!["install".to_string(), "--id".into(), "{id}".into(), "{id}-{variant}".into()];
        let result = render(&template, &[("id", "Git.Git"), ("variant", "mini")]);
        let expect = vec!["install", "--id", "Git.Git", "Git.Git-mini"];
        assert_eq!(result, expect);
    }

    #[test]
    fn display_quotes_whitespace() {
        let command = CommandSpec::new("pwsh", ["-Command", "Get-Module -Name 'x'"]);
        assert_eq!(command.to_string(), r#"pwsh -Command "Get-Module -Name 'x'""#);
    }

    #[test]
    fn from_argv_splits_program() {
        let argv = vec!["oh-my-posh".to_string(), "font".into(), "install".into(), "{variant}".into()];
        let result = CommandSpec::from_argv(&argv, &[("variant", "FiraCode")]);
        assert_eq!(result, Some(CommandSpec::new("oh-my-posh", ["font", "install", "FiraCode"])));
        assert_eq!(CommandSpec::from_argv(&[], &[]), None);
    }

    #[test]
    fn output_headline_prefers_stderr() {
        let output = CommandOutput {
            code: Some(1),
            stdout: "working...\ndone\n".into(),
            stderr: "warning\nAccess is denied.\n\n".into(),
        };
        assert_eq!(output.headline().as_deref(), Some("Access is denied."));
        assert_eq!(CommandOutput::ok("v1.2\n").headline().as_deref(), Some("v1.2"));
        assert_eq!(CommandOutput::default().headline(), None);
    }

    #[test]
    fn output_combined_chomps_newlines() {
        let output = CommandOutput {
            code: Some(0),
            stdout: "blah\n".into(),
            stderr: "oops\r\n".into(),
        };
        assert_eq!(output.combined(), "stdout: blah\nstderr: oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tokio_shell_captures_output() -> anyhow::Result<()> {
        let output = TokioShell.run(CommandSpec::new("sh", ["-c", "echo hi; exit 3"])).await?;
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "hi\n");

        Ok(())
    }

    #[tokio::test]
    async fn tokio_shell_reports_missing_program() {
        let result = TokioShell
            .run(CommandSpec::new("dotboot-no-such-program", Vec::<String>::new()))
            .await;
        assert!(result.is_err());
    }
}
