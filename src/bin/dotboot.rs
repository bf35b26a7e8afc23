// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotboot::{
    config::{ComponentDefinition, Config, PostInstall, ProviderDefinition},
    failure::{advisor::Advisor, FailureLog, DEFAULT_WINDOW_DAYS},
    host::{check_prerequisites, is_privileged},
    path::{default_failure_log_path, default_registry_path},
    provider::{
        shell::{syscall_interactive, Shell, TokioShell},
        Dispatcher, Operation,
    },
    registry::Registry,
    report::{render_failures, render_summary, IndicatifProgress},
    runner::{RunConfig, Runner},
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use inquire::Confirm;
use std::{
    fs::{read_to_string, write},
    io::IsTerminal,
    path::PathBuf,
    process::exit,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dotboot [options] <install|validate|update> [run-options]\n  dotboot [options] <failures|init>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to component registry file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Never prompt, answering "no" to every question.
    #[arg(short, long, global = true)]
    pub non_interactive: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<bool> {
        let interactive = !self.non_interactive && std::io::stdin().is_terminal();
        let session = Session {
            config: self.config,
            interactive,
        };

        match self.command {
            Command::Install(opts) => run_operation(session, Operation::Install, opts).await,
            Command::Validate(opts) => run_operation(session, Operation::Validate, opts).await,
            Command::Update(opts) => run_operation(session, Operation::Update, opts).await,
            Command::Failures(opts) => run_failures(session, opts),
            Command::Init(opts) => run_init(session, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Install every missing component.
    #[command(override_usage = "dotboot install [options]")]
    Install(RunOptions),

    /// Check that every component is in place, changing nothing.
    #[command(override_usage = "dotboot validate [options]")]
    Validate(RunOptions),

    /// Update every component.
    #[command(override_usage = "dotboot update [options]")]
    Update(RunOptions),

    /// Show or clear recent failures.
    #[command(override_usage = "dotboot failures [options]")]
    Failures(FailuresOptions),

    /// Write a starter component registry.
    #[command(override_usage = "dotboot init [options]")]
    Init(InitOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RunOptions {
    /// Do not attempt optional components.
    #[arg(short, long)]
    pub skip_optional: bool,

    /// Preferred flavor for components that offer variants.
    #[arg(short, long, value_name = "name")]
    pub variant: Option<String>,

    /// Show recent failures instead of running.
    #[arg(long, group = "log")]
    pub show_failure_details: bool,

    /// Clear failure log instead of running.
    #[arg(long, group = "log")]
    pub clear_failure_log: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct FailuresOptions {
    /// Truncate failure log to empty.
    #[arg(long)]
    pub clear: bool,

    /// Only show failures newer than this many days.
    #[arg(short, long, value_name = "days", default_value_t = DEFAULT_WINDOW_DAYS)]
    pub window_days: u32,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Overwrite existing registry file.
    #[arg(short, long)]
    pub force: bool,
}

/// Options shared by every command.
struct Session {
    config: Option<PathBuf>,
    interactive: bool,
}

impl Session {
    fn registry_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(default_registry_path()?),
        }
    }

    fn load(&self) -> Result<Config> {
        let path = self.registry_path()?;
        let data = read_to_string(&path)
            .with_context(|| format!("failed to read registry {:?}, run `dotboot init`", path.display()))?;
        data.parse::<Config>()
            .with_context(|| format!("invalid registry {:?}", path.display()))
    }

    fn failure_log(&self, config: Option<&Config>) -> Result<FailureLog> {
        let path = match config.and_then(|config| config.settings.failure_log.clone()) {
            Some(path) => path,
            None => default_failure_log_path()?,
        };

        Ok(FailureLog::new(path))
    }

    /// Locate failure log without requiring a usable registry.
    ///
    /// A missing or broken registry falls back to the default log location.
    fn open_failure_log(&self) -> Result<FailureLog> {
        let config = match self.load() {
            Ok(config) => Some(config),
            Err(error) => {
                warn!("{error:#}, using default failure log");
                None
            }
        };
        self.failure_log(config.as_ref())
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run().await {
        Ok(true) => exit(0),
        Ok(false) => exit(1),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

async fn run() -> Result<bool> {
    Cli::parse().run().await
}

async fn run_operation(session: Session, operation: Operation, opts: RunOptions) -> Result<bool> {
    if opts.show_failure_details || opts.clear_failure_log {
        let opts = FailuresOptions {
            clear: opts.clear_failure_log,
            window_days: DEFAULT_WINDOW_DAYS,
        };
        return run_failures(session, opts);
    }

    let config = session.load()?;
    let log = session.failure_log(Some(&config))?;

    let registry = Registry::from_config(&config)?;
    let shell: Arc<dyn Shell> = Arc::new(TokioShell);
    check_prerequisites(shell.as_ref(), &config.settings, &registry).await?;

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing current component first");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let privileged = is_privileged();
    let dispatcher = Dispatcher::new(shell, config.settings.clone()).interactive(session.interactive);
    let run_config = RunConfig {
        skip_optional: opts.skip_optional,
        preferred_variant: opts.variant,
    };

    let mut recorder = log;
    let summary = Runner::new(&dispatcher, &mut recorder)
        .with_progress(IndicatifProgress::new())
        .with_interrupt(interrupt)
        .privileged(privileged)
        .run(operation, &registry, &run_config)
        .await?;

    let advisor = Advisor::new().with_hints(registry.hints());
    print!("{}", render_summary(&summary, &advisor, privileged));

    if operation == Operation::Install && summary.is_success() {
        offer_reload(&config.settings.post_install, session.interactive);
    }

    Ok(summary.is_success())
}

fn run_failures(session: Session, opts: FailuresOptions) -> Result<bool> {
    // INVARIANT: A missing or broken registry must not hide the failure log.
    let log = session.open_failure_log()?;

    if opts.clear {
        log.clear()?;
        info!("cleared failure log {:?}", log.path().display());
        return Ok(true);
    }

    print!("{}", render_failures(&log.grouped(opts.window_days)?, opts.window_days));
    Ok(true)
}

fn run_init(session: Session, opts: InitOptions) -> Result<bool> {
    let path = session.registry_path()?;
    if path.exists() && !opts.force {
        return Err(anyhow!("registry {:?} already exists, pass --force to overwrite", path.display()));
    }

    let starter = Config {
        components: vec![ComponentDefinition {
            name: "git".into(),
            optional: false,
            depends_on: Vec::new(),
            variants: Vec::new(),
            default_variant: None,
            hint: None,
            provider: ProviderDefinition::NativePackage {
                package_id: "Git.Git".into(),
            },
        }],
        ..Default::default()
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        mkdirp::mkdirp(parent)?;
    }
    write(&path, starter.to_string())?;
    info!("wrote starter registry to {:?}", path.display());

    Ok(true)
}

/// Offer to start a fresh shell with the new profile loaded.
///
/// Unattended runs never reload.
fn offer_reload(post_install: &PostInstall, interactive: bool) {
    let Some((program, args)) = post_install
        .reload_command
        .as_deref()
        .and_then(|argv| argv.split_first())
    else {
        return;
    };

    if !interactive {
        info!("skip shell reload in non-interactive mode");
        return;
    }

    match Confirm::new("Reload shell now?").with_default(false).prompt() {
        Ok(true) => {
            if let Err(error) = syscall_interactive(program, args) {
                warn!("shell reload failed: {error}");
            }
        }
        Ok(false) => info!("reload skipped, open a new shell to pick up changes"),
        Err(error) => warn!("reload prompt failed: {error}"),
    }
}
