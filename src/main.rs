use clap::{ArgAction, Parser};
use dotfiles::apply::variables::parse_extra_var;
use dotfiles::bootstrap::{Bootstrap, BootstrapState, RunnerOptions};
use dotfiles::config::load_bootstrap_config;
use dotfiles::error::ConvergeError;
use dotfiles::facts::Identity;
use dotfiles::process::SystemRunner;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "dotfiles")]
#[command(
    about = "Bootstrap this machine and converge it to the roles in the dotfiles repository",
    override_usage = "dotfiles [-u <user>] [-t <tag>] [-c <path>] [runner options]..."
)]
#[command(version)]
struct Cli {
    /// User whose home is configured (default: invoking user)
    #[arg(short, long, value_name = "user")]
    user: Option<String>,

    /// Run only the role or tag given
    #[arg(short, long, value_name = "tag")]
    tags: Option<String>,

    /// Bootstrap configuration file (default: /etc/dotfiles/config.* or ~/.config/dotfiles/config.*)
    #[arg(short, long, value_name = "path")]
    config: Option<PathBuf>,

    /// Passed to the role runner: -C/--check, --skip-tags <tag>, -e/--extra-vars key=value, -v
    #[arg(
        value_name = "runner options",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    runner_args: Vec<String>,
}

/// Options understood by the role runner
#[derive(Debug, Parser)]
#[command(name = "dotfiles", no_binary_name = true)]
struct RunnerArgs {
    /// Report changes without applying them
    #[arg(short = 'C', long)]
    check: bool,

    /// Skip roles and tasks with these tags
    #[arg(long, value_name = "tag", value_delimiter = ',')]
    skip_tags: Vec<String>,

    /// Extra variables with the highest precedence
    #[arg(short = 'e', long, value_name = "key=value")]
    extra_vars: Vec<String>,

    /// Increase log verbosity
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
}

impl RunnerArgs {
    fn into_options(self) -> Result<RunnerOptions, ConvergeError> {
        let extra_vars = self
            .extra_vars
            .iter()
            .map(|pair| parse_extra_var(pair))
            .collect::<anyhow::Result<HashMap<_, _>>>()
            .map_err(ConvergeError::Config)?;

        Ok(RunnerOptions {
            check: self.check,
            skip_tags: self.skip_tags,
            extra_vars,
            verbose: self.verbose,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::try_parse().unwrap_or_else(|e| exit_with_usage(e));
    let runner_args =
        RunnerArgs::try_parse_from(&cli.runner_args).unwrap_or_else(|e| exit_with_usage(e));

    init_tracing(runner_args.verbose);

    if let Err(e) = run(cli, runner_args).await {
        error!("{}", e);
        exit(1);
    }

    exit(0)
}

fn exit_with_usage(e: clap::Error) -> ! {
    let code = if e.use_stderr() { 1 } else { 0 };
    let _ = e.print();
    exit(code)
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let layer = fmt::layer().compact().with_target(false).without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(layer).with(filter).init();
}

async fn run(cli: Cli, runner_args: RunnerArgs) -> Result<(), ConvergeError> {
    let options = runner_args.into_options()?;

    let identity = match &cli.user {
        Some(name) => Identity::lookup(name),
        None => Identity::current(),
    }
    .map_err(ConvergeError::Config)?;

    let config = load_bootstrap_config(cli.config.as_deref()).map_err(ConvergeError::Config)?;

    let runner = SystemRunner;
    let bootstrap = Bootstrap::new(config, identity, &runner);

    let outcome = match bootstrap.run(cli.tags, &options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if bootstrap.log_path().exists() {
                error!(
                    "Output of the last command is in {}",
                    bootstrap.log_path().display()
                );
            }
            return Err(e);
        }
    };

    match outcome.state {
        BootstrapState::AuthenticationFailed => {
            warn!("Sign in to the secrets manager and run dotfiles again");
        }
        _ => {
            if let Some(report) = outcome.report {
                info!("Done: {}", report);
            }
            if outcome.first_run {
                println!("Setup complete. Reboot required for all changes to take effect.");
            }
        }
    }

    Ok(())
}
