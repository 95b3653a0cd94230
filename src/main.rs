use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hades::error::HadesError;
use hades::executor::Executor;
use hades::inventory::Inventory;
use hades::ssh::{HostKeyPolicy, SshClient};
use hades::{envmap, loader, scaffold, schema};

#[derive(Parser)]
#[command(name = "hades")]
#[command(version, about = "Explicit, predictable change execution for server fleets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan
    Run {
        /// Name of the plan to execute
        plan: String,

        /// Directory scanned recursively for *.hades.yml files
        #[arg(short, long, default_value = ".")]
        config_dir: PathBuf,

        /// Restrict execution to these target groups
        #[arg(short, long)]
        target: Vec<String>,

        /// Environment variables (KEY=VALUE)
        #[arg(short, long)]
        env: Vec<String>,

        /// Describe what would be executed without running anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Initialize a project with example configuration files
    Init,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::new("info")
    } else {
        tracing_subscriber::EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let code = match cli.command {
        Commands::Run {
            plan,
            config_dir,
            target,
            env,
            dry_run,
        } => cmd_run(&plan, &config_dir, &target, &env, dry_run),
        Commands::Init => match scaffold::run() {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("{} {err:#}", "Error:".red());
                1
            }
        },
    };

    std::process::exit(code);
}

fn cmd_run(
    plan: &str,
    config_dir: &PathBuf,
    targets: &[String],
    env: &[String],
    dry_run: bool,
) -> i32 {
    let runtime = tokio::runtime::Runtime::new().expect("building tokio runtime");
    match runtime.block_on(run_plan(plan, config_dir, targets, env, dry_run)) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(err) => {
            eprintln!("{} {err}", "Error:".red());
            if err.is_load_error() {
                2
            } else {
                1
            }
        }
    }
}

/// Load, validate, and execute. `Ok(true)` means the plan succeeded.
async fn run_plan(
    plan_name: &str,
    config_dir: &PathBuf,
    targets: &[String],
    env_args: &[String],
    dry_run: bool,
) -> hades::Result<bool> {
    let file = loader::load_directory(config_dir)?;
    schema::validate(&file)?;

    if !file.plans.contains_key(plan_name) {
        return Err(HadesError::config(format!("plan {plan_name:?} not found")));
    }

    let inventory = Inventory::from_config(&file)?;

    let cli_env = parse_env_args(env_args)?;
    envmap::reject_reserved(cli_env.keys())?;
    let cli_env = envmap::expand_from_process(cli_env)?;

    info!("loaded {} jobs, {} plans", file.jobs.len(), file.plans.len());

    let ssh = Arc::new(SshClient::new(HostKeyPolicy::default()));
    let executor = Executor::new(ssh);

    if dry_run {
        executor
            .dry_run(&file, plan_name, &inventory, targets, &cli_env)
            .await?;
        return Ok(true);
    }

    // Operator interrupt cancels in-flight batches; running remote
    // commands may still complete.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let report = executor
        .execute_plan(&cancel, &file, plan_name, &inventory, targets, &cli_env)
        .await?;

    if let Err(err) = executor.shutdown().await {
        warn!("closing connections: {err}");
    }

    Ok(!report.failed())
}

fn parse_env_args(env_args: &[String]) -> hades::Result<HashMap<String, String>> {
    let mut env = HashMap::with_capacity(env_args.len());
    for arg in env_args {
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                env.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(HadesError::config(format!(
                    "invalid environment variable {arg:?} (expected KEY=VALUE)"
                )))
            }
        }
    }
    Ok(env)
}
