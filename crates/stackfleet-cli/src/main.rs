//! Stackfleet - multi-region stack deployments
//!
//! Usage:
//!   stackfleet init --region eu-west-1     # Create the bootstrap stack
//!   stackfleet deploy                      # Deploy every manifest stack
//!   stackfleet deploy stack --name api --region eu-west-1
//!   stackfleet diff                        # Write the changeset document
//!   stackfleet delete                      # Remove every manifest stack

mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stackfleet_aws::AwsBackend;
use stackfleet_core::config::{ConfigStore, Settings};
use stackfleet_core::init::init_region;
use stackfleet_core::manifest::{self, Manifest};
use stackfleet_core::run::{DiffDocument, Orchestrator, RunOptions};
use stackfleet_core::values::ValuesStore;

#[derive(Parser)]
#[command(name = "stackfleet")]
#[command(about = "Multi-region stack deployments", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Manifest file (.json or .toml)
    #[arg(short, long, global = true, default_value = "stacks.json")]
    manifest: PathBuf,

    /// Values file (default: values file from the config, next to the manifest)
    #[arg(long, global = true)]
    values: Option<PathBuf>,

    /// Credentials profile
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Service role assumed for stack operations
    #[arg(long, global = true)]
    role: Option<String>,

    /// Concurrent stack workers per region
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Config file (default: <config dir>/stackfleet/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the bootstrap stack of a region
    Init {
        /// Region to bootstrap
        #[arg(long)]
        region: String,
    },

    /// Deploy the manifest, or a single stack of it
    Deploy {
        #[command(subcommand)]
        target: Option<StackTarget>,
    },

    /// Compute changesets for every stack without applying them
    Diff {
        /// Where to write the diff document
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete every manifest stack, or a single one
    #[command(alias = "rm")]
    Delete {
        #[command(subcommand)]
        target: Option<StackTarget>,
    },
}

#[derive(Subcommand)]
enum StackTarget {
    /// Operate on one stack of the manifest
    Stack {
        /// Stack name as written in the manifest
        #[arg(long)]
        name: String,
        /// Region the stack belongs to
        #[arg(long)]
        region: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stackfleet=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli.global)?;
    run_cli(cli.command, &cli.global, &settings)
}

fn load_settings(args: &GlobalArgs) -> Result<Settings> {
    let store = match &args.config {
        Some(path) => ConfigStore::from_path(path.clone()),
        None => ConfigStore::from_default_dir()?,
    };
    let mut settings = store.load()?;

    if let Some(profile) = &args.profile {
        settings.profile = Some(profile.clone());
    }
    if let Some(role) = &args.role {
        settings.role = Some(role.clone());
    }
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    settings
        .validate()
        .with_context(|| format!("Invalid configuration in {}", store.config_path().display()))?;
    Ok(settings)
}

fn run_cli(command: Commands, args: &GlobalArgs, settings: &Settings) -> Result<()> {
    let backend = AwsBackend::new(settings.profile.clone())?;

    match command {
        Commands::Init { region } => run_init(&backend, &region, settings),
        Commands::Deploy { target } => {
            let workspace = Workspace::load(args, settings)?;
            let orchestrator = workspace.orchestrator(&backend, settings);
            match target {
                Some(StackTarget::Stack { name, region }) => {
                    let outcome = orchestrator.deploy_stack(
                        &workspace.manifest,
                        &args.manifest,
                        &region,
                        &name,
                    )?;
                    output::print_stack(&region, &name, &outcome);
                    Ok(())
                }
                None => {
                    let report = orchestrator.deploy(&workspace.manifest);
                    output::print_report(&report);
                    report.into_result()?;
                    Ok(())
                }
            }
        }
        Commands::Diff { output: path } => {
            let workspace = Workspace::load(args, settings)?;
            let orchestrator = workspace.orchestrator(&backend, settings);
            let report = orchestrator.diff(&workspace.manifest);

            let document = DiffDocument::from_report(&workspace.manifest, &report);
            let path = path.unwrap_or_else(|| settings.diff_output.clone());
            document.write(&path)?;
            output::print_diff(&document);
            report.into_result()?;
            Ok(())
        }
        Commands::Delete { target } => {
            let workspace = Workspace::load(args, settings)?;
            let orchestrator = workspace.orchestrator(&backend, settings);
            match target {
                Some(StackTarget::Stack { name, region }) => {
                    let outcome = orchestrator.delete_stack(
                        &workspace.manifest,
                        &args.manifest,
                        &region,
                        &name,
                    )?;
                    output::print_stack(&region, &name, &outcome);
                    Ok(())
                }
                None => {
                    let report = orchestrator.teardown(&workspace.manifest);
                    output::print_report(&report);
                    report.into_result()?;
                    Ok(())
                }
            }
        }
    }
}

fn run_init(backend: &AwsBackend, region: &str, settings: &Settings) -> Result<()> {
    let outcome = init_region(
        backend,
        region,
        &settings.bootstrap_stack,
        settings.polling.cadence(),
    )?;
    output::print_stack(region, &settings.bootstrap_stack, &outcome);
    Ok(())
}

/// Manifest, values and the directory templates resolve against.
struct Workspace {
    manifest: Manifest,
    values: ValuesStore,
    root: PathBuf,
}

impl Workspace {
    fn load(args: &GlobalArgs, settings: &Settings) -> Result<Self> {
        let manifest = manifest::load(&args.manifest)?;
        let root = manifest_dir(&args.manifest);
        let values_path = args
            .values
            .clone()
            .unwrap_or_else(|| root.join(&settings.values_file));
        let values = ValuesStore::load(&values_path)?;
        Ok(Self {
            manifest,
            values,
            root,
        })
    }

    fn orchestrator<'a>(
        &'a self,
        backend: &'a AwsBackend,
        settings: &Settings,
    ) -> Orchestrator<'a> {
        let mut options = RunOptions::new(self.root.clone());
        options.workers = settings.workers;
        options.role_arn = settings.role.clone();
        options.cadence = settings.polling.cadence();
        options.bootstrap_stack = settings.bootstrap_stack.clone();
        tracing::debug!("Run UID: {}", options.run_uid);
        Orchestrator::new(backend, &self.values, options)
    }
}

fn manifest_dir(manifest: &Path) -> PathBuf {
    match manifest.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
