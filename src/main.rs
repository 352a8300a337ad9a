use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use deplineage::analyze::AnalyzeOptions;
use deplineage::apply::ApplyRequest;
use deplineage::commands::{self, OutputFormat, Overrides};
use deplineage::ecosystem::Ecosystem;

/// deplineage - dependency lineage analysis and safe upgrades
///
/// Reconstructs a project's dependency tree from its lockfile, flags ancient,
/// deprecated and fork-suspect packages, and applies single upgrades or
/// replacements behind a checkpoint that is rolled back on failure.
///
/// Examples:
///   deplineage analyze --format markdown
///   deplineage apply upgrade lodash --dry-run
///   deplineage rollback
#[derive(Parser, Debug)]
#[command(author, version = env!("DEPLINEAGE_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <PATH>/.deplineage.json)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// npm registry base URL
    #[arg(long, env = "DEPLINEAGE_NPM_REGISTRY", value_name = "URL", global = true)]
    npm_registry: Option<String>,

    /// PyPI base URL
    #[arg(long, env = "DEPLINEAGE_PYPI_URL", value_name = "URL", global = true)]
    pypi_url: Option<String>,

    /// Go module proxy base URL
    #[arg(long, env = "DEPLINEAGE_GOPROXY", value_name = "URL", global = true)]
    goproxy: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Analyze the dependency tree and report risky packages
    Analyze(AnalyzeArgs),

    /// Snapshot manifest and lockfile files
    Checkpoint(CheckpointArgs),

    /// List checkpoints, oldest first
    Checkpoints(PathArgs),

    /// Restore the latest checkpoint
    Rollback(RollbackArgs),

    /// Upgrade or replace one dependency
    #[command(subcommand)]
    Apply(ApplyCommand),
}

#[derive(clap::Args, Debug)]
struct PathArgs {
    /// Project directory
    #[arg(value_name = "PATH", default_value = ".")]
    path: PathBuf,
}

#[derive(clap::Args, Debug)]
struct AnalyzeArgs {
    #[command(flatten)]
    project: PathArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Skip registry lookups; age signals become "unknown"
    #[arg(long)]
    no_registry: bool,

    /// Analyze this ecosystem instead of auto-detecting (npm, pip, go)
    #[arg(long)]
    ecosystem: Option<Ecosystem>,

    /// Months without a publish before a package counts as ancient
    #[arg(long, value_name = "N")]
    ancient_months: Option<u32>,
}

#[derive(clap::Args, Debug)]
struct CheckpointArgs {
    #[command(flatten)]
    project: PathArgs,

    #[arg(long, default_value = "manual")]
    reason: String,
}

#[derive(clap::Args, Debug)]
struct RollbackArgs {
    #[command(flatten)]
    project: PathArgs,

    /// Only list what would be restored
    #[arg(long)]
    dry_run: bool,
}

#[derive(clap::Args, Debug)]
struct ApplyOptions {
    /// Target version (defaults to the registry's latest)
    #[arg(long)]
    version: Option<String>,

    /// Report the planned change without touching any file
    #[arg(long)]
    dry_run: bool,

    /// Skip the approval gate
    #[arg(long, short = 'y')]
    yes: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ApplyCommand {
    /// Move a dependency to a new version
    Upgrade {
        #[arg(value_name = "PKG")]
        package: String,

        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        options: ApplyOptions,
    },

    /// Swap a dependency for another package
    Replace {
        #[arg(value_name = "OLD")]
        package: String,

        #[arg(value_name = "NEW")]
        new_package: String,

        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        options: ApplyOptions,
    },
}

impl ApplyCommand {
    fn into_request(self) -> (PathBuf, ApplyRequest) {
        let (path, base, options) = match self {
            ApplyCommand::Upgrade {
                package,
                path,
                options,
            } => (path, ApplyRequest::upgrade(&package), options),
            ApplyCommand::Replace {
                package,
                new_package,
                path,
                options,
            } => (path, ApplyRequest::replace(&package, &new_package), options),
        };
        let request = ApplyRequest {
            version: options.version,
            dry_run: options.dry_run,
            skip_approval: options.yes,
            ..base
        };
        (path, request)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = deplineage::runtime::RealRuntime;

    let mut overrides = Overrides {
        config_path: cli.config,
        npm_registry: cli.npm_registry,
        pypi_url: cli.pypi_url,
        go_proxy: cli.goproxy,
        ancient_months: None,
    };

    let ok = match cli.command {
        Commands::Analyze(args) => {
            overrides.ancient_months = args.ancient_months;
            let options = AnalyzeOptions {
                ecosystem: args.ecosystem,
                skip_registry: args.no_registry,
            };
            commands::analyze(&runtime, &args.project.path, &overrides, &options, args.format).await?
        }
        Commands::Checkpoint(args) => commands::checkpoint(&runtime, &args.project.path, &args.reason)?,
        Commands::Checkpoints(args) => commands::checkpoints(&runtime, &args.path)?,
        Commands::Rollback(args) => commands::rollback(&runtime, &args.project.path, args.dry_run)?,
        Commands::Apply(command) => {
            let (path, request) = command.into_request();
            commands::apply(&runtime, &path, &overrides, &request).await?
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
