use anyhow::Result;
use clap::Parser;
use gopm::commands::{self, CreateOptions};
use gopm::package::DEFAULT_ROOT;
use gopm::sync::SyncError;
use std::path::PathBuf;
use std::process::ExitCode;

/// gopm - package manager over a shared remote repository
///
/// Builds packages from a manifest and publishes them to a remote repository
/// reached over ssh (or a locally mounted directory), and installs the
/// dependency closure of a set of requested packages from it.
///
/// Connection settings (GOPM_SSH_MODE, GOPM_SSH_LOGIN, GOPM_SSH_HOST, ...)
/// are read from the environment or from an .env file.
///
/// Examples:
///   gopm create package.yaml        # Build and publish a package
///   gopm update packages.json       # Install the requested packages locally
#[derive(Parser, Debug)]
#[command(author, version = env!("GOPM_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// File with connection settings (defaults to ./.env, then ../.env)
    #[arg(long = "env", short = 'e', value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    /// Local package repository (also via GOPM_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "GOPM_ROOT",
        value_name = "PATH",
        default_value = DEFAULT_ROOT,
        global = true
    )]
    pub root: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build a package locally and publish it to the remote repository
    Create(CreateArgs),

    /// Fetch the requested packages and their dependencies from the remote repository
    Update(UpdateArgs),
}

#[derive(clap::Args, Debug)]
pub struct CreateArgs {
    /// Package manifest (.json, .yaml or .yml)
    #[arg(value_name = "MANIFEST")]
    pub manifest: PathBuf,

    /// Overwrite an existing local version directory without asking
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Replace the version if it is already published remotely
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub struct UpdateArgs {
    /// Update manifest listing the requested packages (.json, .yaml or .yml)
    #[arg(value_name = "MANIFEST")]
    pub manifest: PathBuf,
}

async fn run(cli: Cli) -> Result<()> {
    let runtime = gopm::runtime::RealRuntime;
    let env_file = cli.env_file.as_deref();

    match cli.command {
        Commands::Create(args) => {
            let options = CreateOptions {
                yes: args.yes,
                force: args.force,
            };
            commands::create(runtime, &args.manifest, cli.root, env_file, options).await
        }
        Commands::Update(args) => {
            commands::update(runtime, &args.manifest, cli.root, env_file).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if matches!(e.downcast_ref::<SyncError>(), Some(SyncError::Cancelled(_))) {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
