//! blockrepo CLI - Command line interface for a blockrepo repository
//!
//! Every command opens the repository, does its work and closes it again.
//! Results go to stdout as JSON; logs go to stderr (`RUST_LOG` filters them).

use blockrepo::{CancelToken, DiskSpec, ImportResult, Repo, RepoConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockrepo")]
#[command(about = "A content-addressed, deduplicating block repository")]
#[command(version)]
struct Cli {
    /// Path to the repository directory
    #[arg(short, long, default_value = ".blockrepo")]
    repo: PathBuf,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Datastore backend used when the repository is created
    #[arg(short, long, default_value = "flatfs")]
    backend: Backend,

    /// Compress log datastore records with zstd
    #[arg(long)]
    compress: bool,

    /// Capacity budget in bytes
    #[arg(long)]
    max_storage: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum Backend {
    Flatfs,
    Log,
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new repository
    Init,

    /// Import a file or directory
    Import {
        /// File or directory to import
        path: PathBuf,
        /// Chunk size in bytes
        #[arg(short, long)]
        chunk_size: Option<usize>,
    },

    /// Export a root address to a file or directory
    Export {
        /// Root address (hex)
        root: String,
        /// Destination path
        dest: PathBuf,
    },

    /// Check whether all given blocks are present
    Has {
        /// Block addresses (hex)
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Delete blocks
    Rm {
        /// Block addresses (hex)
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Delete every block
    RmAll,

    /// List stored blocks
    Blocks,

    /// Show storage usage
    Usage,

    /// Show repository status
    Status,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let repo = open_repo(&cli)?;
    let cancel = CancelToken::new();

    match &cli.command {
        Commands::Init => {
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Initialized repository at {}", repo.root().display()),
                    "datastore": serde_json::to_value(repo.disk_spec())?
                }),
            )?;
        }

        Commands::Import { path, chunk_size } => {
            if repo.usage().is_full() {
                tracing::warn!(
                    usage = %repo.usage().usage_human(),
                    max = %repo.usage().max_capacity_human(),
                    "repository is over its usage threshold"
                );
            }
            let result = match chunk_size {
                Some(size) => repo.import_with_chunk_size(path, *size, &cancel)?,
                None => repo.import(path, &cancel)?,
            };
            output(cli.format, &import_json(&result))?;
        }

        Commands::Export { root, dest } => {
            repo.export(root, dest, &cancel)?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "root": root,
                    "dest": dest.display().to_string()
                }),
            )?;
        }

        Commands::Has { addresses } => {
            output(
                cli.format,
                &serde_json::json!({
                    "present": repo.has_blocks(addresses.as_slice(), &cancel)
                }),
            )?;
        }

        Commands::Rm { addresses } => {
            repo.delete_blocks(addresses.as_slice(), &cancel)?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "deleted": addresses.len()
                }),
            )?;
        }

        Commands::RmAll => {
            repo.delete_all_blocks(&cancel)?;
            output(cli.format, &serde_json::json!({ "status": "ok" }))?;
        }

        Commands::Blocks => {
            let mut addresses: Vec<String> =
                repo.blocks().keys()?.iter().map(|a| a.to_hex()).collect();
            addresses.sort();
            output(
                cli.format,
                &serde_json::json!({
                    "count": addresses.len(),
                    "blocks": addresses
                }),
            )?;
        }

        Commands::Usage => {
            let usage = repo.usage();
            usage.refresh()?;
            output(
                cli.format,
                &serde_json::json!({
                    "usage": usage.usage(),
                    "usage_human": usage.usage_human(),
                    "max_capacity": usage.max_capacity(),
                    "max_capacity_human": usage.max_capacity_human(),
                    "percent": usage.usage_percentage(),
                    "threshold": usage.threshold(),
                    "full": usage.is_full()
                }),
            )?;
        }

        Commands::Status => {
            output(
                cli.format,
                &serde_json::json!({
                    "repo": repo.root().display().to_string(),
                    "backend": repo.disk_spec().type_name(),
                    "uuid": repo.uuid(),
                    "blocks": repo.blocks().len()?,
                    "usage_human": repo.usage().usage_human(),
                    "max_storage": repo.max_storage()
                }),
            )?;
        }
    }

    repo.close()?;
    Ok(())
}

fn open_repo(cli: &Cli) -> anyhow::Result<Repo> {
    let mut config = RepoConfig::from_env()?;
    config.disk_spec = match cli.backend {
        Backend::Flatfs => DiskSpec::flatfs(true),
        Backend::Log => DiskSpec::log(cli.compress),
        Backend::Memory => DiskSpec::memory(),
    };
    if let Some(max_storage) = cli.max_storage {
        config.max_storage = max_storage;
    }
    Ok(Repo::open(&cli.repo, config)?)
}

fn import_json(result: &ImportResult) -> serde_json::Value {
    let blocks: Vec<String> = result.block_addresses.iter().map(|a| a.to_hex()).collect();
    serde_json::json!({
        "root": result.root_address.to_hex(),
        "file_name": result.file_name,
        "size_bytes": result.size_bytes,
        "human_size": result.human_size,
        "chunk_size": result.chunk_size_label,
        "blocks": blocks
    })
}

fn output(format: OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
