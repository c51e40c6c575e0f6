use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use s3_resolver::{config::RepositoryConfig, utils::init_logger, Repository, S3Repository};

#[derive(Parser, Debug)]
#[command(version, about = "List, fetch and publish artifacts in an S3 repository", long_about = None)]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the entries directly under an address
    List {
        /// e.g. s3://my-bucket/releases/com.example/
        address: String,

        /// Print the entries as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Download an artifact to a local file
    Get {
        address: String,
        destination: PathBuf,
    },
    /// Upload a local file to an address
    Put {
        source: PathBuf,
        address: String,

        /// Request overwriting; the S3_OVERWRITE policy decides
        #[arg(long)]
        overwrite: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let config = RepositoryConfig::from_env()?;
    info!(
        "Using region {} (write policy: {:?})",
        config.connection.region, config.write_policy
    );
    let repository = S3Repository::from_config(&config)?;

    match args.command {
        Command::List { address, json } => {
            let entries = repository.list(&address).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    println!("{entry}");
                }
            }
        }
        Command::Get {
            address,
            destination,
        } => repository.fetch(&address, &destination).await?,
        Command::Put {
            source,
            address,
            overwrite,
        } => repository.store(&source, &address, overwrite).await?,
    }

    Ok(())
}
