/// OnePaaS deployment worker
use std::path::Path;

use clap::{Parser, Subcommand};
use log::{error, info};
use thiserror::Error;

use onepaas_worker::chart::Materializer;
use onepaas_worker::docker;
use onepaas_worker::engine::DockerCli;
use onepaas_worker::git::{Fetcher, GitCli, SourceReference};
use onepaas_worker::helm::Installer;
use onepaas_worker::pipeline::{ActivityOptions, DeployParams, Failure, Pipeline};
use onepaas_worker::storage::LocalStorage;
use onepaas_worker::workspace::Allocator;
use onepaas_worker::{config, Error as ActivityError};

/// Clone, build, publish and release applications onto a OnePaaS cluster.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the worker configuration file.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the whole deployment pipeline for a request.
    Deploy {
        /// Path to the deployment request (TOML, or JSON with a .json suffix).
        #[arg(long)]
        request: String,
    },
    /// Clone the requested reference into a fresh workspace and print its path.
    Clone {
        #[arg(long)]
        request: String,
    },
    /// Build and publish the container image from a cloned repository.
    Build {
        #[arg(long)]
        request: String,
        #[arg(long)]
        repository_path: String,
    },
    /// Materialize the deployment chart into a cloned repository.
    Chart {
        #[arg(long)]
        request: String,
        #[arg(long)]
        repository_path: String,
    },
    /// Upgrade or install the release from a materialized chart.
    Release {
        #[arg(long)]
        request: String,
        #[arg(long)]
        repository_path: String,
    },
}

#[derive(Error, Debug)]
enum WorkerError {
    #[error("configuration file: {0}")]
    Config(#[from] config::Error),

    #[error("read request {path}: {err}")]
    ReadRequest { path: String, err: std::io::Error },

    #[error("parse request: {0}")]
    ParseRequestToml(#[from] toml::de::Error),

    #[error("parse request: {0}")]
    ParseRequestJson(#[from] serde_json::Error),

    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error(transparent)]
    Pipeline(#[from] Failure),
}

/// Read the worker configuration file from disk and fall back to the
/// compiled-in defaults.
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists on disk.
/// If it does, it is used implicitly. If not, the defaults apply.
fn read_config(args: &Cli) -> Result<config::File, WorkerError> {
    const DEFAULT_CONFIG_FILE: &str = "worker.toml";

    let config_file = match &args.config {
        None => {
            if std::fs::metadata(DEFAULT_CONFIG_FILE)
                .map(|metadata| metadata.is_file())
                .unwrap_or(false)
            {
                Some(DEFAULT_CONFIG_FILE.to_string())
            } else {
                None
            }
        }
        Some(path) => Some(path.clone()),
    };

    Ok(match config_file {
        Some(path) => config::File::load(&path)?,
        None => config::File::default(),
    })
}

/// A deployment request file. The substrate hands parameters over as JSON;
/// hand-written requests are easier in TOML. Both are accepted.
fn read_request(path: &str) -> Result<DeployParams, WorkerError> {
    let raw = std::fs::read_to_string(path).map_err(|err| WorkerError::ReadRequest {
        path: path.to_string(),
        err,
    })?;

    if path.ends_with(".json") {
        Ok(serde_json::from_str(&raw)?)
    } else {
        Ok(toml::from_str(&raw)?)
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

async fn run() -> Result<(), WorkerError> {
    env_logger::init();

    let args = Cli::parse();
    let cfg = read_config(&args)?;

    let storage = LocalStorage::new(&cfg.projects.base_dir);
    let transport = GitCli;
    let engine = DockerCli;
    let installer = Installer::new(
        cfg.helm.image.clone(),
        cfg.helm.dependency_repository_name.clone(),
        cfg.helm.dependency_repository_url.clone(),
    );
    let options = ActivityOptions::from(&cfg.timeouts);

    match &args.command {
        Commands::Deploy { request } => {
            let params = read_request(request)?;
            let pipeline = Pipeline::new(
                &storage,
                &transport,
                &engine,
                Materializer::embedded(),
                installer,
                options,
            );
            let outcome = pipeline.deploy(&params).await?;
            info!(
                "deployed {} as {}",
                params.application_slug, outcome.image_address
            );
            println!("{}", outcome.repository_path.display());
            Ok(())
        }
        Commands::Clone { request } => {
            let params = read_request(request)?;
            let reference = SourceReference::resolve(
                &params.repository_branch,
                &params.repository_tag,
                &params.repository_ref,
            )
            .map_err(ActivityError::from)?;
            let workspace = Allocator::new(&storage)
                .allocate()
                .map_err(ActivityError::from)?;
            let outcome = Fetcher::new(&storage, &transport)
                .fetch(&params.repository_url, &reference, &workspace)
                .await
                .map_err(ActivityError::from)?;
            println!("{}", outcome.repository_path.display());
            Ok(())
        }
        Commands::Build {
            request,
            repository_path,
        } => {
            let params = read_request(request)?;
            let build = params.build_params(repository_path.into());
            docker::build_and_publish(&engine, &build)
                .await
                .map_err(ActivityError::from)?;
            println!("{}", build.publish_address());
            Ok(())
        }
        Commands::Chart {
            request,
            repository_path,
        } => {
            let params = read_request(request)?;
            Materializer::embedded()
                .materialize(Path::new(repository_path), &params.chart_values())
                .map_err(ActivityError::from)?;
            Ok(())
        }
        Commands::Release {
            request,
            repository_path,
        } => {
            let params = read_request(request)?;
            installer
                .upgrade_install(&engine, &params.upgrade_install_params(repository_path.into()))
                .await
                .map_err(ActivityError::from)?;
            Ok(())
        }
    }
}
