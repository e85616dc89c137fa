//! dockmap - Declarative container map orchestration
//!
//! This is the main CLI entry point for dockmap.

use clap::{Parser, Subcommand};
use dockmap::client::{ClientConfig, MapClient, RunReport};
use dockmap::engine::{DockerConfig, DockerEngine};
use dockmap::error::{MapError, Result};
use dockmap::map::{ContainerMap, MapParser, PortBinding};
use dockmap::resolver::{Action, Overrides, Request, Resolver};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// dockmap - declarative container map orchestration
#[derive(Parser)]
#[command(name = "dockmap")]
#[command(version)]
#[command(about = "Create, start, stop and remove groups of related containers", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Map file
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Engine address (unix://, tcp:// or http://); defaults to DOCKER_HOST,
    /// then the local socket
    #[arg(long, global = true)]
    host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Target selection and overrides shared by all actions
#[derive(clap::Args)]
struct TargetArgs {
    /// Container name in the map
    container: String,
    /// Instance to act on; repeat for several, omit for all
    #[arg(short, long)]
    instance: Vec<String>,
    /// Port mapping (host:container). Published ports are applied at create;
    /// `start` fails if the existing container was created without them
    #[arg(short, long)]
    publish: Vec<String>,
    /// Environment variable (KEY=VALUE), applied at create like `--publish`
    #[arg(short, long)]
    env: Vec<String>,
    /// Skip dependencies
    #[arg(long)]
    no_deps: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a container with its dependencies
    Create {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Start a container with its dependencies
    Start {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Stop a container and its dependencies
    Stop {
        #[command(flatten)]
        target: TargetArgs,
        /// Timeout in seconds
        #[arg(short, long, default_value = "10")]
        time: u64,
    },

    /// Remove a container and its dependencies
    #[command(name = "rm", alias = "remove")]
    Remove {
        #[command(flatten)]
        target: TargetArgs,
        /// Force removal
        #[arg(long)]
        force: bool,
    },

    /// Show the operations an action would run
    Plan {
        /// Action (create, start, stop, rm)
        action: Action,
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Validate the map
    Check,
}

impl TargetArgs {
    fn request(&self) -> Result<Request> {
        let mut overrides = Overrides::new();
        for publish in &self.publish {
            overrides = overrides.port(publish.parse::<PortBinding>()?);
        }
        for e in &self.env {
            let (key, value) = e.split_once('=').ok_or_else(|| {
                MapError::InvalidConfig(format!("Invalid environment variable: {}", e))
            })?;
            overrides = overrides.env(key, value);
        }

        let mut request = Request::new(&self.container).overrides(overrides);
        for instance in &self.instance {
            request = request.instance(instance);
        }
        Ok(request)
    }
}

fn load_map(file: Option<PathBuf>) -> Result<ContainerMap> {
    let path = match file {
        Some(path) => path,
        None => std::env::current_dir()
            .ok()
            .and_then(|dir| MapParser::find_map_file(&dir))
            .or_else(MapParser::user_map_file)
            .ok_or_else(|| MapError::InvalidConfig("No map file found".to_string()))?,
    };

    tracing::debug!("Loading map from {}", path.display());
    MapParser::parse_file(&path)
}

fn engine(host: Option<&str>) -> Result<DockerEngine> {
    match host {
        Some(host) => DockerEngine::new(DockerConfig::default().endpoint(host)?),
        None => DockerEngine::local(),
    }
}

fn print_report(report: &RunReport) {
    for entry in &report.entries {
        println!("{:<40} {}", entry.container, entry.outcome);
    }
}

async fn run(
    cli_host: Option<&str>,
    map: ContainerMap,
    action: Action,
    target: &TargetArgs,
    config: ClientConfig,
) -> Result<()> {
    let config = config.with_dependencies(!target.no_deps);
    let client = MapClient::with_config(map, engine(cli_host)?, config);

    match client.run(action, &[target.request()?]).await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            if let Some(report) = e.report() {
                print_report(report);
            }
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let map = load_map(cli.file)?;
    let host = cli.host.as_deref();

    match cli.command {
        Commands::Create { target } => {
            run(host, map, Action::Create, &target, ClientConfig::new()).await?;
        }

        Commands::Start { target } => {
            run(host, map, Action::Start, &target, ClientConfig::new()).await?;
        }

        Commands::Stop { target, time } => {
            let config = ClientConfig::new().with_stop_timeout(Some(Duration::from_secs(time)));
            run(host, map, Action::Stop, &target, config).await?;
        }

        Commands::Remove { target, force } => {
            let config = ClientConfig::new().with_force_remove(force);
            run(host, map, Action::Remove, &target, config).await?;
        }

        Commands::Plan { action, target } => {
            let options = ClientConfig::new()
                .with_dependencies(!target.no_deps)
                .resolve_options();
            let operations =
                Resolver::with_options(&map, options).plan(action, &[target.request()?])?;
            for operation in &operations {
                println!("{}", operation);
            }
        }

        Commands::Check => {
            map.check_integrity()?;
            println!("Map {} is valid", map.name);
        }
    }

    Ok(())
}
