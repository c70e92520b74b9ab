//! opsctl - operator CLI for the opsgate workload operations gateway
//!
//! Scales, restarts, updates and rolls back deployments, and reads inventory
//! and aggregated metrics through the gateway's HTTP API.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use colored::Colorize;
use commands::{inventory, metrics, workload};

/// opsgate operator CLI
#[derive(Parser, Debug)]
#[command(name = "opsctl")]
#[command(author, version, about = "Operator CLI for the opsgate workload gateway", long_about = None)]
pub struct Cli {
    /// Gateway URL (falls back to the config file, then http://localhost:8000)
    #[arg(long, env = "OPSCTL_API_URL", global = true)]
    pub api_url: Option<String>,

    /// API key sent as a bearer token
    #[arg(long, env = "OPSCTL_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Target namespace (falls back to the config file, then "default")
    #[arg(long, short, global = true)]
    pub namespace: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the gateway answers and the key is accepted
    Ping,

    /// Set the replica count of a deployment
    Scale {
        /// Deployment name
        name: String,

        /// Desired replica count
        #[arg(long, short)]
        replicas: i32,
    },

    /// Trigger a rolling restart
    Restart {
        /// Deployment name
        name: String,
    },

    /// Change container images, by full reference or by tag
    #[command(group(ArgGroup::new("change").required(true).args(["image", "version"])))]
    Update {
        /// Deployment name
        name: String,

        /// Full image reference applied to every container
        #[arg(long)]
        image: Option<String>,

        /// Tag applied to every container's image
        #[arg(long)]
        version: Option<String>,
    },

    /// Roll back to an earlier revision (the previous one by default)
    #[command(group(ArgGroup::new("selector").multiple(false).args(["revision", "image", "version"])))]
    Rollback {
        /// Deployment name
        name: String,

        /// Revision id or number
        #[arg(long)]
        revision: Option<String>,

        /// Exact image the target revision ran
        #[arg(long)]
        image: Option<String>,

        /// Image tag the target revision ran
        #[arg(long)]
        version: Option<String>,
    },

    /// Show replica counts and conditions of a deployment
    Status {
        /// Deployment name
        name: String,
    },

    /// Orchestrator inventory
    #[command(subcommand)]
    Inventory(InventoryCommands),

    /// Aggregated metrics and raw queries
    #[command(subcommand)]
    Metrics(MetricsCommands),

    /// Manage the local config file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum InventoryCommands {
    /// Node and pod counts
    Cluster,
    /// List nodes
    Nodes,
    /// List pods (all namespaces unless --namespace is given)
    Pods,
    /// Pod counts per namespace
    Namespaces,
    /// List deployments, or show one
    Deployments {
        /// Deployment name
        name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum MetricsCommands {
    /// Usage per dimension: cluster, nodes, pods or namespaces
    Show {
        dimension: String,

        /// Evaluation time (RFC 3339)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Liveness plus process CPU and memory
    Basic,

    /// Names of every series the backend holds
    List,

    /// Current value of a named series
    Series {
        name: String,

        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Run an instant query
    Query {
        expression: String,

        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective settings
    Show,

    /// Store settings in ~/.config/opsctl/config.json
    Set {
        #[arg(long = "url")]
        url: Option<String>,

        #[arg(long = "key")]
        key: Option<String>,

        #[arg(long = "default-namespace")]
        default_namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        output::print_error(&format!("{:#}", err));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = config::Config::load()?;

    // Config commands must work even when the stored URL is broken
    let command = match cli.command {
        Commands::Config(config_cmd) => return configure(&mut settings, &config_cmd),
        command => command,
    };

    let client = client::ApiClient::new(
        &settings.api_url(cli.api_url.as_deref()),
        settings.api_key(cli.api_key.as_deref()),
    )?;
    let namespace = settings.namespace(cli.namespace.as_deref());
    let format = cli.format;

    match command {
        Commands::Ping => {
            let message = client.get_message("api/v1/ping").await?;
            output::print_success(&message);
        }
        Commands::Scale { name, replicas } => {
            workload::scale(&client, &namespace, &name, replicas, format).await?;
        }
        Commands::Restart { name } => {
            workload::restart(&client, &namespace, &name, format).await?;
        }
        Commands::Update {
            name,
            image,
            version,
        } => {
            workload::update(&client, &namespace, &name, image, version, format).await?;
        }
        Commands::Rollback {
            name,
            revision,
            image,
            version,
        } => {
            workload::rollback(&client, &namespace, &name, revision, image, version, format)
                .await?;
        }
        Commands::Status { name } => {
            workload::status(&client, &namespace, &name, format).await?;
        }
        Commands::Inventory(inventory_cmd) => {
            // Listing commands span all namespaces unless one is asked for
            let filter = cli.namespace.as_deref();
            match inventory_cmd {
                InventoryCommands::Cluster => inventory::cluster(&client, format).await?,
                InventoryCommands::Nodes => inventory::nodes(&client, format).await?,
                InventoryCommands::Pods => inventory::pods(&client, filter, format).await?,
                InventoryCommands::Namespaces => inventory::namespaces(&client, format).await?,
                InventoryCommands::Deployments { name } => match name {
                    Some(name) => {
                        inventory::deployments(&client, Some(&namespace), Some(&name), format)
                            .await?
                    }
                    None => inventory::deployments(&client, filter, None, format).await?,
                },
            }
        }
        Commands::Metrics(metrics_cmd) => match metrics_cmd {
            MetricsCommands::Show { dimension, at } => {
                metrics::show(&client, &dimension, cli.namespace.as_deref(), at, format).await?;
            }
            MetricsCommands::Basic => metrics::basic(&client, format).await?,
            MetricsCommands::List => metrics::list(&client, format).await?,
            MetricsCommands::Series { name, at } => {
                metrics::series(&client, &name, at, format).await?;
            }
            MetricsCommands::Query { expression, at } => {
                metrics::query(&client, &expression, at, format).await?;
            }
        },
        Commands::Config(config_cmd) => configure(&mut settings, &config_cmd)?,
    }

    Ok(())
}

fn configure(settings: &mut config::Config, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let path = config::Config::config_path()?;
            println!("{}", "opsctl configuration".bold());
            println!("File:              {}", path.display().to_string().dimmed());
            println!("API URL:           {}", settings.api_url(None).cyan());
            println!(
                "API key:           {}",
                if settings.api_key.is_some() { "set" } else { "not set" }
            );
            println!("Default namespace: {}", settings.namespace(None).cyan());
        }
        ConfigCommands::Set {
            url,
            key,
            default_namespace,
        } => {
            if url.is_none() && key.is_none() && default_namespace.is_none() {
                output::print_info("Nothing to change; pass --url, --key or --default-namespace");
                return Ok(());
            }
            if let Some(url) = url {
                url::Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid URL {}: {}", url, e))?;
                settings.api_url = Some(url.clone());
            }
            if let Some(key) = key {
                settings.api_key = Some(key.clone());
            }
            if let Some(ns) = default_namespace {
                settings.default_namespace = Some(ns.clone());
            }
            let path = settings.save()?;
            output::print_success(&format!("Saved {}", path.display()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("opsctl").chain(args.iter().copied()))
    }

    #[test]
    fn test_command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scale_arguments() {
        let cli = parse(&["scale", "web", "--replicas", "3", "-n", "prod"]).unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("prod"));
        match cli.command {
            Commands::Scale { name, replicas } => {
                assert_eq!(name, "web");
                assert_eq!(replicas, 3);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(parse(&["scale", "web"]).is_err());
        assert!(parse(&["scale", "web", "--replicas", "many"]).is_err());
    }

    #[test]
    fn test_update_needs_image_or_version() {
        assert!(parse(&["update", "web"]).is_err());
        assert!(parse(&["update", "web", "--version", "v2"]).is_ok());
        assert!(parse(&["update", "web", "--image", "app:v2"]).is_ok());
    }

    #[test]
    fn test_rollback_selectors_are_exclusive() {
        let cli = parse(&["rollback", "web"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Rollback {
                revision: None,
                image: None,
                version: None,
                ..
            }
        ));
        assert!(parse(&["rollback", "web", "--version", "v2"]).is_ok());
        assert!(parse(&["rollback", "web", "--version", "v2", "--revision", "3"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["inventory", "pods", "--format", "json", "--api-url", "http://gw:8000"]).unwrap();
        assert_eq!(cli.format, output::OutputFormat::Json);
        assert_eq!(cli.api_url.as_deref(), Some("http://gw:8000"));
        assert!(matches!(
            cli.command,
            Commands::Inventory(InventoryCommands::Pods)
        ));
    }

    #[test]
    fn test_metrics_time_parsing() {
        let cli = parse(&["metrics", "show", "pods", "--at", "2024-05-01T10:00:00Z"]).unwrap();
        match cli.command {
            Commands::Metrics(MetricsCommands::Show { dimension, at }) => {
                assert_eq!(dimension, "pods");
                assert!(at.is_some());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(parse(&["metrics", "show", "pods", "--at", "yesterday"]).is_err());
    }

    #[test]
    fn test_metrics_basic_and_list() {
        assert!(matches!(
            parse(&["metrics", "basic"]).unwrap().command,
            Commands::Metrics(MetricsCommands::Basic)
        ));
        assert!(matches!(
            parse(&["metrics", "list", "-f", "json"]).unwrap().command,
            Commands::Metrics(MetricsCommands::List)
        ));
    }
}
