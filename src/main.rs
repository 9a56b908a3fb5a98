//! WolfElect - Bully Leader Election
//!
//! Runs an election node over TCP, or a whole cluster in-process.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfelect::cluster::LocalCluster;
use wolfelect::config::{ElectionConfig, LoggingConfig, WolfElectConfig};
use wolfelect::error::{Error, Result};
use wolfelect::id::NodeId;
use wolfelect::network::{NetworkServer, TcpPeer};
use wolfelect::peer::{local_channel, Peer};
use wolfelect::protocol::Message;
use wolfelect::service::NodeHandle;
use wolfelect::state::NodeEvent;

/// WolfElect - Bully Leader Election
#[derive(Parser)]
#[command(name = "wolfelect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfelect.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an election node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfelect.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Run an in-process cluster through startup, master failure, a new
    /// node joining and a forged victory claim
    Simulate {
        /// Number of nodes to start with
        #[arg(short, long, default_value_t = 10)]
        nodes: usize,

        /// Election timeout in milliseconds
        #[arg(short, long, default_value_t = 500)]
        timeout_ms: u64,

        /// Print statuses as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let logging = match cli.command {
        Commands::Start => WolfElectConfig::from_file(&cli.config)
            .map(|config| config.logging)
            .unwrap_or_default(),
        _ => LoggingConfig::default(),
    };
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging.format);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Simulate {
            nodes,
            timeout_ms,
            json,
        } => run_simulate(nodes, timeout_ms, json).await,
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start an election node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfElect node...");

    let config = match WolfElectConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for node: {}", config.node.id);

    let (inbound, mailbox) = local_channel(config.node.id.clone());
    let server = NetworkServer::bind(&config.node.bind_address, inbound).await?;

    let peers = config
        .peers
        .iter()
        .map(|peer| {
            TcpPeer::spawn(peer.id.clone(), peer.address.clone(), config.connect_timeout())
                .into_ref()
        })
        .collect();
    let handle = NodeHandle::spawn(mailbox, peers, config.election_config())?;
    let event_log = tokio::spawn(log_events(handle.id().clone(), handle.subscribe().await?));

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                tracing::error!("Network server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    handle.teardown().await?;
    server.stop();
    let _ = event_log.await;

    tracing::info!("Node {} stopped", config.node.id);
    Ok(())
}

/// Log a node's signals until it is torn down
async fn log_events(id: NodeId, mut events: broadcast::Receiver<NodeEvent>) {
    loop {
        match events.recv().await {
            Ok(NodeEvent::BecameMaster) => tracing::info!("{}: is now master", id),
            Ok(NodeEvent::SteppedDown) => tracing::info!("{}: stepped down", id),
            Ok(NodeEvent::Fault(fault)) => {
                tracing::warn!("{}: error {}: {}", id, fault.kind(), fault)
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("{}: missed {} signals", id, missed)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let node_id = NodeId::new(node_id)?;
    let config_content = format!(
        r#"# WolfElect Configuration
# Generated configuration file

[node]
id = "{node_id}"
bind_address = "0.0.0.0:7700"
connect_timeout_ms = 1000

[election]
election_timeout_ms = 1000
# heartbeat_interval_ms = 3000
# startup_delay_ms = 1000
liveness_tolerance_percent = 10

# [[peers]]
# id = "node-2"
# address = "node-2.example.com:7700"

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nAdd a [[peers]] entry for every other node in the cluster.");
    println!("Then start with: wolfelect start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfElectConfig::from_file(&config_path) {
        Ok(config) => {
            let election = config.election_config();
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Peers: {}", config.peers.len());
            println!("  Election Timeout: {} ms", election.election_timeout.as_millis());
            println!("  Heartbeat: {} ms", election.heartbeat_interval.as_millis());
            println!("  Master Deadline: {} ms", election.liveness_deadline().as_millis());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Run the in-process demo cluster
async fn run_simulate(nodes: usize, timeout_ms: u64, json: bool) -> Result<()> {
    if nodes == 0 {
        return Err(Error::Config("simulation needs at least one node".into()));
    }
    let config = ElectionConfig::new(Duration::from_millis(timeout_ms));
    config.validate()?;

    // Zero-padded so ids sort the same way numbers do: "00".."09", then "10"
    let width = nodes.to_string().len().max(2);
    let name = |i: usize| NodeId::new(format!("{:0width$}", i, width = width));
    let ids = (0..nodes).map(name).collect::<Result<Vec<_>>>()?;

    let mut cluster = LocalCluster::start(ids.clone(), config)?;
    for id in &ids {
        if let Some(handle) = cluster.handle(id) {
            tokio::spawn(log_events(id.clone(), handle.subscribe().await?));
        }
    }

    let settle = config.heartbeat_interval * 2;
    tokio::time::sleep(settle).await;
    print_statuses("After startup", &cluster, json).await?;

    if let Some(highest) = ids.last() {
        println!("\nDelete node {}", highest);
        cluster.destroy(highest).await?;
        tokio::time::sleep(config.liveness_deadline() + settle).await;
        print_statuses("After master failure", &cluster, json).await?;
    }

    let newcomer = name(nodes)?;
    println!("\nAdd node {}", newcomer);
    let handle = cluster.join(newcomer.clone()).await?;
    tokio::spawn(log_events(newcomer, handle.subscribe().await?));
    tokio::time::sleep(settle).await;
    print_statuses("After join", &cluster, json).await?;

    if let Some(target) = ids.get(3).or(ids.first()).and_then(|id| cluster.endpoint(id)) {
        let forged = NodeId::new("99")?;
        println!("\nSend forged victory from {} to {}", forged, target.id());
        target.send(Message::Victory { id: forged })?;
        tokio::time::sleep(config.election_timeout * 3).await;
        print_statuses("After forged victory", &cluster, json).await?;
    }

    cluster.shutdown().await
}

async fn print_statuses(title: &str, cluster: &LocalCluster, json: bool) -> Result<()> {
    let statuses = cluster.statuses().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("\n{}", title);
    println!("{}", "=".repeat(title.len()));
    for status in statuses {
        let election = if status.election_in_progress {
            " (electing)"
        } else {
            ""
        };
        println!("  {:<6} {}{}", status.id.as_str(), status.master, election);
    }
    Ok(())
}
