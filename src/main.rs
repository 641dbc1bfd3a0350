use clap::{Parser, Subcommand, ValueEnum};
use ring_kv::config::{CoordinatorConfig, NodeConfig};
use ring_kv::membership::Coordinator;
use ring_kv::storage::KvServer;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, global = true, default_value_t = LogLevel::Info, value_enum, help = "Log verbosity")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a storage node
    Node {
        #[arg(long, default_value = "localhost", help = "Address the node binds and advertises")]
        address: String,

        #[arg(long, help = "Port number to listen on")]
        port: u16,

        #[arg(long, help = "Coordinator host:port; omit to run standalone")]
        coordinator: Option<String>,

        #[arg(long, help = "Directory for the storage files (default: data/<port>)")]
        data_dir: Option<PathBuf>,

        #[arg(long, default_value_t = 10_000, help = "Heartbeat period in milliseconds")]
        heartbeat_ms: u64,
    },

    /// Run the coordinator
    Coordinator {
        #[arg(long, default_value = "localhost", help = "Address to bind the coordinator to")]
        address: String,

        #[arg(long, help = "Port nodes connect to")]
        port: u16,

        #[arg(long, help = "Port for the HTTP admin API")]
        admin_port: Option<u16>,

        #[arg(long, default_value_t = 20_000, help = "Failure detection interval in milliseconds")]
        detection_ms: u64,

        #[arg(long, default_value_t = 10_000, help = "Heartbeat period nodes are configured with")]
        heartbeat_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(args.log_level))
        .init();

    match args.command {
        Command::Node {
            address,
            port,
            coordinator,
            data_dir,
            heartbeat_ms,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| PathBuf::from("data").join(port.to_string()));
            let mut config = NodeConfig::new(address, port, data_dir);
            config.coordinator = coordinator;
            config.heartbeat_period = Duration::from_millis(heartbeat_ms);

            let server = KvServer::start(config).await?;
            tracing::info!("Press Ctrl+C to shutdown");
            tokio::signal::ctrl_c().await?;
            server.close().await?;
        }
        Command::Coordinator {
            address,
            port,
            admin_port,
            detection_ms,
            heartbeat_ms,
        } => {
            let mut config = CoordinatorConfig::new(address, port);
            config.admin_port = admin_port;
            config.detection_interval = Duration::from_millis(detection_ms);
            config.heartbeat_period = Duration::from_millis(heartbeat_ms);

            let coordinator = Coordinator::start(config).await?;

            // Stats reporter
            let stats = coordinator.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                loop {
                    interval.tick().await;
                    let nodes = stats.list_nodes().await;
                    tracing::info!("Cluster stats: {} node(s) on the ring", nodes.len());
                    for node in nodes {
                        tracing::info!(
                            "  - {} started={} last={:?} heartbeat {}ms ago",
                            node.name,
                            node.started,
                            node.last_status,
                            node.millis_since_heartbeat
                        );
                    }
                }
            });

            tracing::info!("Press Ctrl+C to shutdown");
            tokio::signal::ctrl_c().await?;
            coordinator.shutdown_service().await;
            coordinator.stop();
        }
    }

    Ok(())
}
