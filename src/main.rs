//! Topic relay CLI - runs the socket-to-broker relay.
//!
//! This is the main binary entry point. See the `topic_relay` library for
//! the core functionality.

// Rust guideline compliant 2025-01

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use topic_relay::constants::SHUTDOWN_POLL_INTERVAL;
use topic_relay::{
    BrokerClient, HttpBroker, IngestionListener, LogBroker, MessageProducer, OutboundQueue,
    ProducerSettings, PublishSink, RelayClient, RelayConfig, RelayStats,
};

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

// CLI
#[derive(Parser)]
#[command(name = "topic-relay")]
#[command(version)]
#[command(about = "Relays JSON messages from a local Unix socket to a message broker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until SIGINT or SIGTERM
    Run {
        /// Path of the ingestion socket
        #[arg(long)]
        socket_path: Option<PathBuf>,
        /// Topic for the periodic message
        #[arg(long)]
        topic: Option<String>,
        /// Periodic message, or path of a script that prints it
        #[arg(long)]
        message: Option<String>,
        /// Number of periodic messages (0 = until shutdown)
        #[arg(long)]
        count: Option<u32>,
        /// Seconds between periodic messages
        #[arg(long)]
        pub_interval: Option<u64>,
        /// Base URL of an HTTP publish bridge (publishes are only logged without one)
        #[arg(long)]
        broker_url: Option<String>,
        /// Client identity presented to the broker
        #[arg(long)]
        client_id: Option<String>,
        /// Config file to load instead of the default location
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Send one message to a running relay
    Send {
        /// Path of the relay's ingestion socket
        #[arg(long)]
        socket_path: Option<PathBuf>,
        /// Topic to publish on
        #[arg(long)]
        topic: String,
        /// Payload as JSON
        #[arg(long)]
        data: String,
    },
    /// Print the effective configuration
    Config,
}

/// Command-line values that override the loaded configuration.
#[derive(Default)]
struct RunOverrides {
    socket_path: Option<PathBuf>,
    topic: Option<String>,
    message: Option<String>,
    count: Option<u32>,
    pub_interval: Option<u64>,
    broker_url: Option<String>,
    client_id: Option<String>,
}

impl RunOverrides {
    fn apply(self, config: &mut RelayConfig) {
        if let Some(socket_path) = self.socket_path {
            config.socket_path = socket_path;
        }
        if let Some(topic) = self.topic {
            config.topic = topic;
        }
        if let Some(message) = self.message {
            config.message = message;
        }
        if let Some(count) = self.count {
            config.count = count;
        }
        if let Some(interval) = self.pub_interval {
            config.pub_interval_secs = interval;
        }
        if let Some(broker_url) = self.broker_url {
            config.broker_url = Some(broker_url);
        }
        if let Some(client_id) = self.client_id {
            config.client_id = client_id;
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<RelayConfig> {
    match path {
        Some(path) => {
            let mut config = RelayConfig::load_from(&path)?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => RelayConfig::load(),
    }
}

fn build_broker(config: &RelayConfig) -> Result<Box<dyn BrokerClient>> {
    match &config.broker_url {
        Some(url) => Ok(Box::new(HttpBroker::new(url.as_str(), config.client_id.as_str())?)),
        None => {
            log::info!("[broker] no broker_url configured, publishes will only be logged");
            Ok(Box::new(LogBroker::new(config.client_id.as_str())))
        }
    }
}

/// Runs the relay until a shutdown signal arrives.
fn run_relay(config: &RelayConfig) -> Result<()> {
    config.validate()?;

    // Set up signal handlers
    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;

    let stats = Arc::new(RelayStats::default());
    let broker = build_broker(config)?;
    let queue = OutboundQueue::with_capacity(broker, config.queue_capacity(), Arc::clone(&stats))?;
    let sink: Arc<dyn PublishSink> = Arc::new(queue.handle());

    let listener =
        IngestionListener::bind(&config.socket_path, Arc::clone(&sink), Arc::clone(&stats))?;

    let producer = MessageProducer::start(
        ProducerSettings {
            topic: config.topic.clone(),
            message: config.message.clone(),
            count: config.count,
            interval: config.pub_interval(),
        },
        sink,
    )?;

    println!(
        "Relay {} listening on {}",
        config.client_id,
        listener.socket_path().display()
    );
    log::info!("Topic relay v{} started", env!("CARGO_PKG_VERSION"));

    while !SHUTDOWN_FLAG.load(Ordering::Relaxed) {
        std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }

    println!("Shutting down...");
    producer.stop();
    listener.shutdown();
    queue.shutdown();

    let snapshot = stats.snapshot();
    log::info!(
        "[stats] {}",
        serde_json::to_string(&snapshot).unwrap_or_else(|_| format!("{snapshot:?}"))
    );

    Ok(())
}

fn send_message(socket_path: PathBuf, topic: &str, data: &str) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(data).context("--data must be valid JSON")?;
    let mut client = RelayClient::connect(&socket_path)?;
    client.send(topic, &data)?;
    client.quit()?;
    Ok(())
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    // RELAY_LOG_FILE sends logs to a file instead of stderr
    if let Ok(path) = std::env::var("RELAY_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    // Log panics from any thread before the default handler prints them
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        default_hook(panic_info);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            socket_path,
            topic,
            message,
            count,
            pub_interval,
            broker_url,
            client_id,
            config,
        } => {
            let mut relay_config = load_config(config)?;
            RunOverrides {
                socket_path,
                topic,
                message,
                count,
                pub_interval,
                broker_url,
                client_id,
            }
            .apply(&mut relay_config);
            run_relay(&relay_config)?;
        }
        Commands::Send {
            socket_path,
            topic,
            data,
        } => {
            let socket_path = match socket_path {
                Some(path) => path,
                None => RelayConfig::load()?.socket_path,
            };
            send_message(socket_path, &topic, &data)?;
        }
        Commands::Config => {
            let config = RelayConfig::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
