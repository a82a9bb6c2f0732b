
use crate::agent::tools::mcp::RmcpConnector;
use crate::bus::{BusSink, InboundMessage, MessageBus, OutboundSink};
use crate::channels::ChannelManager;
use crate::channels::manager::deliver_outbound;
use crate::cli::runtime::Runtime;
use crate::config::{Config, get_config_path, load_config, save_config};
use crate::providers::base::Media;
use crate::storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const INBOUND_RATE_LIMIT: usize = 30;
const RATE_WINDOW_SECS: f64 = 60.0;
const QUEUE_CAPACITY: usize = 1000;
const OUTBOUND_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Telegram chatbot with tool calling and MCP servers")]
pub struct Cli {
    /// Config file to use instead of $PARLEY_HOME/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (Telegram channel + conversation engine)
    Gateway {
        /// Override the default LLM provider (openai, anthropic)
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Talk to the bot from the terminal
    Chat {
        /// Send one message and exit instead of starting a session
        #[arg(short, long)]
        message: Option<String>,
        /// User id the conversation is stored under
        #[arg(short, long, default_value_t = 0)]
        user: i64,
        #[arg(long)]
        provider: Option<String>,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default config file if none exists
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file location
    Path,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Gateway { provider, model } => {
            let mut config = load_config(config_path)?;
            apply_overrides(&mut config, provider, model);
            config.validate()?;
            gateway(config).await?;
        }
        Commands::Chat {
            message,
            user,
            provider,
        } => {
            let mut config = load_config(config_path)?;
            apply_overrides(&mut config, provider, None);
            config.validate()?;
            chat(config, message, user).await?;
        }
        Commands::Config { cmd } => {
            config_command(cmd, config_path)?;
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, provider: Option<String>, model: Option<String>) {
    if let Some(provider) = provider {
        config.agent.provider = provider;
        // A model named for another provider would not resolve.
        config.agent.model = None;
    }
    if model.is_some() {
        config.agent.model = model;
    }
}

async fn gateway(config: Config) -> Result<()> {
    let storage = storage::open(&config.storage).context("Failed to open user storage")?;
    let runtime = Runtime::build(&config, storage, Arc::new(RmcpConnector));

    let bus = Arc::new(Mutex::new(MessageBus::new(
        INBOUND_RATE_LIMIT,
        RATE_WINDOW_SECS,
        QUEUE_CAPACITY,
        QUEUE_CAPACITY,
    )));
    let (inbound_rx, outbound_rx) = {
        let mut guard = bus.lock().await;
        (
            guard
                .take_inbound_rx()
                .context("Inbound receiver already taken")?,
            guard
                .take_outbound_rx()
                .context("Outbound receiver already taken")?,
        )
    };

    let mut channels = ChannelManager::new(&config, bus.clone());
    if channels.is_empty() {
        anyhow::bail!("No channels enabled: set telegram.token or PARLEY_TELEGRAM_TOKEN");
    }

    let sink: Arc<dyn OutboundSink> = Arc::new(BusSink::new(bus, "telegram"));
    let dispatcher = runtime.dispatcher(sink);
    let dispatcher_task = tokio::spawn(dispatcher.run(inbound_rx, runtime.supervisor.clone()));

    let attached = runtime.bridge.attach_configured(&config.mcp).await;
    if !config.mcp.servers.is_empty() {
        info!(
            "attached {}/{} MCP servers",
            attached,
            config.mcp.servers.len()
        );
    }

    channels.start_all().await?;
    println!("Starting parley gateway v{}...", crate::VERSION);
    println!("Enabled channels: {:?}", channels.enabled_channels());
    println!("Default provider: {}", runtime.providers.default_provider());

    let channels = Arc::new(Mutex::new(channels));
    let (stop_outbound, outbound_stop_rx) = oneshot::channel();
    let outbound_task = tokio::spawn(deliver_outbound(
        channels.clone(),
        outbound_rx,
        outbound_stop_rx,
    ));

    info!("gateway is running");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
        _ = dispatcher_task => {
            warn!("dispatcher exited unexpectedly");
        }
    }

    drain_gateway(&channels, &runtime, stop_outbound, outbound_task).await;
    Ok(())
}

/// Stop taking new messages, let accepted ones finish within the grace
/// period, then flush the replies they queued.
async fn drain_gateway(
    channels: &Mutex<ChannelManager>,
    runtime: &Runtime,
    stop_outbound: oneshot::Sender<()>,
    outbound_task: JoinHandle<()>,
) {
    channels.lock().await.stop_all().await;
    runtime.shutdown().await;
    let _ = stop_outbound.send(());
    if tokio::time::timeout(OUTBOUND_FLUSH_TIMEOUT, outbound_task)
        .await
        .is_err()
    {
        warn!(
            "outbound queue not flushed within {:?}, giving up",
            OUTBOUND_FLUSH_TIMEOUT
        );
    }
}

/// Prints replies to the terminal.
struct ConsoleSink;

#[async_trait]
impl OutboundSink for ConsoleSink {
    async fn thoughts(&self, _chat_id: i64, text: &str) {
        println!("💭 {}", text);
    }

    async fn answer(&self, _chat_id: i64, text: &str) {
        println!("{}\n", text);
    }

    async fn media(&self, _chat_id: i64, media: Media) {
        match media {
            Media::Image { url: Some(url), .. } => println!("[image] {}\n", url),
            Media::Image { data, .. } => {
                println!("[image, {} bytes]\n", data.map_or(0, |d| d.len()));
            }
            Media::Audio { data, mime_type } => {
                println!("[audio {}, {} bytes]\n", mime_type, data.len());
            }
        }
    }
}

async fn chat(config: Config, message: Option<String>, user: i64) -> Result<()> {
    let storage = storage::open(&config.storage).context("Failed to open user storage")?;
    let runtime = Runtime::build(&config, storage, Arc::new(RmcpConnector));
    runtime.bridge.attach_configured(&config.mcp).await;
    let dispatcher = runtime.dispatcher(Arc::new(ConsoleSink));

    if let Some(message) = message {
        dispatcher
            .handle(InboundMessage::new("cli", user, user, message))
            .await;
        runtime.shutdown().await;
        return Ok(());
    }

    println!("parley chat (user {}). /help for commands, Ctrl+D to quit.\n", user);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if matches!(line, "exit" | "quit") {
            break;
        }
        dispatcher
            .handle(InboundMessage::new("cli", user, user, line))
            .await;
    }

    runtime.shutdown().await;
    Ok(())
}

fn config_command(cmd: ConfigCommands, path: Option<&std::path::Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };
    match cmd {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                println!("Config already exists at {}", path.display());
                println!("Use --force to overwrite it.");
                return Ok(());
            }
            save_config(&Config::default(), Some(&path))?;
            println!("Wrote default config to {}", path.display());
            println!("Set telegram.token and a provider key, then run `parley gateway`.");
        }
        ConfigCommands::Show => {
            let config = load_config(Some(&path))?;
            println!("{:#?}", config);
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
    }
    Ok(())
}
