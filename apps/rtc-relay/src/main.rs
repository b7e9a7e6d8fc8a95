use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rtc_relay::config::{ClientConfig, ConfigError};
use rtc_relay::connection::Connection;
use rtc_relay::engine::Payload;
use rtc_relay::error::ConnectionError;
use rtc_relay::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = log_config.level.as_str(), log_file = ?log_config.file, "logging configured");

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.signaling_url.as_deref() {
        config = config.with_signaling_url(url)?;
    }

    match cli.command {
        Command::Connect(args) => handle_connect(config, args).await,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "rtc-relay",
    about = "Open a WebRTC data channel through an HTTP signaling relay",
    author,
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "RTC_RELAY_SIGNALING_URL",
        help = "Base URL of the signaling relay (default http://127.0.0.1:8000)"
    )]
    signaling_url: Option<String>,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "RTC_RELAY_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "RTC_RELAY_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Negotiate a connection, send messages and print what comes back
    Connect(ConnectArgs),
}

#[derive(Args, Debug)]
struct ConnectArgs {
    #[arg(
        long = "message",
        short = 'm',
        value_name = "TEXT",
        help = "Text message to send once the data channel opens (repeatable)"
    )]
    messages: Vec<String>,

    #[arg(
        long,
        value_name = "SECS",
        default_value_t = 10,
        help = "How long to wait for the channel and for inbound messages"
    )]
    wait_secs: u64,

    #[arg(long, help = "Do not send the greeting when the channel opens")]
    no_greeting: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Connection(#[from] ConnectionError),
    #[error("data channel did not open within {secs}s")]
    ChannelTimeout { secs: u64 },
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

async fn handle_connect(mut config: ClientConfig, args: ConnectArgs) -> Result<(), CliError> {
    if args.no_greeting {
        config.greeting = None;
    }
    let wait = Duration::from_secs(args.wait_secs);

    info!(signaling_url = %config.signaling_url, "establishing connection");
    let connection = Connection::establish(&config).await?;
    println!("negotiated connection {}", connection.id());

    match timeout(wait, connection.ready()).await {
        Ok(result) => result?,
        Err(_) => {
            let _ = connection.close().await;
            return Err(CliError::ChannelTimeout {
                secs: args.wait_secs,
            });
        }
    }
    println!("data channel '{}' open", connection.channel_label());

    for message in &args.messages {
        let sent = connection.send_text(message).await?;
        debug!(bytes = sent, "message sent");
    }

    let deadline = sleep(wait);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            inbound = connection.recv() => match inbound {
                Some(Payload::Text(text)) => println!("< {text}"),
                Some(Payload::Binary(bytes)) => {
                    println!("< {} bytes", bytes.len());
                    print!("{}", logctl::hexdump(&bytes));
                }
                None => break,
            },
        }
    }

    connection.close().await?;
    Ok(())
}
