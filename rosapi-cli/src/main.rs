//! rosapi - Command-line client for the router API
//!
//! Provides both a REPL and one-shot sentence execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::Format;
use rosapi_client::{
    Connection, ConnectionConfig, Credentials, OneShotCredentials, Sentence, DEFAULT_PORT,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Environment variable read for the password when `--password` is absent.
const PASSWORD_ENV: &str = "ROSAPI_PASSWORD";

#[derive(Parser)]
#[command(name = "rosapi")]
#[command(about = "Command-line client for the router remote-administration API")]
#[command(version)]
struct Cli {
    /// Router address (host name or IP)
    #[arg(short = 'H', long, env = "ROSAPI_HOST", default_value = "192.168.88.1")]
    host: String,

    /// API port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// User name
    #[arg(short, long, env = "ROSAPI_USER", default_value = "admin")]
    user: String,

    /// Password. Without it ROSAPI_PASSWORD is read when logging in, and an
    /// empty password is used if that is unset too.
    #[arg(long)]
    password: Option<String>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Print replies as JSON, one object per line
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Send one sentence and print its replies
    Run {
        /// Sentence words, e.g. /interface/print ?type=ether =.proplist=name
        #[arg(required = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut cli = Cli::parse();
    let format = if cli.json { Format::Json } else { Format::Human };

    let config =
        ConnectionConfig::new().with_connect_timeout(Duration::from_secs(cli.connect_timeout));
    let user = cli.user.clone();
    let (conn, mut events) = match cli.password.take() {
        Some(password) => Connection::new(
            config,
            OneShotCredentials::new(Credentials::new(user, password)),
        ),
        None => Connection::new(config, move || {
            let password = std::env::var(PASSWORD_ENV).unwrap_or_default();
            Some(Credentials::new(user.as_str(), password))
        }),
    };

    if let Err(e) = commands::login(&conn, &mut events, &cli.host, cli.port).await {
        eprintln!("{}: {}", "Connection failed".red(), e);
        std::process::exit(1);
    }

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(&conn, events, &cli.host, format).await?;
        }
        Some(Commands::Run { words }) => {
            let sentence = Sentence::from_text_words(words);
            if let Err(e) = commands::execute(&conn, &mut events, &sentence, format).await {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
            conn.close(false).await;
        }
    }

    Ok(())
}
