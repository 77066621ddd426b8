//! Hearth - terminal chat against a locally hosted model
//!
//! # Usage
//!
//! ```bash
//! # One question, streamed to stdout
//! hearth ask "Why is the sky blue?"
//!
//! # Interactive conversation (Ctrl-C stops the current answer)
//! hearth chat
//!
//! # Replay a captured event stream without a server
//! hearth ask "anything" --replay capture.txt
//!
//! # Is the model server up?
//! hearth health
//! ```
//!
//! Exit status for `ask`: 0 when the answer completed, 1 on failure, 130 when
//! interrupted.

mod session;
mod view;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hearth_core::{
    load_config_from_path, ChannelTransport, ClientConfig, ConfigOverrides, HttpTransport, Prompt,
    StreamState, StreamTransport,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Stream answers from a local model server into the terminal
#[derive(Parser, Debug)]
#[command(name = "hearth", author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long, env = "HEARTH_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Streaming endpoint URL
    #[arg(long, value_name = "URL", global = true)]
    endpoint: Option<String>,

    /// Model to ask
    #[arg(short = 'm', long, global = true)]
    model: Option<String>,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Display frame rate in Hz
    #[arg(long, value_name = "HZ", global = true)]
    frame_rate: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long,
        env = "HEARTH_LOG_LEVEL",
        default_value = "warn",
        global = true
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Send one message and stream the answer
    Ask {
        /// The message to send
        message: String,

        /// System prompt for this message
        #[arg(short = 's', long)]
        system: Option<String>,

        /// Read the event stream from a capture file instead of the server
        #[arg(long, value_name = "FILE")]
        replay: Option<PathBuf>,

        /// Chunk size used when replaying a capture
        #[arg(long, default_value_t = 64, requires = "replay")]
        chunk_size: usize,
    },

    /// Interactive conversation
    Chat,

    /// Check whether the model server is reachable
    Health,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref endpoint) = self.endpoint {
            overrides = overrides.with_endpoint(endpoint.clone());
        }
        if let Some(ref model) = self.model {
            overrides = overrides.with_model(model.clone());
        }
        if let Some(temperature) = self.temperature {
            overrides = overrides.with_temperature(temperature);
        }
        if let Some(rate) = self.frame_rate {
            overrides = overrides.with_frame_rate(rate);
        }
        overrides
    }
}

/// Initialize logging
///
/// Logs go to stderr so they never interleave with streamed answer text.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hearth={level},hearth_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Process exit status for a finished answer
fn exit_code(state: StreamState) -> u8 {
    match state {
        StreamState::Completed => 0,
        StreamState::Cancelled => 130,
        StreamState::Idle | StreamState::Streaming | StreamState::Errored => 1,
    }
}

fn resolve_config(args: &Args) -> Result<ClientConfig> {
    let mut config =
        load_config_from_path(args.config.clone()).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    debug!(
        source = %config.source(),
        endpoint = %config.endpoint,
        model = %config.model,
        "Configuration resolved"
    );
    Ok(config)
}

fn http_transport(config: &ClientConfig) -> Result<Arc<HttpTransport>> {
    let transport = HttpTransport::from_config(config)
        .with_context(|| format!("Failed to set up transport for {}", config.endpoint))?;
    Ok(Arc::new(transport))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "hearth starting");

    let config = resolve_config(&args)?;

    match args.command {
        Command::Ask {
            message,
            system,
            replay,
            chunk_size,
        } => {
            let mut prompt = Prompt::new(message);
            if let Some(system) = system {
                prompt = prompt.with_system(system);
            }

            let state = if let Some(path) = replay {
                let data = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read capture {}", path.display()))?;
                let transport = Arc::new(ChannelTransport::from_wire_bytes(&data, chunk_size));
                session::ask(transport, config, prompt).await?
            } else {
                session::ask(http_transport(&config)?, config, prompt).await?
            };

            Ok(ExitCode::from(exit_code(state)))
        }
        Command::Chat => {
            let transport = http_transport(&config)?;
            session::chat(transport, config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let transport = http_transport(&config)?;
            if transport.health_check().await {
                println!("{} is reachable", transport.endpoint());
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("{} is not reachable", transport.endpoint());
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
