//! Running conversations against a transport
//!
//! Both entry points own a `SessionController` and a view task. The view
//! task is the only writer of answer text; this module only drives the
//! controller and wires Ctrl-C to the live session's cancel token.

use std::sync::Arc;

use anyhow::{Context, Result};
use hearth_core::{
    ClientConfig, ControllerError, MessageStore, Prompt, SessionController, SessionHandle,
    StreamState, StreamTransport, Transcript,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::view;

/// What the user typed at the chat prompt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatInput {
    /// A message for the model
    Message(String),
    /// Accept the pending summarization offer
    Summarize,
    /// Withdraw a summarization request
    KeepHistory,
    /// Forget the conversation so far
    Clear,
    /// Leave the chat
    Quit,
    /// Nothing to do
    Empty,
}

impl ChatInput {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed {
            "" => Self::Empty,
            "/quit" | "/exit" => Self::Quit,
            "/summarize" => Self::Summarize,
            "/keep" => Self::KeepHistory,
            "/clear" => Self::Clear,
            _ => Self::Message(trimmed.to_string()),
        }
    }
}

/// Cancel the session when Ctrl-C arrives; the returned task must be aborted
/// once the session is over
fn cancel_on_interrupt(handle: &SessionHandle) -> JoinHandle<()> {
    let token = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received, cancelling stream");
            token.cancel();
        }
    })
}

/// Start one message and drive it to a terminal state
///
/// The interrupt watcher is armed before the stream is opened so Ctrl-C also
/// covers a slow connect.
async fn run_turn<T: StreamTransport>(
    controller: &mut SessionController<T>,
    prompt: Prompt,
) -> Result<StreamState, ControllerError> {
    let handle = controller.begin(prompt)?;
    let interrupt = cancel_on_interrupt(&handle);
    let state = controller.drive().await;
    interrupt.abort();
    Ok(state)
}

/// Transcript bounded by the configured history and context limits
fn transcript_for(config: &ClientConfig) -> Arc<Transcript> {
    Arc::new(
        Transcript::with_limits(config.history_max_messages, config.history_max_bytes)
            .with_context_limit(config.context_limit),
    )
}

/// Send a single message and stream the answer to stdout
pub async fn ask<T: StreamTransport>(
    transport: Arc<T>,
    config: ClientConfig,
    prompt: Prompt,
) -> Result<StreamState> {
    let transcript = transcript_for(&config);
    let (tx, rx) = mpsc::unbounded_channel();
    let view = tokio::spawn(view::run(rx));

    let mut controller =
        SessionController::new(transport, transcript.clone(), transcript, config, tx);
    let result = run_turn(&mut controller, prompt).await;

    // Closing the channel lets the view finish painting and exit.
    drop(controller);
    view.await.context("View task failed")?;

    Ok(result?)
}

/// Interactive conversation on stdin
pub async fn chat<T: StreamTransport>(transport: Arc<T>, config: ClientConfig) -> Result<()> {
    let transcript = transcript_for(&config);
    let (tx, rx) = mpsc::unbounded_channel();
    let view = tokio::spawn(view::run(rx));

    eprintln!(
        "Chatting with {} ({}). /summarize, /keep, /clear, /quit (or Ctrl-D). Ctrl-C stops an answer or leaves at the prompt.",
        config.model, config.endpoint
    );

    let mut controller =
        SessionController::new(transport, transcript.clone(), transcript.clone(), config, tx);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupt at prompt, leaving chat");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        match ChatInput::parse(&line) {
            ChatInput::Empty => {}
            ChatInput::Quit => break,
            ChatInput::Summarize => {
                controller.accept_summarization();
                eprintln!("The next message will ask the model to summarize first.");
            }
            ChatInput::KeepHistory => controller.decline_summarization(),
            ChatInput::Clear => {
                transcript.clear();
                controller.decline_summarization();
                controller.check_budget();
                eprintln!("Conversation cleared.");
            }
            ChatInput::Message(text) => match run_turn(&mut controller, Prompt::new(text)).await {
                Ok(state) => debug!(?state, records = transcript.len(), "Turn finished"),
                Err(e) => {
                    warn!(error = %e, "Message not sent");
                    eprintln!("{e}");
                }
            },
        }
    }

    drop(controller);
    view.await.context("View task failed")?;
    Ok(())
}
