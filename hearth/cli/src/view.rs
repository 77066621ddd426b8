//! Terminal view
//!
//! Drains controller events: answer text goes to stdout as it is painted,
//! everything else goes to stderr.

use hearth_core::{NotifyLevel, RenderUpdate, StreamState, ViewEvent};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;

/// Stderr line for a non-text event, if it needs one
fn status_line(event: &ViewEvent) -> Option<String> {
    match event {
        ViewEvent::Notice { level, message } => {
            let tag = match level {
                NotifyLevel::Info => "info",
                NotifyLevel::Warning => "warning",
                NotifyLevel::Error => "error",
            };
            Some(format!("[{tag}] {message}"))
        }
        ViewEvent::BudgetNearLimit {
            estimated_tokens,
            limit,
        } => Some(format!(
            "[context] ~{estimated_tokens} of {limit} tokens used. \
             Type /summarize to condense the conversation with the next message."
        )),
        ViewEvent::StateChanged {
            state: StreamState::Cancelled,
            ..
        } => Some("[stopped]".to_string()),
        ViewEvent::SessionStarted { .. }
        | ViewEvent::StateChanged { .. }
        | ViewEvent::Render { .. } => None,
    }
}

/// Paint events until the controller hangs up
pub async fn run(rx: UnboundedReceiver<ViewEvent>) {
    let mut out = tokio::io::stdout();
    let mut err = tokio::io::stderr();
    if let Err(e) = paint(rx, &mut out, &mut err).await {
        tracing::warn!(error = %e, "Terminal output failed");
    }
}

async fn paint<O, E>(
    mut rx: UnboundedReceiver<ViewEvent>,
    out: &mut O,
    err: &mut E,
) -> std::io::Result<()>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut at_line_start = true;

    while let Some(event) = rx.recv().await {
        if let ViewEvent::Render { update, .. } = &event {
            let delta = update.delta();
            if !delta.is_empty() {
                out.write_all(delta.as_bytes()).await?;
                at_line_start = delta.ends_with('\n');
            }
            if let RenderUpdate::Final { committed, .. } = update {
                if !committed.is_empty() && !at_line_start {
                    out.write_all(b"\n").await?;
                    at_line_start = true;
                }
            }
            out.flush().await?;
            continue;
        }

        if let Some(line) = status_line(&event) {
            if !at_line_start {
                out.write_all(b"\n").await?;
                out.flush().await?;
                at_line_start = true;
            }
            err.write_all(line.as_bytes()).await?;
            err.write_all(b"\n").await?;
            err.flush().await?;
        }
    }
    Ok(())
}
