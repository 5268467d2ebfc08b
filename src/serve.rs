//! Line protocol for hosting the chat panel over stdin/stdout.
//!
//! The host writes one JSON command per line and reads one JSON notification
//! per line. Logs go to stderr so stdout stays clean.

use std::sync::Arc;

use anyhow::Result;
use llm_chat_core::dispatch::write_notifications;
use llm_chat_core::{ChatSession, ConfigSource, SendMode};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tracing::info;

pub async fn run_chat_server<R, W>(
    reader: R,
    writer: W,
    config: Arc<dyn ConfigSource>,
    mode: SendMode,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_notifications(rx, writer));

    let mut session = ChatSession::new(config, mode, tx);
    info!(?mode, "chat server ready");

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        session.handle_line(&line);
    }

    // Input closed: let outstanding replies through before shutting down.
    session.drain().await;
    drop(session);
    writer_task.await??;

    info!("chat server stopped");
    Ok(())
}
