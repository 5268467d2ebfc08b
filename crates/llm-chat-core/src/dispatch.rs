//! Messages exchanged with the chat panel.
//!
//! Inbound commands arrive as one JSON object per line, keyed by `command`.
//! Outbound notifications are keyed by `type`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::context::EditorSnapshot;

#[derive(Debug, Deserialize)]
struct Envelope {
    command: String,
    #[serde(flatten)]
    params: serde_json::Map<String, serde_json::Value>,
}

/// A parsed panel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendMessage { text: String },
    GetSelectedCode,
    SetActiveEditor(EditorSnapshot),
    ClearActiveEditor,
    ClearContext,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid params for {command}: {reason}")]
    InvalidParams { command: String, reason: String },
}

/// Outbound notification for the chat panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    Response {
        text: String,
    },
    SelectedCode {
        text: String,
        #[serde(rename = "fileName")]
        file_name: String,
    },
    Error {
        message: String,
    },
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Notification::Error {
            message: message.into(),
        }
    }
}

pub fn parse_command(line: &str) -> Result<Command, DispatchError> {
    let envelope: Envelope = serde_json::from_str(line)?;
    let params = serde_json::Value::Object(envelope.params);

    match envelope.command.as_str() {
        "sendMessage" => {
            let text = params
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DispatchError::InvalidParams {
                    command: envelope.command.clone(),
                    reason: "missing string field `text`".to_string(),
                })?;
            Ok(Command::SendMessage {
                text: text.to_string(),
            })
        }
        "getSelectedCode" => Ok(Command::GetSelectedCode),
        "setActiveEditor" => {
            let snapshot: EditorSnapshot =
                serde_json::from_value(params).map_err(|e| DispatchError::InvalidParams {
                    command: envelope.command.clone(),
                    reason: e.to_string(),
                })?;
            Ok(Command::SetActiveEditor(snapshot))
        }
        "clearActiveEditor" => Ok(Command::ClearActiveEditor),
        "clearContext" => Ok(Command::ClearContext),
        other => Err(DispatchError::UnknownCommand(other.to_string())),
    }
}

/// Write notifications as JSON lines until every sender is dropped.
pub async fn write_notifications<W>(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    mut writer: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(notification) = rx.recv().await {
        let mut line = serde_json::to_string(&notification)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
