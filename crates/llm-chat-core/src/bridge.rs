use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::{ChatError, Result};

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    response: String,
}

/// Sends chat messages to the configured endpoint.
///
/// Stateless apart from the pooled HTTP client, so clones can be used from
/// several tasks at once. Each call makes exactly one attempt.
#[derive(Clone, Default)]
pub struct RequestBridge {
    client: Client,
}

impl RequestBridge {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// POST `{"message": text}` and return the reply's `response` field.
    ///
    /// Fails with [`ChatError::Configuration`] before touching the network if
    /// the endpoint or key is empty. Anything that goes wrong afterwards is a
    /// [`ChatError::Communication`].
    pub async fn send_message(&self, text: &str, config: &ConnectionConfig) -> Result<String> {
        config.validate()?;

        debug!(endpoint = %config.endpoint, chars = text.chars().count(), "sending chat message");

        let mut request = self
            .client
            .post(&config.endpoint)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("Content-Type", "application/json")
            .json(&ChatRequest { message: text });

        if let Some(timeout) = config.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            warn!(endpoint = %config.endpoint, error = %e, "chat request failed");
            ChatError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint = %config.endpoint, %status, "chat endpoint returned error status");
            return Err(ChatError::Communication(format!(
                "endpoint returned {}: {}",
                status,
                body.trim()
            )));
        }

        let body = response.text().await?;
        let reply: ChatReply = serde_json::from_str(&body).map_err(|e| {
            warn!(endpoint = %config.endpoint, error = %e, "unusable chat reply");
            ChatError::Communication(format!("invalid reply body: {}", e))
        })?;

        debug!(chars = reply.response.chars().count(), "received chat reply");
        Ok(reply.response)
    }
}
