use thiserror::Error;

/// Errors surfaced by a chat send.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Endpoint or API key missing. Raised before any network activity.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, bad status, timeout, or an unusable reply body.
    #[error("communication error: {0}")]
    Communication(String),

    /// The request queue worker has stopped.
    #[error("request queue closed")]
    QueueClosed,
}

impl ChatError {
    /// One-line notice suitable for showing in the chat panel.
    pub fn user_notice(&self) -> String {
        match self {
            ChatError::Configuration(detail) => format!(
                "LLM chat is not configured: {}. Set llmChat.endpoint and llmChat.apiKey.",
                detail
            ),
            ChatError::Communication(_) | ChatError::QueueClosed => {
                "Failed to communicate with LLM service".to_string()
            }
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ChatError::Configuration(_))
    }

    pub fn is_communication(&self) -> bool {
        matches!(self, ChatError::Communication(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Communication(format!("request timed out: {}", err))
        } else {
            ChatError::Communication(err.to_string())
        }
    }
}

/// Errors loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
