pub mod bridge;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use bridge::RequestBridge;
pub use config::{Config, ConfigSource, ConnectionConfig, LayeredConfigSource, Overrides};
pub use context::{capture_selection, EditorSnapshot, EditorSurface, SelectionContext};
pub use dispatch::{Command, Notification};
pub use error::{ChatError, ConfigError};
pub use queue::{QueueHandle, RequestQueue};
pub use session::{ChatSession, SendMode};
pub use state::{ChatMessage, ChatRole, Conversation};
