//! One chat panel: transcript, pending context, and command handling.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bridge::RequestBridge;
use crate::config::ConfigSource;
use crate::context::{capture_selection, compose_prompt, EditorSnapshot, EditorSurface, SelectionContext};
use crate::dispatch::{parse_command, Command, Notification};
use crate::error::ChatError;
use crate::queue::{QueueHandle, RequestQueue};
use crate::state::{ChatMessage, Conversation};

/// How overlapping sends are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// FIFO, one request in flight; replies arrive in send order.
    Ordered,
    /// Every send runs independently; replies arrive in completion order.
    Concurrent,
}

pub struct ChatSession {
    conversation: Arc<Mutex<Conversation>>,
    pending_context: Option<SelectionContext>,
    active_editor: Option<EditorSnapshot>,
    config: Arc<dyn ConfigSource>,
    bridge: RequestBridge,
    queue: Option<QueueHandle>,
    notifications: mpsc::UnboundedSender<Notification>,
    in_flight: JoinSet<()>,
}

fn lock(conversation: &Mutex<Conversation>) -> MutexGuard<'_, Conversation> {
    conversation.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChatSession {
    /// Must be called inside a tokio runtime when `mode` is `Ordered`.
    pub fn new(
        config: Arc<dyn ConfigSource>,
        mode: SendMode,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self::with_bridge(RequestBridge::new(), config, mode, notifications)
    }

    pub fn with_bridge(
        bridge: RequestBridge,
        config: Arc<dyn ConfigSource>,
        mode: SendMode,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        let queue = match mode {
            SendMode::Ordered => Some(RequestQueue::spawn(bridge.clone())),
            SendMode::Concurrent => None,
        };
        Self {
            conversation: Arc::new(Mutex::new(Conversation::new())),
            pending_context: None,
            active_editor: None,
            config,
            bridge,
            queue,
            notifications,
            in_flight: JoinSet::new(),
        }
    }

    /// Parse one inbound line and run it. Bad lines become error notices.
    pub fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match parse_command(line) {
            Ok(command) => self.handle_command(command),
            Err(e) => {
                warn!(error = %e, "rejected panel message");
                self.notify(Notification::error(e.to_string()));
            }
        }
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage { text } => self.send_message(&text),
            Command::GetSelectedCode => {
                self.capture_selection();
            }
            Command::SetActiveEditor(snapshot) => {
                debug!(file = %snapshot.file_name, "active editor changed");
                self.active_editor = Some(snapshot);
            }
            Command::ClearActiveEditor => self.active_editor = None,
            Command::ClearContext => self.pending_context = None,
        }
    }

    /// Record the user message and start the request. The reply or a single
    /// error notice is delivered later as a notification.
    pub fn send_message(&mut self, text: &str) {
        if text.trim().is_empty() {
            self.notify(Notification::error("Message is empty"));
            return;
        }

        let context = self.pending_context.take();
        let prompt = compose_prompt(text, context.as_ref());
        lock(&self.conversation).push(ChatMessage::user(text, context));

        let config = self.config.connection();
        let conversation = Arc::clone(&self.conversation);
        let notifications = self.notifications.clone();

        match &self.queue {
            // The worker delivers each result before starting the next job,
            // config failures included, so notices keep send order.
            Some(queue) => {
                let queued = queue.submit_with(&prompt, config, move |result| {
                    deliver(result, &conversation, &notifications)
                });
                if let Err(e) = queued {
                    self.report_failure(&e);
                }
            }
            None => {
                let config = match config {
                    Ok(config) => config,
                    Err(e) => {
                        self.report_failure(&e);
                        return;
                    }
                };
                self.reap_finished();
                let bridge = self.bridge.clone();
                self.in_flight.spawn(async move {
                    let result = bridge.send_message(&prompt, &config).await;
                    deliver(result, &conversation, &notifications);
                });
            }
        }
    }

    /// Snapshot the active editor's selection and report it to the panel.
    ///
    /// Non-empty selections are kept as context for the next send.
    pub fn capture_selection(&mut self) -> Option<SelectionContext> {
        let context = capture_selection(
            self.active_editor
                .as_ref()
                .map(|editor| editor as &dyn EditorSurface),
        )?;

        self.notify(Notification::SelectedCode {
            text: context.text.clone(),
            file_name: context.source_label.clone(),
        });

        if !context.is_empty() {
            self.pending_context = Some(context.clone());
        }
        Some(context)
    }

    pub fn set_active_editor(&mut self, editor: Option<EditorSnapshot>) {
        self.active_editor = editor;
    }

    pub fn pending_context(&self) -> Option<&SelectionContext> {
        self.pending_context.as_ref()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.conversation).messages().to_vec()
    }

    /// Wait for every in-flight send to deliver its notification.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            log_abnormal(joined);
        }
        if let Some(queue) = &self.queue {
            if let Err(e) = queue.flush().await {
                warn!(error = %e, "request queue stopped before draining");
            }
        }
    }

    /// Collect tasks that already finished so a long-lived session does not
    /// accumulate them.
    fn reap_finished(&mut self) {
        while let Some(joined) = self.in_flight.try_join_next() {
            log_abnormal(joined);
        }
    }

    fn report_failure(&self, err: &ChatError) {
        warn!(error = %err, "chat send failed");
        self.notify(Notification::error(err.user_notice()));
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("notification dropped, panel is gone");
        }
    }
}

fn log_abnormal(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "send task ended abnormally");
    }
}

fn deliver(
    result: Result<String, ChatError>,
    conversation: &Mutex<Conversation>,
    notifications: &mpsc::UnboundedSender<Notification>,
) {
    let notification = match result {
        Ok(reply) => {
            info!(chars = reply.chars().count(), "assistant replied");
            lock(conversation).push(ChatMessage::assistant(&reply));
            Notification::Response { text: reply }
        }
        Err(e) => {
            warn!(error = %e, "chat send failed");
            Notification::error(e.user_notice())
        }
    };
    let _ = notifications.send(notification);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::context::{Position, Selection};
    use crate::state::ChatRole;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_for(
        config: ConnectionConfig,
        mode: SendMode,
    ) -> (ChatSession, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChatSession::new(Arc::new(config), mode, tx), rx)
    }

    fn drain_notifications(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            out.push(notification);
        }
        out
    }

    async fn reply_server(reply: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": reply })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_send_appends_reply() {
        let server = reply_server("hi").await;
        let (mut session, mut rx) =
            session_for(ConnectionConfig::new(&server.uri(), "key"), SendMode::Ordered);

        session.handle_line(r#"{"command":"sendMessage","text":"hello"}"#);
        session.drain().await;

        assert_eq!(
            drain_notifications(&mut rx),
            vec![Notification::Response {
                text: "hi".to_string()
            }]
        );
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[1], ChatMessage::assistant("hi"));
    }

    #[tokio::test]
    async fn test_failure_is_reported_once_and_session_stays_usable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "message": "bad" })))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "message": "good" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "fine" })))
            .mount(&server)
            .await;

        let (mut session, mut rx) =
            session_for(ConnectionConfig::new(&server.uri(), "key"), SendMode::Concurrent);

        session.send_message("bad");
        session.drain().await;
        assert_eq!(
            drain_notifications(&mut rx),
            vec![Notification::error("Failed to communicate with LLM service")]
        );
        assert_eq!(session.messages().len(), 1);

        session.send_message("good");
        session.drain().await;
        assert_eq!(
            drain_notifications(&mut rx),
            vec![Notification::Response {
                text: "fine".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_config_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "hi" })))
            .expect(0)
            .mount(&server)
            .await;

        let (mut session, mut rx) =
            session_for(ConnectionConfig::new(&server.uri(), ""), SendMode::Ordered);
        session.send_message("hello");
        session.drain().await;

        let notifications = drain_notifications(&mut rx);
        assert_eq!(notifications.len(), 1);
        match &notifications[0] {
            Notification::Error { message } => assert!(message.contains("not configured")),
            other => panic!("unexpected notification: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let (mut session, mut rx) =
            session_for(ConnectionConfig::new("http://localhost", "key"), SendMode::Ordered);
        session.send_message("   ");
        session.drain().await;

        assert_eq!(drain_notifications(&mut rx), vec![Notification::error("Message is empty")]);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_capture_without_editor_is_silent() {
        let (mut session, mut rx) =
            session_for(ConnectionConfig::new("http://localhost", "key"), SendMode::Concurrent);
        assert_eq!(session.capture_selection(), None);
        session.handle_line(r#"{"command":"getSelectedCode"}"#);
        assert!(drain_notifications(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_collapsed_selection_reported_but_not_kept() {
        let (mut session, mut rx) =
            session_for(ConnectionConfig::new("http://localhost", "key"), SendMode::Concurrent);
        session.set_active_editor(Some(EditorSnapshot::new(
            "/src/lib.rs",
            "fn a() {}\n",
            Selection::new(Position::new(0, 3), Position::new(0, 3)),
        )));

        let context = session.capture_selection().unwrap();
        assert_eq!(context.text, "");
        assert_eq!(context.source_label, "/src/lib.rs");
        assert_eq!(session.pending_context(), None);
        assert_eq!(
            drain_notifications(&mut rx),
            vec![Notification::SelectedCode {
                text: String::new(),
                file_name: "/src/lib.rs".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_selection_attached_to_next_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({
                "message": "Selected code from /src/lib.rs:\nfn a() {}\n\nwhat does this do?"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "nothing" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "message": "and now?" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "still nothing" })))
            .expect(1)
            .mount(&server)
            .await;

        let (mut session, mut rx) =
            session_for(ConnectionConfig::new(&server.uri(), "key"), SendMode::Ordered);
        session.handle_line(
            &json!({
                "command": "setActiveEditor",
                "fileName": "/src/lib.rs",
                "text": "fn a() {}\nfn b() {}\n",
                "selection": {"start": {"line": 0, "character": 0}, "end": {"line": 1, "character": 0}}
            })
            .to_string(),
        );
        session.handle_line(r#"{"command":"getSelectedCode"}"#);
        assert!(session.pending_context().is_some());

        session.handle_line(r#"{"command":"sendMessage","text":"what does this do?"}"#);
        assert_eq!(session.pending_context(), None);
        session.handle_line(r#"{"command":"sendMessage","text":"and now?"}"#);
        session.drain().await;

        let notifications = drain_notifications(&mut rx);
        assert_eq!(notifications.len(), 3);
        assert_eq!(
            notifications[1],
            Notification::Response {
                text: "nothing".to_string()
            }
        );

        let messages = session.messages();
        let attached = messages[0].attached_context.as_ref().unwrap();
        assert_eq!(attached.text, "fn a() {}\n");
        assert_eq!(messages[0].text, "what does this do?");
    }

    #[tokio::test]
    async fn test_clear_context_and_editor() {
        let (mut session, _rx) =
            session_for(ConnectionConfig::new("http://localhost", "key"), SendMode::Concurrent);
        session.set_active_editor(Some(EditorSnapshot::new(
            "a.rs",
            "abc",
            Selection::new(Position::new(0, 0), Position::new(0, 3)),
        )));
        session.capture_selection();
        assert!(session.pending_context().is_some());

        session.handle_line(r#"{"command":"clearContext"}"#);
        assert_eq!(session.pending_context(), None);

        session.handle_line(r#"{"command":"clearActiveEditor"}"#);
        assert_eq!(session.capture_selection(), None);
    }

    #[tokio::test]
    async fn test_bad_lines_become_error_notices() {
        let (mut session, mut rx) =
            session_for(ConnectionConfig::new("http://localhost", "key"), SendMode::Concurrent);
        session.handle_line("");
        session.handle_line("{oops");
        session.handle_line(r#"{"command":"reticulate"}"#);

        let notifications = drain_notifications(&mut rx);
        assert_eq!(notifications.len(), 2);
        assert_eq!(
            notifications[1],
            Notification::error("unknown command: reticulate")
        );
    }

    #[tokio::test]
    async fn test_ordered_mode_replies_in_send_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "message": "first" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "response": "one" }))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "message": "second" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "two" })))
            .mount(&server)
            .await;

        let (mut session, mut rx) =
            session_for(ConnectionConfig::new(&server.uri(), "key"), SendMode::Ordered);
        session.send_message("first");
        session.send_message("second");
        session.drain().await;

        assert_eq!(
            drain_notifications(&mut rx),
            vec![
                Notification::Response { text: "one".to_string() },
                Notification::Response { text: "two".to_string() },
            ]
        );
        let texts: Vec<String> = session.messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["first", "second", "one", "two"]);
    }

    #[tokio::test]
    async fn test_concurrent_mode_both_resolve() {
        // Completion order is unspecified in this mode; only check both land.
        let server = reply_server("same").await;
        let (mut session, mut rx) =
            session_for(ConnectionConfig::new(&server.uri(), "key"), SendMode::Concurrent);
        session.send_message("a");
        session.send_message("b");
        session.drain().await;

        let notifications = drain_notifications(&mut rx);
        assert_eq!(notifications.len(), 2);
        assert!(notifications
            .iter()
            .all(|n| matches!(n, Notification::Response { text } if text == "same")));
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_finished_sends_are_reaped() {
        let server = reply_server("ok").await;
        let (mut session, mut rx) =
            session_for(ConnectionConfig::new(&server.uri(), "key"), SendMode::Concurrent);

        for i in 0..25 {
            session.send_message(&format!("message {}", i));
            assert!(session.in_flight.len() <= 2, "in_flight grew to {}", session.in_flight.len());
            assert!(matches!(rx.recv().await, Some(Notification::Response { .. })));
        }

        session.drain().await;
        assert_eq!(session.in_flight.len(), 0);
        assert_eq!(session.messages().len(), 50);
    }

    /// Hands out a good config once, then fails as if the file were corrupted.
    struct BreaksAfterFirst {
        config: ConnectionConfig,
        calls: AtomicUsize,
    }

    impl ConfigSource for BreaksAfterFirst {
        fn connection(&self) -> Result<ConnectionConfig, ChatError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(self.config.clone())
            } else {
                Err(ChatError::Configuration("invalid config file".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_ordered_config_error_waits_for_earlier_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "response": "one" }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = BreaksAfterFirst {
            config: ConnectionConfig::new(&server.uri(), "key"),
            calls: AtomicUsize::new(0),
        };
        let mut session = ChatSession::new(Arc::new(source), SendMode::Ordered, tx);

        session.send_message("first");
        session.send_message("second");
        assert!(drain_notifications(&mut rx).is_empty());
        session.drain().await;

        let notifications = drain_notifications(&mut rx);
        assert_eq!(notifications.len(), 2);
        assert_eq!(
            notifications[0],
            Notification::Response {
                text: "one".to_string()
            }
        );
        match &notifications[1] {
            Notification::Error { message } => assert!(message.contains("invalid config file")),
            other => panic!("unexpected notification: {:?}", other),
        }
    }
}
