//! Event dispatch: turns one inbound event into at most one outbound reply.
//!
//! Runs for every pulled event. Performs:
//! 1. Private-message filter
//! 2. Sender extraction
//! 3. Duplicate-delivery suppression (in-flight marker)
//! 4. Text extraction
//! 5. Slash command interception
//! 6. Auto-reply policy gate
//! 7. Session append + AI completion
//!
//! The pipeline is fallible internally but the public surface never fails;
//! a fault is logged at this boundary and the event produces no reply.

use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, error, info};

use murmur_agent::CompletionClient;
use murmur_core::types::{InboundEvent, OutboundMessage, Role};
use murmur_sessions::SessionStore;
use murmur_users::PolicyStore;

use crate::commands::CommandRouter;

pub struct Dispatcher {
    router: CommandRouter,
    sessions: Arc<SessionStore>,
    policy: Arc<PolicyStore>,
    completion: Arc<CompletionClient>,
    in_flight: DashSet<String>,
}

impl Dispatcher {
    pub fn new(
        router: CommandRouter,
        sessions: Arc<SessionStore>,
        policy: Arc<PolicyStore>,
        completion: Arc<CompletionClient>,
    ) -> Self {
        Self {
            router,
            sessions,
            policy,
            completion,
            in_flight: DashSet::new(),
        }
    }

    /// Handle one inbound event.
    ///
    /// Never fails: internal faults surface as "no reply" so one bad event
    /// cannot take down the poll loop, and the in-flight marker is released
    /// on every path.
    pub async fn handle_event(&self, event: InboundEvent) -> Option<OutboundMessage> {
        match self.process(event).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "event dispatch failed");
                None
            }
        }
    }

    async fn process(&self, event: InboundEvent) -> anyhow::Result<Option<OutboundMessage>> {
        if !event.is_private_message() {
            return Ok(None);
        }

        let Some(user_id) = event.user_id.clone().filter(|id| !id.is_empty()) else {
            return Ok(None);
        };

        // Duplicate-delivery suppression. Events without an id are processed
        // unguarded; the feed gives us nothing to key on.
        let _guard = match event.message_id.as_deref().filter(|id| !id.is_empty()) {
            Some(message_id) => match InFlightGuard::acquire(&self.in_flight, message_id) {
                Some(guard) => Some(guard),
                None => {
                    debug!(message_id, "duplicate event already in flight");
                    return Ok(None);
                }
            },
            None => None,
        };

        let Some(text) = event.text() else {
            return Ok(None);
        };
        info!(user_id = %user_id, text = %text, "inbound private message");

        // Commands answer directly: no policy gate, no session record.
        if let Some(reply) = self.router.handle(&user_id, &text)? {
            return Ok(Some(OutboundMessage::private_text(user_id, reply)));
        }

        if !self.policy.is_enabled(&user_id) {
            debug!(user_id = %user_id, "auto-reply disabled, ignoring message");
            return Ok(None);
        }

        self.sessions.add_turn(&user_id, Role::User, text);
        let history = self.sessions.history(&user_id, None);
        let prompt = self.policy.prompt(&user_id);

        let Some(reply) = self.completion.generate(prompt.as_deref(), &history).await else {
            return Ok(None);
        };

        self.sessions
            .add_turn(&user_id, Role::Assistant, reply.clone());
        Ok(Some(OutboundMessage::private_text(user_id, reply)))
    }
}

/// Scoped in-flight marker for a message id.
///
/// Removal happens in `Drop`, so the marker is cleared on every exit path,
/// a panic inside the pipeline included.
struct InFlightGuard<'a> {
    set: &'a DashSet<String>,
    message_id: String,
}

impl<'a> InFlightGuard<'a> {
    /// `None` when the id is already marked, i.e. a concurrent duplicate.
    fn acquire(set: &'a DashSet<String>, message_id: &str) -> Option<Self> {
        if set.insert(message_id.to_string()) {
            Some(Self {
                set,
                message_id: message_id.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_agent::{ChatProvider, ChatRequest, ProviderError};
    use murmur_core::config::CompletionConfig;
    use std::time::Duration;

    /// Echoes the last user turn after an optional delay.
    struct EchoProvider {
        delay: Duration,
    }

    #[async_trait]
    impl ChatProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, req: &ChatRequest) -> Result<String, ProviderError> {
            tokio::time::sleep(self.delay).await;
            let last = req.messages.last().map(|t| t.content.as_str()).unwrap_or("");
            Ok(format!("echo: {last}"))
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        sessions: Arc<SessionStore>,
        policy: Arc<PolicyStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture_with_delay(delay: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(10, Duration::from_secs(3600)));
        let policy = Arc::new(PolicyStore::open(dir.path().join("policy.json"), &[]).unwrap());
        let completion = Arc::new(CompletionClient::new(
            Box::new(EchoProvider { delay }),
            &CompletionConfig::default(),
            "default prompt",
        ));
        let router = CommandRouter::new(
            Arc::clone(&sessions),
            Arc::clone(&policy),
            Some("wx_admin".to_string()),
        );
        let dispatcher = Dispatcher::new(
            router,
            Arc::clone(&sessions),
            Arc::clone(&policy),
            completion,
        );
        Fixture {
            dispatcher,
            sessions,
            policy,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_delay(Duration::ZERO)
    }

    fn private_text_event(user: &str, msg_id: &str, text: &str) -> InboundEvent {
        serde_json::from_value(serde_json::json!({
            "type": "message",
            "detail_type": "private",
            "user_id": user,
            "message_id": msg_id,
            "message": [{"type": "text", "data": {"text": text}}],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn non_private_events_are_ignored() {
        let f = fixture();
        f.policy.enable("wx_1").unwrap();

        let group: InboundEvent = serde_json::from_value(serde_json::json!({
            "type": "message",
            "detail_type": "group",
            "user_id": "wx_1",
            "message_id": "m1",
            "message": [{"type": "text", "data": {"text": "hi"}}],
        }))
        .unwrap();
        assert!(f.dispatcher.handle_event(group).await.is_none());

        let notice: InboundEvent = serde_json::from_value(serde_json::json!({
            "type": "notice",
            "detail_type": "friend_add",
        }))
        .unwrap();
        assert!(f.dispatcher.handle_event(notice).await.is_none());

        // No side effects either.
        assert!(f.sessions.history("wx_1", None).is_empty());
    }

    #[tokio::test]
    async fn missing_user_id_yields_nothing() {
        let f = fixture();
        let event: InboundEvent = serde_json::from_value(serde_json::json!({
            "type": "message",
            "detail_type": "private",
            "message": [{"type": "text", "data": {"text": "hi"}}],
        }))
        .unwrap();
        assert!(f.dispatcher.handle_event(event).await.is_none());
    }

    #[tokio::test]
    async fn no_text_segments_yields_nothing() {
        let f = fixture();
        f.policy.enable("wx_1").unwrap();
        let event: InboundEvent = serde_json::from_value(serde_json::json!({
            "type": "message",
            "detail_type": "private",
            "user_id": "wx_1",
            "message_id": "m1",
            "message": [{"type": "image", "data": {"file": "cat.png"}}],
        }))
        .unwrap();
        assert!(f.dispatcher.handle_event(event).await.is_none());
        assert!(f.sessions.history("wx_1", None).is_empty());
    }

    #[tokio::test]
    async fn disabled_user_gets_no_reply_then_on_enables_the_flow() {
        let f = fixture();

        let silent = f
            .dispatcher
            .handle_event(private_text_event("wx_1", "m1", "hello"))
            .await;
        assert!(silent.is_none());
        assert!(f.sessions.history("wx_1", None).is_empty());

        let on = f
            .dispatcher
            .handle_event(private_text_event("wx_1", "m2", "/on"))
            .await
            .expect("command reply");
        assert_eq!(on.detail_type, "private");

        let reply = f
            .dispatcher
            .handle_event(private_text_event("wx_1", "m3", "hello"))
            .await
            .expect("ai reply");
        assert_eq!(reply.user_id, "wx_1");

        // The exchange is recorded as a user turn then an assistant turn.
        let history = f.sessions.history("wx_1", None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "echo: hello");
    }

    #[tokio::test]
    async fn command_replies_bypass_the_policy_gate() {
        let f = fixture();
        // wx_1 is disabled, but /status still answers.
        let reply = f
            .dispatcher
            .handle_event(private_text_event("wx_1", "m1", "/status"))
            .await
            .expect("status reply");
        let text = reply.message[0].data.text.as_deref().unwrap();
        assert!(text.contains("off"));
        // Command traffic is never recorded in the session.
        assert!(f.sessions.history("wx_1", None).is_empty());
    }

    #[tokio::test]
    async fn duplicate_message_id_produces_at_most_one_reply() {
        let f = fixture_with_delay(Duration::from_millis(50));
        f.policy.enable("wx_1").unwrap();

        let (a, b) = tokio::join!(
            f.dispatcher
                .handle_event(private_text_event("wx_1", "dup", "hello")),
            f.dispatcher
                .handle_event(private_text_event("wx_1", "dup", "hello")),
        );
        assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
    }

    #[tokio::test]
    async fn marker_is_released_after_processing() {
        let f = fixture();
        f.policy.enable("wx_1").unwrap();

        let first = f
            .dispatcher
            .handle_event(private_text_event("wx_1", "m1", "one"))
            .await;
        assert!(first.is_some());

        // Same id again after completion: processed normally, not suppressed.
        let second = f
            .dispatcher
            .handle_event(private_text_event("wx_1", "m1", "two"))
            .await;
        assert!(second.is_some());
    }
}
