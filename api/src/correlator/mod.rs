//! Bridges the agent's fire-and-forget webhook to an awaitable reply.
//!
//! `request_ai_response` registers a waiter under a fresh message id, posts
//! the message to the agent and suspends. The agent later posts its answer to
//! the callback route, which calls `resolve`. A timer scheduled at
//! registration resolves the waiter if no callback arrives in time.
//!
//! Both completion paths start by removing the entry from the pending map
//! under the same lock, so whichever removes it first is the only one that
//! touches the waiter.

pub mod webhook;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use carepilot_core::chat::MessageType;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use self::webhook::{AgentDispatcher, DispatchError, WebhookPayload};

/// Reply when the agent never called back within the timeout.
pub const TIMEOUT_REPLY: &str =
    "I'm taking longer than usual to process your request. Please try asking again.";
/// Reply when the agent called back with an error or an empty answer.
pub const NO_RESPONSE_REPLY: &str =
    "I received your message but didn't get a response. Please try again.";
/// Reply when the webhook answered with a non-2xx status.
pub const CONNECTION_TROUBLE_REPLY: &str =
    "I'm having trouble connecting to the AI system. Please try again in a moment.";
/// Reply when the webhook request could not be delivered at all.
pub const PROCESSING_TROUBLE_REPLY: &str =
    "I'm having trouble processing your request right now. Please try again.";

const MESSAGE_ID_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// What the agent reported for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Reply(String),
    Failed,
}

impl CallbackOutcome {
    fn into_reply(self) -> String {
        match self {
            CallbackOutcome::Reply(text) if !text.is_empty() => text,
            CallbackOutcome::Reply(_) | CallbackOutcome::Failed => NO_RESPONSE_REPLY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The entry was pending and has now been completed.
    Resolved,
    /// Unknown id, or already resolved by an earlier callback or the timeout.
    Unknown,
}

struct PendingRequest {
    conversation_id: String,
    waiter: oneshot::Sender<String>,
    timer: AbortHandle,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingRequest>>>;

pub struct ResponseCorrelator {
    pending: PendingMap,
    dispatcher: Arc<dyn AgentDispatcher>,
    callback_url: String,
    timeout: Duration,
}

impl ResponseCorrelator {
    pub fn new(
        dispatcher: Arc<dyn AgentDispatcher>,
        callback_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            pending: Arc::default(),
            dispatcher,
            callback_url: callback_url.into(),
            timeout,
        }
    }

    /// Send `content` to the agent and wait for its reply.
    ///
    /// Always yields displayable text: the agent's answer, or one of the
    /// fallback replies on dispatch failure, agent error or timeout.
    pub async fn request_ai_response(
        &self,
        content: &str,
        message_type: MessageType,
        conversation_id: &str,
    ) -> String {
        let (message_id, reply) = self.register(conversation_id);
        let payload = WebhookPayload::new(
            &message_id,
            conversation_id,
            content,
            message_type,
            &self.callback_url,
        );

        tracing::info!(
            message_id = %message_id,
            conversation_id = conversation_id,
            message_type = %message_type,
            "Sending message to AI agent"
        );

        if let Err(err) = self.dispatcher.dispatch(&payload).await {
            self.abandon(&message_id);
            return match err {
                DispatchError::Rejected { status } => {
                    tracing::error!(
                        message_id = %message_id,
                        status = %status,
                        "AI agent webhook rejected the message"
                    );
                    CONNECTION_TROUBLE_REPLY.to_string()
                }
                DispatchError::Transport(err) => {
                    tracing::error!(
                        message_id = %message_id,
                        error = %err,
                        "AI agent webhook could not be reached"
                    );
                    PROCESSING_TROUBLE_REPLY.to_string()
                }
            };
        }

        tracing::debug!(message_id = %message_id, "Webhook delivered, waiting for callback");

        // The sender lives in the map until a completion path takes it, and
        // both paths send before dropping it.
        reply
            .await
            .unwrap_or_else(|_| NO_RESPONSE_REPLY.to_string())
    }

    /// Complete a pending request from the agent's callback.
    pub fn resolve(&self, message_id: &str, outcome: CallbackOutcome) -> ResolveOutcome {
        let Some(entry) = take(&self.pending, message_id) else {
            tracing::warn!(
                message_id = message_id,
                "Callback for unknown or already resolved message"
            );
            return ResolveOutcome::Unknown;
        };
        entry.timer.abort();

        let failed = outcome == CallbackOutcome::Failed;
        if entry.waiter.send(outcome.into_reply()).is_err() {
            tracing::debug!(message_id = message_id, "Caller stopped waiting before the reply");
        }
        tracing::info!(
            message_id = message_id,
            conversation_id = %entry.conversation_id,
            agent_error = failed,
            "AI agent reply delivered"
        );
        ResolveOutcome::Resolved
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    #[cfg(test)]
    pub fn is_pending(&self, message_id: &str) -> bool {
        lock(&self.pending).contains_key(message_id)
    }

    /// Insert a waiter under a fresh id and schedule its timeout.
    ///
    /// The timer task is spawned while the lock is held, so it cannot observe
    /// the map before the entry exists.
    fn register(&self, conversation_id: &str) -> (String, oneshot::Receiver<String>) {
        let (waiter, reply) = oneshot::channel();
        let mut pending = lock(&self.pending);

        let message_id = loop {
            let candidate = next_message_id();
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };

        let timer = tokio::spawn(expire_after(
            Arc::clone(&self.pending),
            message_id.clone(),
            self.timeout,
        ))
        .abort_handle();

        pending.insert(
            message_id.clone(),
            PendingRequest {
                conversation_id: conversation_id.to_string(),
                waiter,
                timer,
            },
        );
        (message_id, reply)
    }

    /// Drop a request whose webhook was never delivered.
    fn abandon(&self, message_id: &str) {
        if let Some(entry) = take(&self.pending, message_id) {
            entry.timer.abort();
        }
    }
}

async fn expire_after(pending: PendingMap, message_id: String, timeout: Duration) {
    tokio::time::sleep(timeout).await;

    let Some(entry) = take(&pending, &message_id) else {
        return;
    };
    tracing::warn!(
        message_id = %message_id,
        conversation_id = %entry.conversation_id,
        timeout_secs = timeout.as_secs(),
        "AI agent did not call back in time"
    );
    let _ = entry.waiter.send(TIMEOUT_REPLY.to_string());
}

fn take(pending: &PendingMap, message_id: &str) -> Option<PendingRequest> {
    lock(pending).remove(message_id)
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// `msg_<unix millis>_<9 base-36 chars>`
fn next_message_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..MESSAGE_ID_SUFFIX_LEN)
        .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
        .collect();
    format!("msg_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use carepilot_core::chat::MessageType;
    use tokio::time::Instant;

    use super::webhook::{AgentDispatcher, DispatchError, DispatchFuture, WebhookPayload};
    use super::*;

    const CALLBACK: &str = "https://copilot.example.org/api/agent/callback";
    const TIMEOUT: Duration = Duration::from_secs(30);

    #[derive(Clone, Copy)]
    enum Delivery {
        Accept,
        Reject(reqwest::StatusCode),
        Unreachable,
    }

    /// Records every payload and answers with a fixed delivery result.
    struct RecordingDispatcher {
        sent: Mutex<Vec<WebhookPayload>>,
        delivery: Delivery,
    }

    impl RecordingDispatcher {
        fn with(delivery: Delivery) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                delivery,
            })
        }

        fn accepting() -> Arc<Self> {
            Self::with(Delivery::Accept)
        }

        fn rejecting(status: reqwest::StatusCode) -> Arc<Self> {
            Self::with(Delivery::Reject(status))
        }

        fn unreachable() -> Arc<Self> {
            Self::with(Delivery::Unreachable)
        }

        fn sent(&self) -> Vec<WebhookPayload> {
            self.sent.lock().unwrap().clone()
        }

        /// Wait until the `n`th payload has been dispatched and return its id.
        async fn nth_message_id(&self, n: usize) -> String {
            loop {
                if let Some(payload) = self.sent.lock().unwrap().get(n) {
                    return payload.message_id.clone();
                }
                tokio::task::yield_now().await;
            }
        }
    }

    impl AgentDispatcher for RecordingDispatcher {
        fn dispatch<'a>(&'a self, payload: &'a WebhookPayload) -> DispatchFuture<'a> {
            Box::pin(async move {
                self.sent.lock().unwrap().push(payload.clone());
                match self.delivery {
                    Delivery::Accept => Ok(()),
                    Delivery::Reject(status) => Err(DispatchError::Rejected { status }),
                    Delivery::Unreachable => {
                        // An unparsable URL fails inside reqwest without touching the network.
                        let err = reqwest::Client::new()
                            .post("not a url")
                            .send()
                            .await
                            .expect_err("relative URL must not send");
                        Err(DispatchError::Transport(err))
                    }
                }
            })
        }
    }

    fn correlator(dispatcher: Arc<RecordingDispatcher>) -> Arc<ResponseCorrelator> {
        Arc::new(ResponseCorrelator::new(dispatcher, CALLBACK, TIMEOUT))
    }

    fn spawn_request(
        correlator: &Arc<ResponseCorrelator>,
        content: &'static str,
    ) -> tokio::task::JoinHandle<String> {
        let correlator = Arc::clone(correlator);
        tokio::spawn(async move {
            correlator
                .request_ai_response(content, MessageType::Text, "conv-1")
                .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn callback_reply_reaches_the_caller() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let request = spawn_request(&correlator, "Show me today's patient list");
        let message_id = dispatcher.nth_message_id(0).await;
        assert!(correlator.is_pending(&message_id));

        let outcome = correlator.resolve(
            &message_id,
            CallbackOutcome::Reply("Patient list: ...".to_string()),
        );
        assert_eq!(outcome, ResolveOutcome::Resolved);
        assert_eq!(request.await.unwrap(), "Patient list: ...");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn payload_carries_id_context_and_callback() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let request = spawn_request(&correlator, "Who missed medication today?");
        let message_id = dispatcher.nth_message_id(0).await;
        correlator.resolve(&message_id, CallbackOutcome::Reply("Nobody.".to_string()));
        request.await.unwrap();

        let sent = dispatcher.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].message_id.starts_with("msg_"));
        assert_eq!(sent[0].conversation_id, "conv-1");
        assert_eq!(sent[0].content, "Who missed medication today?");
        assert_eq!(sent[0].message_type, MessageType::Text);
        assert_eq!(sent[0].callback_url, CALLBACK);
        assert!(sent[0].audio_url.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_callback_times_out_at_configured_duration() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let started = Instant::now();
        let reply = correlator
            .request_ai_response("Anything new?", MessageType::Text, "conv-1")
            .await;
        let elapsed = started.elapsed();

        assert_eq!(reply, TIMEOUT_REPLY);
        assert!(elapsed >= TIMEOUT, "resolved early after {elapsed:?}");
        assert!(elapsed < TIMEOUT + Duration::from_millis(100));

        let message_id = &dispatcher.sent()[0].message_id;
        assert!(!correlator.is_pending(message_id));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_callback_after_timeout_is_a_no_op() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let reply = correlator
            .request_ai_response("Anything new?", MessageType::Text, "conv-1")
            .await;
        assert_eq!(reply, TIMEOUT_REPLY);

        let message_id = dispatcher.sent()[0].message_id.clone();
        let outcome = correlator.resolve(&message_id, CallbackOutcome::Reply("late".to_string()));
        assert_eq!(outcome, ResolveOutcome::Unknown);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_callback_is_a_no_op() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let request = spawn_request(&correlator, "Summarise the care plan");
        let message_id = dispatcher.nth_message_id(0).await;

        assert_eq!(
            correlator.resolve(&message_id, CallbackOutcome::Reply("first".to_string())),
            ResolveOutcome::Resolved
        );
        assert_eq!(
            correlator.resolve(&message_id, CallbackOutcome::Reply("second".to_string())),
            ResolveOutcome::Unknown
        );
        assert_eq!(request.await.unwrap(), "first");
    }

    #[tokio::test(start_paused = true)]
    async fn callback_resolution_cancels_the_timer() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let request = spawn_request(&correlator, "hello");
        let message_id = dispatcher.nth_message_id(0).await;
        correlator.resolve(&message_id, CallbackOutcome::Reply("hi".to_string()));
        assert_eq!(request.await.unwrap(), "hi");

        // Running past the deadline must not disturb anything.
        tokio::time::sleep(TIMEOUT * 2).await;
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_and_timeout_at_the_same_instant_resolve_once() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let request = spawn_request(&correlator, "race");
        let message_id = dispatcher.nth_message_id(0).await;

        // Land the callback on the timer's deadline.
        let callback = {
            let correlator = Arc::clone(&correlator);
            let message_id = message_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(TIMEOUT).await;
                correlator.resolve(&message_id, CallbackOutcome::Reply("from agent".to_string()))
            })
        };

        let reply = request.await.unwrap();
        let outcome = callback.await.unwrap();
        match outcome {
            ResolveOutcome::Resolved => assert_eq!(reply, "from agent"),
            ResolveOutcome::Unknown => assert_eq!(reply, TIMEOUT_REPLY),
        }
        assert!(!correlator.is_pending(&message_id));
    }

    #[tokio::test(start_paused = true)]
    async fn agent_error_and_empty_reply_map_to_fallback() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let failed = spawn_request(&correlator, "first");
        let failed_id = dispatcher.nth_message_id(0).await;
        correlator.resolve(&failed_id, CallbackOutcome::Failed);
        assert_eq!(failed.await.unwrap(), NO_RESPONSE_REPLY);

        let empty = spawn_request(&correlator, "second");
        let empty_id = dispatcher.nth_message_id(1).await;
        correlator.resolve(&empty_id, CallbackOutcome::Reply(String::new()));
        assert_eq!(empty.await.unwrap(), NO_RESPONSE_REPLY);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_dispatch_returns_immediately() {
        let dispatcher = RecordingDispatcher::rejecting(reqwest::StatusCode::BAD_GATEWAY);
        let correlator = correlator(Arc::clone(&dispatcher));

        let started = Instant::now();
        let reply = correlator
            .request_ai_response("hello", MessageType::Text, "conv-1")
            .await;

        assert_eq!(reply, CONNECTION_TROUBLE_REPLY);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(correlator.pending_count(), 0);

        let message_id = dispatcher.sent()[0].message_id.clone();
        assert_eq!(
            correlator.resolve(&message_id, CallbackOutcome::Reply("late".to_string())),
            ResolveOutcome::Unknown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn undeliverable_dispatch_returns_immediately() {
        let dispatcher = RecordingDispatcher::unreachable();
        let correlator = correlator(Arc::clone(&dispatcher));

        let started = Instant::now();
        let reply = correlator
            .request_ai_response("hello", MessageType::Text, "conv-1")
            .await;

        assert_eq!(reply, PROCESSING_TROUBLE_REPLY);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(correlator.pending_count(), 0);

        let message_id = dispatcher.sent()[0].message_id.clone();
        assert!(!correlator.is_pending(&message_id));
        assert_eq!(
            correlator.resolve(&message_id, CallbackOutcome::Reply("late".to_string())),
            ResolveOutcome::Unknown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_caller_is_still_cleaned_up_by_timeout() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let request = spawn_request(&correlator, "client will disconnect");
        let message_id = dispatcher.nth_message_id(0).await;
        request.abort();
        let _ = request.await;
        assert!(correlator.is_pending(&message_id));

        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;
        assert!(!correlator.is_pending(&message_id));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_resolve_independently() {
        let dispatcher = RecordingDispatcher::accepting();
        let correlator = correlator(Arc::clone(&dispatcher));

        let first = spawn_request(&correlator, "first");
        let first_id = dispatcher.nth_message_id(0).await;
        let second = spawn_request(&correlator, "second");
        let second_id = dispatcher.nth_message_id(1).await;
        assert_ne!(first_id, second_id);
        assert_eq!(correlator.pending_count(), 2);

        correlator.resolve(&second_id, CallbackOutcome::Reply("reply two".to_string()));
        correlator.resolve(&first_id, CallbackOutcome::Reply("reply one".to_string()));

        assert_eq!(first.await.unwrap(), "reply one");
        assert_eq!(second.await.unwrap(), "reply two");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn message_ids_have_time_and_random_parts() {
        let id = next_message_id();
        let mut parts = id.splitn(3, '_');
        assert_eq!(parts.next(), Some("msg"));
        assert!(parts.next().unwrap().parse::<i64>().is_ok());
        let suffix = parts.next().unwrap();
        assert_eq!(suffix.len(), MESSAGE_ID_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
        assert_ne!(next_message_id(), id);
    }
}
