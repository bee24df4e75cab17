//! Reply dispatch: immediate rule-based replies and background generative ones.
//!
//! Comments go to the language model when one is configured. The dispatcher
//! records a placeholder on the event's outcome right away, then resolves the
//! real reply on a tracked background task. Failures and timeouts resolve to
//! a keyword-matched product answer. Either way the response callback fires
//! exactly once per dispatched event.

pub mod prompt;
pub mod rules;

pub use rules::RuleResponder;

use crate::config::{DispatchConfig, ProductConfig};
use crate::error::LiveError;
use crate::events::{EventKind, Interaction, InteractionEvent, UserInfo};
use crate::llm::LanguageModelService;
use crate::runtime::RuntimeEvent;
use crate::scheduler::outcome::OutcomeLog;
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Where a delivered reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// Template built from event fields.
    Rule,
    /// Language model output.
    Generated,
    /// Keyword answer used after a language-model failure.
    Fallback,
}

/// Context handed to the response callback alongside the reply text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseContext {
    pub event_id: String,
    pub kind: EventKind,
    pub user: UserInfo,
    pub content: String,
    /// Reply slot granted by the throttle, in epoch milliseconds.
    pub timestamp_ms: u64,
    pub priority: u32,
    pub sequence: u64,
    pub source: ReplySource,
}

/// The single registered reply sink.
pub type ResponseCallback = Arc<dyn Fn(String, ResponseContext) + Send + Sync>;

/// Shared slot holding the current response callback.
pub type ResponseSink = Arc<RwLock<Option<ResponseCallback>>>;

/// Delivers final replies: updates the outcome log, emits a runtime event,
/// and invokes the callback.
pub struct ReplyDelivery {
    sink: ResponseSink,
    outcomes: Arc<Mutex<OutcomeLog>>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
}

impl ReplyDelivery {
    pub fn new(
        sink: ResponseSink,
        outcomes: Arc<Mutex<OutcomeLog>>,
        runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    ) -> Self {
        Self {
            sink,
            outcomes,
            runtime_tx,
        }
    }

    /// Record a placeholder reply. Does not invoke the callback.
    pub fn provisional(&self, event_id: &str, placeholder: &str) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .update(event_id, |o| {
                o.response = Some(placeholder.to_owned());
                o.provisional = true;
            });
        self.emit(RuntimeEvent::ReplyProvisional {
            event_id: event_id.to_owned(),
            text: placeholder.to_owned(),
        });
    }

    /// Deliver the final reply for an event.
    pub fn deliver(&self, text: String, mut ctx: ResponseContext, source: ReplySource) {
        ctx.source = source;
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .update(&ctx.event_id, |o| {
                o.response = Some(text.clone());
                o.response_generated = true;
                o.provisional = false;
                o.source = Some(source);
            });
        info!(event_id = %ctx.event_id, kind = %ctx.kind, ?source, "reply: {text}");
        self.emit(RuntimeEvent::ReplyFinal {
            event_id: ctx.event_id.clone(),
            text: text.clone(),
            source,
        });

        // Clone the callback out so it runs without the lock held.
        let callback = self
            .sink
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match callback {
            Some(cb) => cb(text, ctx),
            None => debug!(event_id = %ctx.event_id, "no response callback registered"),
        }
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }
}

/// Immediate result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Reply delivered synchronously.
    Final { text: String, source: ReplySource },
    /// Placeholder recorded; the real reply resolves in the background.
    Provisional { placeholder: String },
}

/// Chooses and runs the reply path for each event.
pub struct Dispatcher {
    config: DispatchConfig,
    rules: Arc<RuleResponder>,
    llm: Option<Arc<dyn LanguageModelService>>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        product: ProductConfig,
        llm: Option<Arc<dyn LanguageModelService>>,
    ) -> Self {
        Self {
            rules: Arc::new(RuleResponder::new(config.templates.clone(), product)),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            llm,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Dispatch a reply for `event`. The callback fires exactly once, either
    /// before this returns or when the background request resolves.
    pub fn dispatch(
        &self,
        event: InteractionEvent,
        ctx: ResponseContext,
        delivery: &Arc<ReplyDelivery>,
    ) -> DispatchResult {
        let generative = match (&event.interaction, &self.llm) {
            (Interaction::Comment { .. }, Some(llm)) if self.config.generative_comments => {
                Some(Arc::clone(llm))
            }
            _ => None,
        };

        let Some(llm) = generative else {
            return self.deliver_now(&event, ctx, delivery, ReplySource::Rule);
        };

        if tokio::runtime::Handle::try_current().is_err() {
            warn!(event_id = %event.id, "no async runtime for generative reply, answering from rules");
            return self.deliver_now(&event, ctx, delivery, ReplySource::Fallback);
        }

        let placeholder = self.rules.render_for(&self.config.placeholder, &event);
        delivery.provisional(&event.id, &placeholder);

        let rules = Arc::clone(&self.rules);
        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.child_token();
        let delivery = Arc::clone(delivery);
        let system_prompt = self.config.system_prompt.clone();
        let max_tokens = self.config.max_tokens;
        let timeout = Duration::from_millis(self.config.request_timeout_ms);

        self.tracker.spawn(async move {
            let comment = match &event.interaction {
                Interaction::Comment { text } => text.trim().to_owned(),
                _ => event.content.clone(),
            };
            let prompt = prompt::build_prompt(rules.product_name(), &event.user.nickname, &comment);

            let result = tokio::select! {
                () = cancel.cancelled() => Err(LiveError::Llm("request cancelled".into())),
                r = generate(llm, permits, &prompt, &system_prompt, max_tokens, timeout) => r,
            };

            let (text, source) = match result {
                Ok(text) => (text, ReplySource::Generated),
                Err(e) => {
                    warn!(event_id = %event.id, "generative reply failed, using fallback: {e}");
                    (
                        rules.knowledge_answer(&event.user.nickname, &comment),
                        ReplySource::Fallback,
                    )
                }
            };
            delivery.deliver(text, ctx, source);
        });

        DispatchResult::Provisional { placeholder }
    }

    fn deliver_now(
        &self,
        event: &InteractionEvent,
        ctx: ResponseContext,
        delivery: &ReplyDelivery,
        source: ReplySource,
    ) -> DispatchResult {
        let text = self.rules.reply(event);
        delivery.deliver(text.clone(), ctx, source);
        DispatchResult::Final { text, source }
    }

    /// Number of generative replies still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for in-flight generative replies. Returns false on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();
        drained
    }

    /// Cancel every outstanding request; each resolves via the fallback answer.
    pub fn cancel_outstanding(&self) {
        self.cancel.cancel();
    }
}

async fn generate(
    llm: Arc<dyn LanguageModelService>,
    permits: Arc<Semaphore>,
    prompt: &str,
    system_prompt: &str,
    max_tokens: u32,
    timeout: Duration,
) -> crate::error::Result<String> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|e| LiveError::Llm(format!("dispatcher closed: {e}")))?;

    let text = tokio::time::timeout(timeout, llm.generate_reply(prompt, system_prompt, max_tokens))
        .await
        .map_err(|_| LiveError::Llm(format!("timed out after {}ms", timeout.as_millis())))??;

    let text = text.trim();
    if text.is_empty() {
        return Err(LiveError::Llm("empty reply".into()));
    }
    Ok(text.to_owned())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::outcome::Outcome;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct CannedLlm(crate::error::Result<String>);

    #[async_trait]
    impl LanguageModelService for CannedLlm {
        async fn generate_reply(&self, _: &str, _: &str, _: u32) -> crate::error::Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(LiveError::Llm(e.to_string())),
            }
        }
    }

    struct StalledLlm;

    #[async_trait]
    impl LanguageModelService for StalledLlm {
        async fn generate_reply(&self, _: &str, _: &str, _: u32) -> crate::error::Result<String> {
            std::future::pending().await
        }
    }

    type Received = Arc<Mutex<Vec<(String, ResponseContext)>>>;

    fn harness() -> (Arc<ReplyDelivery>, Arc<Mutex<OutcomeLog>>, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = Arc::clone(&received);
        let callback: ResponseCallback = Arc::new(move |text, ctx| {
            sink_received.lock().unwrap().push((text, ctx));
        });
        let sink: ResponseSink = Arc::new(RwLock::new(Some(callback)));
        let outcomes = Arc::new(Mutex::new(OutcomeLog::new(16)));
        let delivery = Arc::new(ReplyDelivery::new(sink, Arc::clone(&outcomes), None));
        (delivery, outcomes, received)
    }

    fn comment_event(text: &str) -> (InteractionEvent, ResponseContext, Outcome) {
        let interaction = Interaction::Comment { text: text.into() };
        let user = UserInfo {
            id: "u1".into(),
            nickname: "Mia".into(),
            level: 1,
        };
        let event = InteractionEvent {
            id: "e1".into(),
            content: interaction.describe(),
            interaction,
            arrival_ms: 0,
            user: user.clone(),
            priority: 30,
            metadata: HashMap::new(),
            processed: true,
            response_generated: false,
            response_content: None,
        };
        let ctx = ResponseContext {
            event_id: "e1".into(),
            kind: EventKind::Comment,
            user: user.clone(),
            content: text.into(),
            timestamp_ms: 100,
            priority: 30,
            sequence: 0,
            source: ReplySource::Rule,
        };
        let outcome = Outcome {
            event_id: "e1".into(),
            kind: EventKind::Comment,
            user,
            content: text.into(),
            priority: 30,
            sequence: 0,
            response: None,
            response_generated: false,
            provisional: false,
            source: None,
            skipped: None,
            timestamp_ms: 100,
        };
        (event, ctx, outcome)
    }

    #[test]
    fn rule_reply_is_immediate_without_llm() {
        let (delivery, outcomes, received) = harness();
        let dispatcher = Dispatcher::new(DispatchConfig::default(), ProductConfig::default(), None);
        let (event, ctx, outcome) = comment_event("how much is it?");
        outcomes.lock().unwrap().record(outcome);

        let result = dispatcher.dispatch(event, ctx, &delivery);
        assert!(matches!(result, DispatchResult::Final { source: ReplySource::Rule, .. }));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert!(received[0].0.contains("live price"));
        assert!(outcomes.lock().unwrap().get("e1").unwrap().response_generated);
    }

    #[tokio::test]
    async fn generative_reply_replaces_placeholder() {
        let (delivery, outcomes, received) = harness();
        let llm: Arc<dyn LanguageModelService> =
            Arc::new(CannedLlm(Ok("It holds 350 ml, Mia.".into())));
        let dispatcher =
            Dispatcher::new(DispatchConfig::default(), ProductConfig::default(), Some(llm));
        let (event, ctx, outcome) = comment_event("how big is it?");
        outcomes.lock().unwrap().record(outcome);

        let result = dispatcher.dispatch(event, ctx, &delivery);
        let DispatchResult::Provisional { placeholder } = result else {
            panic!("expected provisional result");
        };
        assert!(placeholder.contains("Mia"));

        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "It holds 350 ml, Mia.");
        assert_eq!(received[0].1.source, ReplySource::Generated);

        let stored = outcomes.lock().unwrap().get("e1").unwrap();
        assert!(!stored.provisional);
        assert!(stored.response_generated);
        assert_eq!(stored.response.as_deref(), Some("It holds 350 ml, Mia."));
    }

    #[tokio::test]
    async fn llm_error_falls_back_to_keyword_answer() {
        let (delivery, outcomes, received) = harness();
        let llm: Arc<dyn LanguageModelService> =
            Arc::new(CannedLlm(Err(LiveError::Llm("boom".into()))));
        let dispatcher =
            Dispatcher::new(DispatchConfig::default(), ProductConfig::default(), Some(llm));
        let (event, ctx, outcome) = comment_event("when will it ship?");
        outcomes.lock().unwrap().record(outcome);

        dispatcher.dispatch(event, ctx, &delivery);
        assert!(dispatcher.drain(Duration::from_secs(5)).await);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1.source, ReplySource::Fallback);
        assert!(received[0].0.contains("48 hours"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back() {
        let (delivery, outcomes, received) = harness();
        let llm: Arc<dyn LanguageModelService> = Arc::new(StalledLlm);
        let config = DispatchConfig {
            request_timeout_ms: 50,
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(config, ProductConfig::default(), Some(llm));
        let (event, ctx, outcome) = comment_event("hello");
        outcomes.lock().unwrap().record(outcome);

        dispatcher.dispatch(event, ctx, &delivery);
        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(received.lock().unwrap()[0].1.source, ReplySource::Fallback);
    }

    #[tokio::test]
    async fn cancel_outstanding_resolves_with_fallback() {
        let (delivery, outcomes, received) = harness();
        let llm: Arc<dyn LanguageModelService> = Arc::new(StalledLlm);
        let dispatcher =
            Dispatcher::new(DispatchConfig::default(), ProductConfig::default(), Some(llm));
        let (event, ctx, outcome) = comment_event("hello");
        outcomes.lock().unwrap().record(outcome);

        dispatcher.dispatch(event, ctx, &delivery);
        assert_eq!(dispatcher.in_flight(), 1);
        assert!(!dispatcher.drain(Duration::from_millis(20)).await);

        dispatcher.cancel_outstanding();
        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
