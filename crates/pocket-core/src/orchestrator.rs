//! Orchestrator
//!
//! The single entry point front-ends talk to: routes a session's query
//! through its context store and the reasoning loop, and exposes the
//! show/clear operations on history and remembered facts.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::Settings;
use crate::context::ContextProfile;
use crate::error::Result;
use crate::invoker::ToolInvoker;
use crate::provider::LlmProvider;
use crate::reasoning::{LoopEvent, LoopOutcome, ReasoningLoop};
use crate::registry::ProviderRegistry;
use crate::session::{Exchange, SessionId, SessionManager};
use crate::tool::ToolDescriptor;

pub struct Orchestrator {
    reasoning: ReasoningLoop,
    sessions: SessionManager,
    registry: Arc<ProviderRegistry>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ProviderRegistry>,
        profile: Arc<ContextProfile>,
        settings: &Settings,
        system_prompt: impl Into<String>,
    ) -> Self {
        let invoker = ToolInvoker::new(registry.clone())
            .with_timeout(settings.tool_timeout())
            .with_validation(settings.validate_arguments);

        Self {
            reasoning: ReasoningLoop::new(provider, Arc::new(invoker), settings.loop_config(system_prompt)),
            sessions: SessionManager::new(profile, settings.concurrency),
            registry,
        }
    }

    /// Run one query for a session
    pub async fn handle_query(
        &self,
        session_id: &SessionId,
        query: &str,
        events: Option<&UnboundedSender<LoopEvent>>,
    ) -> Result<LoopOutcome> {
        let mut active = self.sessions.acquire(session_id).await?;

        let context = active.session.with_state(|state| {
            for found in state.context.absorb(query) {
                tracing::info!(session_id = %session_id, fact = %found.fact, "Detected context fact in query");
            }
            state.context.clone()
        });

        let outcome = self
            .reasoning
            .run(&mut active.conversation, &context, query, events)
            .await?;

        tracing::info!(
            session_id = %session_id,
            iterations = outcome.iterations,
            tools = outcome.tool_trace.len(),
            elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Query complete"
        );

        let cleared = active.session.with_state(|state| {
            let cleared = state.take_reset();
            if !cleared {
                state.record_exchange(query, outcome.text.clone());
            }
            cleared
        });
        if cleared {
            tracing::debug!(session_id = %session_id, "History cleared mid-query; dropping this turn");
            active.conversation.clear();
        }
        Ok(outcome)
    }

    /// Register a session without running anything
    pub fn open_session(&self, id: &SessionId) {
        self.sessions.get_or_create(id);
    }

    /// Drop a session's state
    pub fn close_session(&self, id: &SessionId) -> bool {
        self.sessions.remove(id)
    }

    pub fn history(&self, id: &SessionId) -> Vec<Exchange> {
        self.sessions.history(id)
    }

    /// Up to `n` most recent exchanges, oldest first
    pub fn recent_history(&self, id: &SessionId, n: usize) -> Vec<Exchange> {
        self.sessions.recent_history(id, n)
    }

    /// Takes effect immediately, even while a query is running
    pub fn clear_history(&self, id: &SessionId) {
        self.sessions.clear(id);
    }

    /// A remembered fact of the session
    pub fn fact(&self, id: &SessionId, fact: &str) -> Option<String> {
        self.sessions
            .get_or_create(id)
            .with_state(|state| state.context.get(fact).map(str::to_string))
    }

    pub fn remember_fact(&self, id: &SessionId, fact: &str, value: &str) {
        self.sessions
            .get_or_create(id)
            .with_state(|state| state.context.remember(fact, value));
    }

    pub fn forget_fact(&self, id: &SessionId, fact: &str) -> Option<String> {
        self.sessions.get_or_create(id).with_state(|state| state.context.forget(fact))
    }

    pub fn set_streaming(&self, enabled: bool) {
        self.reasoning.set_streaming(enabled);
    }

    pub fn is_streaming(&self) -> bool {
        self.reasoning.is_streaming()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        self.registry.all_tools()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names().into_iter().map(str::to_string).collect()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Close every tool-provider connection
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::{EnrichmentRule, PatternDetector};
    use crate::testing::{text_turn, ScriptedProvider};

    fn orchestrator(llm: ScriptedProvider) -> (Orchestrator, Arc<ScriptedProvider>) {
        let detector = PatternDetector::new("city", r"\b[A-Z][a-z]+ville\b").unwrap();
        let profile = ContextProfile::new()
            .with_detector(detector)
            .with_rule(EnrichmentRule::new("weather", "city", "city"));
        let llm = Arc::new(llm);
        let orchestrator = Orchestrator::new(
            llm.clone(),
            Arc::new(ProviderRegistry::new()),
            Arc::new(profile),
            &Settings::default(),
            "Base prompt",
        );
        (orchestrator, llm)
    }

    #[tokio::test]
    async fn test_query_records_exchange_and_context() {
        let (orch, llm) = orchestrator(ScriptedProvider::new().reply(text_turn("Sunny")).reply(text_turn("Still sunny")));
        let id = SessionId::new();

        orch.handle_query(&id, "weather in Smallville?", None).await.unwrap();
        assert_eq!(orch.fact(&id, "city").as_deref(), Some("Smallville"));

        orch.handle_query(&id, "and tomorrow?", None).await.unwrap();
        let history = orch.history(&id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].response, "Still sunny");

        let requests = llm.requests();
        assert!(requests[1].system.starts_with("Base prompt"));
        assert!(requests[1].system.contains("Smallville"));
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_clear_and_forget() {
        let (orch, _) = orchestrator(ScriptedProvider::new().reply(text_turn("ok")));
        let id = SessionId::new();
        orch.handle_query(&id, "Smallville", None).await.unwrap();

        orch.clear_history(&id);
        assert!(orch.history(&id).is_empty());
        assert_eq!(orch.forget_fact(&id, "city").as_deref(), Some("Smallville"));
        assert!(orch.fact(&id, "city").is_none());
    }

    #[tokio::test]
    async fn test_failed_query_leaves_no_exchange() {
        let (orch, _) = orchestrator(ScriptedProvider::new());
        let id = SessionId::new();
        assert!(orch.handle_query(&id, "hello from Smallville", None).await.is_err());
        assert!(orch.history(&id).is_empty());
        assert_eq!(orch.fact(&id, "city").as_deref(), Some("Smallville"));
        assert!(orch.close_session(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_answer_while_query_runs() {
        let (orch, _) = orchestrator(
            ScriptedProvider::new()
                .reply(text_turn("Sunny"))
                .reply(text_turn("Still sunny"))
                .with_delay(Duration::from_secs(30)),
        );
        let orch = Arc::new(orch);
        let id = SessionId::new();
        orch.handle_query(&id, "first", None).await.unwrap();

        let running = {
            let (orch, id) = (orch.clone(), id.clone());
            tokio::spawn(async move { orch.handle_query(&id, "weather in Smallville?", None).await })
        };
        for _ in 0..100 {
            if orch.fact(&id, "city").is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!running.is_finished());
        assert_eq!(orch.fact(&id, "city").as_deref(), Some("Smallville"));
        assert_eq!(orch.recent_history(&id, 2).len(), 1);

        orch.clear_history(&id);
        assert!(orch.history(&id).is_empty());
        assert!(!running.is_finished());

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.text, "Still sunny");
        assert!(orch.history(&id).is_empty());
    }

    #[tokio::test]
    async fn test_streaming_toggle_emits_deltas() {
        let (orch, _) = orchestrator(ScriptedProvider::new().reply(text_turn("Hi")).reply(text_turn("Hi again")));
        let id = SessionId::new();
        assert!(!orch.is_streaming());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        orch.handle_query(&id, "hello", Some(&tx)).await.unwrap();
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, LoopEvent::TextDelta { .. }));
        }

        orch.set_streaming(true);
        let outcome = orch.handle_query(&id, "hello again", Some(&tx)).await.unwrap();
        assert_eq!(outcome.text, "Hi again");
        let mut deltas = String::new();
        while let Ok(event) = rx.try_recv() {
            if let LoopEvent::TextDelta { text } = event {
                deltas.push_str(&text);
            }
        }
        assert_eq!(deltas, "Hi again");
    }
}
