//! Event router.
//!
//! Consumes one raw agent event at a time, resolves it to a session and a
//! client-visible run, and produces the outbound notifications for it.
//!
//! ## Rules
//!
//! 1. Sequence gaps are reported on the general channel and never stall the
//!    event that exposed them.
//! 2. A tool start advances the run's message index *before* the tool-start
//!    notification goes out, so every later delta lands in the next bubble.
//! 3. Verbosity only hides the general-channel copy of tool events. Tool
//!    markers on the chat channel are unconditional.
//! 4. Aborted runs emit nothing on the chat channel. Their terminal event
//!    only cleans up.
//! 5. Every terminal lifecycle event releases the host's run bookkeeping.

use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use runstream_protocol::{
    AgentEvent, AgentStream, ChatEvent, ChatMessage, ChatState, LifecycleData, LifecyclePhase,
    SeqGapDiagnostic, ToolPhase, ToolRef, VerboseLevel,
};

use crate::config::RouterConfig;
use crate::context::RunContext;
use crate::state::{RunLink, RunState};

// ============================================================================
// Outbound notifications
// ============================================================================

/// One notification produced by the router.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", content = "payload", rename_all = "snake_case")]
pub enum Outbound {
    /// Raw agent event on the general channel.
    Agent(AgentEvent),
    /// Sequence gap diagnostic on the general channel.
    Diagnostic(SeqGapDiagnostic),
    /// Chat notification for one session.
    Chat(ChatEvent),
}

impl Outbound {
    /// Whether this outbound targets the general channel.
    pub fn is_general(&self) -> bool {
        !matches!(self, Self::Chat(_))
    }

    /// Whether transports may drop this for slow consumers.
    pub fn is_droppable(&self) -> bool {
        match self {
            Self::Chat(event) => event.is_droppable(),
            _ => false,
        }
    }

    /// Session the outbound belongs to, if known.
    pub fn session_key(&self) -> Option<&str> {
        match self {
            Self::Agent(event) => event.session_key.as_deref(),
            Self::Diagnostic(diag) => diag.session_key.as_deref(),
            Self::Chat(event) => Some(&event.session_key),
        }
    }

    pub fn as_chat(&self) -> Option<&ChatEvent> {
        match self {
            Self::Chat(event) => Some(event),
            _ => None,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routes raw agent events into chat notifications.
///
/// Single-threaded by construction: `route` takes `&mut self`, so one event
/// is fully classified before the next is considered.
pub struct EventRouter {
    config: RouterConfig,
    context: Arc<dyn RunContext>,
    state: RunState,
}

impl EventRouter {
    pub fn new(config: RouterConfig, context: Arc<dyn RunContext>) -> Self {
        Self {
            config,
            context,
            state: RunState::new(),
        }
    }

    /// Read-only view of the run bookkeeping.
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Record the run link for a client send.
    ///
    /// `context_key` is the execution run id the executor will stamp on its
    /// events; `client_run_id` is the id the client generated.
    pub fn begin_run(&mut self, context_key: &str, session_key: &str, client_run_id: &str) {
        debug!(
            "Linked client run {} (session {}) to context {}",
            client_run_id, session_key, context_key
        );
        self.state
            .registry
            .add(context_key, RunLink::new(session_key, client_run_id));
    }

    /// Wipe all run bookkeeping (hot restart).
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Route one raw event.
    pub fn route(&mut self, mut event: AgentEvent) -> Vec<Outbound> {
        let mut out = Vec::new();

        let link = self.state.registry.peek(&event.run_id).cloned();
        let session_key = link
            .as_ref()
            .map(|l| l.session_key.clone())
            .or_else(|| event.session_key.clone())
            .or_else(|| self.context.session_for_run(&event.run_id));
        let client_run_id = link
            .as_ref()
            .map_or_else(|| event.run_id.clone(), |l| l.client_run_id.clone());

        if let Some(gap) = self.state.sequence.observe(&event.run_id, event.seq) {
            warn!(
                "Sequence gap on run {}: expected {}, received {}",
                event.run_id, gap.expected, gap.received
            );
            if self.config.emit_seq_gaps {
                out.push(Outbound::Diagnostic(SeqGapDiagnostic::new(
                    &event.run_id,
                    session_key.clone(),
                    event.ts,
                    gap.expected,
                    gap.received,
                )));
            }
        }

        let aborted = self
            .state
            .aborts
            .is_aborted(&[client_run_id.as_str(), event.run_id.as_str()]);

        event.session_key = session_key.clone();
        let hide_detail = event.stream == AgentStream::Tool
            && self.verbose_for(session_key.as_deref()).is_off();
        if hide_detail {
            debug!("Verbose off, not broadcasting tool event {}", event.seq);
        } else {
            out.push(Outbound::Agent(event.clone()));
        }

        if let Some(lifecycle) = event.lifecycle()
            && lifecycle.phase.is_terminal()
        {
            self.finish_run(&event, &lifecycle, link, session_key, client_run_id, aborted, &mut out);
            return out;
        }

        if aborted {
            debug!("Run {} aborted, suppressing {}", client_run_id, event.stream);
            return out;
        }

        let state = match event.stream {
            AgentStream::Assistant => self.on_assistant(&event, &client_run_id),
            AgentStream::Tool => self.on_tool(&event, &client_run_id),
            _ => None,
        };

        if let Some(state) = state {
            match session_key {
                Some(session_key) => out.push(Outbound::Chat(ChatEvent::new(
                    client_run_id,
                    session_key,
                    event.seq,
                    state,
                ))),
                None => debug!(
                    "No session for run {}, dropping {} notification",
                    event.run_id,
                    state.name()
                ),
            }
        }

        out
    }

    /// Handle a client abort request.
    ///
    /// Without a `run_id`, every linked or host-active run of the session is
    /// aborted. A `run_id` may be a client run id or an execution run id; it
    /// must be linked to, or host-active in, `session_key`, otherwise nothing
    /// happens. Emits one `aborted` notification per newly aborted run.
    pub fn abort(&mut self, session_key: &str, run_id: Option<&str>) -> Vec<Outbound> {
        let now = chrono::Utc::now().timestamp_millis();

        // (context_key, client_run_id, is_head)
        let mut targets: Vec<(Option<String>, String, bool)> = Vec::new();
        match run_id {
            Some(id) => match self.resolve_abort_target(session_key, id) {
                Some(target) => targets.push(target),
                None => {
                    debug!(
                        "Abort for run {} ignored, not active in session {}",
                        id, session_key
                    );
                    return Vec::new();
                }
            },
            None => {
                for (context, link, is_head) in self.state.registry.links_for_session(session_key)
                {
                    targets.push((Some(context), link.client_run_id, is_head));
                }
                for id in self.context.runs_for_session(session_key) {
                    let linked = self.state.registry.peek(&id).is_some()
                        || targets.iter().any(|(_, client, _)| *client == id);
                    if !linked {
                        targets.push((None, id, true));
                    }
                }
            }
        }

        let mut out = Vec::new();
        for (context, client_run_id, is_head) in targets {
            if self.state.aborts.is_aborted(&[client_run_id.as_str()]) {
                continue;
            }

            if is_head {
                // Suppress until the terminal event arrives.
                self.state.aborts.mark(&client_run_id, now);
            } else if let Some(context) = &context {
                // Queued behind another run: nothing streamed yet, just unlink it.
                self.state
                    .registry
                    .remove(context, &client_run_id, Some(session_key));
            }

            let seq = self
                .state
                .sequence
                .last(context.as_deref().unwrap_or(&client_run_id));
            debug!("Aborted run {} in session {}", client_run_id, session_key);
            out.push(Outbound::Chat(ChatEvent::new(
                client_run_id,
                session_key,
                seq,
                ChatState::Aborted,
            )));
        }

        out
    }

    /// Find the run an explicit abort refers to, as `(context_key,
    /// client_run_id, is_head)`.
    fn resolve_abort_target(
        &self,
        session_key: &str,
        run_id: &str,
    ) -> Option<(Option<String>, String, bool)> {
        if let Some((context, is_head)) = self.state.registry.find(run_id, session_key) {
            return Some((Some(context), run_id.to_string(), is_head));
        }
        // An execution run id: abort the client run at the head of its queue.
        if let Some(link) = self.state.registry.peek(run_id)
            && link.session_key == session_key
        {
            return Some((Some(run_id.to_string()), link.client_run_id.clone(), true));
        }
        self.context
            .runs_for_session(session_key)
            .into_iter()
            .any(|active| active == run_id)
            .then(|| (None, run_id.to_string(), true))
    }

    fn on_assistant(&mut self, event: &AgentEvent, client_run_id: &str) -> Option<ChatState> {
        let text = event.assistant()?.text?;
        let message_index = self.state.progress.current(client_run_id);
        Some(ChatState::Delta {
            message_index,
            message: Some(ChatMessage::assistant_text(text, event.ts)),
        })
    }

    fn on_tool(&mut self, event: &AgentEvent, client_run_id: &str) -> Option<ChatState> {
        let data = event.tool()?;
        let tool = ToolRef {
            name: data.name,
            tool_call_id: data.tool_call_id,
        };
        match data.phase {
            ToolPhase::Start => {
                let index = self.state.progress.advance(client_run_id);
                debug!(
                    "Tool {} started on run {}, message index now {}",
                    tool.name, client_run_id, index
                );
                Some(ChatState::ToolStart { tool })
            }
            ToolPhase::Result => Some(ChatState::ToolEnd { tool }),
            ToolPhase::Update => None,
        }
    }

    fn finish_run(
        &mut self,
        event: &AgentEvent,
        lifecycle: &LifecycleData,
        link: Option<RunLink>,
        session_key: Option<String>,
        client_run_id: String,
        aborted: bool,
        out: &mut Vec<Outbound>,
    ) {
        let state = match lifecycle.phase {
            LifecyclePhase::Error => ChatState::Error {
                error_message: format_error(lifecycle.error.as_ref()),
            },
            _ => ChatState::Final,
        };

        if aborted {
            if let Some(link) = &link {
                self.state.registry.remove(
                    &event.run_id,
                    &link.client_run_id,
                    Some(&link.session_key),
                );
            }
            debug!("Cleaned up aborted run {}", client_run_id);
        } else if let Some(link) = self.state.registry.shift(&event.run_id) {
            self.state.release(&[link.client_run_id.as_str()]);
            out.push(Outbound::Chat(ChatEvent::new(
                link.client_run_id,
                link.session_key,
                event.seq,
                state,
            )));
        } else if let Some(session_key) = session_key {
            out.push(Outbound::Chat(ChatEvent::new(
                client_run_id.clone(),
                session_key,
                event.seq,
                state,
            )));
        } else {
            warn!(
                "Run {} ended without a session, no {} notification sent",
                event.run_id,
                state.name()
            );
        }

        self.state
            .release(&[client_run_id.as_str(), event.run_id.as_str()]);
        self.state.sequence.forget(&event.run_id);
        self.context.release_run(&event.run_id);
    }

    fn verbose_for(&self, session_key: Option<&str>) -> VerboseLevel {
        let Some(session_key) = session_key else {
            return self.config.default_verbose;
        };
        match self.context.verbose_level(session_key) {
            Ok(level) => level.unwrap_or(self.config.default_verbose),
            Err(err) => {
                warn!("Verbose lookup failed for {}: {}", session_key, err);
                VerboseLevel::Off
            }
        }
    }
}

/// Best-effort text for a lifecycle error payload.
pub fn format_error(error: Option<&Value>) -> Option<String> {
    let text = match error? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Object(obj) => match obj.get("message").and_then(Value::as_str) {
            Some(message) => message.trim().to_string(),
            None => Value::Object(obj.clone()).to_string(),
        },
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryRunContext;
    use crate::error::{EngineError, EngineResult};
    use serde_json::json;

    fn router() -> (EventRouter, Arc<InMemoryRunContext>) {
        let ctx = Arc::new(InMemoryRunContext::new());
        let router = EventRouter::new(RouterConfig::default(), ctx.clone());
        (router, ctx)
    }

    fn delta(run: &str, seq: u64, text: &str) -> AgentEvent {
        AgentEvent::new(run, seq, AgentStream::Assistant, json!({"text": text})).with_ts(seq as i64)
    }

    fn tool(run: &str, seq: u64, phase: &str, name: &str) -> AgentEvent {
        AgentEvent::new(
            run,
            seq,
            AgentStream::Tool,
            json!({"phase": phase, "name": name, "toolCallId": format!("tc_{seq}")}),
        )
    }

    fn lifecycle(run: &str, seq: u64, phase: &str) -> AgentEvent {
        AgentEvent::new(run, seq, AgentStream::Lifecycle, json!({"phase": phase}))
    }

    fn chats(out: &[Outbound]) -> Vec<&ChatEvent> {
        out.iter().filter_map(Outbound::as_chat).collect()
    }

    fn diagnostics(out: &[Outbound]) -> Vec<&SeqGapDiagnostic> {
        out.iter()
            .filter_map(|o| match o {
                Outbound::Diagnostic(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_end_to_end_bubble_split() {
        let (mut router, ctx) = router();
        router.begin_run("r1", "s1", "r1");

        let mut all = Vec::new();
        all.extend(router.route(delta("r1", 1, "Hello")));
        all.extend(router.route(tool("r1", 2, "start", "search")));
        all.extend(router.route(tool("r1", 3, "result", "search")));
        all.extend(router.route(delta("r1", 4, "Found it")));
        all.extend(router.route(lifecycle("r1", 5, "end")));

        assert!(diagnostics(&all).is_empty());
        let chat = chats(&all);
        let states: Vec<&str> = chat.iter().map(|c| c.state.name()).collect();
        assert_eq!(states, vec!["delta", "tool-start", "tool-end", "delta", "final"]);

        match &chat[0].state {
            ChatState::Delta {
                message_index,
                message,
            } => {
                assert_eq!(*message_index, 0);
                assert_eq!(message.as_ref().unwrap().text().as_deref(), Some("Hello"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &chat[3].state {
            ChatState::Delta {
                message_index,
                message,
            } => {
                assert_eq!(*message_index, 1);
                assert_eq!(message.as_ref().unwrap().text().as_deref(), Some("Found it"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(chat.iter().all(|c| c.run_id == "r1" && c.session_key == "s1"));
        assert!(router.state().is_empty());
        assert!(ctx.was_released("r1"));
    }

    #[test]
    fn test_index_counts_tool_starts_not_deltas() {
        let (mut router, _) = router();
        router.begin_run("ctx", "s1", "client");

        let mut seq = 0;
        let mut next = || {
            seq += 1;
            seq
        };
        for _ in 0..3 {
            for _ in 0..4 {
                router.route(delta("ctx", next(), "x"));
            }
            router.route(tool("ctx", next(), "start", "bash"));
            router.route(tool("ctx", next(), "result", "bash"));
        }
        let out = router.route(delta("ctx", next(), "after"));
        match &chats(&out)[0].state {
            ChatState::Delta { message_index, .. } => assert_eq!(*message_index, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_delta_right_after_tool_start_uses_new_index() {
        let (mut router, _) = router();
        router.begin_run("r1", "s1", "r1");
        router.route(tool("r1", 1, "start", "read"));
        let out = router.route(delta("r1", 2, "reading"));
        assert!(matches!(
            chats(&out)[0].state,
            ChatState::Delta {
                message_index: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_seq_gap_reported_and_event_processed() {
        let (mut router, _) = router();
        router.begin_run("r1", "s1", "r1");
        router.route(delta("r1", 1, "a"));
        let out = router.route(delta("r1", 4, "abc"));

        let diags = diagnostics(&out);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].data.expected, 2);
        assert_eq!(diags[0].data.received, 4);
        assert_eq!(diags[0].session_key.as_deref(), Some("s1"));
        assert_eq!(chats(&out).len(), 1);

        let out = router.route(delta("r1", 5, "abcd"));
        assert!(diagnostics(&out).is_empty());
    }

    #[test]
    fn test_seq_gap_emission_can_be_disabled() {
        let ctx = Arc::new(InMemoryRunContext::new());
        let config = RouterConfig {
            emit_seq_gaps: false,
            ..RouterConfig::default()
        };
        let mut router = EventRouter::new(config, ctx);
        let out = router.route(delta("r1", 7, "a").with_session("s1"));
        assert!(diagnostics(&out).is_empty());
        assert_eq!(chats(&out).len(), 1);
    }

    #[test]
    fn test_direct_run_without_link() {
        let (mut router, ctx) = router();
        ctx.register_run("direct", "s9");

        let out = router.route(delta("direct", 1, "hi"));
        let chat = chats(&out);
        assert_eq!(chat[0].run_id, "direct");
        assert_eq!(chat[0].session_key, "s9");

        let out = router.route(lifecycle("direct", 2, "end"));
        assert_eq!(chats(&out)[0].state, ChatState::Final);
        assert!(router.state().is_empty());
        assert!(!ctx.is_active("direct"));
    }

    #[test]
    fn test_no_session_emits_no_chat() {
        let (mut router, _) = router();
        let out = router.route(delta("orphan", 1, "hi"));
        assert!(chats(&out).is_empty());
        assert!(matches!(out[0], Outbound::Agent(_)));

        let out = router.route(lifecycle("orphan", 2, "end"));
        assert!(chats(&out).is_empty());
        assert!(router.state().progress.is_empty());
    }

    #[test]
    fn test_error_lifecycle_formats_message() {
        let (mut router, _) = router();
        router.begin_run("r1", "s1", "client");
        router.route(delta("r1", 1, "Checking"));
        router.route(tool("r1", 2, "start", "search"));
        assert_eq!(router.state().progress.get("client"), Some(1));

        let out = router.route(AgentEvent::new(
            "r1",
            3,
            AgentStream::Lifecycle,
            json!({"phase": "error", "error": {"message": "rate limited"}}),
        ));
        assert_eq!(
            chats(&out)[0].state,
            ChatState::Error {
                error_message: Some("rate limited".to_string())
            }
        );
        assert_eq!(chats(&out)[0].run_id, "client");
        assert!(router.state().is_empty());
    }

    #[test]
    fn test_queued_runs_finalize_in_order() {
        let (mut router, _) = router();
        router.begin_run("ctx", "s1", "first");
        router.begin_run("ctx", "s1", "second");

        let out = router.route(delta("ctx", 1, "one"));
        assert_eq!(chats(&out)[0].run_id, "first");
        let out = router.route(lifecycle("ctx", 2, "end"));
        assert_eq!(chats(&out)[0].run_id, "first");

        let out = router.route(delta("ctx", 1, "two"));
        assert_eq!(chats(&out)[0].run_id, "second");
        assert!(diagnostics(&out).is_empty());
        let out = router.route(lifecycle("ctx", 2, "end"));
        assert_eq!(chats(&out)[0].run_id, "second");
        assert!(router.state().is_empty());
    }

    #[test]
    fn test_abort_suppresses_then_cleans_up() {
        let (mut router, ctx) = router();
        ctx.register_run("ctx", "s1");
        router.begin_run("ctx", "s1", "client");
        router.route(delta("ctx", 1, "partial"));

        let out = router.abort("s1", Some("client"));
        assert_eq!(chats(&out).len(), 1);
        assert_eq!(chats(&out)[0].state, ChatState::Aborted);
        assert_eq!(chats(&out)[0].seq, 1);

        let out = router.route(delta("ctx", 2, "partial more"));
        assert!(chats(&out).is_empty());
        let out = router.route(tool("ctx", 3, "start", "bash"));
        assert!(chats(&out).is_empty());

        let out = router.route(AgentEvent::new(
            "ctx",
            4,
            AgentStream::Lifecycle,
            json!({"phase": "error", "error": "aborted"}),
        ));
        assert!(chats(&out).is_empty());
        assert!(router.state().is_empty());
        assert!(ctx.was_released("ctx"));
    }

    #[test]
    fn test_abort_is_idempotent() {
        let (mut router, _) = router();
        router.begin_run("ctx", "s1", "client");
        assert_eq!(router.abort("s1", Some("client")).len(), 1);
        assert!(router.abort("s1", Some("client")).is_empty());
    }

    #[test]
    fn test_abort_queued_run_unlinks_it() {
        let (mut router, _) = router();
        router.begin_run("ctx", "s1", "first");
        router.begin_run("ctx", "s1", "second");

        let out = router.abort("s1", Some("second"));
        assert_eq!(chats(&out)[0].run_id, "second");
        assert!(router.state().aborts.is_empty());
        assert_eq!(router.state().registry.peek("ctx").unwrap().client_run_id, "first");

        let out = router.route(lifecycle("ctx", 1, "end"));
        assert_eq!(chats(&out)[0].run_id, "first");
        assert!(router.state().is_empty());
    }

    #[test]
    fn test_abort_without_run_id_covers_session() {
        let (mut router, ctx) = router();
        router.begin_run("ctx1", "s1", "a");
        router.begin_run("ctx2", "s2", "b");
        ctx.register_run("direct", "s1");

        let out = router.abort("s1", None);
        let mut ids: Vec<&str> = chats(&out).iter().map(|c| c.run_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "direct"]);
        assert!(router.state().aborts.is_aborted(&["a"]));
        assert!(!router.state().aborts.is_aborted(&["b"]));
    }

    #[test]
    fn test_abort_after_terminal_is_ignored() {
        let (mut router, ctx) = router();
        ctx.register_run("ctx", "s1");
        router.begin_run("ctx", "s1", "client");
        router.route(delta("ctx", 1, "done"));
        router.route(lifecycle("ctx", 2, "end"));
        assert!(router.state().is_empty());

        assert!(router.abort("s1", Some("client")).is_empty());
        assert!(router.abort("s1", Some("ctx")).is_empty());
        assert!(router.state().aborts.is_empty());
    }

    #[test]
    fn test_abort_from_other_session_is_ignored() {
        let (mut router, ctx) = router();
        ctx.register_run("direct", "s9");
        router.begin_run("ctx", "s1", "client");

        assert!(router.abort("s2", Some("direct")).is_empty());
        assert!(router.abort("s2", Some("client")).is_empty());
        assert!(router.abort("s2", Some("ctx")).is_empty());
        assert!(router.state().aborts.is_empty());

        let out = router.route(delta("direct", 1, "still streaming"));
        let chat = chats(&out);
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].session_key, "s9");
    }

    #[test]
    fn test_abort_unknown_run_is_ignored() {
        let (mut router, _) = router();
        assert!(router.abort("s1", Some("nope")).is_empty());
        assert!(router.state().is_empty());
    }

    #[test]
    fn test_abort_by_execution_id_targets_client_run() {
        let (mut router, _) = router();
        router.begin_run("ctx", "s1", "client");
        router.route(delta("ctx", 1, "partial"));

        let out = router.abort("s1", Some("ctx"));
        let chat = chats(&out);
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].run_id, "client");
        assert_eq!(chat[0].seq, 1);
        assert!(router.state().aborts.is_aborted(&["client"]));

        let out = router.route(lifecycle("ctx", 2, "end"));
        assert!(chats(&out).is_empty());
        assert!(router.state().is_empty());
    }

    #[test]
    fn test_abort_direct_run_in_own_session() {
        let (mut router, ctx) = router();
        ctx.register_run("direct", "s9");

        let out = router.abort("s9", Some("direct"));
        assert_eq!(chats(&out)[0].run_id, "direct");

        let out = router.route(lifecycle("direct", 1, "error"));
        assert!(chats(&out).is_empty());
        assert!(router.state().is_empty());
    }

    #[test]
    fn test_verbose_off_hides_tool_broadcast_only() {
        let (mut router, ctx) = router();
        router.begin_run("r1", "s1", "r1");

        let out = router.route(tool("r1", 1, "start", "search"));
        assert!(!out.iter().any(|o| matches!(o, Outbound::Agent(_))));
        assert!(matches!(chats(&out)[0].state, ChatState::ToolStart { .. }));

        let out = router.route(tool("r1", 2, "update", "search"));
        assert!(out.is_empty());

        ctx.set_verbose("s1", VerboseLevel::On);
        let out = router.route(tool("r1", 3, "result", "search"));
        assert!(out.iter().any(|o| matches!(o, Outbound::Agent(_))));
        assert!(matches!(chats(&out)[0].state, ChatState::ToolEnd { .. }));
    }

    struct FailingSettings;

    impl RunContext for FailingSettings {
        fn session_for_run(&self, _run_id: &str) -> Option<String> {
            Some("s1".to_string())
        }

        fn verbose_level(&self, _session_key: &str) -> EngineResult<Option<VerboseLevel>> {
            Err(EngineError::Settings("store offline".to_string()))
        }

        fn release_run(&self, _run_id: &str) {}
    }

    #[test]
    fn test_verbose_lookup_failure_is_off() {
        let config = RouterConfig {
            default_verbose: VerboseLevel::Full,
            ..RouterConfig::default()
        };
        let mut router = EventRouter::new(config, Arc::new(FailingSettings));
        let out = router.route(tool("r1", 1, "start", "bash"));
        assert_eq!(out.len(), 1);
        assert!(matches!(chats(&out)[0].state, ChatState::ToolStart { .. }));
    }

    #[test]
    fn test_assistant_without_text_is_noop() {
        let (mut router, _) = router();
        router.begin_run("r1", "s1", "r1");
        let out = router.route(AgentEvent::new(
            "r1",
            1,
            AgentStream::Assistant,
            json!({"delta": "x"}),
        ));
        assert!(chats(&out).is_empty());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_reset_isolates_instances() {
        let (mut a, _) = router();
        let (mut b, _) = router();
        a.begin_run("r1", "s1", "r1");
        a.route(tool("r1", 1, "start", "x"));
        b.begin_run("r1", "s1", "r1");

        let out = b.route(delta("r1", 1, "hi"));
        assert!(matches!(
            chats(&out)[0].state,
            ChatState::Delta {
                message_index: 0,
                ..
            }
        ));

        a.reset();
        assert!(a.state().is_empty());
        assert!(!b.state().is_empty());
    }

    #[test]
    fn test_format_error_variants() {
        assert_eq!(format_error(None), None);
        assert_eq!(format_error(Some(&Value::Null)), None);
        assert_eq!(format_error(Some(&json!("  boom "))).as_deref(), Some("boom"));
        assert_eq!(format_error(Some(&json!(""))), None);
        assert_eq!(
            format_error(Some(&json!({"message": "bad key"}))).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            format_error(Some(&json!({"code": 429}))).as_deref(),
            Some(r#"{"code":429}"#)
        );
        assert_eq!(format_error(Some(&json!(42))).as_deref(), Some("42"));
    }
}
