//! Client-side reconciliation of chat notifications.
//!
//! Streaming text lives in a transient list of bubbles keyed by message
//! index, rendered after the persisted history. When the run ends the
//! bubbles are discarded and history is re-fetched, so the final view always
//! matches what a fresh load of the session shows.
//!
//! ## Run phases
//!
//! ```text
//! Idle --begin_send--> Streaming --final--> Finalized
//!                          |------error--> Errored
//!                          '----aborted--> Aborted
//! ```

use log::debug;
use serde::Serialize;
use uuid::Uuid;

use runstream_protocol::{ChatAbort, ChatEvent, ChatMessage, ChatSend, ChatState, Role};

use crate::error::{EngineError, EngineResult};
use crate::history::HistoryStore;
use crate::tool_cards::{PairedCard, group_messages};

/// Message shown when an error notification carries no text.
const GENERIC_RUN_ERROR: &str = "Run failed";

/// Client view of the active run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Idle,
    Streaming,
    Finalized,
    Aborted,
    Errored,
}

/// One in-progress bubble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingMessage {
    pub index: usize,
    /// Cumulative text; replaced, never appended.
    pub text: String,
    pub started_at: i64,
}

/// What applying a notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Stale, foreign or empty notification.
    Ignored,
    /// Streaming state changed.
    Updated,
    /// Run ended in the given phase; history must be re-fetched.
    Terminal(RunPhase),
}

/// Render-ready item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewItem {
    /// Persisted messages of one display role with their paired tool cards.
    Group {
        role: Role,
        messages: Vec<ChatMessage>,
        tool_cards: Vec<PairedCard>,
    },
    /// Transient streaming bubble.
    Streaming(StreamingMessage),
}

/// Everything a renderer needs for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub session_key: String,
    pub phase: RunPhase,
    pub items: Vec<ViewItem>,
    pub tools_running: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-session reconciler.
#[derive(Debug)]
pub struct ClientReconciler {
    session_key: String,
    active_run: Option<String>,
    phase: RunPhase,
    streaming: Vec<StreamingMessage>,
    tools_running: usize,
    current_tool: Option<String>,
    last_error: Option<String>,
    history: Vec<ChatMessage>,
    needs_refresh: bool,
}

impl ClientReconciler {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            active_run: None,
            phase: RunPhase::Idle,
            streaming: Vec::new(),
            tools_running: 0,
            current_tool: None,
            last_error: None,
            history: Vec::new(),
            needs_refresh: true,
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn active_run(&self) -> Option<&str> {
        self.active_run.as_deref()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Streaming bubbles sorted by index.
    pub fn streaming(&self) -> &[StreamingMessage] {
        &self.streaming
    }

    pub fn tools_running(&self) -> usize {
        self.tools_running
    }

    pub fn current_tool(&self) -> Option<&str> {
        self.current_tool.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Whether history must be re-fetched before the view is authoritative.
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    /// Start a send: generate the client run id and enter `Streaming`.
    ///
    /// The user's message is shown optimistically until the next refresh.
    pub fn begin_send(&mut self, message: impl Into<String>) -> ChatSend {
        let message = message.into();
        let run_id = Uuid::new_v4().to_string();
        self.history.push(ChatMessage::user_text(
            message.clone(),
            chrono::Utc::now().timestamp_millis(),
        ));
        self.attach(&run_id);
        ChatSend {
            session_key: self.session_key.clone(),
            message,
            idempotency_key: run_id,
        }
    }

    /// Follow a run this client did not start (e.g. another tab's send).
    pub fn attach(&mut self, run_id: &str) {
        self.clear_transient();
        self.active_run = Some(run_id.to_string());
        self.phase = RunPhase::Streaming;
        self.last_error = None;
    }

    /// The transport rejected the send. Local only; nothing is retried.
    pub fn send_failed(&mut self, err: &EngineError) {
        debug!("Send failed for session {}: {}", self.session_key, err);
        self.clear_transient();
        self.active_run = None;
        self.phase = RunPhase::Idle;
        self.last_error = Some(err.to_string());
    }

    /// Build an abort request for the active run (or the whole session).
    pub fn request_abort(&self) -> ChatAbort {
        ChatAbort {
            session_key: self.session_key.clone(),
            run_id: self.active_run.clone(),
        }
    }

    /// Apply one chat notification.
    pub fn apply(&mut self, event: &ChatEvent) -> Reconciled {
        if event.session_key != self.session_key {
            return Reconciled::Ignored;
        }
        match self.active_run.as_deref() {
            Some(run_id) if run_id != event.run_id => return Reconciled::Ignored,
            // Nothing active: only a terminal matters (another tab finished a run).
            None if !event.is_terminal() => return Reconciled::Ignored,
            _ => {}
        }

        match &event.state {
            ChatState::Delta {
                message_index,
                message,
            } => {
                let Some(message) = message else {
                    return Reconciled::Ignored;
                };
                let Some(text) = message.text() else {
                    return Reconciled::Ignored;
                };
                self.upsert(*message_index, text, message.timestamp);
                Reconciled::Updated
            }
            ChatState::ToolStart { tool } => {
                self.tools_running += 1;
                self.current_tool = Some(tool.name.clone());
                Reconciled::Updated
            }
            ChatState::ToolEnd { .. } => {
                self.tools_running = self.tools_running.saturating_sub(1);
                if self.tools_running == 0 {
                    self.current_tool = None;
                }
                Reconciled::Updated
            }
            ChatState::Final => self.finish(RunPhase::Finalized, None),
            ChatState::Error { error_message } => self.finish(
                RunPhase::Errored,
                Some(
                    error_message
                        .clone()
                        .unwrap_or_else(|| GENERIC_RUN_ERROR.to_string()),
                ),
            ),
            ChatState::Aborted => self.finish(RunPhase::Aborted, None),
        }
    }

    /// Replace local history with the persisted list.
    pub async fn refresh(&mut self, store: &dyn HistoryStore) -> EngineResult<()> {
        let messages = store.load(&self.session_key).await?;
        debug!(
            "Loaded {} messages for session {}",
            messages.len(),
            self.session_key
        );
        self.set_history(messages);
        Ok(())
    }

    pub fn set_history(&mut self, messages: Vec<ChatMessage>) {
        self.history = messages;
        self.needs_refresh = false;
    }

    /// Point the reconciler at another session, dropping all local state.
    pub fn switch_session(&mut self, session_key: impl Into<String>) {
        self.session_key = session_key.into();
        self.clear_transient();
        self.active_run = None;
        self.phase = RunPhase::Idle;
        self.last_error = None;
        self.history.clear();
        self.needs_refresh = true;
    }

    /// Render-ready view: history groups followed by streaming bubbles.
    pub fn view(&self) -> ChatView {
        let mut items: Vec<ViewItem> = group_messages(&self.history)
            .into_iter()
            .map(|group| {
                let tool_cards = group.tool_cards();
                ViewItem::Group {
                    role: group.role,
                    messages: group.messages,
                    tool_cards,
                }
            })
            .collect();
        items.extend(self.streaming.iter().cloned().map(ViewItem::Streaming));

        ChatView {
            session_key: self.session_key.clone(),
            phase: self.phase,
            items,
            tools_running: self.tools_running,
            current_tool: self.current_tool.clone(),
            error: self.last_error.clone(),
        }
    }

    fn upsert(&mut self, index: usize, text: String, timestamp: i64) {
        match self.streaming.binary_search_by_key(&index, |m| m.index) {
            Ok(pos) => self.streaming[pos].text = text,
            Err(pos) => {
                let started_at = if timestamp > 0 {
                    timestamp
                } else {
                    chrono::Utc::now().timestamp_millis()
                };
                self.streaming.insert(
                    pos,
                    StreamingMessage {
                        index,
                        text,
                        started_at,
                    },
                );
            }
        }
    }

    fn finish(&mut self, phase: RunPhase, error: Option<String>) -> Reconciled {
        self.clear_transient();
        self.active_run = None;
        self.phase = phase;
        if error.is_some() {
            self.last_error = error;
        }
        self.needs_refresh = true;
        Reconciled::Terminal(phase)
    }

    fn clear_transient(&mut self) {
        self.streaming.clear();
        self.tools_running = 0;
        self.current_tool = None;
    }
}
