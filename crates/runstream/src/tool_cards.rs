//! Tool card pairing for display groups.
//!
//! A display group is a contiguous run of messages with the same display
//! role. Within a group, tool call cards are paired with their result cards
//! so the UI renders one card per invocation.

use serde::Serialize;
use serde_json::Value;

use runstream_protocol::{ChatMessage, ContentBlock, Role};

/// Whether a card comes from a tool call or a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Call,
    Result,
}

/// A tool marker extracted from message content. Transient pairing input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCard {
    pub kind: CardKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    pub is_error: bool,
}

impl ToolCard {
    pub fn call(id: Option<&str>, name: &str) -> Self {
        Self {
            kind: CardKind::Call,
            id: id.map(str::to_string),
            name: name.to_string(),
            text: None,
            args: None,
            is_error: false,
        }
    }

    pub fn result(id: Option<&str>, name: &str, text: Option<&str>) -> Self {
        Self {
            kind: CardKind::Result,
            id: id.map(str::to_string),
            name: name.to_string(),
            text: text.map(str::to_string),
            args: None,
            is_error: false,
        }
    }
}

/// Outcome of pairing for one displayed card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    /// Call matched with its result.
    Completed,
    /// Call without a result yet (still running).
    Pending,
    /// Result with no matching call.
    Orphaned,
}

/// The display unit produced by pairing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairedCard {
    pub status: CardStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub is_error: bool,
}

/// A contiguous run of messages sharing one display role.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageGroup {
    pub role: Role,
    pub messages: Vec<ChatMessage>,
}

impl MessageGroup {
    /// Paired tool cards for this group.
    pub fn tool_cards(&self) -> Vec<PairedCard> {
        pair_cards(&extract_cards(&self.messages))
    }
}

/// Role a message is displayed under. Tool results render with the
/// assistant turn that invoked them.
pub fn display_role(role: Role) -> Role {
    match role {
        Role::Tool => Role::Assistant,
        other => other,
    }
}

/// Split messages into contiguous same-role display groups.
pub fn group_messages(messages: &[ChatMessage]) -> Vec<MessageGroup> {
    let mut groups: Vec<MessageGroup> = Vec::new();
    for message in messages {
        let role = display_role(message.role);
        match groups.last_mut() {
            Some(group) if group.role == role => group.messages.push(message.clone()),
            _ => groups.push(MessageGroup {
                role,
                messages: vec![message.clone()],
            }),
        }
    }
    groups
}

/// Extract call and result cards from messages, in content order.
pub fn extract_cards(messages: &[ChatMessage]) -> Vec<ToolCard> {
    let mut cards = Vec::new();
    for message in messages {
        if message.role == Role::Tool {
            cards.push(ToolCard {
                kind: CardKind::Result,
                id: message.tool_call_id.clone(),
                name: message.tool_name.clone().unwrap_or_default(),
                text: message.text(),
                args: None,
                is_error: false,
            });
            continue;
        }

        for block in &message.content {
            match block {
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => cards.push(ToolCard {
                    kind: CardKind::Call,
                    id: id.clone(),
                    name: name.clone(),
                    text: None,
                    args: arguments.clone(),
                    is_error: false,
                }),
                ContentBlock::ToolResult {
                    tool_call_id,
                    name,
                    text,
                    is_error,
                } => cards.push(ToolCard {
                    kind: CardKind::Result,
                    id: tool_call_id.clone(),
                    name: name.clone().unwrap_or_default(),
                    text: text.clone(),
                    args: None,
                    is_error: *is_error,
                }),
                ContentBlock::Text { .. } => {}
            }
        }
    }
    cards
}

/// Pair call cards with result cards.
///
/// Results are matched by identifier first, then by name among the results
/// still unmatched. Unmatched calls are pending; unconsumed results are
/// emitted as orphans after all calls. Pure, so recomputing on every render
/// yields the same cards.
pub fn pair_cards(cards: &[ToolCard]) -> Vec<PairedCard> {
    let calls: Vec<&ToolCard> = cards.iter().filter(|c| c.kind == CardKind::Call).collect();
    let results: Vec<&ToolCard> = cards
        .iter()
        .filter(|c| c.kind == CardKind::Result)
        .collect();

    let mut consumed = vec![false; results.len()];
    let mut matched: Vec<Option<usize>> = vec![None; calls.len()];

    // Pass 1: identifier equality.
    for (ci, call) in calls.iter().enumerate() {
        let Some(call_id) = call.id.as_deref() else {
            continue;
        };
        if let Some(ri) = (0..results.len())
            .find(|&ri| !consumed[ri] && results[ri].id.as_deref() == Some(call_id))
        {
            consumed[ri] = true;
            matched[ci] = Some(ri);
        }
    }

    // Pass 2: name equality among still-unmatched results.
    for (ci, call) in calls.iter().enumerate() {
        if matched[ci].is_some() || call.name.is_empty() {
            continue;
        }
        if let Some(ri) =
            (0..results.len()).find(|&ri| !consumed[ri] && results[ri].name == call.name)
        {
            consumed[ri] = true;
            matched[ci] = Some(ri);
        }
    }

    let mut paired: Vec<PairedCard> = calls
        .iter()
        .zip(&matched)
        .map(|(call, result)| match result.map(|ri| results[ri]) {
            Some(result) => PairedCard {
                status: CardStatus::Completed,
                id: call.id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
                text: result.text.clone(),
                is_error: result.is_error,
            },
            None => PairedCard {
                status: CardStatus::Pending,
                id: call.id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
                text: None,
                is_error: false,
            },
        })
        .collect();

    paired.extend(
        results
            .iter()
            .zip(&consumed)
            .filter(|(_, consumed)| !**consumed)
            .map(|(result, _)| PairedCard {
                status: CardStatus::Orphaned,
                id: result.id.clone(),
                name: result.name.clone(),
                args: None,
                text: result.text.clone(),
                is_error: result.is_error,
            }),
    );

    paired
}
