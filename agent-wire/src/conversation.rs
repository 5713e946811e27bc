//! Append-only conversation model with streaming-delta reconciliation.
//!
//! The conversation is mutated by exactly one owner (the session actor).
//! Messages are append-only; only the currently streaming assistant message
//! is mutated in place, and it freezes once its turn completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Attachment;
use crate::response::{ResponseEvent, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    UserMessage,
    AssistantText,
    ToolUse,
    ToolResult,
    Error,
    Completion,
    Status,
    Meta,
    CompactBoundary,
    CompactSummary,
    Unknown,
}

/// Conversation-level processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConversationState {
    #[default]
    Idle,
    SendingMessage,
    ReceivingResponse,
    Processing,
    Error,
}

/// One message in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    /// Derived from `responses` per the streaming reconciliation rules.
    pub content: String,
    pub responses: Vec<ResponseEvent>,
    pub is_streaming: bool,
    pub is_complete: bool,
    pub error: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub attachments: Vec<Attachment>,
    pub message_type: MessageType,
    pub is_compact_summary: bool,
    pub is_visible_in_transcript_only: bool,
}

impl Message {
    fn new(role: MessageRole, message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            timestamp: Utc::now(),
            content: String::new(),
            responses: Vec::new(),
            is_streaming: false,
            is_complete: false,
            error: None,
            token_usage: None,
            attachments: Vec::new(),
            message_type,
            is_compact_summary: false,
            is_visible_in_transcript_only: false,
        }
    }

    fn user(content: String, attachments: Vec<Attachment>) -> Self {
        let mut message = Self::new(MessageRole::User, MessageType::UserMessage);
        message.content = content;
        message.attachments = attachments;
        message.is_complete = true;
        message
    }

    /// Whether this message contains the `ToolUse` a result refers to.
    fn contains_tool_use(&self, tool_use_id: &str) -> bool {
        self.responses.iter().any(|event| {
            matches!(event, ResponseEvent::ToolUse { tool_use_id: id, .. } if id == tool_use_id)
        })
    }

    /// Pair tool uses with their results by `tool_use_id`.
    ///
    /// Orphaned results (no matching use in this message) are never
    /// promoted into a pair; they stay renderable as bare responses.
    pub fn tool_pairs(&self) -> Vec<(&ResponseEvent, Option<&ResponseEvent>)> {
        self.responses
            .iter()
            .filter(|e| matches!(e, ResponseEvent::ToolUse { .. }))
            .map(|use_event| {
                let id = match use_event {
                    ResponseEvent::ToolUse { tool_use_id, .. } => tool_use_id.as_str(),
                    _ => unreachable!(),
                };
                let result = self.responses.iter().find(|e| {
                    matches!(e, ResponseEvent::ToolResult { tool_use_id, .. } if tool_use_id == id)
                });
                (use_event, result)
            })
            .collect()
    }

    /// Recompute `content` from the accumulated text responses.
    ///
    /// Partial deltas take precedence over cumulative snapshots so a frame
    /// carrying the full text never duplicates what the deltas already
    /// produced. Cumulative-only streams keep the last snapshot.
    fn recompute_content(&mut self) {
        let mut partials = String::new();
        let mut sequential = String::new();
        let mut last_cumulative: Option<&str> = None;
        let mut has_partial = false;
        let mut has_sequential = false;

        for event in &self.responses {
            if let ResponseEvent::Text {
                content,
                is_partial,
                is_cumulative,
                ..
            } = event
            {
                if *is_partial {
                    has_partial = true;
                    partials.push_str(content);
                } else if *is_cumulative {
                    last_cumulative = Some(content);
                } else {
                    has_sequential = true;
                    sequential.push_str(content);
                }
            }
        }

        self.content = if has_partial {
            partials
        } else if has_sequential {
            sequential
        } else {
            last_cumulative.unwrap_or_default().to_string()
        };
    }

    fn recompute_type(&mut self) {
        if self.error.is_some() {
            self.message_type = MessageType::Error;
            return;
        }
        if self.role != MessageRole::Assistant {
            return;
        }
        let has_text = self
            .responses
            .iter()
            .any(|e| matches!(e, ResponseEvent::Text { .. }));
        let has_tool_use = self
            .responses
            .iter()
            .any(|e| matches!(e, ResponseEvent::ToolUse { .. }));
        self.message_type = if has_tool_use && !has_text {
            MessageType::ToolUse
        } else {
            MessageType::AssistantText
        };
    }

    fn finalize(&mut self) {
        self.is_streaming = false;
        self.is_complete = true;
    }
}

/// Outcome of applying one event to the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The streaming message was updated; the turn continues.
    Updated,
    /// The turn finished normally.
    TurnCompleted,
    /// The turn finished with an error.
    Errored,
    /// Pass-through event; no message was mutated.
    Ignored,
}

/// The append-only message log plus aggregate token accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
    pub state: ConversationState,
    pub current_error: Option<String>,
    pub total_usage: TokenUsage,
    pub total_cost_usd: f64,
    /// Snapshot of the most recent frame carrying usage; replaced per frame,
    /// never accumulated.
    pub current_context: TokenUsage,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user message and transition into the sending state.
    pub fn push_user(&mut self, content: impl Into<String>, attachments: Vec<Attachment>) -> &Message {
        self.current_error = None;
        self.state = ConversationState::SendingMessage;
        self.messages.push(Message::user(content.into(), attachments));
        self.messages.last().expect("just pushed")
    }

    /// Apply one decoded event, following the reconciliation table.
    pub fn apply_event(&mut self, event: ResponseEvent) -> Applied {
        if let Some(usage) = event.usage() {
            self.total_usage.add(usage);
            self.current_context = *usage;
        }

        match event {
            ResponseEvent::Text { .. } => {
                let completes = event.completes_turn();
                let message = self.streaming_assistant();
                message.responses.push(event);
                message.recompute_content();
                message.recompute_type();
                if completes {
                    message.finalize();
                    self.state = ConversationState::Idle;
                    Applied::TurnCompleted
                } else {
                    self.state = ConversationState::ReceivingResponse;
                    Applied::Updated
                }
            }
            ResponseEvent::ToolUse { .. } => {
                let message = self.streaming_assistant();
                message.responses.push(event);
                message.recompute_type();
                self.state = ConversationState::Processing;
                Applied::Updated
            }
            ResponseEvent::ToolResult { ref tool_use_id, .. } => {
                let target = self
                    .messages
                    .iter()
                    .rposition(|m| m.contains_tool_use(tool_use_id));
                match target {
                    Some(index) => self.messages[index].responses.push(event),
                    None => {
                        // Orphan: rendered on the current assistant message
                        // but never paired with a tool use.
                        let message = self.streaming_assistant();
                        message.responses.push(event);
                    }
                }
                self.state = ConversationState::ReceivingResponse;
                Applied::Updated
            }
            ResponseEvent::Completion { cost_usd, .. } => {
                if let Some(cost) = cost_usd {
                    self.total_cost_usd += cost;
                }
                let message = self.streaming_assistant();
                message.responses.push(event);
                message.recompute_content();
                message.recompute_type();
                message.finalize();
                self.state = ConversationState::Idle;
                Applied::TurnCompleted
            }
            ResponseEvent::Error { ref message, .. } => {
                let text = message.clone();
                let current = self.streaming_assistant();
                current.responses.push(event);
                current.error = Some(text.clone());
                current.recompute_type();
                current.finalize();
                self.current_error = Some(text);
                self.state = ConversationState::Idle;
                Applied::Errored
            }
            ResponseEvent::CompactBoundary { .. } => {
                // Compaction gets its own system message slot.
                let mut boundary = Message::new(MessageRole::System, MessageType::CompactBoundary);
                boundary.responses.push(event);
                boundary.is_complete = true;
                self.messages.push(boundary);
                Applied::Updated
            }
            ResponseEvent::CompactSummary {
                ref content,
                transcript_only,
            } => {
                let mut summary = Message::new(MessageRole::User, MessageType::CompactSummary);
                summary.content = content.clone();
                summary.is_compact_summary = true;
                summary.is_visible_in_transcript_only = transcript_only;
                summary.responses.push(event);
                summary.is_complete = true;
                self.messages.push(summary);
                Applied::Updated
            }
            ResponseEvent::UserMessage {
                ref content,
                is_replay,
            } => {
                // Replayed user frames echo what we already appended locally.
                if !is_replay {
                    let message = Message::user(content.clone(), Vec::new());
                    self.messages.push(message);
                }
                Applied::Ignored
            }
            ResponseEvent::Status { .. }
            | ResponseEvent::Meta { .. }
            | ResponseEvent::Unknown { .. } => Applied::Ignored,
        }
    }

    /// Force-finish the current turn with an error (abort, subprocess death).
    /// Idempotent: an idle conversation is left untouched.
    pub fn fail_turn(&mut self, message: impl Into<String>) {
        if self.is_idle() {
            return;
        }
        let text = message.into();
        let current = self.streaming_assistant();
        current.responses.push(ResponseEvent::error(text.clone()));
        current.error = Some(text.clone());
        current.recompute_type();
        current.finalize();
        self.current_error = Some(text);
        self.state = ConversationState::Idle;
    }

    /// The currently streaming assistant message, created on demand.
    fn streaming_assistant(&mut self) -> &mut Message {
        let needs_new = !matches!(
            self.messages.last(),
            Some(last) if last.role == MessageRole::Assistant && last.is_streaming
        );
        if needs_new {
            let mut message = Message::new(MessageRole::Assistant, MessageType::AssistantText);
            message.is_streaming = true;
            self.messages.push(message);
        }
        self.messages.last_mut().expect("assistant message present")
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ConversationState::Idle)
    }

    pub fn is_processing(&self) -> bool {
        !self.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(input: u64, output: u64) -> ResponseEvent {
        ResponseEvent::Completion {
            stop_reason: "completed".into(),
            usage: TokenUsage {
                input_tokens: input,
                output_tokens: output,
                ..Default::default()
            },
            cost_usd: None,
        }
    }

    #[test]
    fn partial_stream_reconciles_into_single_message() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi", Vec::new());

        for chunk in ["Hello", ", ", "world."] {
            let applied = conversation.apply_event(ResponseEvent::partial_text(chunk));
            assert_eq!(applied, Applied::Updated);
        }
        let applied = conversation.apply_event(completion(10, 5));
        assert_eq!(applied, Applied::TurnCompleted);

        let assistant = conversation.messages.last().unwrap();
        assert_eq!(assistant.content, "Hello, world.");
        assert!(assistant.is_complete);
        assert!(!assistant.is_streaming);
        assert_eq!(conversation.total_usage.input_tokens, 10);
        assert_eq!(conversation.total_usage.output_tokens, 5);
        assert_eq!(conversation.state, ConversationState::Idle);
        // One user message plus one assistant message.
        assert_eq!(conversation.messages.len(), 2);
    }

    #[test]
    fn cumulative_frames_overwrite_rather_than_duplicate() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi", Vec::new());

        for text in ["Hel", "Hello", "Hello world"] {
            conversation.apply_event(ResponseEvent::Text {
                content: text.into(),
                is_partial: false,
                is_cumulative: true,
                stop_reason: None,
                usage: None,
            });
        }
        let assistant = conversation.messages.last().unwrap();
        assert_eq!(assistant.content, "Hello world");
    }

    #[test]
    fn partials_win_over_cumulative_snapshots() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi", Vec::new());

        conversation.apply_event(ResponseEvent::partial_text("Hello"));
        conversation.apply_event(ResponseEvent::Text {
            content: "Hello world (snapshot)".into(),
            is_partial: false,
            is_cumulative: true,
            stop_reason: None,
            usage: None,
        });
        conversation.apply_event(ResponseEvent::partial_text(" world"));

        let assistant = conversation.messages.last().unwrap();
        assert_eq!(assistant.content, "Hello world");
    }

    #[test]
    fn sequential_text_concatenates() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi", Vec::new());

        conversation.apply_event(ResponseEvent::text("one "));
        conversation.apply_event(ResponseEvent::text("two"));
        assert_eq!(conversation.messages.last().unwrap().content, "one two");
    }

    #[test]
    fn tool_pairing_with_interleaved_text() {
        let mut conversation = Conversation::new();
        conversation.push_user("read x", Vec::new());

        conversation.apply_event(ResponseEvent::Text {
            content: "reading…".into(),
            is_partial: false,
            is_cumulative: true,
            stop_reason: None,
            usage: None,
        });
        conversation.apply_event(ResponseEvent::ToolUse {
            tool_name: "Read".into(),
            params: serde_json::json!({"file_path": "x"}),
            tool_use_id: "T1".into(),
        });
        conversation.apply_event(ResponseEvent::Text {
            content: "done".into(),
            is_partial: false,
            is_cumulative: true,
            stop_reason: None,
            usage: None,
        });
        conversation.apply_event(ResponseEvent::ToolResult {
            tool_use_id: "T1".into(),
            content: "hi".into(),
            is_error: false,
        });

        let assistant = conversation.messages.last().unwrap();
        assert_eq!(assistant.responses.len(), 4);
        assert!(!assistant.is_complete);

        let pairs = assistant.tool_pairs();
        assert_eq!(pairs.len(), 1);
        let (tool_use, result) = &pairs[0];
        assert!(matches!(tool_use, ResponseEvent::ToolUse { tool_use_id, .. } if tool_use_id == "T1"));
        assert!(matches!(
            result,
            Some(ResponseEvent::ToolResult { content, .. }) if content == "hi"
        ));
    }

    #[test]
    fn orphan_tool_result_is_rendered_but_never_paired() {
        let mut conversation = Conversation::new();
        conversation.push_user("hm", Vec::new());

        conversation.apply_event(ResponseEvent::ToolResult {
            tool_use_id: "missing".into(),
            content: "stray".into(),
            is_error: false,
        });

        let assistant = conversation.messages.last().unwrap();
        assert_eq!(assistant.responses.len(), 1);
        assert!(assistant.tool_pairs().is_empty());
    }

    #[test]
    fn tool_result_lands_on_the_message_owning_the_use() {
        let mut conversation = Conversation::new();
        conversation.push_user("first", Vec::new());
        conversation.apply_event(ResponseEvent::ToolUse {
            tool_name: "Read".into(),
            params: serde_json::Value::Null,
            tool_use_id: "T1".into(),
        });
        conversation.apply_event(completion(1, 1));

        conversation.push_user("second", Vec::new());
        conversation.apply_event(ResponseEvent::partial_text("next turn"));
        // Late result for the first turn's tool use.
        conversation.apply_event(ResponseEvent::ToolResult {
            tool_use_id: "T1".into(),
            content: "late".into(),
            is_error: false,
        });

        let first_assistant = &conversation.messages[1];
        assert!(first_assistant.contains_tool_use("T1"));
        assert_eq!(first_assistant.tool_pairs().len(), 1);
        assert!(first_assistant.tool_pairs()[0].1.is_some());
    }

    #[test]
    fn token_totals_accumulate_and_context_replaces() {
        let mut conversation = Conversation::new();
        conversation.push_user("a", Vec::new());
        conversation.apply_event(ResponseEvent::Text {
            content: "x".into(),
            is_partial: false,
            is_cumulative: true,
            stop_reason: None,
            usage: Some(TokenUsage {
                input_tokens: 100,
                output_tokens: 10,
                ..Default::default()
            }),
        });
        conversation.apply_event(completion(40, 4));

        assert_eq!(conversation.total_usage.input_tokens, 140);
        assert_eq!(conversation.total_usage.output_tokens, 14);
        assert_eq!(conversation.current_context.input_tokens, 40);
        assert_eq!(conversation.current_context.output_tokens, 4);
    }

    #[test]
    fn cost_accumulates_across_turns() {
        let mut conversation = Conversation::new();
        conversation.push_user("a", Vec::new());
        conversation.apply_event(ResponseEvent::Completion {
            stop_reason: "completed".into(),
            usage: TokenUsage::default(),
            cost_usd: Some(0.25),
        });
        conversation.push_user("b", Vec::new());
        conversation.apply_event(ResponseEvent::Completion {
            stop_reason: "completed".into(),
            usage: TokenUsage::default(),
            cost_usd: Some(0.5),
        });
        assert!((conversation.total_cost_usd - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn error_finalizes_message_and_conversation() {
        let mut conversation = Conversation::new();
        conversation.push_user("a", Vec::new());
        conversation.apply_event(ResponseEvent::partial_text("partial"));
        let applied = conversation.apply_event(ResponseEvent::error("boom"));

        assert_eq!(applied, Applied::Errored);
        let assistant = conversation.messages.last().unwrap();
        assert_eq!(assistant.error.as_deref(), Some("boom"));
        assert!(assistant.is_complete);
        assert_eq!(conversation.current_error.as_deref(), Some("boom"));
        assert_eq!(conversation.state, ConversationState::Idle);
    }

    #[test]
    fn compact_boundary_gets_its_own_system_message() {
        let mut conversation = Conversation::new();
        conversation.push_user("a", Vec::new());
        conversation.apply_event(ResponseEvent::partial_text("text"));
        conversation.apply_event(ResponseEvent::CompactBoundary {
            trigger: "auto".into(),
            pre_tokens: 1000,
        });
        conversation.apply_event(ResponseEvent::CompactSummary {
            content: "what happened so far".into(),
            transcript_only: true,
        });

        let boundary = &conversation.messages[2];
        assert_eq!(boundary.role, MessageRole::System);
        assert_eq!(boundary.message_type, MessageType::CompactBoundary);

        let summary = &conversation.messages[3];
        assert_eq!(summary.role, MessageRole::User);
        assert!(summary.is_compact_summary);
        assert!(summary.is_visible_in_transcript_only);
        assert_eq!(summary.content, "what happened so far");
    }

    #[test]
    fn status_and_meta_do_not_mutate_messages() {
        let mut conversation = Conversation::new();
        conversation.push_user("a", Vec::new());
        let before = conversation.messages.len();
        conversation.apply_event(ResponseEvent::Status {
            status: "thinking".into(),
            message: None,
        });
        conversation.apply_event(ResponseEvent::Meta {
            session_id: Some("s".into()),
            metadata: Default::default(),
        });
        assert_eq!(conversation.messages.len(), before);
    }

    #[test]
    fn fail_turn_is_idempotent() {
        let mut conversation = Conversation::new();
        conversation.push_user("a", Vec::new());
        conversation.apply_event(ResponseEvent::partial_text("x"));
        conversation.fail_turn("Interrupted by user");
        let count = conversation.messages.last().unwrap().responses.len();
        conversation.fail_turn("Interrupted by user");
        // Second failure creates no new responses on the frozen message.
        let last = conversation.messages.last().unwrap();
        assert!(last.is_complete || last.responses.len() == count);
        assert_eq!(
            conversation.current_error.as_deref(),
            Some("Interrupted by user")
        );
    }

    #[test]
    fn message_count_is_monotone() {
        let mut conversation = Conversation::new();
        let mut counts = vec![conversation.messages.len()];
        conversation.push_user("a", Vec::new());
        counts.push(conversation.messages.len());
        conversation.apply_event(ResponseEvent::partial_text("x"));
        counts.push(conversation.messages.len());
        conversation.apply_event(completion(1, 1));
        counts.push(conversation.messages.len());
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
    }
}
