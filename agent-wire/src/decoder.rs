//! Stream decoder for the assistant subprocess's line-delimited JSON output.
//!
//! The decoder owns a text buffer fed from the subprocess stdout. Complete
//! lines are parsed and dispatched on their `type`/`subtype` fields into
//! typed [`ResponseEvent`]s or [`ControlRequest`]s; a trailing partial line
//! is retained until the next read completes it.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::protocol::ControlRequest;
use crate::response::{ResponseEvent, TokenUsage};

/// A decoded inbound frame: either a control request the session must answer
/// or a response event destined for the conversation model.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Control(ControlRequest),
    Event(ResponseEvent),
}

/// Incremental LDJSON decoder with trailing-partial retention.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    buffer: String,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of subprocess output, returning every frame completed by
    /// this chunk. Incomplete trailing data stays buffered.
    pub fn feed(&mut self, chunk: &str) -> Vec<InboundFrame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            frames.extend(self.decode_line(line));
        }
        frames
    }

    /// Flush the buffer, decoding any final unterminated line.
    pub fn finish(&mut self) -> Vec<InboundFrame> {
        let rest = std::mem::take(&mut self.buffer);
        let line = rest.trim();
        if line.is_empty() {
            return Vec::new();
        }
        self.decode_line(line)
    }

    fn decode_line(&self, line: &str) -> Vec<InboundFrame> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                // Lines that superficially look like a protocol frame get a
                // synthetic error so the failure is visible in the transcript;
                // anything else is noise on stdout and is dropped.
                if looks_like_response(line) {
                    warn!(error = %err, "malformed response line");
                    return vec![InboundFrame::Event(ResponseEvent::Error {
                        message: "Failed to decode response".to_string(),
                        details: Some(truncate(line, 500)),
                        code: Some("decode_error".to_string()),
                    })];
                }
                debug!(line = %truncate(line, 120), "dropping non-protocol line");
                return Vec::new();
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("control_request") {
            return match ControlRequest::from_frame(&value) {
                Some(request) => vec![InboundFrame::Control(request)],
                None => vec![InboundFrame::Event(ResponseEvent::Error {
                    message: "Malformed control request".to_string(),
                    details: Some(truncate(line, 500)),
                    code: Some("protocol_error".to_string()),
                })],
            };
        }

        decode_frame(value)
            .into_iter()
            .map(InboundFrame::Event)
            .collect()
    }
}

/// Dispatch a parsed frame into its [`ResponseEvent`]s. Infallible: frames
/// that fit no known shape come back as a single [`ResponseEvent::Unknown`].
/// Only multi-block `assistant` frames expand to more than one event.
pub fn decode_frame(frame: Value) -> Vec<ResponseEvent> {
    let frame_type = frame
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let single = match frame_type.as_str() {
        "text" | "message" => decode_plain_text(&frame),
        "assistant" => {
            return decode_assistant(&frame)
                .unwrap_or_else(|| vec![ResponseEvent::Unknown { raw: frame }]);
        }
        "user" => decode_user(&frame),
        "tool_use" => match decode_direct_tool_use(&frame) {
            Some(event) => event,
            None => ResponseEvent::Unknown { raw: frame },
        },
        "result" => decode_result(&frame),
        "status" => ResponseEvent::Status {
            status: str_field(&frame, "status").unwrap_or_else(|| "unknown".into()),
            message: str_field(&frame, "message"),
        },
        "system" => decode_system(&frame),
        "stream_event" => match decode_stream_event(&frame) {
            Some(event) => event,
            None => ResponseEvent::Unknown { raw: frame },
        },
        _ => ResponseEvent::Unknown { raw: frame },
    };
    vec![single]
}

/// Decode an assistant frame into its ordered block expansion.
pub fn decode_assistant(frame: &Value) -> Option<Vec<ResponseEvent>> {
    let message = frame.get("message")?;
    let usage = message.get("usage").and_then(TokenUsage::from_value);
    let stop_reason = message
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let blocks = match message.get("content") {
        Some(Value::Array(blocks)) => blocks.clone(),
        Some(Value::String(text)) => {
            return Some(vec![ResponseEvent::Text {
                content: decode_entities(text),
                is_partial: false,
                is_cumulative: true,
                stop_reason,
                usage,
            }]);
        }
        _ => return None,
    };

    let mut events = Vec::with_capacity(blocks.len());
    for block in &blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
                events.push(ResponseEvent::Text {
                    content: decode_entities(text),
                    is_partial: false,
                    is_cumulative: true,
                    stop_reason: None,
                    usage: None,
                });
            }
            Some("tool_use") => {
                events.push(ResponseEvent::ToolUse {
                    tool_name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    params: decode_entities_value(
                        block.get("input").cloned().unwrap_or(Value::Null),
                    ),
                    tool_use_id: block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
            _ => {}
        }
    }

    // The frame's usage and stop reason ride on the last text block so turn
    // completion and token accounting survive the expansion.
    if usage.is_some() || stop_reason.is_some() {
        if let Some(ResponseEvent::Text {
            usage: slot_usage,
            stop_reason: slot_stop,
            ..
        }) = events
            .iter_mut()
            .rev()
            .find(|e| matches!(e, ResponseEvent::Text { .. }))
        {
            *slot_usage = usage;
            *slot_stop = stop_reason;
        } else if let Some(usage) = usage {
            events.push(ResponseEvent::Text {
                content: String::new(),
                is_partial: false,
                is_cumulative: false,
                stop_reason,
                usage: Some(usage),
            });
        }
    }

    if events.is_empty() {
        None
    } else {
        Some(events)
    }
}

fn decode_plain_text(frame: &Value) -> ResponseEvent {
    let content = str_field(frame, "content")
        .or_else(|| str_field(frame, "text"))
        .unwrap_or_default();
    ResponseEvent::Text {
        content,
        is_partial: false,
        is_cumulative: false,
        stop_reason: frame
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        usage: frame.get("usage").and_then(TokenUsage::from_value),
    }
}

fn decode_user(frame: &Value) -> ResponseEvent {
    let message = frame.get("message");

    if let Some(result) = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .and_then(|blocks| {
            blocks
                .iter()
                .find(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
        })
    {
        return ResponseEvent::ToolResult {
            tool_use_id: result
                .get("tool_use_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content: tool_result_content(result.get("content")),
            is_error: result
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };
    }

    let compact = bool_field(frame, "isCompactSummary")
        || message.map(|m| bool_field(m, "isCompactSummary")).unwrap_or(false);
    let content = user_content(frame);

    if compact {
        return ResponseEvent::CompactSummary {
            content,
            transcript_only: bool_field(frame, "isVisibleInTranscriptOnly"),
        };
    }

    ResponseEvent::UserMessage {
        content,
        is_replay: bool_field(frame, "isReplay"),
    }
}

fn user_content(frame: &Value) -> String {
    match frame.get("message").and_then(|m| m.get("content")) {
        Some(Value::String(text)) => decode_entities(text),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .map(decode_entities)
            .collect::<Vec<_>>()
            .join(""),
        _ => str_field(frame, "content").unwrap_or_default(),
    }
}

/// Tool-result content may be a bare string or a list of text blocks.
fn tool_result_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => decode_entities(text),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| match b.get("type").and_then(Value::as_str) {
                Some("text") => b.get("text").and_then(Value::as_str),
                _ => None,
            })
            .map(decode_entities)
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn decode_direct_tool_use(frame: &Value) -> Option<ResponseEvent> {
    let tool_name = frame
        .get("name")
        .or_else(|| frame.get("tool_name"))
        .and_then(Value::as_str)?
        .to_string();
    Some(ResponseEvent::ToolUse {
        tool_name,
        params: decode_entities_value(
            frame
                .get("input")
                .or_else(|| frame.get("params"))
                .cloned()
                .unwrap_or(Value::Null),
        ),
        tool_use_id: frame
            .get("id")
            .or_else(|| frame.get("tool_use_id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn decode_result(frame: &Value) -> ResponseEvent {
    let subtype = frame.get("subtype").and_then(Value::as_str);
    ResponseEvent::Completion {
        stop_reason: if subtype == Some("success") {
            "completed".to_string()
        } else {
            "error".to_string()
        },
        usage: frame
            .get("usage")
            .and_then(TokenUsage::from_value)
            .unwrap_or_default(),
        cost_usd: frame.get("total_cost_usd").and_then(Value::as_f64),
    }
}

fn decode_system(frame: &Value) -> ResponseEvent {
    match frame.get("subtype").and_then(Value::as_str) {
        Some("init") => {
            let mut metadata = std::collections::HashMap::new();
            if let Some(obj) = frame.as_object() {
                for (key, value) in obj {
                    if key != "type" && key != "subtype" && key != "session_id" {
                        metadata.insert(key.clone(), value.clone());
                    }
                }
            }
            ResponseEvent::Meta {
                session_id: str_field(frame, "session_id"),
                metadata,
            }
        }
        Some("compact_boundary") => {
            let meta = frame.get("compact_metadata");
            ResponseEvent::CompactBoundary {
                trigger: meta
                    .and_then(|m| m.get("trigger"))
                    .and_then(Value::as_str)
                    .unwrap_or("auto")
                    .to_string(),
                pre_tokens: meta
                    .and_then(|m| m.get("pre_tokens"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            }
        }
        other => ResponseEvent::Status {
            status: other.unwrap_or("system").to_string(),
            message: str_field(frame, "message"),
        },
    }
}

fn decode_stream_event(frame: &Value) -> Option<ResponseEvent> {
    let event = frame.get("event")?;
    if event.get("type").and_then(Value::as_str) != Some("content_block_delta") {
        return None;
    }
    let text = event
        .get("delta")
        .and_then(|d| d.get("text"))
        .and_then(Value::as_str)?;
    if text.is_empty() {
        return None;
    }
    Some(ResponseEvent::partial_text(decode_entities(text)))
}

fn str_field(frame: &Value, key: &str) -> Option<String> {
    frame
        .get(key)
        .and_then(Value::as_str)
        .map(decode_entities)
}

fn bool_field(frame: &Value, key: &str) -> bool {
    frame.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn looks_like_response(line: &str) -> bool {
    ["\"type\"", "\"message\"", "\"content\"", "\"tool_use\"", "\"result\""]
        .iter()
        .any(|marker| line.contains(marker))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

/// Decode the HTML entities the assistant CLI escapes in string payloads.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        if let Some((replacement, consumed)) = match_entity(rest) {
            out.push_str(&replacement);
            rest = &rest[consumed..];
        } else {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

fn match_entity(text: &str) -> Option<(String, usize)> {
    for (entity, replacement) in [
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
    ] {
        if text.starts_with(entity) {
            return Some((replacement.to_string(), entity.len()));
        }
    }
    // Numeric form: &#NN;
    let body = text.strip_prefix("&#")?;
    let end = body.find(';')?;
    let code: u32 = body[..end].parse().ok()?;
    let ch = char::from_u32(code)?;
    Some((ch.to_string(), end + 3))
}

/// Apply entity decoding recursively through a JSON value (tool inputs).
pub fn decode_entities_value(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(decode_entities(&text)),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(decode_entities_value).collect())
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key, decode_entities_value(value));
            }
            Value::Object(out)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_one(frame: serde_json::Value) -> ResponseEvent {
        let mut decoded = decode_frame(frame);
        assert_eq!(decoded.len(), 1);
        decoded.remove(0)
    }

    fn events(frames: Vec<InboundFrame>) -> Vec<ResponseEvent> {
        frames
            .into_iter()
            .filter_map(|f| match f {
                InboundFrame::Event(e) => Some(e),
                InboundFrame::Control(_) => None,
            })
            .collect()
    }

    #[test]
    fn retains_trailing_partial_line() {
        let mut decoder = ResponseDecoder::new();
        let first = decoder.feed("{\"type\":\"status\",\"status\":\"ok\"}\n{\"type\":\"sta");
        assert_eq!(first.len(), 1);
        let second = decoder.feed("tus\",\"status\":\"later\"}\n");
        let second = events(second);
        assert_eq!(second.len(), 1);
        assert!(matches!(
            &second[0],
            ResponseEvent::Status { status, .. } if status == "later"
        ));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut decoder = ResponseDecoder::new();
        let frames = decoder.feed("\n\n{\"type\":\"status\",\"status\":\"ok\"}\n\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn malformed_response_like_line_emits_synthetic_error() {
        let mut decoder = ResponseDecoder::new();
        let frames = events(decoder.feed("{\"type\":\"assistant\",\"message\": oops}\n"));
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            ResponseEvent::Error { code: Some(code), .. } if code == "decode_error"
        ));
    }

    #[test]
    fn malformed_noise_line_is_dropped() {
        let mut decoder = ResponseDecoder::new();
        let frames = decoder.feed("warning: something happened\n");
        assert!(frames.is_empty());
    }

    #[test]
    fn decodes_cumulative_assistant_text() {
        let frame = json!({
            "type": "assistant",
            "message": {
                "content": [{"type": "text", "text": "Hello"}],
                "usage": {"input_tokens": 3, "output_tokens": 4},
            }
        });
        let expanded = decode_assistant(&frame).unwrap();
        assert_eq!(expanded.len(), 1);
        match &expanded[0] {
            ResponseEvent::Text {
                content,
                is_cumulative,
                is_partial,
                usage,
                ..
            } => {
                assert_eq!(content, "Hello");
                assert!(is_cumulative);
                assert!(!is_partial);
                assert_eq!(usage.unwrap().input_tokens, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn expands_interleaved_blocks_in_order() {
        let frame = json!({
            "type": "assistant",
            "message": {
                "content": [
                    {"type": "text", "text": "reading…"},
                    {"type": "tool_use", "id": "T1", "name": "Read", "input": {"file_path": "x"}},
                    {"type": "text", "text": "done"},
                ],
            }
        });
        let expanded = decode_assistant(&frame).unwrap();
        assert_eq!(expanded.len(), 3);
        assert!(matches!(&expanded[0], ResponseEvent::Text { content, .. } if content == "reading…"));
        assert!(matches!(
            &expanded[1],
            ResponseEvent::ToolUse { tool_use_id, tool_name, .. }
                if tool_use_id == "T1" && tool_name == "Read"
        ));
        assert!(matches!(&expanded[2], ResponseEvent::Text { content, .. } if content == "done"));
    }

    #[test]
    fn usage_rides_on_last_text_block() {
        let frame = json!({
            "type": "assistant",
            "message": {
                "content": [
                    {"type": "text", "text": "a"},
                    {"type": "text", "text": "b"},
                ],
                "usage": {"input_tokens": 1, "output_tokens": 2},
                "stop_reason": "end_turn",
            }
        });
        let expanded = decode_assistant(&frame).unwrap();
        assert!(expanded[0].usage().is_none());
        assert_eq!(expanded[1].usage().unwrap().output_tokens, 2);
        assert!(expanded[1].completes_turn());
    }

    #[test]
    fn decodes_tool_result_with_block_list() {
        let frame = json!({
            "type": "user",
            "message": {
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": "T1",
                    "content": [
                        {"type": "text", "text": "hi"},
                        {"type": "text", "text": " there"},
                    ],
                }],
            }
        });
        match decode_one(frame) {
            ResponseEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "T1");
                assert_eq!(content, "hi there");
                assert!(!is_error);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn decodes_compact_summary() {
        let frame = json!({
            "type": "user",
            "isCompactSummary": true,
            "isVisibleInTranscriptOnly": true,
            "message": {"content": "summary text"},
        });
        match decode_one(frame) {
            ResponseEvent::CompactSummary {
                content,
                transcript_only,
            } => {
                assert_eq!(content, "summary text");
                assert!(transcript_only);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn decodes_result_completion() {
        let frame = json!({
            "type": "result",
            "subtype": "success",
            "usage": {"input_tokens": 10, "output_tokens": 5},
            "total_cost_usd": 0.0125,
        });
        match decode_one(frame) {
            ResponseEvent::Completion {
                stop_reason,
                usage,
                cost_usd,
            } => {
                assert_eq!(stop_reason, "completed");
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(cost_usd, Some(0.0125));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn result_without_success_maps_to_error() {
        let frame = json!({"type": "result", "subtype": "error_max_turns"});
        match decode_one(frame) {
            ResponseEvent::Completion { stop_reason, .. } => assert_eq!(stop_reason, "error"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn decodes_system_init_as_meta() {
        let frame = json!({
            "type": "system",
            "subtype": "init",
            "session_id": "s-1",
            "model": "sonnet",
        });
        match decode_one(frame) {
            ResponseEvent::Meta {
                session_id,
                metadata,
            } => {
                assert_eq!(session_id.as_deref(), Some("s-1"));
                assert_eq!(metadata["model"], "sonnet");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn decodes_compact_boundary() {
        let frame = json!({
            "type": "system",
            "subtype": "compact_boundary",
            "compact_metadata": {"trigger": "manual", "pre_tokens": 90000},
        });
        match decode_one(frame) {
            ResponseEvent::CompactBoundary {
                trigger,
                pre_tokens,
            } => {
                assert_eq!(trigger, "manual");
                assert_eq!(pre_tokens, 90000);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn decodes_stream_delta_as_partial() {
        let frame = json!({
            "type": "stream_event",
            "event": {
                "type": "content_block_delta",
                "delta": {"text": "Hel"},
            }
        });
        match decode_one(frame) {
            ResponseEvent::Text {
                content,
                is_partial,
                is_cumulative,
                ..
            } => {
                assert_eq!(content, "Hel");
                assert!(is_partial);
                assert!(!is_cumulative);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn empty_stream_delta_is_unknown() {
        let frame = json!({
            "type": "stream_event",
            "event": {"type": "content_block_delta", "delta": {"text": ""}},
        });
        assert!(matches!(
            decode_one(frame),
            ResponseEvent::Unknown { .. }
        ));
    }

    #[test]
    fn unrecognized_type_is_unknown_with_raw() {
        let frame = json!({"type": "telemetry", "payload": 1});
        match decode_one(frame.clone()) {
            ResponseEvent::Unknown { raw } => assert_eq!(raw, frame),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn entity_decoding_covers_named_and_numeric() {
        assert_eq!(decode_entities("a &amp;&amp; b"), "a && b");
        assert_eq!(decode_entities("&lt;div&gt;"), "<div>");
        assert_eq!(decode_entities("say &quot;hi&quot;"), "say \"hi\"");
        assert_eq!(decode_entities("&#65;&#66;"), "AB");
        assert_eq!(decode_entities("no entities"), "no entities");
        assert_eq!(decode_entities("dangling & ampersand"), "dangling & ampersand");
    }

    #[test]
    fn entity_decoding_recurses_into_tool_input() {
        let input = json!({
            "command": "echo &quot;hi&quot;",
            "nested": {"values": ["&lt;x&gt;"]},
        });
        let decoded = decode_entities_value(input);
        assert_eq!(decoded["command"], "echo \"hi\"");
        assert_eq!(decoded["nested"]["values"][0], "<x>");
    }

    #[test]
    fn control_request_is_routed_separately() {
        let mut decoder = ResponseDecoder::new();
        let line = json!({
            "type": "control_request",
            "request_id": "r1",
            "request": {"subtype": "can_use_tool", "tool_name": "Bash", "input": {}},
        })
        .to_string();
        let frames = decoder.feed(&format!("{}\n", line));
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], InboundFrame::Control(req) if req.request_id == "r1"));
    }
}
