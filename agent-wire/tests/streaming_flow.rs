//! Wire-to-conversation flows: decode raw frames, feed the conversation,
//! check the reconciled result.

use agent_wire::conversation::{Applied, Conversation};
use agent_wire::decoder::{InboundFrame, ResponseDecoder};
use serde_json::json;

fn feed(conversation: &mut Conversation, decoder: &mut ResponseDecoder, line: serde_json::Value) -> Vec<Applied> {
    let mut outcomes = Vec::new();
    for frame in decoder.feed(&format!("{}\n", line)) {
        if let InboundFrame::Event(event) = frame {
            outcomes.push(conversation.apply_event(event));
        }
    }
    outcomes
}

#[test]
fn streaming_deltas_reconcile_into_one_message() {
    let mut conversation = Conversation::new();
    let mut decoder = ResponseDecoder::new();
    conversation.push_user("say hello", Vec::new());

    for chunk in ["Hello", ", ", "world."] {
        let outcomes = feed(
            &mut conversation,
            &mut decoder,
            json!({
                "type": "stream_event",
                "event": {"type": "content_block_delta", "delta": {"text": chunk}},
            }),
        );
        assert_eq!(outcomes, vec![Applied::Updated]);
    }

    let outcomes = feed(
        &mut conversation,
        &mut decoder,
        json!({
            "type": "result",
            "subtype": "success",
            "usage": {"input_tokens": 10, "output_tokens": 5},
        }),
    );
    assert_eq!(outcomes, vec![Applied::TurnCompleted]);

    assert_eq!(conversation.messages.len(), 2);
    let assistant = &conversation.messages[1];
    assert_eq!(assistant.content, "Hello, world.");
    assert!(assistant.is_complete);
    assert!(!assistant.is_streaming);
    assert_eq!(conversation.total_usage.input_tokens, 10);
    assert_eq!(conversation.total_usage.output_tokens, 5);
    assert!(conversation.is_idle());
}

#[test]
fn interleaved_tool_use_pairs_with_its_result() {
    let mut conversation = Conversation::new();
    let mut decoder = ResponseDecoder::new();
    conversation.push_user("read x", Vec::new());

    feed(
        &mut conversation,
        &mut decoder,
        json!({
            "type": "assistant",
            "message": {
                "content": [
                    {"type": "text", "text": "reading…"},
                    {"type": "tool_use", "id": "T1", "name": "Read", "input": {"file_path": "x"}},
                    {"type": "text", "text": "done"},
                ],
            },
        }),
    );
    feed(
        &mut conversation,
        &mut decoder,
        json!({
            "type": "user",
            "message": {
                "content": [{"type": "tool_result", "tool_use_id": "T1", "content": "hi"}],
            },
        }),
    );

    let assistant = &conversation.messages[1];
    assert_eq!(assistant.responses.len(), 4);
    assert!(!assistant.is_complete);

    let pairs = assistant.tool_pairs();
    assert_eq!(pairs.len(), 1);
    let (tool_use, result) = &pairs[0];
    match tool_use {
        agent_wire::ResponseEvent::ToolUse {
            tool_name,
            tool_use_id,
            params,
        } => {
            assert_eq!(tool_name, "Read");
            assert_eq!(tool_use_id, "T1");
            assert_eq!(params["file_path"], "x");
        }
        other => panic!("unexpected: {:?}", other),
    }
    match result {
        Some(agent_wire::ResponseEvent::ToolResult { content, .. }) => assert_eq!(content, "hi"),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn compaction_frames_materialize_as_their_own_messages() {
    let mut conversation = Conversation::new();
    let mut decoder = ResponseDecoder::new();
    conversation.push_user("long task", Vec::new());
    feed(
        &mut conversation,
        &mut decoder,
        json!({
            "type": "stream_event",
            "event": {"type": "content_block_delta", "delta": {"text": "working"}},
        }),
    );

    feed(
        &mut conversation,
        &mut decoder,
        json!({
            "type": "system",
            "subtype": "compact_boundary",
            "compact_metadata": {"trigger": "auto", "pre_tokens": 154000},
        }),
    );
    feed(
        &mut conversation,
        &mut decoder,
        json!({
            "type": "user",
            "isCompactSummary": true,
            "isVisibleInTranscriptOnly": true,
            "message": {"content": "Earlier: the agent explored the codebase."},
        }),
    );

    // user, streaming assistant, boundary, summary.
    assert_eq!(conversation.messages.len(), 4);
    let boundary = &conversation.messages[2];
    assert_eq!(
        boundary.message_type,
        agent_wire::MessageType::CompactBoundary
    );
    let summary = &conversation.messages[3];
    assert!(summary.is_compact_summary);
    assert_eq!(summary.role, agent_wire::MessageRole::User);
    // Prior messages stay intact in the local log.
    assert_eq!(conversation.messages[1].content, "working");
}

#[test]
fn chunked_delivery_matches_line_delivery() {
    let mut decoder = ResponseDecoder::new();
    let line = json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": "split across reads"}]},
    })
    .to_string();
    let (first, second) = line.split_at(line.len() / 2);

    assert!(decoder.feed(first).is_empty());
    let mut frames = decoder.feed(second);
    assert!(frames.is_empty());
    frames.extend(decoder.feed("\n"));
    assert_eq!(frames.len(), 1);
}
