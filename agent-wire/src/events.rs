//! Per-agent event fanout.
//!
//! Every agent owns a broadcast bus; subscribers receive tagged events in
//! arrival order with a per-agent monotone sequence number. A slow
//! subscriber is lapped by the ring buffer and receives a `dropped` marker;
//! the producing agent never blocks on subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::conversation::Message;
use crate::response::TokenUsage;

/// Identity fields stamped on every event from one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub agent_type: String,
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
}

/// The event body, tagged for the wire as `{"type": …, "data": …}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Connected {},
    Status {
        status: String,
    },
    Message {
        message: Box<Message>,
    },
    MessageDelta {
        content: String,
    },
    ToolUse {
        tool_name: String,
        params: Value,
        tool_use_id: String,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Done {
        stop_reason: String,
        usage: TokenUsage,
        cost_usd: Option<f64>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// Per-subscriber marker: this receiver fell behind and `skipped`
    /// events were discarded for it alone.
    Dropped {
        skipped: u64,
    },
}

/// One tagged event as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    #[serde(flatten)]
    pub agent: AgentDescriptor,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
}

/// Broadcast bus for one agent.
pub struct EventBus {
    descriptor: RwLock<AgentDescriptor>,
    tx: broadcast::Sender<AgentEvent>,
    seq: AtomicU64,
    /// Optional network-wide mirror; main-agent subscribers listen there to
    /// observe every descendant.
    mirror: Option<broadcast::Sender<AgentEvent>>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(descriptor: AgentDescriptor) -> Self {
        Self::with_capacity(descriptor, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(descriptor: AgentDescriptor, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            descriptor: RwLock::new(descriptor),
            tx,
            seq: AtomicU64::new(0),
            mirror: None,
        }
    }

    /// Mirror every emitted event into `mirror` as well (network-level bus).
    pub fn with_mirror(mut self, mirror: broadcast::Sender<AgentEvent>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn descriptor(&self) -> AgentDescriptor {
        self.descriptor.read().expect("descriptor lock").clone()
    }

    pub fn set_task_name(&self, task_name: Option<String>) {
        self.descriptor.write().expect("descriptor lock").task_name = task_name;
    }

    pub fn set_agent_name(&self, name: String) {
        self.descriptor.write().expect("descriptor lock").agent_name = name;
    }

    /// Stamp and broadcast an event. Never blocks; an absent audience is
    /// not an error.
    pub fn emit(&self, payload: EventPayload) -> AgentEvent {
        let event = AgentEvent {
            agent: self.descriptor(),
            payload,
            timestamp: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        };
        let _ = self.tx.send(event.clone());
        if let Some(mirror) = &self.mirror {
            let _ = mirror.send(event.clone());
        }
        event
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            descriptor: self.descriptor(),
            last_seq: 0,
        }
    }
}

/// A subscriber's view of an agent's (or a whole network's) event stream.
pub struct EventStream {
    rx: broadcast::Receiver<AgentEvent>,
    descriptor: AgentDescriptor,
    last_seq: u64,
}

impl EventStream {
    /// Wrap a raw receiver (network-level mirror streams).
    pub fn from_receiver(
        rx: broadcast::Receiver<AgentEvent>,
        descriptor: AgentDescriptor,
    ) -> Self {
        Self {
            rx,
            descriptor,
            last_seq: 0,
        }
    }

    /// Identity of the agent (or network root) this stream was opened on.
    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    /// Next event, or `None` once the source is gone and the buffer drained.
    ///
    /// Falling behind yields a synthesized [`EventPayload::Dropped`] marker
    /// carrying the skip count; subsequent events resume normally.
    pub async fn next(&mut self) -> Option<AgentEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    self.last_seq = event.seq;
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Some(AgentEvent {
                        agent: self.descriptor.clone(),
                        payload: EventPayload::Dropped { skipped },
                        timestamp: Utc::now(),
                        seq: self.last_seq,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Create a network-level mirror channel.
pub fn network_channel(capacity: usize) -> broadcast::Sender<AgentEvent> {
    broadcast::channel(capacity).0
}

pub type NetworkSender = broadcast::Sender<AgentEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> AgentDescriptor {
        AgentDescriptor {
            agent_id: id.to_string(),
            agent_type: "main".to_string(),
            agent_name: "Main".to_string(),
            task_name: None,
        }
    }

    #[tokio::test]
    async fn events_arrive_in_order_with_monotone_seq() {
        let bus = EventBus::new(descriptor("a1"));
        let mut stream = bus.subscribe();

        for i in 0..5u64 {
            bus.emit(EventPayload::Status {
                status: format!("s{}", i),
            });
        }

        let mut last = None;
        for _ in 0..5 {
            let event = stream.next().await.unwrap();
            if let Some(prev) = last {
                assert!(event.seq > prev);
            }
            last = Some(event.seq);
        }
    }

    #[tokio::test]
    async fn lagged_subscriber_gets_dropped_marker() {
        let bus = EventBus::with_capacity(descriptor("a1"), 4);
        let mut stream = bus.subscribe();

        for i in 0..20u64 {
            bus.emit(EventPayload::Status {
                status: format!("s{}", i),
            });
        }

        let first = stream.next().await.unwrap();
        assert!(matches!(
            first.payload,
            EventPayload::Dropped { skipped } if skipped > 0
        ));
        // The stream resumes with real events afterwards.
        let second = stream.next().await.unwrap();
        assert!(matches!(second.payload, EventPayload::Status { .. }));
    }

    #[tokio::test]
    async fn emitting_without_subscribers_never_blocks() {
        let bus = EventBus::with_capacity(descriptor("a1"), 2);
        for _ in 0..100 {
            bus.emit(EventPayload::Status {
                status: "tick".into(),
            });
        }
    }

    #[tokio::test]
    async fn mirror_receives_every_event() {
        let network = network_channel(64);
        let bus = EventBus::new(descriptor("child")).with_mirror(network.clone());
        let mut network_stream = EventStream::from_receiver(network.subscribe(), descriptor("net"));

        bus.emit(EventPayload::Status {
            status: "hello".into(),
        });

        let event = network_stream.next().await.unwrap();
        assert_eq!(event.agent.agent_id, "child");
    }

    #[test]
    fn wire_shape_matches_contract() {
        let event = AgentEvent {
            agent: descriptor("a1"),
            payload: EventPayload::MessageDelta {
                content: "hi".into(),
            },
            timestamp: Utc::now(),
            seq: 7,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["agentId"], "a1");
        assert_eq!(value["agentType"], "main");
        assert_eq!(value["agentName"], "Main");
        assert_eq!(value["type"], "message_delta");
        assert_eq!(value["data"]["content"], "hi");
        assert_eq!(value["seq"], 7);
        assert!(value.get("taskName").is_none());
    }
}
