//! # agent-wire
//!
//! Per-agent session runtime for assistant-CLI backed agents.
//!
//! One session owns one assistant subprocess and speaks line-delimited JSON
//! in both directions: user messages and control responses go down stdin,
//! response events and control requests come back on stdout. The crate
//! provides:
//!
//! - **Transport** ([`transport`]): piped subprocess I/O with cooperative
//!   interrupt and forcible kill, plus an in-memory duplex for tests.
//! - **Protocol** ([`protocol`]): the control-request/response and user
//!   message frame shapes.
//! - **Decoder** ([`decoder`]): incremental LDJSON decoding into typed
//!   [`response::ResponseEvent`]s with forward-compatible fallbacks.
//! - **Conversation** ([`conversation`]): append-only message log with
//!   streaming-delta reconciliation and token accounting.
//! - **Session** ([`session`]): the actor tying it all together, with a
//!   FIFO inbox drained one turn at a time.
//! - **Events** ([`events`]): per-agent broadcast fanout with sequence
//!   numbers and per-subscriber drop markers.
//!
//! Hosts inject their tool servers, permission engine and hook registry
//! through the traits in [`tools`]; the session never owns policy.

pub mod conversation;
pub mod decoder;
pub mod events;
pub mod protocol;
pub mod response;
pub mod session;
pub mod tools;
pub mod transport;

pub use conversation::{Applied, Conversation, ConversationState, Message, MessageRole, MessageType};
pub use decoder::{decode_frame, InboundFrame, ResponseDecoder};
pub use events::{AgentDescriptor, AgentEvent, EventBus, EventPayload, EventStream};
pub use protocol::{Attachment, ControlRequest, ControlRequestBody};
pub use response::{ResponseEvent, TokenUsage};
pub use session::{
    spawn_session, SessionConfig, SessionDeps, SessionError, SessionHandle, SessionResult,
    INTERRUPTED_MESSAGE,
};
pub use tools::{
    HookDecision, HookRunner, NoHooks, PermissionReply, PermissionResponder, ToolContent,
    ToolDispatcher, ToolOutput,
};
pub use transport::{duplex_io, spawn_process, LaunchSpec, ProcessControl, SessionIo};
