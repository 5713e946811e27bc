//! Per-agent session runtime.
//!
//! Each session is a cooperative actor owning one assistant subprocess.
//! One loop reads the subprocess stdout and is the only writer of the
//! conversation; a dedicated task drains the outbound frame queue into
//! stdin. Control requests fan out to handler tasks so a slow tool call or
//! permission prompt never stalls response decoding.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::conversation::{Applied, Conversation};
use crate::decoder::{InboundFrame, ResponseDecoder};
use crate::events::{EventBus, EventPayload, EventStream};
use crate::protocol::{
    control_response_err, control_response_ok, init_frame, permission_allow, permission_deny,
    user_message_frame, Attachment, ControlRequest, ControlRequestBody,
};
use crate::response::ResponseEvent;
use crate::tools::{HookDecision, HookRunner, PermissionReply, PermissionResponder, ToolDispatcher};
use crate::transport::{ProcessControl, SessionIo};

/// Message injected into the active turn when the user cancels it.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by user";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("agent session terminated")]
    Terminated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Runtime knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub agent_id: String,
    /// Wait this long for the first inbound frame before declaring the
    /// subprocess failed.
    pub startup_timeout: Duration,
    /// Optional cap on a single turn.
    pub turn_timeout: Option<Duration>,
    /// Grace between the cooperative interrupt and the forcible kill.
    pub abort_grace: Duration,
}

impl SessionConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            startup_timeout: Duration::from_secs(10),
            turn_timeout: None,
            abort_grace: Duration::from_secs(2),
        }
    }
}

/// Host collaborators injected into every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub tools: Arc<dyn ToolDispatcher>,
    pub permissions: Arc<dyn PermissionResponder>,
    pub hooks: Arc<dyn HookRunner>,
    pub bus: Arc<EventBus>,
}

enum Command {
    Send {
        content: String,
        attachments: Vec<Attachment>,
    },
    Abort,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cheap cloneable handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    agent_id: String,
    tx: mpsc::UnboundedSender<Command>,
    conversation: Arc<RwLock<Conversation>>,
    bus: Arc<EventBus>,
    queued: watch::Receiver<Vec<String>>,
    dead: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Enqueue a user message. The session sends it once the current turn
    /// (and any earlier queued messages) complete.
    pub fn send_message(
        &self,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> SessionResult<()> {
        if self.is_dead() {
            return Err(SessionError::Terminated);
        }
        self.tx
            .send(Command::Send {
                content: content.into(),
                attachments,
            })
            .map_err(|_| SessionError::Terminated)
    }

    /// Cancel the in-flight turn. Idempotent; a no-op when idle.
    pub fn abort(&self) {
        let _ = self.tx.send(Command::Abort);
    }

    /// Terminate the session and release its subprocess.
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Shutdown { done }).is_ok() {
            let _ = wait.await;
        }
    }

    /// Snapshot of the conversation for reconciliation after subscribing.
    pub async fn conversation(&self) -> Conversation {
        self.conversation.read().await.clone()
    }

    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Messages enqueued but not yet sent, for UI display.
    pub fn queued_messages(&self) -> watch::Receiver<Vec<String>> {
        self.queued.clone()
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

/// Spawn the session actor over the given I/O bundle.
pub fn spawn_session(config: SessionConfig, io: SessionIo, deps: SessionDeps) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (queued_tx, queued_rx) = watch::channel(Vec::new());
    let conversation = Arc::new(RwLock::new(Conversation::new()));
    let dead = Arc::new(AtomicBool::new(false));

    let handle = SessionHandle {
        agent_id: config.agent_id.clone(),
        tx,
        conversation: Arc::clone(&conversation),
        bus: Arc::clone(&deps.bus),
        queued: queued_rx,
        dead: Arc::clone(&dead),
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(write_loop(io.writer, outbound_rx));

    let actor = SessionActor {
        config,
        deps,
        conversation,
        control: io.control,
        outbound_tx,
        decoder: ResponseDecoder::new(),
        inbox: VecDeque::new(),
        queued_tx,
        turn_active: false,
        received_any: false,
        dead,
    };
    tokio::spawn(actor.run(io.reader, rx));

    handle
}

async fn write_loop(
    mut writer: Box<dyn AsyncWrite + Send + Unpin>,
    mut rx: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(frame) = rx.recv().await {
        let mut line = frame.to_string();
        line.push('\n');
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            warn!(error = %err, "failed to write frame to subprocess");
            break;
        }
        if let Err(err) = writer.flush().await {
            warn!(error = %err, "failed to flush subprocess stdin");
            break;
        }
    }
}

struct SessionActor {
    config: SessionConfig,
    deps: SessionDeps,
    conversation: Arc<RwLock<Conversation>>,
    control: Arc<dyn ProcessControl>,
    outbound_tx: mpsc::UnboundedSender<Value>,
    decoder: ResponseDecoder,
    inbox: VecDeque<(String, Vec<Attachment>)>,
    queued_tx: watch::Sender<Vec<String>>,
    turn_active: bool,
    received_any: bool,
    dead: Arc<AtomicBool>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        mut mailbox: mpsc::UnboundedReceiver<Command>,
    ) {
        // Register our tool servers before anything else goes down the pipe.
        let _ = self
            .outbound_tx
            .send(init_frame(&self.deps.tools.servers()));

        let startup = tokio::time::sleep(self.config.startup_timeout);
        tokio::pin!(startup);
        let mut turn_deadline: Option<tokio::time::Instant> = None;
        let mut buf = vec![0u8; 8192];

        loop {
            tokio::select! {
                command = mailbox.recv() => {
                    match command {
                        Some(Command::Send { content, attachments }) => {
                            self.inbox.push_back((content, attachments));
                            self.publish_queue();
                            self.try_send_next(&mut turn_deadline).await;
                        }
                        Some(Command::Abort) => self.handle_abort().await,
                        Some(Command::Shutdown { done }) => {
                            self.handle_shutdown().await;
                            let _ = done.send(());
                            break;
                        }
                        None => {
                            self.handle_shutdown().await;
                            break;
                        }
                    }
                }
                read = reader.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            self.handle_eof().await;
                            break;
                        }
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                            let frames = self.decoder.feed(&chunk);
                            for frame in frames {
                                self.handle_frame(frame, &mut turn_deadline).await;
                            }
                        }
                        Err(err) => {
                            error!(agent_id = %self.config.agent_id, error = %err, "subprocess read failed");
                            self.handle_eof().await;
                            break;
                        }
                    }
                }
                _ = &mut startup, if !self.received_any => {
                    error!(agent_id = %self.config.agent_id, "subprocess produced no output before startup timeout");
                    self.fail_current_turn("Assistant subprocess failed to start").await;
                    let _ = self.control.kill().await;
                    break;
                }
                _ = sleep_until_opt(turn_deadline), if self.turn_active && turn_deadline.is_some() => {
                    warn!(agent_id = %self.config.agent_id, "turn timeout exceeded");
                    self.fail_current_turn("Turn timed out").await;
                    turn_deadline = None;
                    self.try_send_next(&mut turn_deadline).await;
                }
            }
        }

        self.dead.store(true, Ordering::SeqCst);
        if !self.inbox.is_empty() {
            warn!(
                agent_id = %self.config.agent_id,
                queued = self.inbox.len(),
                "discarding queued messages for terminated session"
            );
            self.inbox.clear();
            self.publish_queue();
        }
        info!(agent_id = %self.config.agent_id, "session actor stopped");
    }

    async fn handle_frame(
        &mut self,
        frame: InboundFrame,
        turn_deadline: &mut Option<tokio::time::Instant>,
    ) {
        self.received_any = true;
        match frame {
            InboundFrame::Control(request) => self.handle_control(request),
            InboundFrame::Event(event) => self.handle_event(event, turn_deadline).await,
        }
    }

    async fn handle_event(
        &mut self,
        event: ResponseEvent,
        turn_deadline: &mut Option<tokio::time::Instant>,
    ) {
        self.emit_for_event(&event);

        let applied = self.conversation.write().await.apply_event(event);
        match applied {
            Applied::TurnCompleted => {
                self.finish_turn(turn_deadline).await;
            }
            Applied::Errored => {
                self.finish_turn(turn_deadline).await;
            }
            Applied::Updated | Applied::Ignored => {}
        }
    }

    async fn finish_turn(&mut self, turn_deadline: &mut Option<tokio::time::Instant>) {
        self.turn_active = false;
        *turn_deadline = None;
        if let Some(message) = self.conversation.read().await.messages.last() {
            self.deps.bus.emit(EventPayload::Message {
                message: Box::new(message.clone()),
            });
        }
        self.try_send_next(turn_deadline).await;
    }

    /// Translate one decoded event into its fanout payload.
    fn emit_for_event(&self, event: &ResponseEvent) {
        let payload = match event {
            ResponseEvent::Text { content, .. } => Some(EventPayload::MessageDelta {
                content: content.clone(),
            }),
            ResponseEvent::ToolUse {
                tool_name,
                params,
                tool_use_id,
            } => Some(EventPayload::ToolUse {
                tool_name: tool_name.clone(),
                params: params.clone(),
                tool_use_id: tool_use_id.clone(),
            }),
            ResponseEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(EventPayload::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone(),
                is_error: *is_error,
            }),
            ResponseEvent::Completion {
                stop_reason,
                usage,
                cost_usd,
            } => Some(EventPayload::Done {
                stop_reason: stop_reason.clone(),
                usage: *usage,
                cost_usd: *cost_usd,
            }),
            ResponseEvent::Error { message, code, .. } => Some(EventPayload::Error {
                message: message.clone(),
                code: code.clone(),
            }),
            ResponseEvent::Status { status, .. } => Some(EventPayload::Status {
                status: status.clone(),
            }),
            ResponseEvent::Meta { .. }
            | ResponseEvent::CompactBoundary { .. }
            | ResponseEvent::CompactSummary { .. }
            | ResponseEvent::UserMessage { .. }
            | ResponseEvent::Unknown { .. } => None,
        };
        if let Some(payload) = payload {
            self.deps.bus.emit(payload);
        }
    }

    fn handle_control(&self, request: ControlRequest) {
        let deps = self.deps.clone();
        let outbound = self.outbound_tx.clone();
        let agent_id = self.config.agent_id.clone();
        tokio::spawn(async move {
            let request_id = request.request_id.clone();
            let frame = match request.request {
                ControlRequestBody::CanUseTool {
                    tool_name, input, ..
                } => {
                    let reply = deps.permissions.can_use_tool(&tool_name, &input).await;
                    debug!(agent_id = %agent_id, tool = %tool_name, ?reply, "permission decision");
                    match reply {
                        PermissionReply::Allow => {
                            control_response_ok(&request_id, permission_allow())
                        }
                        PermissionReply::Deny { message } => {
                            control_response_ok(&request_id, permission_deny(&message))
                        }
                    }
                }
                ControlRequestBody::HookCallback {
                    callback_id,
                    tool_use_id,
                    input,
                } => {
                    let decision = deps
                        .hooks
                        .run(&callback_id, tool_use_id.as_deref(), &input)
                        .await;
                    let body = match decision {
                        HookDecision::Continue => json!({"continue": true}),
                        HookDecision::Block { reason } => {
                            json!({"continue": false, "stopReason": reason})
                        }
                    };
                    control_response_ok(&request_id, body)
                }
                ControlRequestBody::McpMessage {
                    server_name,
                    message,
                } => match deps.tools.dispatch(&server_name, message).await {
                    Ok(response) => {
                        control_response_ok(&request_id, json!({"mcp_response": response}))
                    }
                    Err(err) => {
                        warn!(agent_id = %agent_id, server = %server_name, error = %err, "tool dispatch failed");
                        control_response_err(&request_id, &err.to_string())
                    }
                },
                ControlRequestBody::Unknown => control_response_err(&request_id, "unknown subtype"),
            };
            let _ = outbound.send(frame);
        });
    }

    async fn try_send_next(&mut self, turn_deadline: &mut Option<tokio::time::Instant>) {
        if self.turn_active || self.dead.load(Ordering::SeqCst) {
            return;
        }
        let Some((content, attachments)) = self.inbox.pop_front() else {
            return;
        };
        self.publish_queue();

        self.conversation
            .write()
            .await
            .push_user(content.clone(), attachments.clone());
        let frame = user_message_frame(&content, &attachments);
        if self.outbound_tx.send(frame).is_err() {
            self.fail_current_turn("Assistant subprocess is gone").await;
            return;
        }
        self.turn_active = true;
        *turn_deadline = self
            .config
            .turn_timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);
    }

    async fn handle_abort(&mut self) {
        if !self.turn_active {
            // Idempotent: nothing in flight.
            return;
        }
        info!(agent_id = %self.config.agent_id, "aborting in-flight turn");
        self.turn_active = false;
        self.conversation.write().await.fail_turn(INTERRUPTED_MESSAGE);
        self.deps.bus.emit(EventPayload::Error {
            message: INTERRUPTED_MESSAGE.to_string(),
            code: Some("interrupted".to_string()),
        });

        let control = Arc::clone(&self.control);
        let grace = self.config.abort_grace;
        tokio::spawn(async move {
            let _ = control.interrupt().await;
            if !control.wait_exit(grace).await {
                let _ = control.kill().await;
            }
        });
    }

    async fn handle_shutdown(&mut self) {
        if self.turn_active {
            self.turn_active = false;
            self.conversation.write().await.fail_turn("Agent terminated");
        }
        let _ = self.control.interrupt().await;
        if !self.control.wait_exit(self.config.abort_grace).await {
            let _ = self.control.kill().await;
        }
        self.dead.store(true, Ordering::SeqCst);
    }

    async fn handle_eof(&mut self) {
        for frame in self.decoder.finish() {
            // Deadline no longer matters; the stream is gone.
            let mut ignored = None;
            self.handle_frame(frame, &mut ignored).await;
        }
        if self.turn_active {
            self.fail_current_turn("Assistant subprocess exited unexpectedly")
                .await;
        }
        self.dead.store(true, Ordering::SeqCst);
    }

    async fn fail_current_turn(&mut self, message: &str) {
        self.turn_active = false;
        self.conversation.write().await.fail_turn(message);
        self.deps.bus.emit(EventPayload::Error {
            message: message.to_string(),
            code: Some("session_failed".to_string()),
        });
    }

    fn publish_queue(&self) {
        let queued: Vec<String> = self
            .inbox
            .iter()
            .map(|(content, _)| content.clone())
            .collect();
        let _ = self.queued_tx.send(queued);
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}
