//! Request-reply channel between tool servers and the surrounding UI.
//!
//! A tool server calls [`AskUserCoordinator::ask_questions`] and waits; the
//! host consumes [`AskUserRequest`]s from the bounded stream and answers
//! with [`AskUserCoordinator::respond`]. Disposing the coordinator (or the
//! host dropping its receiver) completes every pending request with empty
//! answers so nothing hangs forever.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Answers keyed by the question text.
pub type Answers = HashMap<String, String>;

/// One outstanding request shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskUserRequest {
    pub request_id: String,
    pub questions: Vec<String>,
}

pub struct AskUserCoordinator {
    pending: DashMap<String, oneshot::Sender<Answers>>,
    requests_tx: async_channel::Sender<AskUserRequest>,
    requests_rx: async_channel::Receiver<AskUserRequest>,
}

impl Default for AskUserCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl AskUserCoordinator {
    pub fn new() -> Self {
        let (requests_tx, requests_rx) = async_channel::bounded(64);
        Self {
            pending: DashMap::new(),
            requests_tx,
            requests_rx,
        }
    }

    /// Host-side stream of requests awaiting answers.
    pub fn requests(&self) -> async_channel::Receiver<AskUserRequest> {
        self.requests_rx.clone()
    }

    /// Server-side: ask and wait for the host's answers.
    ///
    /// There is no timeout; the user may take arbitrary time. If the host
    /// goes away, the request resolves with empty answers.
    pub async fn ask_questions(&self, questions: Vec<String>) -> Answers {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let request = AskUserRequest {
            request_id: request_id.clone(),
            questions,
        };
        if self.requests_tx.send(request).await.is_err() {
            debug!("ask-user host stream closed, answering empty");
            self.pending.remove(&request_id);
            return Answers::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Host-side: deliver the answers for one request. Returns whether the
    /// request was still pending.
    pub fn respond(&self, request_id: &str, answers: Answers) -> bool {
        match self.pending.remove(request_id) {
            Some((_, tx)) => tx.send(answers).is_ok(),
            None => false,
        }
    }

    /// Complete every pending request with empty answers.
    pub fn dispose(&self) {
        self.requests_rx.close();
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Answers::new());
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether anything is waiting on the user right now.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
