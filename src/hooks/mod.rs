//! Pluggable hook registry.
//!
//! The subprocess can ask the runtime to run a registered callback before
//! or after a tool use (`hook_callback` control requests). Hook content is
//! opaque to the core: a callback is registered by id and returns either
//! "continue" or a blocking reason. An unknown callback id continues.

use std::collections::HashMap;
use std::sync::Arc;

use agent_wire::{HookDecision, HookRunner};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One registered hook callback.
#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn run(&self, tool_use_id: Option<&str>, input: &Value) -> HookDecision;
}

/// Registry of hook callbacks keyed by callback id.
pub struct HookRegistry {
    callbacks: Arc<RwLock<HashMap<String, Arc<dyn HookCallback>>>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            callbacks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, callback_id: impl Into<String>, callback: Arc<dyn HookCallback>) {
        self.callbacks
            .write()
            .await
            .insert(callback_id.into(), callback);
    }

    pub async fn unregister(&self, callback_id: &str) {
        self.callbacks.write().await.remove(callback_id);
    }

    pub async fn callback_ids(&self) -> Vec<String> {
        self.callbacks.read().await.keys().cloned().collect()
    }
}

impl Clone for HookRegistry {
    fn clone(&self) -> Self {
        Self {
            callbacks: Arc::clone(&self.callbacks),
        }
    }
}

#[async_trait]
impl HookRunner for HookRegistry {
    async fn run(
        &self,
        callback_id: &str,
        tool_use_id: Option<&str>,
        input: &Value,
    ) -> HookDecision {
        let callback = {
            let callbacks = self.callbacks.read().await;
            callbacks.get(callback_id).cloned()
        };
        match callback {
            Some(callback) => {
                let decision = callback.run(tool_use_id, input).await;
                if let HookDecision::Block { reason } = &decision {
                    info!(callback_id, reason = %reason, "hook blocked operation");
                }
                decision
            }
            None => {
                debug!(callback_id, "no hook registered, continuing");
                HookDecision::Continue
            }
        }
    }
}
