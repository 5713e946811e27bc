use thiserror::Error;

/// Main error type for starling with structured error handling.
#[derive(Error, Debug)]
pub enum StarlingError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Configuration related error
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Agent operation failed
    #[error("Agent error [{agent_id}]: {message}")]
    Agent {
        agent_id: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network-level operation failed
    #[error("Network error [{network_id}]: {message}")]
    Network {
        network_id: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Tool invocation failed
    #[error("Tool error [{server}/{tool}]: {message}")]
    Tool {
        server: String,
        tool: String,
        message: String,
    },

    /// Permission evaluation rejected an operation
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Git operation error
    #[error("Git error: {message}")]
    Git {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Persistence failure writing settings, memory or network snapshots
    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Control-protocol violation
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Generic error for cases not covered above
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl From<String> for StarlingError {
    fn from(error: String) -> Self {
        Self::Other {
            message: error,
            source: None,
        }
    }
}

impl From<&str> for StarlingError {
    fn from(error: &str) -> Self {
        Self::Other {
            message: error.to_string(),
            source: None,
        }
    }
}

/// Result type alias for starling operations
pub type Result<T> = std::result::Result<T, StarlingError>;

/// Convenience methods for creating specific error types
impl StarlingError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    pub fn agent<I: Into<String>, S: Into<String>>(agent_id: I, message: S) -> Self {
        Self::Agent {
            agent_id: agent_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn network<I: Into<String>, S: Into<String>>(network_id: I, message: S) -> Self {
        Self::Network {
            network_id: network_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn tool<A: Into<String>, B: Into<String>, S: Into<String>>(
        server: A,
        tool: B,
        message: S,
    ) -> Self {
        Self::Tool {
            server: server.into(),
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn permission<S: Into<String>>(message: S) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn git<S: Into<String>>(message: S) -> Self {
        Self::Git {
            message: message.into(),
            source: None,
        }
    }

    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence {
            message: message.into(),
            source: None,
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Add a source error to this error
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match &mut self {
            Self::Configuration { source: s, .. }
            | Self::Agent { source: s, .. }
            | Self::Network { source: s, .. }
            | Self::Git { source: s, .. }
            | Self::Persistence { source: s, .. }
            | Self::Other { source: s, .. } => {
                *s = Some(Box::new(source));
            }
            _ => {}
        }
        self
    }

    /// Stable machine code for host presentation.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io_error",
            Self::SerdeJson(_) => "serde_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Agent { .. } => "agent_error",
            Self::Network { .. } => "network_error",
            Self::Tool { .. } => "tool_error",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Git { .. } => "git_error",
            Self::Persistence { .. } => "persistence_error",
            Self::Protocol { .. } => "protocol_error",
            Self::Other { .. } => "other_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_constructors_carry_context() {
        let error = StarlingError::agent("a1", "spawn failed");
        assert_eq!(error.to_string(), "Agent error [a1]: spawn failed");
        assert_eq!(error.code(), "agent_error");
    }

    #[test]
    fn with_source_attaches_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error = StarlingError::persistence("write failed").with_source(cause);
        assert!(std::error::Error::source(&error).is_some());
    }
}
