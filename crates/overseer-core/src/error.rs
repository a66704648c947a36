//! Error types for the control plane

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate type: {kind}:{type_name} already exists")]
    DuplicateType { kind: String, type_name: String },

    #[error("unknown tool '{tool}' for kind {kind}")]
    UnknownTool { kind: String, tool: String },

    #[error("unknown agent type: {kind}:{type_name} is not registered")]
    UnknownAgentType { kind: String, type_name: String },

    #[error("pool exhausted for {config_id}")]
    PoolExhausted { config_id: String },

    #[error("permission denied: {principal} lacks {required} on {resource}")]
    PermissionDenied {
        resource: String,
        principal: String,
        required: String,
    },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("restore failed at {path}:{line}: {message}")]
    RestoreFailed {
        path: String,
        line: usize,
        message: String,
    },

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn duplicate_type(kind: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::DuplicateType {
            kind: kind.into(),
            type_name: type_name.into(),
        }
    }

    pub fn unknown_tool(kind: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::UnknownTool {
            kind: kind.into(),
            tool: tool.into(),
        }
    }

    pub fn unknown_agent_type(kind: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::UnknownAgentType {
            kind: kind.into(),
            type_name: type_name.into(),
        }
    }

    pub fn pool_exhausted(config_id: impl Into<String>) -> Self {
        Self::PoolExhausted {
            config_id: config_id.into(),
        }
    }

    pub fn permission_denied(
        resource: impl Into<String>,
        principal: impl Into<String>,
        required: impl Into<String>,
    ) -> Self {
        Self::PermissionDenied {
            resource: resource.into(),
            principal: principal.into(),
            required: required.into(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Short machine-readable kind tag, used by the ops surface when
    /// converting to transport form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::DuplicateType { .. } => "duplicate_type",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::UnknownAgentType { .. } => "unknown_agent_type",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::IllegalState(_) => "illegal_state",
            Self::RestoreFailed { .. } => "restore_failed",
            Self::InvalidId(_) => "invalid_id",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}
