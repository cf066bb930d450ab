//! Error types for all engine trait operations.

use thiserror::Error;

/// Errors from backend implementations
/// ([`ContextBackend`](crate::traits::ContextBackend) and friends).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("execution not found: {id}")]
    NotFound { id: String },
    #[error("backend error: {message}")]
    Store { message: String },
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

/// Errors from the context store.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context field '{name}' is reserved")]
    ReservedField { name: String },
}

/// Errors from the template and condition evaluator.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template parse error: {message}")]
    Parse { message: String },
    #[error("unclosed template delimiter in: {template}")]
    UnclosedDelimiter { template: String },
    #[error("unsupported template syntax: {message}")]
    Unsupported { message: String },
}

/// Errors raised by tool functions or tool argument resolution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {name}")]
    NotFound { name: String },
    #[error("invalid tool arguments: {message}")]
    Arguments { message: String },
    #[error("tool execution failed: {message}")]
    Execution { message: String },
}

impl ToolError {
    /// Shorthand for an execution failure with a formatted message.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }
}

/// Errors from the model caller or structured-output parsing.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call failed: {message}")]
    Call { message: String },
    #[error("model response did not match the contract: {message}")]
    Contract { message: String },
    #[error("model retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("no model caller configured — register one via EngineBuilder::model_caller")]
    NotConfigured,
}

/// Configuration errors, rejected before any dispatch.
#[derive(Debug, Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by a single node activation.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("node configuration error: {message}")]
    Config { message: String },
    #[error("child execution failed: {message}")]
    Child { message: String },
}

/// Top-level errors from `orchestrate` / `broadcast_signals`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown execution: {id}")]
    UnknownExecution { id: String },
    #[error("node '{node}' failed: {source}")]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("node activation ceiling reached ({limit}) — possible runaway workflow")]
    ActivationCeiling { limit: u64 },
}
