//! SOE — signal-driven orchestration engine.
//!
//! This crate runs declarative, YAML-defined workflows whose nodes
//! communicate by emitting and listening for named signals rather than by
//! direct invocation. The dispatcher drains a FIFO signal queue to
//! quiescence; per-execution context keeps the full write history of every
//! field; child executions, fan-out, context inheritance, and runtime
//! self-modification all build on the same dispatch loop.
//!
//! The engine is designed to be embedded: model invocation, tool bodies,
//! and persistence are all supplied through the traits in [`traits`], with
//! in-memory and file-backed defaults in [`defaults`].
//!
//! ```no_run
//! use soe_engine::{Engine, OrchestrateRequest, WorkflowConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WorkflowConfig::from_yaml(
//!     r#"
//! workflows:
//!   main:
//!     gate:
//!       node_type: router
//!       event_triggers: [START]
//!       event_emissions:
//!         - signal_name: DONE
//! "#,
//! )?;
//!
//! let engine = Engine::builder().build();
//! let execution_id = engine
//!     .orchestrate(OrchestrateRequest::new("main").config(config).signals(["START"]))
//!     .await?;
//! engine.broadcast_signals(&execution_id, vec!["DONE".into()]).await?;
//! # Ok(())
//! # }
//! ```

pub mod builtins;
pub mod config;
pub mod context;
pub mod contract;
pub(crate) mod conversation;
pub mod defaults;
pub(crate) mod dispatcher;
pub mod engine;
pub mod errors;
pub(crate) mod nodes;
pub mod template;
pub mod tool_registry;
pub mod traits;
pub mod types;

// Re-export public types at the crate level.

// engine
pub use engine::{Engine, EngineBuilder};

// errors
pub use errors::{
    BackendError, ConfigError, ContextError, EngineError, ModelError, NodeError, TemplateError,
    ToolError,
};

// context
pub use context::{ExecutionContext, OperationalState, ParentLink};

// tools
pub use tool_registry::ToolRegistry;
pub use traits::{
    Backends, ContextBackend, ContextSchemaBackend, ConversationHistoryBackend, IdentityBackend,
    ModelCaller, TelemetryBackend, ToolFn, ToolSpec, WorkflowBackend,
};

// types
pub use types::{
    EmissionDef, EventType, FieldSchema, Message, NodeConfig, NodeType, OrchestrateRequest,
    SchemaType, WorkflowConfig, WorkflowDef, WorkflowRegistry,
};

// builtins
pub use builtins::{is_builtin, BUILTIN_TOOL_NAMES};
