//! File-backed context and workflow backends.
//!
//! Layout:
//! ```text
//! {base_dir}/contexts/{execution_id}.json
//! {base_dir}/workflows/{execution_id}.json
//! {base_dir}/workflows/{execution_id}.current
//! ```
//!
//! Atomic writes use a temp-file-then-rename pattern so partial writes
//! never corrupt a stored context.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::ExecutionContext;
use crate::errors::BackendError;
use crate::traits::{ContextBackend, WorkflowBackend};
use crate::types::WorkflowRegistry;

fn store_error(message: impl Into<String>) -> BackendError {
    BackendError::Store {
        message: message.into(),
    }
}

/// Atomic write: serialize to a temp file, then rename over the target.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), BackendError> {
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, data)
        .map_err(|e| store_error(format!("failed to write temp file: {e}")))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| store_error(format!("failed to rename temp file: {e}")))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), BackendError> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| store_error(format!("failed to serialize: {e}")))?;
    atomic_write(path, &data)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, BackendError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path).map_err(|e| store_error(format!("failed to read: {e}")))?;
    let value =
        serde_json::from_slice(&data).map_err(|e| store_error(format!("failed to parse: {e}")))?;
    Ok(Some(value))
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// File-backed context store, one JSON file per execution.
pub struct FileContextBackend {
    dir: PathBuf,
}

impl FileContextBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let dir = base_dir.into().join("contexts");
        std::fs::create_dir_all(&dir)
            .map_err(|e| store_error(format!("failed to create contexts directory: {e}")))?;
        Ok(Self { dir })
    }

    fn path(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{execution_id}.json"))
    }
}

#[async_trait]
impl ContextBackend for FileContextBackend {
    async fn save_context(
        &self,
        execution_id: &str,
        context: &ExecutionContext,
    ) -> Result<(), BackendError> {
        write_json(&self.path(execution_id), context)
    }

    async fn get_context(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionContext>, BackendError> {
        read_json(&self.path(execution_id))
    }

    async fn list_executions(&self) -> Result<Option<Vec<String>>, BackendError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| store_error(format!("failed to read contexts directory: {e}")))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| store_error(e.to_string()))?;
            let name = entry.file_name();
            if let Some(id) = name.to_string_lossy().strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(Some(ids))
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// File-backed workflow registry store.
pub struct FileWorkflowBackend {
    dir: PathBuf,
}

impl FileWorkflowBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let dir = base_dir.into().join("workflows");
        std::fs::create_dir_all(&dir)
            .map_err(|e| store_error(format!("failed to create workflows directory: {e}")))?;
        Ok(Self { dir })
    }

    fn registry_path(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{execution_id}.json"))
    }

    fn current_path(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{execution_id}.current"))
    }
}

#[async_trait]
impl WorkflowBackend for FileWorkflowBackend {
    async fn save_workflows_registry(
        &self,
        execution_id: &str,
        registry: &WorkflowRegistry,
    ) -> Result<(), BackendError> {
        write_json(&self.registry_path(execution_id), registry)
    }

    async fn get_workflows_registry(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowRegistry>, BackendError> {
        read_json(&self.registry_path(execution_id))
    }

    async fn save_current_workflow_name(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<(), BackendError> {
        atomic_write(&self.current_path(execution_id), name.as_bytes())
    }

    async fn get_current_workflow_name(
        &self,
        execution_id: &str,
    ) -> Result<Option<String>, BackendError> {
        let path = self.current_path(execution_id);
        if !path.exists() {
            return Ok(None);
        }
        let name = std::fs::read_to_string(&path)
            .map_err(|e| store_error(format!("failed to read current workflow: {e}")))?;
        Ok(Some(name))
    }
}
