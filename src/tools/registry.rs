use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::schemas::Principal;

use super::{Tool, ToolDefinition, ToolError, ToolExecutionResult};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Tool '{0}' is already registered")]
    DuplicateName(String),

    #[error("Tool must have a name and a description")]
    InvalidDefinition,
}

struct RegisteredTool {
    definition: ToolDefinition,
    instance: Arc<dyn Tool>,
    required_permissions: Vec<String>,
    executions: AtomicU64,
}

/// Process-wide tool registry.
///
/// Populated once at startup; after that the only mutation is the
/// enable/disable toggle, which sits behind its own lock so per-request
/// readers never contend with registration.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    disabled: RwLock<HashSet<String>>,
    workers: Arc<Semaphore>,
}

impl ToolRegistry {
    pub fn new(worker_count: usize) -> Self {
        Self {
            tools: HashMap::new(),
            disabled: RwLock::new(HashSet::new()),
            workers: Arc::new(Semaphore::new(worker_count.max(1))),
        }
    }

    /// Register a tool under its definition name. Names are unique;
    /// re-registration is an error, not an overwrite.
    pub fn register(
        &mut self,
        tool: Arc<dyn Tool>,
        required_permissions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<(), RegistryError> {
        let definition = tool.definition();
        if definition.name.is_empty() || definition.description.is_empty() {
            return Err(RegistryError::InvalidDefinition);
        }
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName(definition.name));
        }

        log::info!(
            "Registered tool: {} ({:?})",
            definition.name,
            definition.category
        );
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                instance: tool,
                required_permissions: required_permissions
                    .into_iter()
                    .map(Into::into)
                    .collect(),
                executions: AtomicU64::new(0),
            },
        );
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.tools.contains_key(name)
            && !self
                .disabled
                .read()
                .expect("disabled set poisoned")
                .contains(name)
    }

    /// Enabling an already-enabled tool is a no-op; returns false for
    /// unknown tools.
    pub fn enable(&self, name: &str) -> bool {
        if !self.tools.contains_key(name) {
            return false;
        }
        self.disabled
            .write()
            .expect("disabled set poisoned")
            .remove(name);
        true
    }

    pub fn disable(&self, name: &str) -> bool {
        if !self.tools.contains_key(name) {
            return false;
        }
        self.disabled
            .write()
            .expect("disabled set poisoned")
            .insert(name.to_string());
        true
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|t| &t.definition).collect()
    }

    pub fn required_permissions(&self, name: &str) -> Option<&[String]> {
        self.tools
            .get(name)
            .map(|t| t.required_permissions.as_slice())
    }

    /// OpenAI-style function schema, for advertising tools to a model.
    pub fn tool_schema(&self, name: &str) -> Option<Value> {
        self.tools.get(name).map(|t| t.definition.function_schema())
    }

    pub fn tool_info(&self, name: &str) -> Option<Value> {
        let tool = self.tools.get(name)?;
        Some(json!({
            "name": tool.definition.name,
            "description": tool.definition.description,
            "category": tool.definition.category,
            "enabled": self.is_enabled(name),
            "required_permissions": tool.required_permissions,
            "execution_count": tool.executions.load(Ordering::Relaxed),
            "parameters": tool.definition.parameters,
        }))
    }

    pub fn list_tools_info(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.tool_info(name))
            .collect()
    }

    /// Execute a tool on behalf of a principal.
    ///
    /// Check order: existence and enabled, permission (caller must hold at
    /// least one required permission), argument validation, worker
    /// admission, then the tool itself. Every outcome is a
    /// `ToolExecutionResult`; this method never fails.
    pub async fn execute_tool(
        &self,
        name: &str,
        principal: &Principal,
        args: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> ToolExecutionResult {
        let started = Instant::now();
        let result = self.execute_inner(name, principal, &args, cancel).await;
        let elapsed = started.elapsed().as_millis() as u64;
        match result {
            Ok(mut result) => {
                if result.execution_time_ms == 0 {
                    result.execution_time_ms = elapsed;
                }
                result
            }
            Err(error) => {
                log::warn!("Tool '{name}' rejected: {error}");
                ToolExecutionResult::from(error).with_execution_time(elapsed)
            }
        }
    }

    async fn execute_inner(
        &self,
        name: &str,
        principal: &Principal,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ToolExecutionResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        if !self.is_enabled(name) {
            return Err(ToolError::Disabled(name.to_string()));
        }

        if !tool.required_permissions.is_empty()
            && !principal.has_any_permission(tool.required_permissions.iter().map(String::as_str))
        {
            return Err(ToolError::PermissionDenied {
                tool: name.to_string(),
                required: tool.required_permissions.clone(),
            });
        }

        tool.definition.validate_args(args)?;

        // Fixed-size worker pool; a full pool fails fast instead of queueing.
        let _permit = self
            .workers
            .clone()
            .try_acquire_owned()
            .map_err(|_| ToolError::Saturated)?;

        tool.executions.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            result = tool.instance.execute(args) => Ok(result),
        }
    }
}
