use std::sync::Arc;

use thiserror::Error;

use crate::audit::{AuditSink, InMemoryAuditLog};
use crate::config::CoreConfig;
use crate::handler::{InMemoryRequestStore, RequestStore, UnifiedHandler};
use crate::inference::{InferenceGateway, InferenceProvider};
use crate::orchestrator::Orchestrator;
use crate::planning::ActionPlanner;
use crate::routing::Router;
use crate::scoring::ConfidenceScorer;
use crate::tools::{
    CodeExecutorTool, DatabaseTool, FileSystemTool, HttpApiTool, RagTool, RegistryError,
    SqlBackend, ToolRegistry, WebSearchTool,
};
use crate::vectorstore::{InMemoryVectorStore, VectorStore};
use crate::workflow::{
    BackupStore, DirBackupStore, InMemorySessionStore, SessionStore, WorkflowEngine,
    WorkflowExecutor,
};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Tool registration error: {0}")]
    Registry(#[from] RegistryError),
}

/// Fully wired engine: the unified handler for one-shot requests and the
/// workflow engine for human-in-the-loop sessions, sharing one gateway,
/// scorer, planner and tool registry.
pub struct Core {
    pub handler: Arc<UnifiedHandler>,
    pub workflows: Arc<WorkflowEngine>,
    pub registry: Arc<ToolRegistry>,
    pub gateway: Arc<InferenceGateway>,
}

/// Startup wiring. Providers are required; stores default to the in-memory
/// implementations so tests and demos run without external services.
pub struct CoreBuilder {
    config: CoreConfig,
    providers: Vec<Arc<dyn InferenceProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    sql_backend: Option<Arc<dyn SqlBackend>>,
    session_store: Option<Arc<dyn SessionStore>>,
    request_store: Option<Arc<dyn RequestStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    backups: Option<Arc<dyn BackupStore>>,
}

impl CoreBuilder {
    pub fn new(config: CoreConfig, providers: Vec<Arc<dyn InferenceProvider>>) -> Self {
        Self {
            config,
            providers,
            vector_store: None,
            sql_backend: None,
            session_store: None,
            request_store: None,
            audit: None,
            backups: None,
        }
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn with_sql_backend(mut self, backend: Arc<dyn SqlBackend>) -> Self {
        self.sql_backend = Some(backend);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn with_request_store(mut self, store: Arc<dyn RequestStore>) -> Self {
        self.request_store = Some(store);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_backup_store(mut self, backups: Arc<dyn BackupStore>) -> Self {
        self.backups = Some(backups);
        self
    }

    pub fn build(self) -> Result<Core, BuildError> {
        let config = self.config;
        config.validate()?;

        let gateway = Arc::new(
            InferenceGateway::new(self.providers).with_timeout(config.inference_timeout),
        );
        let scorer = Arc::new(ConfidenceScorer::new(gateway.clone(), config.scorer_model.as_str()));

        let vector_store = self
            .vector_store
            .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new()));
        let planner = Arc::new(
            ActionPlanner::new(gateway.clone(), config.planner_model.as_str())
                .with_plan_memory(vector_store.clone())
                .with_max_iterations(config.max_plan_iterations as u32),
        );

        let mut registry = ToolRegistry::new(config.tool_workers);
        registry.register(
            Arc::new(FileSystemTool::new(
                &config.file_tool_root,
                config.file_tool_max_bytes,
            )),
            ["file_access"],
        )?;
        registry.register(
            Arc::new(CodeExecutorTool::new(
                config.code_exec_timeout,
                config.code_exec_memory_limit.clone(),
                config.code_exec_cpu_quota,
            )),
            ["code_execution"],
        )?;
        registry.register(
            Arc::new(WebSearchTool::new(config.search_provider)),
            ["web_access"],
        )?;
        registry.register(Arc::new(HttpApiTool::default()), ["web_access"])?;
        registry.register(Arc::new(RagTool::new(vector_store.clone())), ["rag_access"])?;
        if let Some(sql_backend) = self.sql_backend {
            registry.register(
                Arc::new(DatabaseTool::new(
                    sql_backend,
                    config.db_tool_row_limit,
                    config.db_tool_timeout,
                )),
                ["db_read"],
            )?;
        }
        let registry = Arc::new(registry);

        let router = Arc::new(Router::new(gateway.clone(), config.router_model.as_str()));
        let orchestrator = Arc::new(
            Orchestrator::new(
                gateway.clone(),
                scorer.clone(),
                planner.clone(),
                registry.clone(),
            )
            .with_max_fallback_attempts(config.max_fallback_attempts)
            .with_step_concurrency(config.step_concurrency),
        );

        let request_store = self
            .request_store
            .unwrap_or_else(|| Arc::new(InMemoryRequestStore::new()));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(InMemoryAuditLog::new()));
        let handler = Arc::new(
            UnifiedHandler::new(
                router,
                orchestrator,
                request_store,
                audit,
            )
            .with_max_inflight(config.max_inflight_per_principal),
        );

        let backups = self.backups.unwrap_or_else(|| {
            Arc::new(DirBackupStore::new(
                &config.file_tool_root,
                config.file_tool_root.join(".backups"),
            ))
        });
        let session_store = self
            .session_store
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let executor = WorkflowExecutor::new(registry.clone(), backups);
        let workflows = Arc::new(
            WorkflowEngine::new(
                gateway.clone(),
                scorer,
                planner,
                executor,
                session_store,
                config.router_model.as_str(),
            )
            .with_auto_approve(config.auto_approve)
            .with_plan_memory(vector_store)
            .with_execution_timeout(config.workflow_execution_timeout),
        );

        Ok(Core {
            handler,
            workflows,
            registry,
            gateway,
        })
    }
}
