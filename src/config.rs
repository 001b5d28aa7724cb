use std::env;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Web search backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchProvider {
    Tavily,
    SerpApi,
    #[default]
    DuckDuckGo,
}

impl SearchProvider {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "tavily" => Ok(SearchProvider::Tavily),
            "serpapi" => Ok(SearchProvider::SerpApi),
            "duckduckgo" => Ok(SearchProvider::DuckDuckGo),
            other => Err(ConfigError::Invalid {
                name: "SEARCH_PROVIDER",
                reason: format!("unknown provider '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorBackend {
    #[default]
    Memory,
    External,
}

/// Consolidated runtime configuration.
///
/// Construct with [`CoreConfig::from_env`] or start from `default()` and
/// override with the `with_*` setters. `validate()` runs at startup; an
/// invalid configuration is fatal.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Bypass auth checks entirely. Never enable outside local demos.
    pub demo_mode: bool,
    /// Force every workflow approval gate open.
    pub auto_approve: bool,

    pub code_exec_timeout: Duration,
    pub code_exec_memory_limit: String,
    pub code_exec_cpu_quota: f64,

    pub file_tool_root: PathBuf,
    pub file_tool_max_bytes: u64,

    pub db_tool_row_limit: usize,
    pub db_tool_timeout: Duration,

    pub search_provider: SearchProvider,
    pub vector_backend: VectorBackend,

    pub encryption_key: Option<SecretString>,

    pub router_model: String,
    pub scorer_model: String,
    pub planner_model: String,

    pub inference_timeout: Duration,
    pub workflow_execution_timeout: Duration,
    pub max_fallback_attempts: usize,
    pub max_plan_iterations: usize,
    pub step_concurrency: usize,
    pub max_inflight_per_principal: usize,
    pub tool_workers: usize,
}

const MAX_CODE_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            demo_mode: false,
            auto_approve: false,
            code_exec_timeout: Duration::from_secs(30),
            code_exec_memory_limit: "256m".into(),
            code_exec_cpu_quota: 0.5,
            file_tool_root: PathBuf::from("./sandbox"),
            file_tool_max_bytes: 2_000_000,
            db_tool_row_limit: 500,
            db_tool_timeout: Duration::from_secs(10),
            search_provider: SearchProvider::default(),
            vector_backend: VectorBackend::default(),
            encryption_key: None,
            router_model: "liquid-tool".into(),
            scorer_model: "qwen-0.5b".into(),
            planner_model: "liquid-tool".into(),
            inference_timeout: Duration::from_secs(60),
            workflow_execution_timeout: Duration::from_secs(300),
            max_fallback_attempts: 3,
            max_plan_iterations: 3,
            step_concurrency: 4,
            max_inflight_per_principal: 8,
            tool_workers: 8,
        }
    }
}

impl CoreConfig {
    /// Read configuration from the process environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.demo_mode = env_bool("DEMO_MODE")?.unwrap_or(config.demo_mode);
        config.auto_approve = env_bool("AUTO_APPROVE")?.unwrap_or(config.auto_approve);

        if let Some(secs) = env_u64("CODE_EXEC_TIMEOUT")? {
            config.code_exec_timeout = Duration::from_secs(secs);
        }
        if let Ok(limit) = env::var("CODE_EXEC_MEMORY_LIMIT") {
            config.code_exec_memory_limit = limit;
        }
        if let Some(quota) = env_f64("CODE_EXEC_CPU_QUOTA")? {
            config.code_exec_cpu_quota = quota;
        }

        if let Ok(root) = env::var("FILE_TOOL_ROOT") {
            config.file_tool_root = PathBuf::from(root);
        }
        if let Some(bytes) = env_u64("FILE_TOOL_MAX_BYTES")? {
            config.file_tool_max_bytes = bytes;
        }

        if let Some(limit) = env_u64("DB_TOOL_ROW_LIMIT")? {
            config.db_tool_row_limit = limit as usize;
        }
        if let Some(secs) = env_u64("DB_TOOL_TIMEOUT")? {
            config.db_tool_timeout = Duration::from_secs(secs);
        }

        if let Ok(provider) = env::var("SEARCH_PROVIDER") {
            config.search_provider = SearchProvider::parse(&provider)?;
        }
        if let Ok(backend) = env::var("VECTOR_BACKEND") {
            config.vector_backend = match backend.to_lowercase().as_str() {
                "memory" => VectorBackend::Memory,
                "external" => VectorBackend::External,
                other => {
                    return Err(ConfigError::Invalid {
                        name: "VECTOR_BACKEND",
                        reason: format!("unknown backend '{other}'"),
                    })
                }
            };
        }

        if let Ok(key) = env::var("ENCRYPTION_KEY") {
            config.encryption_key = Some(SecretString::from(key));
        }

        if let Ok(model) = env::var("ROUTER_MODEL") {
            config.router_model = model;
        }
        if let Ok(model) = env::var("SCORER_MODEL") {
            config.scorer_model = model;
        }
        if let Ok(model) = env::var("PLANNER_MODEL") {
            config.planner_model = model;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.code_exec_timeout > MAX_CODE_EXEC_TIMEOUT {
            return Err(ConfigError::Invalid {
                name: "CODE_EXEC_TIMEOUT",
                reason: format!(
                    "must not exceed {}s",
                    MAX_CODE_EXEC_TIMEOUT.as_secs()
                ),
            });
        }
        if self.code_exec_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "CODE_EXEC_TIMEOUT",
                reason: "must be non-zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.code_exec_cpu_quota) || self.code_exec_cpu_quota == 0.0 {
            return Err(ConfigError::Invalid {
                name: "CODE_EXEC_CPU_QUOTA",
                reason: "must be in (0, 1]".into(),
            });
        }
        if self.file_tool_root.as_os_str().is_empty() {
            return Err(ConfigError::Missing("FILE_TOOL_ROOT"));
        }
        if self.file_tool_max_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "FILE_TOOL_MAX_BYTES",
                reason: "must be non-zero".into(),
            });
        }
        if self.db_tool_row_limit == 0 {
            return Err(ConfigError::Invalid {
                name: "DB_TOOL_ROW_LIMIT",
                reason: "must be non-zero".into(),
            });
        }
        if self.max_plan_iterations == 0 {
            return Err(ConfigError::Invalid {
                name: "max_plan_iterations",
                reason: "must be at least 1".into(),
            });
        }
        if self.step_concurrency == 0 || self.tool_workers == 0 {
            return Err(ConfigError::Invalid {
                name: "concurrency",
                reason: "worker counts must be non-zero".into(),
            });
        }
        Ok(())
    }

    pub fn with_demo_mode(mut self, demo_mode: bool) -> Self {
        self.demo_mode = demo_mode;
        self
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    pub fn with_file_tool_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_tool_root = root.into();
        self
    }

    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn with_max_fallback_attempts(mut self, attempts: usize) -> Self {
        self.max_fallback_attempts = attempts;
        self
    }

    pub fn with_step_concurrency(mut self, concurrency: usize) -> Self {
        self.step_concurrency = concurrency;
        self
    }
}

fn env_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" | "" => Ok(Some(false)),
            other => Err(ConfigError::Invalid {
                name,
                reason: format!("expected boolean, got '{other}'"),
            }),
        },
        Err(_) => Ok(None),
    }
}

fn env_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .replace('_', "")
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_f64(name: &'static str) -> Result<Option<f64>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
