use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use super::{
    optional_str, optional_str_array, optional_u64, required_str, ParameterKind, Tool,
    ToolCategory, ToolDefinition, ToolError, ToolParameter,
};

const MAX_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_PYTHON_IMAGE: &str = "python:3.11-slim";
const DEFAULT_NODE_IMAGE: &str = "node:18-slim";

/// Ephemeral working directory, removed on every exit path.
struct Workspace {
    path: PathBuf,
}

impl Workspace {
    fn create() -> Result<Self, ToolError> {
        let path = std::env::temp_dir().join(format!("conductor-exec-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(ToolError::execution)?;
        Ok(Self { path })
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            log::warn!("Failed to remove workspace {}: {e}", self.path.display());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    Javascript,
}

impl Language {
    fn parse(raw: &str) -> Result<Self, ToolError> {
        match raw.to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::Javascript),
            other => Err(ToolError::Validation(format!(
                "Unsupported language: {other}. Use 'python' or 'javascript'."
            ))),
        }
    }

    fn source_file(self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::Javascript => "main.js",
        }
    }

    /// Shell line run inside the container: optional dependency install,
    /// then the program.
    fn command_line(self, dependencies: &[String]) -> String {
        let run = match self {
            Language::Python => "python /workspace/main.py",
            Language::Javascript => "node /workspace/main.js",
        };
        if dependencies.is_empty() {
            return run.to_string();
        }
        let install = match self {
            Language::Python => format!("pip install --quiet {}", dependencies.join(" ")),
            Language::Javascript => format!(
                "cd /workspace && npm install --silent {}",
                dependencies.join(" ")
            ),
        };
        format!("{install} && {run}")
    }
}

/// Runs Python or JavaScript inside an isolated container: network
/// disabled, memory and CPU capped, ephemeral workspace, bounded wall
/// clock.
pub struct CodeExecutorTool {
    timeout: Duration,
    memory_limit: String,
    cpu_quota: f64,
    python_image: String,
    node_image: String,
    docker_bin: String,
}

impl CodeExecutorTool {
    pub fn new(timeout: Duration, memory_limit: impl Into<String>, cpu_quota: f64) -> Self {
        Self {
            timeout: timeout.min(MAX_TIMEOUT),
            memory_limit: memory_limit.into(),
            cpu_quota,
            python_image: DEFAULT_PYTHON_IMAGE.into(),
            node_image: DEFAULT_NODE_IMAGE.into(),
            docker_bin: "docker".into(),
        }
    }

    pub fn with_images(
        mut self,
        python_image: impl Into<String>,
        node_image: impl Into<String>,
    ) -> Self {
        self.python_image = python_image.into();
        self.node_image = node_image.into();
        self
    }

    async fn run_container(
        &self,
        language: Language,
        code: &str,
        timeout: Duration,
        dependencies: &[String],
        stdin: &str,
    ) -> Result<Value, ToolError> {
        let workspace = Workspace::create()?;
        std::fs::write(workspace.path.join(language.source_file()), code)
            .map_err(ToolError::execution)?;

        let image = match language {
            Language::Python => &self.python_image,
            Language::Javascript => &self.node_image,
        };

        let mut command = Command::new(&self.docker_bin);
        command
            .arg("run")
            .arg("--rm")
            .arg("--interactive")
            .arg("--network")
            .arg("none")
            .arg("--memory")
            .arg(&self.memory_limit)
            .arg("--cpus")
            .arg(self.cpu_quota.to_string())
            .arg("--volume")
            .arg(format!("{}:/workspace", workspace.path.display()))
            .arg("--workdir")
            .arg("/workspace")
            .arg(image)
            .arg("sh")
            .arg("-c")
            .arg(language.command_line(dependencies))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ToolError::Unavailable(format!("Docker is not available: {e}"))
        })?;

        if let Some(mut handle) = child.stdin.take() {
            let stdin = stdin.as_bytes().to_vec();
            tokio::spawn(async move {
                let _ = handle.write_all(&stdin).await;
            });
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout)?
            .map_err(ToolError::execution)?;

        Ok(json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "exit_code": output.status.code(),
        }))
    }
}

#[async_trait]
impl Tool for CodeExecutorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "code_executor",
            "Execute Python or JavaScript in an isolated container with network disabled",
            ToolCategory::Code,
        )
        .with_parameters([
            ToolParameter::new("code", ParameterKind::String).description("The code to execute"),
            ToolParameter::new("language", ParameterKind::String)
                .description("Programming language")
                .one_of([json!("python"), json!("javascript"), json!("js"), json!("node")]),
            ToolParameter::new("timeout", ParameterKind::Number)
                .description("Maximum execution time in seconds (max 300)")
                .optional(),
            ToolParameter::new("dependencies", ParameterKind::Array)
                .description("Packages to install inside the container before running")
                .optional(),
            ToolParameter::new("stdin", ParameterKind::String)
                .description("Standard input for the program")
                .optional(),
        ])
        .with_returns(json!({
            "stdout": "Captured standard output",
            "stderr": "Captured standard error",
            "exit_code": "Process exit code",
        }))
        .with_approval_required()
    }

    async fn run(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let code = required_str(args, "code")?;
        let language = Language::parse(required_str(args, "language")?)?;
        let timeout = optional_u64(args, "timeout")
            .map(Duration::from_secs)
            .unwrap_or(self.timeout)
            .min(MAX_TIMEOUT);
        let dependencies = optional_str_array(args, "dependencies");
        let stdin = optional_str(args, "stdin").unwrap_or("");

        self.run_container(language, code, timeout, &dependencies, stdin)
            .await
    }

    /// A non-zero exit is a failed execution, but the captured output is
    /// still part of the result.
    async fn execute(&self, args: &Map<String, Value>) -> super::ToolExecutionResult {
        match self.run(args).await {
            Ok(output) => {
                let exited_zero = output["exit_code"] == json!(0);
                if exited_zero {
                    super::ToolExecutionResult::ok(output)
                } else {
                    let stderr = output["stderr"].as_str().unwrap_or("").trim().to_string();
                    let mut result = super::ToolExecutionResult::failure(format!(
                        "Program exited with {}: {stderr}",
                        output["exit_code"]
                    ));
                    result.output = output;
                    result
                }
            }
            Err(error) => error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_aliases_normalize() {
        assert_eq!(Language::parse("js").unwrap(), Language::Javascript);
        assert_eq!(Language::parse("NODE").unwrap(), Language::Javascript);
        assert_eq!(Language::parse("python").unwrap(), Language::Python);
        assert!(Language::parse("ruby").is_err());
    }

    #[test]
    fn dependency_install_prefixes_run() {
        let line = Language::Python.command_line(&["requests".into(), "numpy".into()]);
        assert_eq!(
            line,
            "pip install --quiet requests numpy && python /workspace/main.py"
        );
        assert_eq!(
            Language::Javascript.command_line(&[]),
            "node /workspace/main.js"
        );
    }

    #[test]
    fn timeout_is_capped_at_construction() {
        let tool = CodeExecutorTool::new(Duration::from_secs(900), "256m", 0.5);
        assert_eq!(tool.timeout, MAX_TIMEOUT);
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let path = {
            let workspace = Workspace::create().unwrap();
            workspace.path.clone()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_docker_reported_as_unavailable() {
        let mut tool = CodeExecutorTool::new(Duration::from_secs(5), "256m", 0.5);
        tool.docker_bin = "definitely-not-docker".into();

        let mut args = Map::new();
        args.insert("code".into(), json!("print('hi')"));
        args.insert("language".into(), json!("python"));
        let err = tool.run(&args).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }
}
