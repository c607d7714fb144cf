use sandpit_runtime::{CompileGate, RuntimeConfig, SessionConfig, DEFAULT_MAX_OUTPUT_BYTES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,

    pub workspace: WorkspaceConfig,

    pub execution: ExecutionConfig,

    pub session: SessionSettings,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `config/sandpit.toml` under the current directory.
    pub fn from_project_root() -> anyhow::Result<Self> {
        let project_root = std::env::current_dir()?;
        let config_path = project_root.join("config").join("sandpit.toml");

        if !config_path.exists() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }

        Self::from_file(&config_path)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.execution.default_timeout_secs == 0 {
            anyhow::bail!("execution.default_timeout_secs must be positive");
        }
        if self.execution.max_timeout_secs < self.execution.default_timeout_secs {
            anyhow::bail!(
                "execution.max_timeout_secs ({}) is below default_timeout_secs ({})",
                self.execution.max_timeout_secs,
                self.execution.default_timeout_secs
            );
        }
        if self.execution.max_concurrent == 0 {
            anyhow::bail!("execution.max_concurrent must be at least 1");
        }
        if self.execution.max_output_bytes == 0 {
            anyhow::bail!("execution.max_output_bytes must be at least 1");
        }
        if self.session.max_sessions == 0 {
            anyhow::bail!("session.max_sessions must be at least 1");
        }
        Ok(())
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            scratch_root: self
                .execution
                .scratch_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            default_timeout_secs: self.execution.default_timeout_secs,
            max_timeout_secs: self.execution.max_timeout_secs,
            max_concurrent: self.execution.max_concurrent,
            compile_gate: self.execution.compile_gate,
            max_output_bytes: self.execution.max_output_bytes,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            default_language: self.session.default_language.clone(),
            max_sessions: self.session.max_sessions,
            drain_grace: Duration::from_millis(self.session.drain_grace_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("workspace")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default)]
    pub compile_gate: CompileGate,

    /// Captured stdout/stderr of a one-shot run is truncated past this.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Falls back to the OS temp dir.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    8
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            compile_gate: CompileGate::default(),
            max_output_bytes: default_max_output_bytes(),
            scratch_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_language")]
    pub default_language: String,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

fn default_language() -> String {
    "python".to_string()
}

fn default_max_sessions() -> usize {
    32
}

fn default_drain_grace_ms() -> u64 {
    500
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            max_sessions: default_max_sessions(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}
