pub mod error;
pub mod executor;
pub mod language;
pub mod runner;
pub mod scratch;
pub mod session;

pub use error::{Result, RuntimeError};
pub use executor::{CompileOutcome, ExecutionRequest, ExecutionResult, Executor};
pub use language::{CommandTemplate, LanguageInfo, LanguageSpec, LanguageTable};
pub use runner::{ProcessRunner, StageOutput, DEFAULT_MAX_OUTPUT_BYTES, TIMEOUT_MESSAGE};
pub use scratch::ScratchDir;
pub use session::{
    InboundStart, OutboundFrame, SessionConfig, SessionReport, SessionState, SessionSupervisor,
    TerminationReason,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Parent directory for per-execution scratch dirs.
    pub scratch_root: PathBuf,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub max_concurrent: usize,
    pub compile_gate: CompileGate,
    /// Per-stream cap on captured one-shot output.
    pub max_output_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir(),
            default_timeout_secs: 10,
            max_timeout_secs: 60,
            max_concurrent: 8,
            compile_gate: CompileGate::default(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Decides whether a compile stage's output stops the run stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileGate {
    /// Any compiler stderr output is fatal, warnings included.
    AnyStderr,
    /// Only a non-zero exit, a timeout or a spawn failure is fatal.
    #[default]
    ExitStatus,
}

impl CompileGate {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileGate::AnyStderr => "any_stderr",
            CompileGate::ExitStatus => "exit_status",
        }
    }

    pub fn passes(&self, output: &StageOutput) -> bool {
        match self {
            CompileGate::AnyStderr => output.stderr.is_empty(),
            CompileGate::ExitStatus => output.succeeded(),
        }
    }
}
