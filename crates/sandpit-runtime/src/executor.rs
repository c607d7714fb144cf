use crate::error::{Result, RuntimeError};
use crate::language::{LanguageSpec, LanguageTable, StagePaths};
use crate::runner::ProcessRunner;
use crate::scratch::ScratchDir;
use crate::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default, rename = "timeout")]
    pub timeout_secs: Option<u64>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            stdin: None,
            timeout_secs: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = Some(seconds);
        self
    }
}

/// Response envelope. Failures of the execution itself (compile errors,
/// timeouts, missing toolchains) are reported through `stderr`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn stderr_only(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// No compile stage, or the gate let it through. Carries any
    /// diagnostics the compiler printed anyway.
    Passed { warnings: String },
    Failed { stderr: String },
}

/// One-shot compile-then-run pipeline with bounded concurrency.
pub struct Executor {
    config: RuntimeConfig,
    languages: Arc<LanguageTable>,
    runner: ProcessRunner,
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(config: RuntimeConfig, languages: Arc<LanguageTable>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let runner = ProcessRunner::new(config.max_output_bytes.max(1));

        info!(
            "Executor initialized ({} languages, {} concurrent executions, compile gate: {})",
            languages.ids().len(),
            config.max_concurrent.max(1),
            config.compile_gate.as_str()
        );

        Self {
            config,
            languages,
            runner,
            permits,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn languages(&self) -> &Arc<LanguageTable> {
        &self.languages
    }

    /// Applies the default and clamps to the configured maximum.
    pub fn resolve_timeout(&self, requested: Option<u64>) -> Result<Duration> {
        let seconds = requested.unwrap_or(self.config.default_timeout_secs);
        if seconds == 0 {
            return Err(RuntimeError::InvalidRequest(
                "timeout must be a positive number of seconds".into(),
            ));
        }
        Ok(Duration::from_secs(seconds.min(self.config.max_timeout_secs)))
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let spec = self.languages.lookup(&request.language)?;
        let timeout = self.resolve_timeout(request.timeout_secs)?;

        self.execute_spec(&spec, &request.code, request.stdin.as_deref(), timeout)
            .await
    }

    pub async fn execute_spec(
        &self,
        spec: &LanguageSpec,
        code: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RuntimeError::Unavailable("execution queue closed".into()))?;

        let start = Instant::now();
        let scratch = ScratchDir::create_in(&self.config.scratch_root)?;
        let paths = scratch.write_source(spec, code).await?;

        let warnings = match self.compile(spec, &paths, timeout).await {
            CompileOutcome::Passed { warnings } => warnings,
            CompileOutcome::Failed { stderr } => {
                debug!("{} compile failed after {:?}", spec.id, start.elapsed());
                return Ok(ExecutionResult::stderr_only(stderr));
            }
        };

        let output = self
            .runner
            .run(&spec.run.render(&paths), scratch.path(), &spec.env, timeout, stdin)
            .await;

        debug!(
            "{} execution finished in {:?} (exit: {:?}, timed out: {})",
            spec.id,
            start.elapsed(),
            output.exit_code,
            output.timed_out
        );

        let stderr = if warnings.is_empty() || output.timed_out {
            output.stderr
        } else {
            format!("{}{}", warnings, output.stderr)
        };

        Ok(ExecutionResult {
            stdout: output.stdout,
            stderr,
        })
    }

    /// Runs the compile stage, if any, and applies the compile gate.
    pub async fn compile(
        &self,
        spec: &LanguageSpec,
        paths: &StagePaths,
        timeout: Duration,
    ) -> CompileOutcome {
        let Some(compile) = &spec.compile else {
            return CompileOutcome::Passed {
                warnings: String::new(),
            };
        };

        let output = self
            .runner
            .run(&compile.render(paths), &paths.dir, &spec.env, timeout, None)
            .await;

        if self.config.compile_gate.passes(&output) {
            CompileOutcome::Passed {
                warnings: output.stderr,
            }
        } else if output.stderr.is_empty() {
            CompileOutcome::Failed {
                stderr: format!(
                    "Compilation failed with exit code {}",
                    output
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown".into())
                ),
            }
        } else {
            CompileOutcome::Failed {
                stderr: output.stderr,
            }
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.config.scratch_root
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::language::CommandTemplate;
    use crate::{CompileGate, TIMEOUT_MESSAGE};

    fn sh(script: impl Into<String>) -> CommandTemplate {
        CommandTemplate::new("sh").args(["-c".to_string(), script.into()])
    }

    fn executor_with(
        scratch_root: &Path,
        gate: CompileGate,
        max_concurrent: usize,
        specs: Vec<LanguageSpec>,
    ) -> Executor {
        let config = RuntimeConfig {
            scratch_root: scratch_root.to_path_buf(),
            compile_gate: gate,
            max_concurrent,
            ..Default::default()
        };
        Executor::new(config, Arc::new(LanguageTable::from_specs(specs)))
    }

    fn compiled_language(compile_script: &str, run_script: String) -> LanguageSpec {
        LanguageSpec::new("fake", "Fake compiled", "main.fake", sh(run_script))
            .with_compile(sh(compile_script))
    }

    #[tokio::test]
    async fn test_compile_failure_short_circuits_run_stage() {
        let root = tempfile::tempdir().unwrap();
        let sentinel = root.path().join("run-stage-was-here");
        let spec = compiled_language(
            "echo 'main.fake:1: error: boom' >&2; exit 1",
            format!("touch {}", sentinel.display()),
        );
        let executor = executor_with(root.path(), CompileGate::ExitStatus, 2, vec![spec]);

        let result = executor
            .execute(ExecutionRequest::new("fake", "broken"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "main.fake:1: error: boom\n");
        assert!(!sentinel.exists());
    }

    #[tokio::test]
    async fn test_any_stderr_gate_treats_warnings_as_fatal() {
        let root = tempfile::tempdir().unwrap();
        let sentinel = root.path().join("ran");
        let spec = compiled_language(
            "echo 'warning: unused' >&2",
            format!("touch {}", sentinel.display()),
        );
        let executor = executor_with(root.path(), CompileGate::AnyStderr, 2, vec![spec]);

        let result = executor
            .execute(ExecutionRequest::new("fake", ""))
            .await
            .unwrap();

        assert_eq!(result.stderr, "warning: unused\n");
        assert!(!sentinel.exists());
    }

    #[tokio::test]
    async fn test_exit_status_gate_keeps_warnings() {
        let root = tempfile::tempdir().unwrap();
        let spec = compiled_language("echo 'warning: unused' >&2", "echo ran".to_string());
        let executor = executor_with(root.path(), CompileGate::ExitStatus, 2, vec![spec]);

        let result = executor
            .execute(ExecutionRequest::new("fake", ""))
            .await
            .unwrap();

        assert_eq!(result.stdout, "ran\n");
        assert_eq!(result.stderr, "warning: unused\n");
    }

    #[tokio::test]
    async fn test_compile_stage_output_visible_to_run_stage() {
        let root = tempfile::tempdir().unwrap();
        let spec = LanguageSpec::new("fake", "Fake", "main.fake", CommandTemplate::new("{binary}"))
            .with_compile(sh("printf '#!/bin/sh\\ncat {source}\\n' > {binary} && chmod +x {binary}"));
        let executor = executor_with(root.path(), CompileGate::ExitStatus, 2, vec![spec]);

        let result = executor
            .execute(ExecutionRequest::new("fake", "source text"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "source text");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn test_timeout_returns_timeout_envelope() {
        let root = tempfile::tempdir().unwrap();
        let spec = LanguageSpec::new("slow", "Slow", "main.sh", sh("exec sleep 30"));
        let executor = executor_with(root.path(), CompileGate::ExitStatus, 2, vec![spec]);

        let start = Instant::now();
        let result = executor
            .execute(ExecutionRequest::new("slow", "").with_timeout(1))
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(result, ExecutionResult::stderr_only(TIMEOUT_MESSAGE));
    }

    #[tokio::test]
    async fn test_stdin_reaches_run_stage() {
        let root = tempfile::tempdir().unwrap();
        let spec = LanguageSpec::new("cat", "Cat", "main.txt", CommandTemplate::new("cat"));
        let executor = executor_with(root.path(), CompileGate::ExitStatus, 2, vec![spec]);

        let result = executor
            .execute(ExecutionRequest::new("cat", "").with_stdin("line one\n"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "line one\n");
    }

    #[tokio::test]
    async fn test_scratch_dirs_released_after_execution() {
        let root = tempfile::tempdir().unwrap();
        let spec = LanguageSpec::new("fake", "Fake", "main.fake", sh("cat {source}"));
        let executor = executor_with(root.path(), CompileGate::ExitStatus, 2, vec![spec]);

        let result = executor
            .execute(ExecutionRequest::new("fake", "hello"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "hello");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_is_client_error() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor_with(root.path(), CompileGate::ExitStatus, 2, Vec::new());

        let err = executor
            .execute(ExecutionRequest::new("cobol", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::UnsupportedLanguage { .. }));
    }

    #[tokio::test]
    async fn test_timeout_defaults_and_clamps() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor_with(root.path(), CompileGate::ExitStatus, 2, Vec::new());

        assert_eq!(executor.resolve_timeout(None).unwrap(), Duration::from_secs(10));
        assert_eq!(executor.resolve_timeout(Some(3)).unwrap(), Duration::from_secs(3));
        assert_eq!(
            executor.resolve_timeout(Some(3600)).unwrap(),
            Duration::from_secs(60)
        );
        assert!(executor.resolve_timeout(Some(0)).unwrap_err().is_client_error());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let root = tempfile::tempdir().unwrap();
        let spec = LanguageSpec::new("nap", "Nap", "main.sh", sh("sleep 0.5"));
        let executor = Arc::new(executor_with(
            root.path(),
            CompileGate::ExitStatus,
            1,
            vec![spec],
        ));

        let start = Instant::now();
        let a = tokio::spawn({
            let executor = executor.clone();
            async move { executor.execute(ExecutionRequest::new("nap", "")).await }
        });
        let b = tokio::spawn({
            let executor = executor.clone();
            async move { executor.execute(ExecutionRequest::new("nap", "")).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}
