use crate::error::{Result, RuntimeError};
use crate::language::RenderedCommand;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

/// Per-stream capture limit for one-shot stages.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Captured result of one subprocess stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub spawned: bool,
}

impl StageOutput {
    fn timed_out() -> Self {
        Self {
            stderr: TIMEOUT_MESSAGE.to_string(),
            timed_out: true,
            spawned: true,
            ..Default::default()
        }
    }

    fn not_started(error: &RuntimeError) -> Self {
        let stderr = match error {
            RuntimeError::Spawn { program, source } if source.kind() == ErrorKind::NotFound => {
                format!("Command not found: {} ({})", program, source)
            }
            other => other.to_string(),
        };

        Self {
            stderr,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.spawned && !self.timed_out && self.exit_code == Some(0)
    }
}

fn build_command(
    program: &str,
    args: &[String],
    working_dir: &Path,
    env: &[(String, String)],
    pipe_stdin: bool,
) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(working_dir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if pipe_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Spawns `command`, retrying with its fallback program when the primary
/// one is not installed.
pub(crate) fn spawn_stage(
    command: &RenderedCommand,
    working_dir: &Path,
    env: &[(String, String)],
    pipe_stdin: bool,
) -> Result<Child> {
    let spawn = |program: &str| {
        build_command(program, &command.args, working_dir, env, pipe_stdin)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                program: program.to_string(),
                source,
            })
    };

    match spawn(&command.program) {
        Err(RuntimeError::Spawn { source, .. }) if source.kind() == ErrorKind::NotFound => {
            match &command.fallback_program {
                Some(fallback) => {
                    warn!(
                        "'{}' not found, falling back to '{}'",
                        command.program, fallback
                    );
                    spawn(fallback)
                }
                None => Err(RuntimeError::Spawn {
                    program: command.program.clone(),
                    source,
                }),
            }
        }
        other => other,
    }
}

/// Reads at most `limit` bytes, then keeps draining so the child never
/// blocks on a full pipe. Returns whether anything was discarded.
async fn read_capped<R>(mut reader: R, limit: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    (&mut reader)
        .take(limit as u64)
        .read_to_end(&mut captured)
        .await?;
    let discarded = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok((captured, discarded > 0))
}

fn decode(bytes: &[u8], truncated: bool, limit: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated {
        text.push_str(&format!("\n[output truncated after {} bytes]\n", limit));
    }
    text
}

/// Runs a single stage to completion under a wall-clock timeout.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl ProcessRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Never fails: spawn errors and timeouts come back as stderr text.
    pub async fn run(
        &self,
        command: &RenderedCommand,
        working_dir: &Path,
        env: &[(String, String)],
        timeout: Duration,
        stdin: Option<&str>,
    ) -> StageOutput {
        debug!("Running stage: {}", command.display());

        let mut child = match spawn_stage(command, working_dir, env, stdin.is_some()) {
            Ok(child) => child,
            Err(e) => {
                warn!("Stage failed to start: {}", e);
                return StageOutput::not_started(&e);
            }
        };
        let pid = child.id();
        let pipe = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes;

        let feed = async move {
            if let (Some(mut pipe), Some(text)) = (pipe, stdin) {
                if let Err(e) = pipe.write_all(text.as_bytes()).await {
                    debug!("Subprocess closed stdin early: {}", e);
                }
            }
        };
        let collect = async move {
            let read_stdout = async {
                match stdout {
                    Some(out) => read_capped(out, limit).await,
                    None => Ok((Vec::new(), false)),
                }
            };
            let read_stderr = async {
                match stderr {
                    Some(err) => read_capped(err, limit).await,
                    None => Ok((Vec::new(), false)),
                }
            };
            let ((), stdout, stderr, status) =
                tokio::join!(feed, read_stdout, read_stderr, child.wait());
            Ok::<_, std::io::Error>((stdout?, stderr?, status?))
        };

        // Dropping `collect` on timeout drops the child, which kills it.
        match tokio::time::timeout(timeout, collect).await {
            Ok(Ok(((out, out_truncated), (err, err_truncated), status))) => {
                if out_truncated || err_truncated {
                    warn!("Stage {:?} output exceeded {} bytes and was truncated", pid, limit);
                }
                StageOutput {
                    stdout: decode(&out, out_truncated, limit),
                    stderr: decode(&err, err_truncated, limit),
                    exit_code: status.code(),
                    timed_out: false,
                    spawned: true,
                }
            }
            Ok(Err(e)) => StageOutput {
                stderr: format!("Failed to collect output: {}", e),
                spawned: true,
                ..Default::default()
            },
            Err(_) => {
                warn!(
                    "Stage {:?} exceeded {}s and was killed",
                    pid,
                    timeout.as_secs_f32()
                );
                StageOutput::timed_out()
            }
        }
    }
}
