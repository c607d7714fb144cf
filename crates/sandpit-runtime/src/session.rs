//! Interactive sessions: one long-lived subprocess bound to a bidirectional
//! message channel.
//!
//! A session moves through [`SessionState::Created`] (scratch dir allocated),
//! [`SessionState::Running`] (subprocess spawned, output pumps active) and
//! [`SessionState::Terminated`]. The supervising task owns the subprocess and
//! the pump tasks; whichever way the session ends it kills the subprocess,
//! cancels and awaits the pumps and releases the scratch dir.
//!
//! Transport is abstracted as a pair of `mpsc` channels so the same logic
//! runs behind a WebSocket or directly in tests. The outbound sender is
//! shared by both pumps and the supervisor; only per-stream order is kept.
//!
//! Stdin is written by its own task behind a bounded queue, so a child that
//! stops reading never stalls the supervisor: inbound frames keep being
//! drained and a disconnect is always observed.

use crate::error::Result;
use crate::executor::{CompileOutcome, Executor};
use crate::language::LanguageSpec;
use crate::runner::spawn_stage;
use crate::scratch::ScratchDir;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames sent to the client, serialized as `{"stdout": "..."}` etc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundFrame {
    Stdout(String),
    Stderr(String),
    Error(String),
    Exit(Option<i32>),
}

impl OutboundFrame {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// First inbound frame: `{"code": "...", "language": "..."}` or raw code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundStart {
    pub code: String,
    pub language: Option<String>,
}

impl InboundStart {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Self {
                code: map
                    .get("code")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                language: map
                    .get("language")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            },
            _ => Self {
                code: raw.to_string(),
                language: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Inbound channel closed or errored.
    Disconnected,
    ProcessExited,
    CompileFailed,
    SpawnFailed,
    /// Scratch allocation failed or the language was not recognised.
    InvalidStart,
    /// No free session slot.
    Rejected,
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub language: Option<String>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub reason: TerminationReason,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Used when neither the endpoint nor the first frame picks a language.
    pub default_language: String,
    pub max_sessions: usize,
    /// How long to wait for buffered output after the subprocess exits.
    pub drain_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_language: "python".to_string(),
            max_sessions: 32,
            drain_grace: Duration::from_millis(500),
        }
    }
}

/// Lines queued for the stdin writer before further input is dropped.
const STDIN_QUEUE: usize = 256;

/// Output is flushed as a frame at a newline or after this many bytes.
const OUTPUT_CHUNK: usize = 8 * 1024;

struct InteractiveSession {
    id: Uuid,
    state: SessionState,
    outbound: mpsc::Sender<OutboundFrame>,
    scratch: Option<ScratchDir>,
    language: Option<Arc<LanguageSpec>>,
    child: Option<Child>,
    stdin: Option<mpsc::Sender<String>>,
    stdin_writer: Option<JoinHandle<()>>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    pumps: Vec<JoinHandle<()>>,
    pump_cancel: CancellationToken,
}

impl InteractiveSession {
    fn new(outbound: mpsc::Sender<OutboundFrame>, pump_cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Created,
            outbound,
            scratch: None,
            language: None,
            child: None,
            stdin: None,
            stdin_writer: None,
            pid: None,
            exit_code: None,
            pumps: Vec::new(),
            pump_cancel,
        }
    }

    async fn send(&self, frame: OutboundFrame) {
        if self.outbound.send(frame).await.is_err() {
            debug!("Session {}: outbound channel closed", self.id);
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    /// Created -> Running: write the source, compile if needed, spawn.
    async fn start(
        &mut self,
        executor: &Executor,
        spec: Arc<LanguageSpec>,
        code: &str,
    ) -> std::result::Result<(), TerminationReason> {
        self.language = Some(spec.clone());

        let Some(scratch) = self.scratch.as_ref() else {
            return Err(TerminationReason::InvalidStart);
        };

        let paths = match scratch.write_source(&spec, code).await {
            Ok(paths) => paths,
            Err(e) => {
                self.send(OutboundFrame::Error(format!("Failed to write source: {}", e)))
                    .await;
                return Err(TerminationReason::InvalidStart);
            }
        };

        let compile_timeout = Duration::from_secs(executor.config().default_timeout_secs);
        match executor.compile(&spec, &paths, compile_timeout).await {
            CompileOutcome::Failed { stderr } => {
                self.send(OutboundFrame::Stderr(stderr)).await;
                return Err(TerminationReason::CompileFailed);
            }
            CompileOutcome::Passed { warnings } if !warnings.is_empty() => {
                self.send(OutboundFrame::Stderr(warnings)).await;
            }
            CompileOutcome::Passed { .. } => {}
        }

        let command = spec.run.render(&paths);
        let mut child = match spawn_stage(&command, scratch.path(), &spec.env, true) {
            Ok(child) => child,
            Err(e) => {
                warn!("Session {}: {}", self.id, e);
                self.send(OutboundFrame::Error(e.to_string())).await;
                return Err(TerminationReason::SpawnFailed);
            }
        };

        self.pid = child.id();
        if let Some(pipe) = child.stdin.take() {
            let (tx, rx) = mpsc::channel(STDIN_QUEUE);
            self.stdin = Some(tx);
            self.stdin_writer = Some(tokio::spawn(write_stdin(
                self.id,
                pipe,
                rx,
                self.outbound.clone(),
                self.pump_cancel.clone(),
            )));
        }
        if let Some(stdout) = child.stdout.take() {
            self.pumps.push(tokio::spawn(pump(
                stdout,
                OutboundFrame::Stdout,
                self.outbound.clone(),
                self.pump_cancel.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            self.pumps.push(tokio::spawn(pump(
                stderr,
                OutboundFrame::Stderr,
                self.outbound.clone(),
                self.pump_cancel.clone(),
            )));
        }
        self.child = Some(child);

        info!(
            "Session {}: started {} (pid {:?})",
            self.id,
            command.display(),
            self.pid
        );
        self.transition(SessionState::Running);
        Ok(())
    }

    /// Forwards inbound lines to stdin until the channel closes, the
    /// subprocess exits or the server shuts down.
    async fn run(
        &mut self,
        inbound: &mut mpsc::Receiver<String>,
        shutdown: &CancellationToken,
        drain_grace: Duration,
    ) -> TerminationReason {
        let Self {
            id,
            child,
            stdin,
            outbound,
            pumps,
            exit_code,
            ..
        } = self;
        let Some(child) = child.as_mut() else {
            return TerminationReason::ProcessExited;
        };
        let mut dropping_input = false;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return TerminationReason::Shutdown,
                message = inbound.recv() => match message {
                    Some(line) => queue_input(*id, stdin, outbound, &mut dropping_input, line),
                    None => return TerminationReason::Disconnected,
                },
                status = child.wait() => {
                    *exit_code = status.ok().and_then(|s| s.code());
                    debug!("Session {}: subprocess exited with {:?}", id, exit_code);
                    drain_pumps(pumps, drain_grace).await;
                    if outbound.send(OutboundFrame::Exit(*exit_code)).await.is_err() {
                        debug!("Session {}: outbound channel closed", id);
                    }
                    return TerminationReason::ProcessExited;
                }
            }
        }
    }

    /// Any state -> Terminated. Safe to call from every exit path.
    async fn terminate(mut self, reason: TerminationReason) -> SessionReport {
        // Closing the queue lets the writer drop the pipe, i.e. stdin EOF.
        drop(self.stdin.take());

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.exit_code = self.exit_code.or(status.code());
                }
                _ => {
                    if let Err(e) = child.start_kill() {
                        warn!("Session {}: failed to kill subprocess: {}", self.id, e);
                    }
                    match child.wait().await {
                        Ok(status) => self.exit_code = self.exit_code.or(status.code()),
                        Err(e) => warn!("Session {}: failed to reap subprocess: {}", self.id, e),
                    }
                }
            }
        }

        self.pump_cancel.cancel();
        if let Some(writer) = self.stdin_writer.take() {
            if let Err(e) = writer.await {
                warn!("Session {}: stdin writer failed: {}", self.id, e);
            }
        }
        for handle in self.pumps.drain(..) {
            if let Err(e) = handle.await {
                warn!("Session {}: pump task failed: {}", self.id, e);
            }
        }

        drop(self.scratch.take());
        self.transition(SessionState::Terminated);

        let report = SessionReport {
            session_id: self.id,
            language: self.language.as_ref().map(|l| l.id.clone()),
            pid: self.pid,
            exit_code: self.exit_code,
            reason,
        };
        info!(
            "Session {} terminated: {:?} (pid {:?}, exit {:?})",
            report.session_id, report.reason, report.pid, report.exit_code
        );
        report
    }
}

async fn pump<R>(
    reader: R,
    wrap: fn(String) -> OutboundFrame,
    outbound: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut chunk = Vec::with_capacity(OUTPUT_CHUNK);

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_chunk(&mut reader, &mut chunk, OUTPUT_CHUNK) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                let carry = split_incomplete_char(&mut chunk);
                let frame = wrap(String::from_utf8_lossy(&chunk).into_owned());
                chunk = carry;
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = outbound.send(frame) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Output stream closed: {}", e);
                break;
            }
        }
    }
}

/// Appends to `buf` up to and including the next newline, stopping early
/// once `buf` holds `max` bytes. Returns the new length; 0 only at EOF with
/// nothing buffered.
async fn read_chunk<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    while buf.len() < max {
        let (consumed, found_newline) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            let window = &available[..available.len().min(max - buf.len())];
            match window.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    buf.extend_from_slice(&window[..=i]);
                    (i + 1, true)
                }
                None => {
                    buf.extend_from_slice(window);
                    (window.len(), false)
                }
            }
        };
        reader.consume(consumed);
        if found_newline {
            break;
        }
    }
    Ok(buf.len())
}

/// Splits off a trailing partial UTF-8 sequence so a multi-byte character cut
/// at a chunk boundary is decoded whole with the next chunk.
fn split_incomplete_char(chunk: &mut Vec<u8>) -> Vec<u8> {
    match std::str::from_utf8(chunk) {
        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => chunk.split_off(e.valid_up_to()),
        _ => Vec::new(),
    }
}

/// Non-blocking hand-off to the stdin writer. When the child has stopped
/// reading and the queue is full, input is dropped and the client is told
/// once per stall.
fn queue_input(
    id: Uuid,
    stdin: &mut Option<mpsc::Sender<String>>,
    outbound: &mpsc::Sender<OutboundFrame>,
    dropping: &mut bool,
    line: String,
) {
    let Some(queue) = stdin.as_ref() else {
        debug!("Session {}: stdin closed, dropping input", id);
        return;
    };

    match queue.try_send(line) {
        Ok(()) => *dropping = false,
        Err(TrySendError::Full(_)) => {
            if !*dropping {
                *dropping = true;
                warn!("Session {}: subprocess is not reading stdin, dropping input", id);
                if outbound
                    .try_send(OutboundFrame::Error(
                        "Program is not reading input; input dropped".into(),
                    ))
                    .is_err()
                {
                    debug!("Session {}: could not report dropped input", id);
                }
            }
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Session {}: stdin writer gone, dropping input", id);
            *stdin = None;
        }
    }
}

async fn write_stdin(
    id: Uuid,
    mut pipe: ChildStdin,
    mut lines: mpsc::Receiver<String>,
    outbound: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let mut data = line.into_bytes();
        data.push(b'\n');

        let written = tokio::select! {
            _ = cancel.cancelled() => break,
            written = async {
                pipe.write_all(&data).await?;
                pipe.flush().await
            } => written,
        };

        if let Err(e) = written {
            warn!("Session {}: failed to write to stdin: {}", id, e);
            if outbound
                .try_send(OutboundFrame::Error(format!("Failed to write to stdin: {}", e)))
                .is_err()
            {
                debug!("Session {}: could not report stdin failure", id);
            }
            break;
        }
    }
}

/// Waits up to `grace` for pumps to hit end-of-stream. Pumps still running
/// afterwards are left for `terminate` to cancel.
async fn drain_pumps(pumps: &mut Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    while let Some(handle) = pumps.last_mut() {
        match tokio::time::timeout_at(deadline, handle).await {
            Ok(_) => {
                pumps.pop();
            }
            Err(_) => break,
        }
    }
}

/// Owns the lifecycle of interactive sessions, one per connection.
pub struct SessionSupervisor {
    executor: Arc<Executor>,
    config: SessionConfig,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl SessionSupervisor {
    pub fn new(executor: Arc<Executor>, config: SessionConfig, shutdown: CancellationToken) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_sessions));
        Self {
            executor,
            config,
            slots,
            shutdown,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn active_sessions(&self) -> usize {
        self.config.max_sessions - self.slots.available_permits()
    }

    /// Runs one session to completion. `pinned_language` overrides both the
    /// first frame's `language` field and the configured default.
    pub async fn supervise(
        &self,
        pinned_language: Option<&str>,
        mut inbound: mpsc::Receiver<String>,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> SessionReport {
        let mut session = InteractiveSession::new(outbound, self.shutdown.child_token());

        let slot = self.slots.clone().try_acquire_owned();
        let reason = match &slot {
            Ok(_) => self.drive(&mut session, pinned_language, &mut inbound).await,
            Err(_) => {
                warn!("Session {} rejected: no free session slot", session.id);
                session
                    .send(OutboundFrame::Error(
                        "Too many active sessions, try again later".into(),
                    ))
                    .await;
                TerminationReason::Rejected
            }
        };

        let report = session.terminate(reason).await;
        drop(slot);
        report
    }

    async fn drive(
        &self,
        session: &mut InteractiveSession,
        pinned_language: Option<&str>,
        inbound: &mut mpsc::Receiver<String>,
    ) -> TerminationReason {
        match ScratchDir::create_in(self.executor.scratch_root()) {
            Ok(scratch) => session.scratch = Some(scratch),
            Err(e) => {
                session
                    .send(OutboundFrame::Error(format!(
                        "Failed to allocate workspace: {}",
                        e
                    )))
                    .await;
                return TerminationReason::InvalidStart;
            }
        }
        debug!("Session {} created", session.id);

        let first = tokio::select! {
            _ = self.shutdown.cancelled() => return TerminationReason::Shutdown,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => return TerminationReason::Disconnected,
            },
        };

        let start = InboundStart::parse(&first);
        let language = pinned_language
            .or(start.language.as_deref())
            .unwrap_or(&self.config.default_language);

        let spec = match self.executor.languages().lookup(language) {
            Ok(spec) => spec,
            Err(e) => {
                session.send(OutboundFrame::Error(e.to_string())).await;
                return TerminationReason::InvalidStart;
            }
        };

        if let Err(reason) = session.start(&self.executor, spec, &start.code).await {
            return reason;
        }

        session
            .run(inbound, &self.shutdown, self.config.drain_grace)
            .await
    }
}
