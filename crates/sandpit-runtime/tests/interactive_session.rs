#![cfg(unix)]

use sandpit_runtime::{
    CommandTemplate, Executor, LanguageSpec, LanguageTable, OutboundFrame, RuntimeConfig,
    SessionConfig, SessionReport, SessionSupervisor, TerminationReason,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn shell_language() -> LanguageSpec {
    LanguageSpec::new(
        "shell",
        "POSIX shell",
        "main.sh",
        CommandTemplate::new("sh").arg("{source}"),
    )
}

fn supervisor(scratch_root: &Path, specs: Vec<LanguageSpec>, max_sessions: usize) -> Arc<SessionSupervisor> {
    let config = RuntimeConfig {
        scratch_root: scratch_root.to_path_buf(),
        ..Default::default()
    };
    let executor = Arc::new(Executor::new(config, Arc::new(LanguageTable::from_specs(specs))));
    let session_config = SessionConfig {
        default_language: "shell".into(),
        max_sessions,
        drain_grace: Duration::from_millis(500),
    };
    Arc::new(SessionSupervisor::new(
        executor,
        session_config,
        CancellationToken::new(),
    ))
}

struct Connection {
    inbound: Option<mpsc::Sender<String>>,
    outbound: mpsc::Receiver<OutboundFrame>,
    session: JoinHandle<SessionReport>,
}

impl Connection {
    fn open(supervisor: Arc<SessionSupervisor>, pinned: Option<&'static str>) -> Self {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(64);
        let session = tokio::spawn(async move { supervisor.supervise(pinned, in_rx, out_tx).await });
        Self {
            inbound: Some(in_tx),
            outbound: out_rx,
            session,
        }
    }

    async fn send(&self, text: &str) {
        self.inbound
            .as_ref()
            .expect("connection already closed")
            .send(text.to_string())
            .await
            .unwrap();
    }

    async fn next_frame(&mut self) -> OutboundFrame {
        tokio::time::timeout(Duration::from_secs(10), self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound channel closed")
    }

    async fn disconnect(mut self) -> SessionReport {
        self.inbound.take();
        tokio::time::timeout(Duration::from_secs(10), self.session)
            .await
            .expect("session did not terminate")
            .unwrap()
    }

    async fn finish(self) -> SessionReport {
        tokio::time::timeout(Duration::from_secs(10), self.session)
            .await
            .expect("session did not terminate")
            .unwrap()
    }
}

fn process_exists(pid: u32) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

fn has_python() -> bool {
    ["python", "python3"].iter().any(|program| {
        std::process::Command::new(program)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

#[tokio::test]
async fn test_echo_roundtrip_over_channel() {
    let root = tempfile::tempdir().unwrap();
    let mut conn = Connection::open(supervisor(root.path(), vec![shell_language()], 4), None);

    conn.send(r#"{"code": "while read line; do echo \"$line\"; done"}"#)
        .await;
    conn.send("hello").await;

    assert_eq!(conn.next_frame().await, OutboundFrame::Stdout("hello\n".into()));

    conn.send("again").await;
    assert_eq!(conn.next_frame().await, OutboundFrame::Stdout("again\n".into()));

    let report = conn.disconnect().await;
    assert_eq!(report.reason, TerminationReason::Disconnected);
    assert_eq!(report.language.as_deref(), Some("shell"));
}

#[tokio::test]
async fn test_python_echo_scenario() {
    if !has_python() {
        eprintln!("skipping: no python interpreter on PATH");
        return;
    }

    let root = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        scratch_root: root.path().to_path_buf(),
        ..Default::default()
    };
    let executor = Arc::new(Executor::new(config, Arc::new(LanguageTable::builtin())));
    let supervisor = Arc::new(SessionSupervisor::new(
        executor,
        SessionConfig::default(),
        CancellationToken::new(),
    ));
    let mut conn = Connection::open(supervisor, Some("python"));

    conn.send(r#"{"code": "while True: print(input())"}"#).await;
    conn.send("hello").await;

    assert_eq!(conn.next_frame().await, OutboundFrame::Stdout("hello\n".into()));
    conn.disconnect().await;
}

#[tokio::test]
async fn test_raw_first_frame_is_code() {
    let root = tempfile::tempdir().unwrap();
    let mut conn = Connection::open(supervisor(root.path(), vec![shell_language()], 4), None);

    conn.send("echo raw").await;

    assert_eq!(conn.next_frame().await, OutboundFrame::Stdout("raw\n".into()));
    assert_eq!(conn.next_frame().await, OutboundFrame::Exit(Some(0)));
}

#[tokio::test]
async fn test_stderr_lines_are_tagged() {
    let root = tempfile::tempdir().unwrap();
    let mut conn = Connection::open(supervisor(root.path(), vec![shell_language()], 4), None);

    conn.send(r#"{"code": "echo oops >&2; exit 3"}"#).await;

    assert_eq!(conn.next_frame().await, OutboundFrame::Stderr("oops\n".into()));
    assert_eq!(conn.next_frame().await, OutboundFrame::Exit(Some(3)));

    let report = conn.finish().await;
    assert_eq!(report.reason, TerminationReason::ProcessExited);
    assert_eq!(report.exit_code, Some(3));
}

#[tokio::test]
async fn test_disconnect_kills_running_subprocess() {
    let root = tempfile::tempdir().unwrap();
    let mut conn = Connection::open(supervisor(root.path(), vec![shell_language()], 4), None);

    conn.send(r#"{"code": "echo ready; exec sleep 60"}"#).await;
    assert_eq!(conn.next_frame().await, OutboundFrame::Stdout("ready\n".into()));

    let report = conn.disconnect().await;
    let pid = report.pid.expect("subprocess was spawned");

    assert_eq!(report.reason, TerminationReason::Disconnected);
    assert!(!process_exists(pid), "pid {pid} still in the process table");
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_disconnect_before_first_frame() {
    let root = tempfile::tempdir().unwrap();
    let conn = Connection::open(supervisor(root.path(), vec![shell_language()], 4), None);

    let report = conn.disconnect().await;

    assert_eq!(report.reason, TerminationReason::Disconnected);
    assert_eq!(report.pid, None);
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_spawn_failure_sends_error_frame() {
    let root = tempfile::tempdir().unwrap();
    let missing = LanguageSpec::new(
        "missing",
        "Missing toolchain",
        "main.txt",
        CommandTemplate::new("sandpit-no-such-binary").arg("{source}"),
    );
    let mut conn = Connection::open(supervisor(root.path(), vec![missing], 4), Some("missing"));

    conn.send("anything").await;

    match conn.next_frame().await {
        OutboundFrame::Error(message) => assert!(message.contains("sandpit-no-such-binary")),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(conn.finish().await.reason, TerminationReason::SpawnFailed);
}

#[tokio::test]
async fn test_compile_failure_reports_diagnostics() {
    let root = tempfile::tempdir().unwrap();
    let broken = LanguageSpec::new("broken", "Broken", "main.txt", CommandTemplate::new("cat"))
        .with_compile(CommandTemplate::new("sh").args(["-c", "echo 'error: nope' >&2; exit 1"]));
    let mut conn = Connection::open(supervisor(root.path(), vec![broken], 4), Some("broken"));

    conn.send("code").await;

    assert_eq!(conn.next_frame().await, OutboundFrame::Stderr("error: nope\n".into()));
    let report = conn.finish().await;
    assert_eq!(report.reason, TerminationReason::CompileFailed);
    assert_eq!(report.pid, None);
}

#[tokio::test]
async fn test_unknown_language_in_first_frame() {
    let root = tempfile::tempdir().unwrap();
    let mut conn = Connection::open(supervisor(root.path(), vec![shell_language()], 4), None);

    conn.send(r#"{"code": "x", "language": "cobol"}"#).await;

    match conn.next_frame().await {
        OutboundFrame::Error(message) => assert!(message.contains("Unsupported language")),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(conn.finish().await.reason, TerminationReason::InvalidStart);
}

#[tokio::test]
async fn test_session_slots_are_bounded() {
    let root = tempfile::tempdir().unwrap();
    let supervisor = supervisor(root.path(), vec![shell_language()], 1);

    let mut first = Connection::open(supervisor.clone(), None);
    first.send("echo up; exec sleep 60").await;
    assert_eq!(first.next_frame().await, OutboundFrame::Stdout("up\n".into()));
    assert_eq!(supervisor.active_sessions(), 1);

    let mut second = Connection::open(supervisor.clone(), None);
    assert!(matches!(second.next_frame().await, OutboundFrame::Error(_)));
    assert_eq!(second.finish().await.reason, TerminationReason::Rejected);

    first.disconnect().await;
    assert_eq!(supervisor.active_sessions(), 0);
}

#[tokio::test]
async fn test_shutdown_terminates_sessions() {
    let root = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        scratch_root: root.path().to_path_buf(),
        ..Default::default()
    };
    let executor = Arc::new(Executor::new(
        config,
        Arc::new(LanguageTable::from_specs(vec![shell_language()])),
    ));
    let shutdown = CancellationToken::new();
    let supervisor = Arc::new(SessionSupervisor::new(
        executor,
        SessionConfig {
            default_language: "shell".into(),
            ..Default::default()
        },
        shutdown.clone(),
    ));

    let mut conn = Connection::open(supervisor, None);
    conn.send("echo up; exec sleep 60").await;
    assert_eq!(conn.next_frame().await, OutboundFrame::Stdout("up\n".into()));

    shutdown.cancel();
    let report = conn.finish().await;

    assert_eq!(report.reason, TerminationReason::Shutdown);
    assert!(!process_exists(report.pid.unwrap()));
}

#[tokio::test]
async fn test_disconnect_while_child_ignores_stdin() {
    let root = tempfile::tempdir().unwrap();
    let mut conn = Connection::open(supervisor(root.path(), vec![shell_language()], 4), None);

    conn.send("echo ready; exec sleep 60").await;
    assert_eq!(conn.next_frame().await, OutboundFrame::Stdout("ready\n".into()));

    // Far more than the pipe buffer plus the stdin queue can hold.
    let line = "x".repeat(4096);
    for _ in 0..400 {
        tokio::time::timeout(Duration::from_secs(5), conn.send(&line))
            .await
            .expect("session stopped draining input");
    }

    let report = conn.disconnect().await;
    let pid = report.pid.expect("subprocess was spawned");

    assert_eq!(report.reason, TerminationReason::Disconnected);
    assert!(!process_exists(pid), "pid {pid} still in the process table");
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_output_without_newline_is_chunked() {
    let root = tempfile::tempdir().unwrap();
    let mut conn = Connection::open(supervisor(root.path(), vec![shell_language()], 4), None);

    conn.send("head -c 100000 /dev/zero | tr '\\0' x").await;

    let mut received = 0;
    loop {
        match conn.next_frame().await {
            OutboundFrame::Stdout(chunk) => {
                assert!(chunk.len() <= 8 * 1024, "frame of {} bytes", chunk.len());
                assert!(chunk.bytes().all(|b| b == b'x'));
                received += chunk.len();
            }
            OutboundFrame::Exit(code) => {
                assert_eq!(code, Some(0));
                break;
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert_eq!(received, 100000);
}
