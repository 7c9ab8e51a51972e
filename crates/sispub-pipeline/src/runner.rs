//! Stage runner: one external process per invocation, one completion per start.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sispub_core::{PublishError, Result};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::stage::{split_command, ExitStatus, Stage, StageCompletion, StageResult};

/// Runs the process for a single stage and reports its [`StageCompletion`]
/// to one listener.
///
/// Completion is delivered exactly once per successful [`start`](Self::start),
/// including after [`cancel`](Self::cancel), a timeout or a spawn failure.
pub struct StageRunner {
    stage: Stage,
    listener: mpsc::UnboundedSender<StageCompletion>,
    busy: Arc<AtomicBool>,
    cancel: Option<oneshot::Sender<()>>,
    timeout: Option<Duration>,
}

impl StageRunner {
    pub fn new(
        stage: Stage,
        listener: mpsc::UnboundedSender<StageCompletion>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            stage,
            listener,
            busy: Arc::new(AtomicBool::new(false)),
            cancel: None,
            timeout,
        }
    }

    /// Whether an invocation is in flight.
    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Launch `command` in `working_dir` with exactly `environment`.
    ///
    /// Must be called from within a tokio runtime. Starting a runner that is
    /// still running is an [`PublishError::IllegalState`].
    pub fn start(
        &mut self,
        command: &str,
        working_dir: &Path,
        environment: &BTreeMap<String, String>,
    ) -> Result<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(PublishError::IllegalState(format!(
                "{} stage started while already running",
                self.stage
            )));
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel = Some(cancel_tx);

        let stage = self.stage;
        let argv = split_command(command);
        let working_dir = working_dir.to_path_buf();
        let environment = environment.clone();
        let timeout = self.timeout;
        let busy = Arc::clone(&self.busy);
        let listener = self.listener.clone();

        debug!(stage = %stage, command = %command, "spawning stage process");
        tokio::spawn(async move {
            let result = execute(argv, working_dir, environment, timeout, cancel_rx).await;
            busy.store(false, Ordering::SeqCst);
            if listener.send(StageCompletion { stage, result }).is_err() {
                debug!(stage = %stage, "stage listener gone; completion dropped");
            }
        });
        Ok(())
    }

    /// Best-effort termination of the in-flight process. The completion
    /// still fires, with [`ExitStatus::Crash`].
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for StageRunner {
    fn drop(&mut self) {
        self.cancel();
    }
}

enum Ending {
    Exited(std::io::Result<std::process::Output>),
    TimedOut(Duration),
    Cancelled,
}

async fn execute(
    argv: Vec<String>,
    working_dir: PathBuf,
    environment: BTreeMap<String, String>,
    timeout: Option<Duration>,
    cancel_rx: oneshot::Receiver<()>,
) -> StageResult {
    let start = Instant::now();
    let elapsed_ms = |start: Instant| start.elapsed().as_millis() as u64;

    let Some((program, args)) = argv.split_first() else {
        return StageResult::crashed("empty command", 0);
    };

    let child = Command::new(program)
        .args(args)
        .current_dir(&working_dir)
        .env_clear()
        .envs(&environment)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return StageResult::crashed(
                format!("failed to start {program}: {e}\n"),
                elapsed_ms(start),
            )
        }
    };

    // dropping the wait future kills the child (kill_on_drop)
    let wait = async move {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => Ending::Exited(output),
                Err(_) => Ending::TimedOut(limit),
            },
            None => Ending::Exited(child.wait_with_output().await),
        }
    };

    let ending = tokio::select! {
        ending = wait => ending,
        Ok(()) = cancel_rx => Ending::Cancelled,
    };

    let duration_ms = elapsed_ms(start);
    match ending {
        Ending::Exited(Ok(output)) => StageResult {
            exit_status: if output.status.success() {
                ExitStatus::Normal
            } else {
                ExitStatus::Crash
            },
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms,
        },
        Ending::Exited(Err(e)) => StageResult::crashed(
            format!("failed to collect output of {program}: {e}\n"),
            duration_ms,
        ),
        Ending::TimedOut(limit) => {
            StageResult::crashed(format!("{program} timed out after {limit:?}\n"), duration_ms)
        }
        Ending::Cancelled => {
            StageResult::crashed(format!("{program} was cancelled\n"), duration_ms)
        }
    }
}
