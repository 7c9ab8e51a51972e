//! Publish pipeline controller.
//!
//! Drives clean -> configure -> build -> package as an explicit state
//! machine. The only input is a [`StageCompletion`]; each one either
//! launches the next stage or finishes the run. The controller never blocks
//! on a process, it only waits for the next completion.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sispub_core::{DescriptorStore, PackageDescriptor, PublishError, Result};
use tokio::sync::mpsc;
use tracing::{warn, Span};
use uuid::Uuid;

use crate::build_step::BuildConfiguration;
use crate::obs;
use crate::progress::{PipelineSignal, ReportColor, SignalSender};
use crate::runner::StageRunner;
use crate::stage::{ExitStatus, Stage, StageCompletion, StageResult};
use crate::toolchain::PackagingTarget;

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Controller state. Idle is initial, Finished is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Cleaning,
    Configuring,
    Building,
    Packaging,
    Finished(Outcome),
}

impl PipelineState {
    fn running(stage: Stage) -> Self {
        match stage {
            Stage::Clean => PipelineState::Cleaning,
            Stage::Configure => PipelineState::Configuring,
            Stage::Build => PipelineState::Building,
            Stage::Package => PipelineState::Packaging,
        }
    }

    /// The stage whose completion the controller is waiting for.
    pub fn active_stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Cleaning => Some(Stage::Clean),
            PipelineState::Configuring => Some(Stage::Configure),
            PipelineState::Building => Some(Stage::Build),
            PipelineState::Packaging => Some(Stage::Package),
            PipelineState::Idle | PipelineState::Finished(_) => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, PipelineState::Finished(_))
    }
}

/// Per-stage line of a [`PublishReport`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: Stage,
    pub exit_status: ExitStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

/// Machine-readable summary of one publish run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishReport {
    pub run_id: String,
    pub success: bool,
    pub state: PipelineState,
    pub stages: Vec<StageSummary>,
    pub artifact_path: Option<PathBuf>,
    /// Hex SHA-256 of the artifact.
    pub artifact_sha256: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PublishReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Cloneable handle that asks a running controller to cancel.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(());
    }
}

enum LoopEvent {
    Cancel,
    Completion(Option<StageCompletion>),
}

/// Drives one publish attempt. Create one per attempt and drop it once
/// [`PipelineSignal::Finished`] has been delivered.
pub struct PipelineController {
    run_id: Uuid,
    state: PipelineState,
    build: BuildConfiguration,
    store: DescriptorStore,
    descriptor: PackageDescriptor,
    packaging: PackagingTarget,
    runners: [StageRunner; 4],
    completions: mpsc::UnboundedReceiver<StageCompletion>,
    cancel_tx: mpsc::UnboundedSender<()>,
    cancel_rx: mpsc::UnboundedReceiver<()>,
    signals: SignalSender,
    cancelled: bool,
    succeeded: bool,
    created_artifact: Option<PathBuf>,
    artifact_sha256: Option<String>,
    stage_summaries: Vec<StageSummary>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    span: Span,
}

impl PipelineController {
    /// Create a controller and the receiver for its progress signals.
    pub fn new(
        build: BuildConfiguration,
        store: DescriptorStore,
        descriptor: PackageDescriptor,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineSignal>) {
        let run_id = Uuid::new_v4();
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let (signals, signal_rx) = SignalSender::channel();

        let runners = Stage::ALL
            .map(|stage| StageRunner::new(stage, completion_tx.clone(), build.stage_timeout));
        let packaging = build.tool_version.packaging();
        let span = obs::pipeline_span(&run_id.to_string(), &build.project_name);

        let controller = Self {
            run_id,
            state: PipelineState::Idle,
            build,
            store,
            descriptor,
            packaging,
            runners,
            completions,
            cancel_tx,
            cancel_rx,
            signals,
            cancelled: false,
            succeeded: false,
            created_artifact: None,
            artifact_sha256: None,
            stage_summaries: Vec::new(),
            started_at: None,
            finished_at: None,
            span,
        };
        (controller, signal_rx)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Expected artifact location for the detected toolchain.
    pub fn expected_artifact_path(&self) -> PathBuf {
        self.build.artifact_path(self.packaging.artifact_suffix)
    }

    /// `true` only after a successful `Finished`.
    pub fn has_succeeded(&self) -> bool {
        self.state == PipelineState::Finished(Outcome::Success) && self.succeeded
    }

    /// The artifact, once the run finished successfully and the file was seen on disk.
    pub fn created_artifact_path(&self) -> Option<&Path> {
        self.created_artifact.as_deref()
    }

    /// Folder containing the created artifact.
    pub fn created_artifact_dir(&self) -> Option<&Path> {
        self.created_artifact.as_deref().and_then(Path::parent)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Validate and persist the package metadata, then launch the clean stage.
    ///
    /// Validation and descriptor I/O errors are returned before any process
    /// is started. Must be called from within a tokio runtime.
    pub fn run(&mut self) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(PublishError::IllegalState(format!(
                "run() called in state {:?}",
                self.state
            )));
        }

        let span = self.span.clone();
        let _enter = span.enter();

        self.descriptor.validate(&self.store)?;
        self.descriptor.persist(&mut self.store)?;

        self.started_at = Some(Utc::now());
        obs::emit_pipeline_started(
            &self.run_id.to_string(),
            &self.build.tool_version.to_string(),
            &self.build.build_dir.display().to_string(),
        );
        self.launch(Stage::Clean)
    }

    /// Process completions until the run finishes. Returns [`has_succeeded`](Self::has_succeeded).
    pub async fn wait(&mut self) -> Result<bool> {
        while !self.state.is_finished() {
            if self.state == PipelineState::Idle {
                return Err(PublishError::IllegalState(
                    "wait() called before run()".to_string(),
                ));
            }

            let event = tokio::select! {
                Some(()) = self.cancel_rx.recv() => LoopEvent::Cancel,
                completion = self.completions.recv() => LoopEvent::Completion(completion),
            };

            match event {
                LoopEvent::Cancel => self.cancel(),
                LoopEvent::Completion(Some(completion)) => self.handle_completion(completion)?,
                LoopEvent::Completion(None) => {
                    return Err(PublishError::IllegalState(
                        "stage runners disconnected".to_string(),
                    ))
                }
            }
        }
        Ok(self.has_succeeded())
    }

    /// [`run`](Self::run) followed by [`wait`](Self::wait).
    pub async fn publish(&mut self) -> Result<bool> {
        self.run()?;
        self.wait().await
    }

    /// Cancel the active stage and suppress further launches. The run
    /// still ends with exactly one `Finished { success: false }`.
    pub fn cancel(&mut self) {
        let Some(active) = self.state.active_stage() else {
            return;
        };
        if self.cancelled {
            return;
        }
        let _enter = self.span.enter();
        self.cancelled = true;
        obs::emit_pipeline_cancelled(&self.run_id.to_string(), Some(active));
        self.runners[active.index()].cancel();
    }

    /// Advance the state machine with one completion.
    pub fn handle_completion(&mut self, completion: StageCompletion) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();

        let StageCompletion { stage, result } = completion;
        if self.state.active_stage() != Some(stage) {
            warn!(stage = %stage, state = ?self.state, "ignoring completion for inactive stage");
            return Ok(());
        }

        obs::emit_stage_finished(stage, result.exit_status, result.exit_code, result.duration_ms);
        self.stage_summaries.push(StageSummary {
            stage,
            exit_status: result.exit_status,
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
        });
        self.report_output(stage, &result);

        if self.cancelled {
            self.signals
                .report(Some(stage), ReportColor::Error, "Publishing cancelled\n");
            self.finish(false);
            return Ok(());
        }

        match stage.next() {
            None => {
                self.finalize(result.exit_status);
                Ok(())
            }
            Some(next) if result.exit_status.is_normal() || !stage.failure_is_fatal() => {
                self.launch(next)
            }
            Some(next) => {
                for skipped in Stage::ALL.iter().skip(next.index()) {
                    obs::emit_stage_skipped(*skipped, stage);
                }
                self.signals.report(
                    Some(next),
                    ReportColor::Error,
                    format!(
                        "{} not executed due to previous errors; sis file not created\n",
                        next.title()
                    ),
                );
                self.finish(false);
                Ok(())
            }
        }
    }

    /// Snapshot of the run for printing or serialisation.
    pub fn report(&self) -> PublishReport {
        PublishReport {
            run_id: self.run_id.to_string(),
            success: self.has_succeeded(),
            state: self.state,
            stages: self.stage_summaries.clone(),
            artifact_path: self.created_artifact.clone(),
            artifact_sha256: self.artifact_sha256.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    fn launch(&mut self, stage: Stage) -> Result<()> {
        let command = match stage.command(&mut self.build, self.packaging) {
            Ok(command) => command,
            Err(e) => {
                self.signals.report(
                    Some(stage),
                    ReportColor::Error,
                    format!("{} could not be prepared: {e}\n", stage.title()),
                );
                self.finish(false);
                return Ok(());
            }
        };

        self.signals
            .report(Some(stage), ReportColor::Command, format!("{}\n", stage.title()));
        self.signals
            .report(Some(stage), ReportColor::Command, format!("{command}\n"));

        obs::emit_stage_started(stage, &command);
        self.state = PipelineState::running(stage);
        self.runners[stage.index()].start(&command, &self.build.build_dir, &self.build.environment)
    }

    fn report_output(&self, stage: Stage, result: &StageResult) {
        self.signals
            .report(Some(stage), ReportColor::Success, result.stdout_lossy());
        self.signals
            .report(Some(stage), ReportColor::Error, result.stderr_lossy());
    }

    fn finalize(&mut self, exit_status: ExitStatus) {
        let artifact = self.expected_artifact_path();

        if exit_status.is_normal() && artifact.is_file() {
            self.signals.report(
                Some(Stage::Package),
                ReportColor::Normal,
                format!("Created {}\n", artifact.display()),
            );
            self.artifact_sha256 = match digest_file(&artifact) {
                Ok(digest) => Some(digest),
                Err(e) => {
                    warn!(artifact = %artifact.display(), error = %e, "could not hash artifact");
                    None
                }
            };
            self.created_artifact = Some(artifact);
            self.succeeded = true;
            self.signals.send(PipelineSignal::Succeeded);
            self.finish(true);
        } else {
            self.signals.report(
                Some(Stage::Package),
                ReportColor::Error,
                "Sis file not created due to previous errors\n",
            );
            self.finish(false);
        }
    }

    fn finish(&mut self, success: bool) {
        self.signals.report(None, ReportColor::Command, "Done!\n");
        self.state = PipelineState::Finished(if success {
            Outcome::Success
        } else {
            Outcome::Failure
        });
        self.finished_at = Some(Utc::now());
        obs::emit_pipeline_finished(
            &self.run_id.to_string(),
            success,
            self.created_artifact.as_deref().and_then(Path::to_str),
        );
        self.signals.send(PipelineSignal::Finished { success });
    }
}

fn digest_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_step::ProcessStep;
    use crate::toolchain::ToolVersion;
    use std::collections::BTreeMap;

    struct Fixture {
        dir: tempfile::TempDir,
        controller: PipelineController,
        signals: mpsc::UnboundedReceiver<PipelineSignal>,
    }

    fn fixture(application_id: &str) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let descriptor_path = dir.path().join("hello.pro");
        std::fs::write(&descriptor_path, "TARGET = hello\n").expect("write descriptor");
        let store = DescriptorStore::open(&descriptor_path).expect("open");

        let build = BuildConfiguration {
            build_dir: dir.path().to_path_buf(),
            environment: std::env::vars().collect::<BTreeMap<_, _>>(),
            tool_version: ToolVersion::new(4, 7, 1),
            project_name: "hello".to_string(),
            configure_step: Box::new(ProcessStep::new("true", "")),
            make_step: Box::new(ProcessStep::new("true", "")),
            stage_timeout: None,
        };
        let descriptor = PackageDescriptor::default()
            .with_vendor_name("Acme")
            .with_application_id(application_id);
        let (controller, signals) = PipelineController::new(build, store, descriptor);
        Fixture {
            dir,
            controller,
            signals,
        }
    }

    fn ok() -> StageResult {
        StageResult {
            exit_status: ExitStatus::Normal,
            exit_code: Some(0),
            stdout: b"ok".to_vec(),
            stderr: Vec::new(),
            duration_ms: 1,
        }
    }

    fn crash() -> StageResult {
        StageResult {
            exit_status: ExitStatus::Crash,
            exit_code: Some(2),
            stdout: Vec::new(),
            stderr: b"boom".to_vec(),
            duration_ms: 1,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PipelineSignal>) -> Vec<PipelineSignal> {
        let mut out = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            out.push(signal);
        }
        out
    }

    fn finished_count(signals: &[PipelineSignal]) -> usize {
        signals
            .iter()
            .filter(|s| matches!(s, PipelineSignal::Finished { .. }))
            .count()
    }

    /// Consume the real completion of the stage the controller launched,
    /// then inject `result` in its place.
    async fn complete_active(f: &mut Fixture, result: StageResult) {
        let stage = f.controller.state().active_stage().expect("a stage is running");
        let real = f.controller.completions.recv().await.expect("real completion");
        assert_eq!(real.stage, stage);
        f.controller
            .handle_completion(StageCompletion { stage, result })
            .expect("handle completion");
    }

    #[tokio::test]
    async fn test_invalid_id_never_starts() {
        let mut f = fixture("not-a-number");
        let err = f.controller.run().expect_err("validation must fail");
        assert!(matches!(err, PublishError::Validation(_)));
        assert_eq!(f.controller.state(), PipelineState::Idle);
        assert!(drain(&mut f.signals).is_empty());
        assert!(f.controller.runners.iter().all(|r| !r.is_running()));
    }

    #[tokio::test]
    async fn test_clean_failure_is_ignored() {
        let mut f = fixture("0x20012345");
        f.controller.run().expect("run");
        assert_eq!(f.controller.state(), PipelineState::Cleaning);

        complete_active(&mut f, crash()).await;
        assert_eq!(f.controller.state(), PipelineState::Configuring);
    }

    #[tokio::test]
    async fn test_configure_failure_stops_chain() {
        let mut f = fixture("0x20012345");
        f.controller.run().expect("run");
        complete_active(&mut f, ok()).await;
        complete_active(&mut f, crash()).await;

        assert_eq!(f.controller.state(), PipelineState::Finished(Outcome::Failure));
        assert!(!f.controller.has_succeeded());
        assert!(!f.controller.runners[Stage::Build.index()].is_running());

        let signals = drain(&mut f.signals);
        assert_eq!(finished_count(&signals), 1);
        assert!(signals.contains(&PipelineSignal::Finished { success: false }));
        assert!(!signals.contains(&PipelineSignal::Succeeded));
        assert!(signals.iter().any(|s| matches!(
            s,
            PipelineSignal::Progress(r) if r.text.contains("not executed due to previous errors")
        )));
    }

    #[tokio::test]
    async fn test_success_requires_artifact() {
        let mut f = fixture("0x20012345");
        f.controller.run().expect("run");
        for _ in 0..4 {
            complete_active(&mut f, ok()).await;
        }
        assert_eq!(f.controller.state(), PipelineState::Finished(Outcome::Failure));
        assert!(f.controller.created_artifact_path().is_none());
    }

    #[tokio::test]
    async fn test_success_requires_normal_exit() {
        let mut f = fixture("0x20012345");
        std::fs::write(f.dir.path().join("hello_installer_unsigned.sis"), b"sis")
            .expect("artifact");
        f.controller.run().expect("run");
        for _ in 0..3 {
            complete_active(&mut f, ok()).await;
        }
        complete_active(&mut f, crash()).await;
        assert!(!f.controller.has_succeeded());
    }

    #[tokio::test]
    async fn test_success_with_artifact() {
        let mut f = fixture("0x20012345");
        let artifact = f.dir.path().join("hello_installer_unsigned.sis");
        std::fs::write(&artifact, b"sis").expect("artifact");

        f.controller.run().expect("run");
        for _ in 0..4 {
            complete_active(&mut f, ok()).await;
        }

        assert!(f.controller.has_succeeded());
        assert_eq!(f.controller.created_artifact_path(), Some(artifact.as_path()));
        assert_eq!(f.controller.created_artifact_dir(), Some(f.dir.path()));

        let report = f.controller.report();
        assert_eq!(report.run_id, f.controller.run_id().to_string());
        assert_eq!(report.stages.len(), 4);
        assert_eq!(
            report.artifact_sha256.as_deref(),
            Some(hex::encode(Sha256::digest(b"sis")).as_str())
        );

        let signals = drain(&mut f.signals);
        let succeeded = signals.iter().position(|s| *s == PipelineSignal::Succeeded);
        let finished = signals
            .iter()
            .position(|s| *s == PipelineSignal::Finished { success: true });
        assert!(succeeded.expect("succeeded") < finished.expect("finished"));
    }

    #[tokio::test]
    async fn test_run_twice_is_illegal() {
        let mut f = fixture("0x20012345");
        f.controller.run().expect("run");
        let err = f.controller.run().expect_err("second run");
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        let mut f = fixture("0x20012345");
        f.controller.run().expect("run");
        f.controller
            .handle_completion(StageCompletion {
                stage: Stage::Package,
                result: ok(),
            })
            .expect("ignored");
        assert_eq!(f.controller.state(), PipelineState::Cleaning);
    }

    #[tokio::test]
    async fn test_wait_before_run_is_illegal() {
        let mut f = fixture("0x20012345");
        let err = f.controller.wait().await.expect_err("not started");
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_state_helpers() {
        assert_eq!(PipelineState::Building.active_stage(), Some(Stage::Build));
        assert_eq!(PipelineState::Idle.active_stage(), None);
        assert!(PipelineState::Finished(Outcome::Success).is_finished());
        assert!(!PipelineState::Packaging.is_finished());
    }
}
