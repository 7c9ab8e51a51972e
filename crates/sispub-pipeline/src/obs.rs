//! Structured lifecycle logging for publish runs.
//!
//! Every event is an `info!` (or `warn!`) line with a stable `event` field,
//! so runs can be followed with `RUST_LOG=info` or filtered in JSON output.

use tracing::{info, warn, Span};

use crate::stage::{ExitStatus, Stage};

/// Span tagging every log line of one publish run with its `run_id`.
///
/// Enter it only inside synchronous sections; the controller never holds the
/// guard across an `.await`.
pub fn pipeline_span(run_id: &str, project: &str) -> Span {
    tracing::info_span!("sispub.run", run_id = %run_id, project = %project)
}

pub fn emit_pipeline_started(run_id: &str, tool_version: &str, build_dir: &str) {
    info!(
        event = "pipeline.started",
        run_id = %run_id,
        tool_version = %tool_version,
        build_dir = %build_dir,
    );
}

pub fn emit_stage_started(stage: Stage, command: &str) {
    info!(event = "stage.started", stage = %stage, command = %command);
}

pub fn emit_stage_finished(
    stage: Stage,
    exit_status: ExitStatus,
    exit_code: Option<i32>,
    duration_ms: u64,
) {
    info!(
        event = "stage.finished",
        stage = %stage,
        exit_status = ?exit_status,
        exit_code = ?exit_code,
        duration_ms = duration_ms,
    );
}

/// A stage that will not run because an earlier one failed.
pub fn emit_stage_skipped(stage: Stage, failed: Stage) {
    warn!(event = "stage.skipped", stage = %stage, failed_stage = %failed);
}

pub fn emit_pipeline_cancelled(run_id: &str, active: Option<Stage>) {
    warn!(event = "pipeline.cancelled", run_id = %run_id, active_stage = ?active);
}

pub fn emit_pipeline_finished(run_id: &str, success: bool, artifact: Option<&str>) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        success = success,
        artifact = artifact.unwrap_or(""),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        let span = pipeline_span("run-1", "hello");
        let _guard = span.enter();
        emit_pipeline_started("run-1", "4.7.1", "/tmp/build");
        emit_stage_started(Stage::Clean, "make clean -w");
        emit_stage_finished(Stage::Clean, ExitStatus::Crash, Some(2), 10);
        emit_stage_skipped(Stage::Package, Stage::Build);
        emit_pipeline_cancelled("run-1", Some(Stage::Build));
        emit_pipeline_finished("run-1", false, None);
    }
}
