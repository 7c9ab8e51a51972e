//! Progress reporting channel between the controller and its caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::stage::Stage;

/// Presentation hint for a progress report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReportColor {
    Error,
    Command,
    Success,
    Normal,
}

/// Human-readable output emitted while the pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressReport {
    pub text: String,
    pub color: ReportColor,
    /// Stage the text belongs to, if any.
    pub stage: Option<Stage>,
    pub emitted_at: DateTime<Utc>,
}

/// Everything the controller tells its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineSignal {
    Progress(ProgressReport),
    /// The artifact was created. Always followed by `Finished { success: true }`.
    Succeeded,
    /// Terminal; emitted exactly once per run.
    Finished { success: bool },
}

/// Sending half held by the controller. A dropped receiver is not an error:
/// the pipeline keeps running to its terminal state regardless.
#[derive(Debug, Clone)]
pub(crate) struct SignalSender {
    tx: mpsc::UnboundedSender<PipelineSignal>,
}

impl SignalSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn report(&self, stage: Option<Stage>, color: ReportColor, text: impl Into<String>) {
        self.send(PipelineSignal::Progress(ProgressReport {
            text: text.into(),
            color,
            stage,
            emitted_at: Utc::now(),
        }));
    }

    pub(crate) fn send(&self, signal: PipelineSignal) {
        let _ = self.tx.send(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_reaches_receiver() {
        let (sender, mut rx) = SignalSender::channel();
        sender.report(Some(Stage::Build), ReportColor::Command, "Running Build Steps\n");
        sender.send(PipelineSignal::Finished { success: false });

        match rx.try_recv() {
            Ok(PipelineSignal::Progress(report)) => {
                assert_eq!(report.text, "Running Build Steps\n");
                assert_eq!(report.color, ReportColor::Command);
                assert_eq!(report.stage, Some(Stage::Build));
            }
            other => panic!("unexpected signal: {other:?}"),
        }
        assert_eq!(rx.try_recv(), Ok(PipelineSignal::Finished { success: false }));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (sender, rx) = SignalSender::channel();
        drop(rx);
        sender.report(None, ReportColor::Normal, "ignored");
    }
}
