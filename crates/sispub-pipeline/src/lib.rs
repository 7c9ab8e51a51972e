//! sispub pipeline
//!
//! Runs the four external build stages of a publish attempt
//! (clean, qmake, freeze build, sis packaging) one after another and
//! decides success from the exit status of the last stage and the artifact
//! it leaves on disk.

pub mod build_step;
pub mod obs;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod stage;
pub mod toolchain;

pub use build_step::{BuildConfiguration, BuildStep, ProcessStep};
pub use pipeline::{
    CancelHandle, Outcome, PipelineController, PipelineState, PublishReport, StageSummary,
};
pub use progress::{PipelineSignal, ProgressReport, ReportColor};
pub use runner::StageRunner;
pub use stage::{ExitStatus, Stage, StageCompletion, StageResult};
pub use toolchain::{PackagingTarget, ToolVersion};
