// THEORY:
// This file is the main entry point for the `rep_vision` library crate. It
// exposes the `FramePipeline` (one frame in, one report out, plus start/stop
// control), the `WorkerPool` that runs it for many users at once, and the
// `HistoryStore` persistence collaborator. The layers underneath live in
// `core_modules`:
//
//   landmark -> angle -> form_evaluator -> rep_counter -> session_registry
//
// with `clock` supplying time and `history` receiving finished sessions.

pub mod core_modules;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::angle::angle;
pub use core_modules::clock::{Clock, ManualClock, SystemClock};
pub use core_modules::form_evaluator::{
    DefinitionError, ExerciseDefinition, FeedbackReason, FormCheck, FormResult, JointTriple,
    Threshold,
};
pub use core_modules::history::{
    HistoryStore, JsonFileHistoryStore, MemoryHistoryStore, ProgressReport, StoreError,
    UserRecord,
};
pub use core_modules::landmark::{Joint, LandmarkError, LandmarkSet, ParseSideError, Point2D, Side};
pub use core_modules::rep_counter::{SessionState, Stage};
pub use core_modules::session_registry::{SessionRegistry, SessionSummary, StopOutcome};
pub use parallel_pipeline::{PipelineError, WorkerPool};
pub use pipeline::{
    FormChecks, FramePipeline, FrameReport, ParseFormChecksError, PipelineConfig, TrackedSide,
};
