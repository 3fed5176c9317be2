// THEORY:
// The `pipeline` module is the top-level API for the engine. It strings the
// layers together for one frame of one user:
//
//   landmarks -> form evaluation -> repetition state machine -> FrameReport
//
// and exposes the start/stop control operations. Callers (the server, the
// replay tester) only ever talk to a `FramePipeline`; the registry, the
// evaluator and the state machine stay behind it.

use crate::core_modules::clock::{Clock, SystemClock};
use crate::core_modules::form_evaluator::{ExerciseDefinition, FormResult};
use crate::core_modules::landmark::{LandmarkSet, Side};
use crate::core_modules::rep_counter::Stage;
use crate::core_modules::session_registry::{self, SessionRegistry, SessionSummary, StopOutcome};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Which check list to run on every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormChecks {
    /// Torso, bottom leg and raised leg.
    #[default]
    Strict,
    /// Torso and raised leg only.
    Basic,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown form check set '{0}', expected strict or basic")]
pub struct ParseFormChecksError(pub String);

impl FromStr for FormChecks {
    type Err = ParseFormChecksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(FormChecks::Strict),
            "basic" => Ok(FormChecks::Basic),
            other => Err(ParseFormChecksError(other.to_string())),
        }
    }
}

/// Configuration for the FramePipeline.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The leg being raised. The user lies on the other side.
    pub tracked_side: TrackedSide,
    pub form_checks: FormChecks,
}

/// Newtype so the default tracked side is the right leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackedSide(pub Side);

impl Default for TrackedSide {
    fn default() -> Self {
        TrackedSide(Side::Right)
    }
}

impl PipelineConfig {
    pub fn exercise(&self) -> ExerciseDefinition {
        match self.form_checks {
            FormChecks::Strict => ExerciseDefinition::side_leg_raise(self.tracked_side.0),
            FormChecks::Basic => ExerciseDefinition::side_leg_raise_basic(self.tracked_side.0),
        }
    }
}

/// Everything a display layer needs to render one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub user_id: String,
    pub repetition_count: u32,
    pub feedback: String,
    /// Whole seconds since start while active, zero otherwise.
    pub elapsed_seconds: u64,
    pub last_tracked_angle: f64,
    pub stage: Stage,
    pub is_active: bool,
    /// `None` when the detector found nobody in the frame.
    pub form: Option<FormResult>,
}

pub struct FramePipeline<C: Clock = SystemClock> {
    exercise: ExerciseDefinition,
    registry: SessionRegistry<C>,
}

impl FramePipeline<SystemClock> {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_clock(config.exercise(), SystemClock::default())
    }
}

impl<C: Clock> FramePipeline<C> {
    pub fn with_clock(exercise: ExerciseDefinition, clock: C) -> Self {
        Self {
            exercise,
            registry: SessionRegistry::with_clock(clock),
        }
    }

    pub fn exercise(&self) -> &ExerciseDefinition {
        &self.exercise
    }

    pub fn registry(&self) -> &SessionRegistry<C> {
        &self.registry
    }

    pub fn start(&self, user_id: &str) {
        self.registry.start(user_id);
    }

    pub fn stop(&self, user_id: &str) -> StopOutcome {
        self.registry.stop(user_id)
    }

    /// Stops the session only if `commit` (typically a history write)
    /// succeeds. See `SessionRegistry::stop_with`.
    pub fn stop_with<E>(
        &self,
        user_id: &str,
        commit: impl FnOnce(&SessionSummary) -> Result<(), E>,
    ) -> Result<StopOutcome, E> {
        self.registry.stop_with(user_id, commit)
    }

    /// Runs one frame for `user_id`. A frame without landmarks is passed
    /// through for display and leaves the session untouched.
    pub fn process_frame(&self, user_id: &str, landmarks: Option<&LandmarkSet>) -> FrameReport {
        let form = landmarks.map(|set| self.exercise.evaluate(set));

        let handle = self.registry.get_or_create(user_id);
        let mut state = session_registry::lock(&handle);
        let now = self.registry.now();
        state.last_touched = now;

        if let Some(form) = &form {
            state.advance(form, &self.exercise);
        }

        FrameReport {
            user_id: user_id.to_string(),
            repetition_count: state.repetition_count,
            feedback: state.feedback.clone(),
            elapsed_seconds: state.elapsed(now).as_secs(),
            last_tracked_angle: state.last_tracked_angle,
            stage: state.stage,
            is_active: state.is_active,
            form,
        }
    }

    /// Drops idle, inactive sessions. See `SessionRegistry::evict_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.registry.evict_idle(max_idle)
    }
}
