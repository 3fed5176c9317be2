// THEORY:
// The `rep_counter` is the stateful heart of the engine. Where the form
// evaluator only ever sees a single frame, a `SessionState` remembers where the
// user is in the current repetition and how many they have completed.
//
// It is a two-state machine, `Down` and `Up`, with exactly one counted edge:
// `Down -> Up`. The rep thresholds of the exercise definition leave a
// hysteresis band between them; an angle inside that band never changes the
// stage, so a leg hovering near one threshold cannot rack up counts.
//
// Counting is gated twice: the session must be active, and the frame's form
// must be correct. A failing frame still updates the displayed angle and
// feedback but never the stage or the count.

use crate::core_modules::form_evaluator::{ExerciseDefinition, FormResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MSG_WAITING: &str = "Press START to begin";
pub const MSG_PAUSED: &str = "Paused";
pub const MSG_ADJUST_FORM: &str = "Adjust your form";
pub const MSG_READY: &str = "Ready to raise";
pub const MSG_REP_COUNTED: &str = "Rep counted!";
pub const MSG_LOWER_SLOWLY: &str = "Lower slowly";
pub const MSG_FORM_GOOD: &str = "Form Good";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Down,
    Up,
}

/// Per-user exercise state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub repetition_count: u32,
    pub stage: Stage,
    pub is_active: bool,
    /// Clock reading when the session was last started.
    pub start_timestamp: Option<Duration>,
    /// Last user-facing message.
    pub feedback: String,
    pub last_tracked_angle: f64,
    /// Clock reading of the last frame or control call, for idle eviction.
    pub last_touched: Duration,
}

impl SessionState {
    pub fn new(now: Duration) -> Self {
        Self {
            repetition_count: 0,
            stage: Stage::Down,
            is_active: false,
            start_timestamp: None,
            feedback: MSG_WAITING.to_string(),
            last_tracked_angle: 0.0,
            last_touched: now,
        }
    }

    /// Resets the counter and stage and starts counting.
    pub fn start(&mut self, now: Duration) {
        self.repetition_count = 0;
        self.stage = Stage::Down;
        self.is_active = true;
        self.start_timestamp = Some(now);
        self.last_touched = now;
    }

    /// Freezes counting. Returns the elapsed time since start, or `None` if
    /// the session was not active.
    pub fn stop(&mut self, now: Duration) -> Option<Duration> {
        if !self.is_active {
            return None;
        }
        self.is_active = false;
        self.last_touched = now;
        let started = self.start_timestamp.unwrap_or(now);
        Some(now.saturating_sub(started))
    }

    /// Elapsed time since start while active, zero otherwise.
    pub fn elapsed(&self, now: Duration) -> Duration {
        match (self.is_active, self.start_timestamp) {
            (true, Some(started)) => now.saturating_sub(started),
            _ => Duration::ZERO,
        }
    }

    /// Feeds one evaluated frame into the state machine and returns the new
    /// feedback message.
    pub fn advance(&mut self, form: &FormResult, exercise: &ExerciseDefinition) -> &str {
        if !self.is_active {
            self.feedback = MSG_PAUSED.to_string();
            return &self.feedback;
        }

        self.last_tracked_angle = form.primary_angle;

        if !form.is_correct {
            self.feedback = form
                .violations
                .first()
                .map(|reason| reason.message())
                .unwrap_or(MSG_ADJUST_FORM)
                .to_string();
            return &self.feedback;
        }

        let angle = form.primary_angle;
        let mut message = MSG_FORM_GOOD;

        if angle > exercise.rep_down_min() {
            self.stage = Stage::Down;
            message = MSG_READY;
        }
        if angle < exercise.rep_up_max() {
            match self.stage {
                Stage::Down => {
                    self.stage = Stage::Up;
                    self.repetition_count += 1;
                    tracing::debug!(count = self.repetition_count, angle, "repetition counted");
                    message = MSG_REP_COUNTED;
                }
                Stage::Up => message = MSG_LOWER_SLOWLY,
            }
        }

        self.feedback = message.to_string();
        &self.feedback
    }
}
