// THEORY:
// The `form_evaluator` turns one frame of landmarks into a verdict: is the user
// holding the exercise position correctly, and if not, why. It is also where the
// frame's primary signal (the tracked-leg angle) is extracted for the rep counter.
//
// Key architectural principles:
// 1.  **Checks Are Data**: an `ExerciseDefinition` is an ordered list of
//     `FormCheck`s (which angle, which bound, which reason to report) plus the
//     rep thresholds. The strict three-check and basic two-check side leg raise
//     share the same evaluation code.
// 2.  **No Short-Circuit**: every check runs on every frame, so the verdict
//     carries every violation, in definition order. The first one is what the
//     user sees.
// 3.  **Primary Angle Always**: the tracked angle is reported even when form is
//     wrong; the rep counter decides what to do with it.

use crate::core_modules::angle::angle;
use crate::core_modules::landmark::{Joint, LandmarkSet, Side};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum torso angle (at the supporting hip) for the body to count as lying straight.
pub const TORSO_MIN_DEGREES: f64 = 20.0;
/// Maximum supporting-knee angle for the bottom leg to count as folded.
pub const OPPOSITE_LEG_FOLD_MAX_DEGREES: f64 = 120.0;
/// Minimum tracked-knee angle for the raised leg to count as straight.
pub const TRACKED_LEG_STRAIGHT_MIN_DEGREES: f64 = 100.0;
/// Tracked angle below which the leg counts as raised.
pub const REP_UP_MAX_DEGREES: f64 = 140.0;
/// Tracked angle above which the leg counts as lowered.
pub const REP_DOWN_MIN_DEGREES: f64 = 165.0;

/// Why a frame failed a form check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackReason {
    TorsoNotStraight,
    OppositeLegNotFolded,
    TrackedLegNotStraight,
}

impl FeedbackReason {
    pub fn message(self) -> &'static str {
        match self {
            FeedbackReason::TorsoNotStraight => "Lie straighter!",
            FeedbackReason::OppositeLegNotFolded => "Fold your bottom leg!",
            FeedbackReason::TrackedLegNotStraight => "Keep leg straight!",
        }
    }
}

/// Three joints whose angle is measured at `vertex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointTriple {
    pub first: Joint,
    pub vertex: Joint,
    pub last: Joint,
}

impl JointTriple {
    pub const fn new(first: Joint, vertex: Joint, last: Joint) -> Self {
        Self { first, vertex, last }
    }

    pub fn measure(&self, landmarks: &LandmarkSet) -> f64 {
        angle(
            landmarks.get(self.first),
            landmarks.get(self.vertex),
            landmarks.get(self.last),
        )
    }
}

/// The bound an angle has to respect for a check to pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "degrees", rename_all = "snake_case")]
pub enum Threshold {
    /// Fails when the angle is below the bound.
    AtLeast(f64),
    /// Fails when the angle is above the bound.
    AtMost(f64),
}

impl Threshold {
    pub fn passes(self, degrees: f64) -> bool {
        match self {
            Threshold::AtLeast(min) => degrees >= min,
            Threshold::AtMost(max) => degrees <= max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormCheck {
    pub reason: FeedbackReason,
    pub angle: JointTriple,
    pub rule: Threshold,
}

/// Outcome of evaluating one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormResult {
    pub is_correct: bool,
    /// Failed checks in definition order.
    pub violations: Vec<FeedbackReason>,
    /// The tracked-leg angle, reported regardless of violations.
    pub primary_angle: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("rep thresholds leave no hysteresis band: up {up} must be below down {down}")]
    InvalidThresholds { up: f64, down: f64 },
}

/// A complete description of an angle-threshold exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseDefinition {
    /// Checks applied in order on every frame.
    checks: Vec<FormCheck>,
    /// The angle the rep counter follows.
    primary: JointTriple,
    rep_up_max: f64,
    rep_down_min: f64,
}

impl ExerciseDefinition {
    pub fn new(
        checks: Vec<FormCheck>,
        primary: JointTriple,
        rep_up_max: f64,
        rep_down_min: f64,
    ) -> Result<Self, DefinitionError> {
        if !(rep_up_max < rep_down_min) {
            return Err(DefinitionError::InvalidThresholds {
                up: rep_up_max,
                down: rep_down_min,
            });
        }
        Ok(Self {
            checks,
            primary,
            rep_up_max,
            rep_down_min,
        })
    }

    /// Side leg raise lying on the side opposite `tracked`: torso straight,
    /// bottom leg folded, raised leg straight.
    pub fn side_leg_raise(tracked: Side) -> Self {
        let support = tracked.opposite();
        Self {
            checks: vec![
                Self::torso_check(tracked),
                FormCheck {
                    reason: FeedbackReason::OppositeLegNotFolded,
                    angle: Self::leg(support),
                    rule: Threshold::AtMost(OPPOSITE_LEG_FOLD_MAX_DEGREES),
                },
                Self::tracked_leg_check(tracked),
            ],
            primary: Self::leg(tracked),
            rep_up_max: REP_UP_MAX_DEGREES,
            rep_down_min: REP_DOWN_MIN_DEGREES,
        }
    }

    /// The two-check variant: torso straight and raised leg straight, bottom
    /// leg unconstrained.
    pub fn side_leg_raise_basic(tracked: Side) -> Self {
        Self {
            checks: vec![Self::torso_check(tracked), Self::tracked_leg_check(tracked)],
            primary: Self::leg(tracked),
            rep_up_max: REP_UP_MAX_DEGREES,
            rep_down_min: REP_DOWN_MIN_DEGREES,
        }
    }

    fn leg(side: Side) -> JointTriple {
        JointTriple::new(Joint::hip(side), Joint::knee(side), Joint::ankle(side))
    }

    fn torso_check(tracked: Side) -> FormCheck {
        let support = tracked.opposite();
        FormCheck {
            reason: FeedbackReason::TorsoNotStraight,
            angle: JointTriple::new(Joint::shoulder(support), Joint::hip(support), Joint::hip(tracked)),
            rule: Threshold::AtLeast(TORSO_MIN_DEGREES),
        }
    }

    fn tracked_leg_check(tracked: Side) -> FormCheck {
        FormCheck {
            reason: FeedbackReason::TrackedLegNotStraight,
            angle: Self::leg(tracked),
            rule: Threshold::AtLeast(TRACKED_LEG_STRAIGHT_MIN_DEGREES),
        }
    }

    pub fn checks(&self) -> &[FormCheck] {
        &self.checks
    }

    pub fn rep_up_max(&self) -> f64 {
        self.rep_up_max
    }

    pub fn rep_down_min(&self) -> f64 {
        self.rep_down_min
    }

    pub fn evaluate(&self, landmarks: &LandmarkSet) -> FormResult {
        let violations: Vec<FeedbackReason> = self
            .checks
            .iter()
            .filter(|check| !check.rule.passes(check.angle.measure(landmarks)))
            .map(|check| check.reason)
            .collect();

        FormResult {
            is_correct: violations.is_empty(),
            violations,
            primary_angle: self.primary.measure(landmarks),
        }
    }
}

impl Default for ExerciseDefinition {
    fn default() -> Self {
        Self::side_leg_raise(Side::Right)
    }
}
