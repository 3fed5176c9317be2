// THEORY:
// The `landmark` module is the boundary between the external pose detector and
// the rest of the engine. The detector hands us a flat, positional list of
// normalized 2D coordinates for a single subject. Everything downstream reads
// that list through the `Joint` enum instead of bare numeric indices, so a
// reordering of the detector's layout only ever touches `Joint::index`.
//
// Key architectural principles:
// 1.  **Named Access**: `LandmarkSet::get` takes a `Joint`, never a `usize`.
// 2.  **Validate Once**: a `LandmarkSet` can only be built from a list long
//     enough to hold every joint we read, so `get` is infallible afterwards.
// 3.  **Dumb Data**: like the detector output it wraps, a `LandmarkSet` is
//     immutable for the lifetime of a frame. No smoothing, no history.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A normalized image-space coordinate. Origin is the top-left corner, both
/// axes run from 0.0 to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point2D {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

/// Body side. The tracked leg lives on one side, the supporting leg on the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown side '{0}', expected left or right")]
pub struct ParseSideError(pub String);

impl FromStr for Side {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(ParseSideError(other.to_string())),
        }
    }
}

/// The anatomical landmarks the engine reads, keyed to the detector's
/// 33-point pose layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl Joint {
    pub const ALL: [Joint; 8] = [
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
    ];

    /// Position of this joint in the detector's landmark list.
    pub const fn index(self) -> usize {
        match self {
            Joint::LeftShoulder => 11,
            Joint::RightShoulder => 12,
            Joint::LeftHip => 23,
            Joint::RightHip => 24,
            Joint::LeftKnee => 25,
            Joint::RightKnee => 26,
            Joint::LeftAnkle => 27,
            Joint::RightAnkle => 28,
        }
    }

    pub const fn shoulder(side: Side) -> Self {
        match side {
            Side::Left => Joint::LeftShoulder,
            Side::Right => Joint::RightShoulder,
        }
    }

    pub const fn hip(side: Side) -> Self {
        match side {
            Side::Left => Joint::LeftHip,
            Side::Right => Joint::RightHip,
        }
    }

    pub const fn knee(side: Side) -> Self {
        match side {
            Side::Left => Joint::LeftKnee,
            Side::Right => Joint::RightKnee,
        }
    }

    pub const fn ankle(side: Side) -> Self {
        match side {
            Side::Left => Joint::LeftAnkle,
            Side::Right => Joint::RightAnkle,
        }
    }
}

/// Number of points a landmark list needs so every `Joint` is addressable.
pub const REQUIRED_LANDMARKS: usize = Joint::RightAnkle.index() + 1;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LandmarkError {
    #[error("incomplete landmark set: expected at least {expected} points, got {actual}")]
    IncompleteLandmarks { expected: usize, actual: usize },
}

/// One frame's worth of detector output for a single subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandmarkSet {
    points: Vec<Point2D>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point2D>) -> Result<Self, LandmarkError> {
        if points.len() < REQUIRED_LANDMARKS {
            return Err(LandmarkError::IncompleteLandmarks {
                expected: REQUIRED_LANDMARKS,
                actual: points.len(),
            });
        }
        Ok(Self { points })
    }

    /// Builds a full-size set from just the joints the engine reads. Unnamed
    /// slots are filled with the origin.
    pub fn from_joints<I>(joints: I) -> Self
    where
        I: IntoIterator<Item = (Joint, Point2D)>,
    {
        let mut points = vec![Point2D::default(); REQUIRED_LANDMARKS];
        for (joint, point) in joints {
            points[joint.index()] = point;
        }
        Self { points }
    }

    pub fn get(&self, joint: Joint) -> Point2D {
        self.points[joint.index()]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl TryFrom<Vec<[f64; 2]>> for LandmarkSet {
    type Error = LandmarkError;

    fn try_from(raw: Vec<[f64; 2]>) -> Result<Self, Self::Error> {
        Self::new(raw.into_iter().map(Point2D::from).collect())
    }
}

impl<'de> Deserialize<'de> for LandmarkSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            points: Vec<Point2D>,
        }
        let raw = Raw::deserialize(deserializer)?;
        LandmarkSet::new(raw.points).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lists_are_rejected() {
        let err = LandmarkSet::new(vec![Point2D::default(); 12]).unwrap_err();
        assert_eq!(
            err,
            LandmarkError::IncompleteLandmarks { expected: 29, actual: 12 }
        );
    }

    #[test]
    fn full_detector_layout_is_accepted() {
        let mut points = vec![Point2D::default(); 33];
        points[26] = Point2D::new(0.4, 0.6);
        let set = LandmarkSet::new(points).expect("33 points is a full pose");
        assert_eq!(set.len(), 33);
        assert_eq!(set.get(Joint::RightKnee), Point2D::new(0.4, 0.6));
    }

    #[test]
    fn joints_resolve_by_side() {
        assert_eq!(Joint::hip(Side::Left), Joint::LeftHip);
        assert_eq!(Joint::knee(Side::Right.opposite()), Joint::LeftKnee);
        assert_eq!(Joint::ankle(Side::Right).index(), 28);
        assert_eq!(Joint::shoulder(Side::Left).index(), 11);
    }

    #[test]
    fn sides_parse_from_config_text() {
        assert_eq!(" Left ".parse::<Side>(), Ok(Side::Left));
        assert_eq!("right".parse::<Side>(), Ok(Side::Right));
        assert_eq!(
            "sideways".parse::<Side>(),
            Err(ParseSideError("sideways".to_string()))
        );
    }

    #[test]
    fn from_joints_places_points_at_detector_indices() {
        let set = LandmarkSet::from_joints([(Joint::LeftAnkle, Point2D::new(0.1, 0.9))]);
        assert_eq!(set.len(), REQUIRED_LANDMARKS);
        assert_eq!(set.get(Joint::LeftAnkle), Point2D::new(0.1, 0.9));
        assert_eq!(set.get(Joint::RightAnkle), Point2D::default());
    }

    #[test]
    fn deserialization_validates_length() {
        let short = r#"{"points":[{"x":0.0,"y":0.0}]}"#;
        assert!(serde_json::from_str::<LandmarkSet>(short).is_err());
    }
}
