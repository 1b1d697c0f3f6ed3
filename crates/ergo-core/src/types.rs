//! Fundamental types shared by every ergoflow crate.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::ImagePoint;
use crate::pose::Pose;

/// Identifier of one engine instance (one analysed session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper with nanosecond precision.
///
/// The clock is supplied by the host (video position or capture time), so
/// values are only compared with each other, never with wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_nanos_opt().unwrap_or(0))
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000_000.0).round() as i64)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Seconds elapsed since `earlier` (negative if `earlier` is in the future)
    pub fn secs_since(&self, earlier: Timestamp) -> f64 {
        (self.0 - earlier.0) as f64 / 1_000_000_000.0
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a work state, authored by the host
    StateId
);
string_id!(
    /// Identifier of a condition rule, unique within its transition
    RuleId
);
string_id!(
    /// Identifier of a transition between two states
    TransitionId
);

/// Axis-aligned rectangle in normalized image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle with no area cannot contain anything
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Edge-inclusive point containment
    pub fn contains(&self, point: ImagePoint) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    /// Whether `other` lies completely inside this rectangle
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }

    pub fn center(&self) -> ImagePoint {
        ImagePoint::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Object detection produced by an external detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label
    #[serde(rename = "class")]
    pub class_name: String,
    /// Bounding box `[x, y, w, h]`, normalized
    pub bbox: [f64; 4],
    pub confidence: f64,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, bbox: [f64; 4], confidence: f64) -> Self {
        Self {
            class_name: class_name.into(),
            bbox,
            confidence,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.bbox[0], self.bbox[1], self.bbox[2], self.bbox[3])
    }

    pub fn center(&self) -> ImagePoint {
        self.rect().center()
    }

    pub fn is_class(&self, class_name: &str) -> bool {
        self.class_name.eq_ignore_ascii_case(class_name)
    }
}

/// Single-label output of an image classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub class_name: String,
    pub probability: f64,
}

/// Last known output of one external model, refreshed asynchronously by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassifierOutput {
    Label(Classification),
    Detections(Vec<Detection>),
}

impl ClassifierOutput {
    /// Best confidence reported for `class_name`, if the class is present at all
    pub fn confidence_for(&self, class_name: &str) -> Option<f64> {
        match self {
            ClassifierOutput::Label(label) => label
                .class_name
                .eq_ignore_ascii_case(class_name)
                .then_some(label.probability),
            ClassifierOutput::Detections(detections) => detections
                .iter()
                .filter(|d| d.is_class(class_name))
                .map(|d| d.confidence)
                .fold(None, |best, c| Some(best.map_or(c, |b: f64| b.max(c)))),
        }
    }
}

/// Named global zones, keyed by zone name
pub type ZoneMap = BTreeMap<String, Rect>;

/// Robot telemetry axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotAxis {
    Angle,
    X,
    Y,
    Z,
    Roll,
    Pitch,
    Yaw,
    Rx,
    Ry,
    Rz,
}

/// Raw robot joint telemetry: joint name → axis → value
pub type RobotTelemetry = BTreeMap<String, BTreeMap<RobotAxis, f64>>;

/// Pose of another tracked operator in the same frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorPose {
    pub operator_id: String,
    pub pose: Pose,
}

/// Everything the host observed for one frame besides the angle maps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Observation {
    /// Keypoints of the analysed operator
    pub pose: Option<Pose>,
    pub detections: Vec<Detection>,
    pub other_operators: Vec<OperatorPose>,
    /// External classifier / detector outputs keyed by model id
    pub external: BTreeMap<String, ClassifierOutput>,
    pub robot_joints: RobotTelemetry,
}
