//! Motion sequence buffering and Dynamic Time Warping.
//!
//! ## Buffer
//!
//! The engine keeps a bounded ring of per-frame snapshots (about one minute
//! at 30 fps). A [`MotionTemplate`] is copied out of it between two marks
//! and later compared against the trailing window of the live buffer.
//!
//! ## Matching
//!
//! DTW runs inside a Sakoe-Chiba band and its accumulated cost is
//! normalised by `n + m`, giving a distance in roughly `0..1`.

use std::collections::VecDeque;

use ergo_core::{AngleMap, Error, NormalizedPose, Pose, Result, Timestamp};
use serde::{Deserialize, Serialize};

/// Default ring capacity (60 s at 30 fps)
pub const DEFAULT_CAPACITY: usize = 1800;

/// Default band half-width as a fraction of the longer sequence
pub const DEFAULT_BAND: f64 = 0.2;

/// One buffered frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub timestamp: Timestamp,
    pub angles: AngleMap,
    #[serde(default)]
    pub pose: Option<Pose>,
}

impl FrameSnapshot {
    pub fn new(timestamp: Timestamp, angles: AngleMap, pose: Option<Pose>) -> Self {
        Self {
            timestamp,
            angles,
            pose,
        }
    }
}

/// Bounded ring buffer; the oldest frame is evicted first
#[derive(Debug, Clone)]
pub struct SequenceBuffer {
    frames: VecDeque<FrameSnapshot>,
    capacity: usize,
}

impl SequenceBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: FrameSnapshot) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSnapshot> {
        self.frames.iter()
    }

    /// The last `len` frames in chronological order, or `None` if fewer are buffered
    pub fn tail(&self, len: usize) -> Option<Vec<&FrameSnapshot>> {
        if len > self.frames.len() {
            return None;
        }
        Some(self.frames.iter().skip(self.frames.len() - len).collect())
    }

    /// Copy the frames with `start <= t <= end` into a template
    pub fn capture(&self, name: impl Into<String>, start: Timestamp, end: Timestamp) -> Result<MotionTemplate> {
        let frames: Vec<FrameSnapshot> = self
            .frames
            .iter()
            .filter(|f| f.timestamp >= start && f.timestamp <= end)
            .cloned()
            .collect();
        if frames.is_empty() {
            return Err(Error::InsufficientData {
                required: 1,
                available: 0,
            });
        }
        Ok(MotionTemplate {
            name: name.into(),
            frames,
        })
    }
}

impl Default for SequenceBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Captured reference motion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionTemplate {
    pub name: String,
    pub frames: Vec<FrameSnapshot>,
}

impl MotionTemplate {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => last.timestamp.secs_since(first.timestamp),
            _ => 0.0,
        }
    }
}

/// Frame prepared for repeated comparison
struct Prepared<'a> {
    pose: Option<NormalizedPose>,
    angles: &'a AngleMap,
}

impl<'a> Prepared<'a> {
    fn new(frame: &'a FrameSnapshot) -> Self {
        Self {
            pose: frame.pose.as_ref().and_then(Pose::normalized),
            angles: &frame.angles,
        }
    }

    /// Body-normalised keypoint distance, else mean angle difference / 180, else 1
    fn distance(&self, other: &Prepared<'_>) -> f64 {
        if let (Some(a), Some(b)) = (&self.pose, &other.pose) {
            if let Some(d) = a.mean_distance(b) {
                return d;
            }
        }
        self.angles
            .mean_abs_difference(other.angles)
            .map_or(1.0, |d| d / 180.0)
    }
}

/// Distance between two snapshots
pub fn frame_distance(a: &FrameSnapshot, b: &FrameSnapshot) -> f64 {
    Prepared::new(a).distance(&Prepared::new(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DtwResult {
    pub distance: f64,
    /// `distance / (n + m)`
    pub normalized: f64,
}

impl DtwResult {
    fn unmatched() -> Self {
        Self {
            distance: f64::INFINITY,
            normalized: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DtwMatcher {
    band: f64,
}

impl DtwMatcher {
    pub fn new(band: f64) -> Self {
        Self {
            band: band.clamp(0.0, 1.0),
        }
    }

    pub fn band(&self) -> f64 {
        self.band
    }

    pub fn compute<'a, A, B>(&self, a: A, b: B) -> DtwResult
    where
        A: IntoIterator<Item = &'a FrameSnapshot>,
        B: IntoIterator<Item = &'a FrameSnapshot>,
    {
        let a: Vec<Prepared<'a>> = a.into_iter().map(Prepared::new).collect();
        let b: Vec<Prepared<'a>> = b.into_iter().map(Prepared::new).collect();
        let (n, m) = (a.len(), b.len());
        if n == 0 || m == 0 {
            return DtwResult::unmatched();
        }

        let window = n
            .abs_diff(m)
            .max((self.band * n.max(m) as f64).floor() as usize);

        // Two rolling rows of the (n+1) x (m+1) cost matrix
        let mut previous = vec![f64::INFINITY; m + 1];
        let mut current = vec![f64::INFINITY; m + 1];
        previous[0] = 0.0;

        for (i, frame_a) in a.iter().enumerate() {
            let row = i + 1;
            current.fill(f64::INFINITY);
            let lo = row.saturating_sub(window).max(1);
            let hi = (row + window).min(m);
            for j in lo..=hi {
                let cost = frame_a.distance(&b[j - 1]);
                let best = previous[j].min(current[j - 1]).min(previous[j - 1]);
                current[j] = cost + best;
            }
            std::mem::swap(&mut previous, &mut current);
        }

        let distance = previous[m];
        if !distance.is_finite() {
            return DtwResult::unmatched();
        }
        DtwResult {
            distance,
            normalized: distance / (n + m) as f64,
        }
    }
}

impl Default for DtwMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BAND)
    }
}
