mod motion;

pub use motion::FrameDeltaClassifier;

use crate::error::ClassifierError;
use crate::frame::Frame;
use serde::{Deserialize, Serialize};

/// A rectangular region of a frame flagged as changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Per-frame activity measurement produced by a classifier.
///
/// The score is an area in native-resolution pixels; the recording
/// controller compares it against the configured threshold and ignores
/// everything else about how it was computed.
#[derive(Debug, Clone, Default)]
pub struct ActivitySignal {
    pub score: f64,
    pub regions: Vec<Region>,
}

impl ActivitySignal {
    pub fn quiet() -> Self {
        Self::default()
    }
}

/// Produces an activity signal for each frame of the ingestion loop.
///
/// Implementations may keep internal state (background models, frame
/// history); the trait is `&mut self` for that reason. Classification
/// runs inline on the ingestion loop, so implementations should stay
/// cheap per frame.
pub trait ActivityClassifier: Send {
    fn classify(&mut self, frame: &Frame) -> Result<ActivitySignal, ClassifierError>;
}
