//! Presentation-attack detection for captured impressions.

pub mod classifier;
pub mod gate;
pub mod preprocess;

use crate::capture::CapturedImage;
use crate::errors::AppResult;

pub use classifier::{ImageClassifier, LivenessModel, ResNet18};
pub use gate::LivenessGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    Live,
    Fake,
}

impl LivenessVerdict {
    /// Class index order of the trained head: 0 is fake, 1 is live.
    pub fn from_class(index: usize) -> Self {
        if index == 1 {
            LivenessVerdict::Live
        } else {
            LivenessVerdict::Fake
        }
    }
}

pub trait Classify: Send + Sync {
    fn predict(&self, image: &CapturedImage) -> AppResult<LivenessVerdict>;
}
