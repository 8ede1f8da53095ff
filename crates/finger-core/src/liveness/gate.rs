use std::sync::Arc;

use tracing::{trace, warn};

use crate::capture::CapturedImage;
use crate::errors::AppResult;
use crate::liveness::{Classify, LivenessVerdict};

/// Liveness policy applied to every impression before it is matched.
#[derive(Clone)]
pub struct LivenessGate {
    classifier: Arc<dyn Classify>,
}

impl LivenessGate {
    pub fn new(classifier: Arc<dyn Classify>) -> Self {
        Self { classifier }
    }

    /// Returns `Live` without touching the classifier when the check is off.
    pub fn classify(&self, image: &CapturedImage, enabled: bool) -> AppResult<LivenessVerdict> {
        if !enabled {
            trace!("spoof check disabled; treating impression as live");
            return Ok(LivenessVerdict::Live);
        }
        let verdict = self.classifier.predict(image)?;
        if verdict == LivenessVerdict::Fake {
            warn!(captured_at = %image.captured_at(), "impression classified as spoof");
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        verdict: LivenessVerdict,
        calls: AtomicUsize,
    }

    impl Classify for Counting {
        fn predict(&self, _image: &CapturedImage) -> AppResult<LivenessVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }
    }

    fn image() -> CapturedImage {
        CapturedImage::new(GrayImage::from_pixel(4, 4, Luma([1])))
    }

    #[test]
    fn disabled_gate_never_consults_classifier() {
        let classifier = Arc::new(Counting {
            verdict: LivenessVerdict::Fake,
            calls: AtomicUsize::new(0),
        });
        let gate = LivenessGate::new(classifier.clone());
        for _ in 0..3 {
            assert_eq!(gate.classify(&image(), false).unwrap(), LivenessVerdict::Live);
        }
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn enabled_gate_returns_classifier_verdict() {
        let classifier = Arc::new(Counting {
            verdict: LivenessVerdict::Fake,
            calls: AtomicUsize::new(0),
        });
        let gate = LivenessGate::new(classifier.clone());
        let input = image();
        assert_eq!(gate.classify(&input, true).unwrap(), LivenessVerdict::Fake);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(input.image().get_pixel(0, 0), &Luma([1]));
    }
}
