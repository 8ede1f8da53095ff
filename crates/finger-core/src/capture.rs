use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use tracing::{debug, trace};

use crate::errors::{AppError, AppResult};
use crate::sensor::FingerprintSensor;

/// One finger impression as read from the sensor's image buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    image: GrayImage,
    captured_at: DateTime<Utc>,
}

impl CapturedImage {
    pub fn new(image: GrayImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn to_rgb(&self) -> RgbImage {
        DynamicImage::ImageLuma8(self.image.clone()).to_rgb8()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CapturePolicy {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl CapturePolicy {
    pub fn unbounded(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            timeout: None,
        }
    }
}

/// Polls the sensor until a finger is read. `interrupted` is checked
/// between reads, never during one; `Ok(None)` means it fired.
pub fn wait_for_capture<S, F>(
    sensor: &mut S,
    policy: &CapturePolicy,
    mut interrupted: F,
) -> AppResult<Option<CapturedImage>>
where
    S: FingerprintSensor + ?Sized,
    F: FnMut() -> bool,
{
    let started = Instant::now();
    let mut attempts: u64 = 0;
    loop {
        if interrupted() {
            debug!(attempts, "capture wait interrupted");
            return Ok(None);
        }
        attempts += 1;
        if let Some(image) = sensor.capture()? {
            let (width, height) = image.dimensions();
            debug!(attempts, width, height, "finger captured");
            return Ok(Some(image));
        }
        if let Some(timeout) = policy.timeout {
            if started.elapsed() >= timeout {
                return Err(AppError::CaptureTimeout {
                    secs: timeout.as_secs(),
                });
            }
        }
        trace!(attempts, "no finger yet");
        thread::sleep(policy.poll_interval);
    }
}

/// Writes every searched impression to a timestamped PNG for later review.
#[derive(Debug, Clone)]
pub struct CaptureAudit {
    dir: PathBuf,
}

impl CaptureAudit {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, image: &CapturedImage) -> PathBuf {
        let timestamp = image.captured_at().format("%Y%m%dT%H%M%S%.3fZ");
        self.dir.join(format!("fingerprint-{timestamp}.png"))
    }

    pub fn persist(&self, image: &CapturedImage) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|err| AppError::CaptureWrite {
            path: self.dir.clone(),
            message: err.to_string(),
        })?;
        let path = self.path_for(image);
        image
            .image()
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|err| AppError::CaptureWrite {
                path: path.clone(),
                message: err.to_string(),
            })?;
        debug!(path = %path.display(), "captured image archived");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{CharBuffer, SearchHit};
    use image::Luma;
    use tempfile::TempDir;

    struct CountdownSensor {
        pending_reads: u32,
        reads: u32,
    }

    impl FingerprintSensor for CountdownSensor {
        fn initialize(&mut self) -> AppResult<()> {
            Ok(())
        }

        fn capture(&mut self) -> AppResult<Option<CapturedImage>> {
            self.reads += 1;
            if self.pending_reads == 0 {
                return Ok(Some(CapturedImage::new(GrayImage::from_pixel(
                    4,
                    4,
                    Luma([9]),
                ))));
            }
            self.pending_reads -= 1;
            Ok(None)
        }

        fn convert(&mut self, _buffer: CharBuffer) -> AppResult<()> {
            unreachable!()
        }

        fn search(&mut self) -> AppResult<SearchHit> {
            unreachable!()
        }

        fn compare(&mut self) -> AppResult<u16> {
            unreachable!()
        }

        fn create_template(&mut self) -> AppResult<()> {
            unreachable!()
        }

        fn store_template(&mut self) -> AppResult<u32> {
            unreachable!()
        }

        fn delete_template(&mut self, _position: u32) -> AppResult<bool> {
            unreachable!()
        }

        fn template_count(&mut self) -> AppResult<u32> {
            unreachable!()
        }

        fn storage_capacity(&mut self) -> AppResult<u32> {
            unreachable!()
        }
    }

    fn fast_policy(timeout: Option<Duration>) -> CapturePolicy {
        CapturePolicy {
            poll_interval: Duration::from_millis(1),
            timeout,
        }
    }

    #[test]
    fn waits_until_finger_present() {
        let mut sensor = CountdownSensor {
            pending_reads: 3,
            reads: 0,
        };
        let image = wait_for_capture(&mut sensor, &fast_policy(None), || false).unwrap();
        assert!(image.is_some());
        assert_eq!(sensor.reads, 4);
    }

    #[test]
    fn interruption_stops_before_next_read() {
        let mut sensor = CountdownSensor {
            pending_reads: u32::MAX,
            reads: 0,
        };
        let mut checks = 0;
        let image = wait_for_capture(&mut sensor, &fast_policy(None), || {
            checks += 1;
            checks > 2
        })
        .unwrap();
        assert!(image.is_none());
        assert_eq!(sensor.reads, 2);
    }

    #[test]
    fn timeout_is_reported() {
        let mut sensor = CountdownSensor {
            pending_reads: u32::MAX,
            reads: 0,
        };
        let err = wait_for_capture(
            &mut sensor,
            &fast_policy(Some(Duration::from_millis(5))),
            || false,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::CaptureTimeout { .. }));
    }

    #[test]
    fn audit_writes_timestamped_png() {
        let tmp = TempDir::new().unwrap();
        let audit = CaptureAudit::new(tmp.path().join("audit"));
        let image = CapturedImage::new(GrayImage::from_pixel(8, 8, Luma([200])));

        let path = audit.persist(&image).unwrap();
        assert!(path.starts_with(audit.dir()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("fingerprint-"));
        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("png"));

        let reloaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(&reloaded, image.image());
    }
}
