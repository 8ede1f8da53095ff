//! Software sensor: impressions arrive as image files dropped into a spool
//! directory, templates live in a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::capture::CapturedImage;
use crate::errors::{AppError, AppResult};
use crate::sensor::matcher::{Characteristic, TemplateBank};
use crate::sensor::store::{FileTemplateStore, TemplateStore};
use crate::sensor::{CharBuffer, FingerprintSensor, SearchHit};

const SPOOL_EXTENSIONS: [&str; 4] = ["png", "bmp", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct SpoolSensorConfig {
    pub spool_dir: PathBuf,
    pub capacity: u32,
    pub match_threshold: f64,
}

pub struct SpoolSensor<T = FileTemplateStore> {
    config: SpoolSensorConfig,
    store: T,
    bank: Option<TemplateBank>,
    image_buffer: Option<CapturedImage>,
    char_buffers: [Option<Characteristic>; 2],
    pending_template: Option<Characteristic>,
}

impl<T: TemplateStore> SpoolSensor<T> {
    pub fn new(config: SpoolSensorConfig, store: T) -> Self {
        Self {
            config,
            store,
            bank: None,
            image_buffer: None,
            char_buffers: [None, None],
            pending_template: None,
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.config.spool_dir
    }

    fn bank(&self) -> AppResult<&TemplateBank> {
        self.bank
            .as_ref()
            .ok_or_else(|| AppError::SensorInit("sensor not initialized".into()))
    }

    fn bank_mut(&mut self) -> AppResult<&mut TemplateBank> {
        self.bank
            .as_mut()
            .ok_or_else(|| AppError::SensorInit("sensor not initialized".into()))
    }

    fn char_buffer(&self, buffer: CharBuffer, operation: &'static str) -> AppResult<&Characteristic> {
        self.char_buffers[buffer.index()]
            .as_ref()
            .ok_or_else(|| AppError::sensor_comm(operation, format!("{buffer:?} buffer is empty")))
    }

    fn next_spooled_file(&self) -> AppResult<Option<PathBuf>> {
        let entries = fs::read_dir(&self.config.spool_dir)
            .map_err(|err| AppError::sensor_comm("capture", err.to_string()))?;
        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| AppError::sensor_comm("capture", err.to_string()))?;
            let path = entry.path();
            if path.is_file() && has_spool_extension(&path) {
                candidates.push(path);
            }
        }
        candidates.sort();
        Ok(candidates.into_iter().next())
    }

    fn persist_bank(&self) -> AppResult<()> {
        self.store.save(&self.bank()?.templates())
    }
}

fn has_spool_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SPOOL_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

impl<T: TemplateStore> FingerprintSensor for SpoolSensor<T> {
    fn initialize(&mut self) -> AppResult<()> {
        fs::create_dir_all(&self.config.spool_dir).map_err(|err| {
            AppError::SensorInit(format!(
                "spool {} unavailable: {err}",
                self.config.spool_dir.display()
            ))
        })?;
        let templates = self
            .store
            .load()
            .map_err(|err| AppError::SensorInit(err.to_string()))?;
        let bank = TemplateBank::from_templates(
            self.config.capacity,
            self.config.match_threshold,
            templates,
        )
        .map_err(AppError::SensorInit)?;
        debug!(
            target: "core.sensor",
            templates = bank.count(),
            capacity = bank.capacity(),
            "software sensor ready"
        );
        self.bank = Some(bank);
        self.image_buffer = None;
        self.char_buffers = [None, None];
        self.pending_template = None;
        Ok(())
    }

    fn capture(&mut self) -> AppResult<Option<CapturedImage>> {
        self.bank()?;
        let Some(path) = self.next_spooled_file()? else {
            return Ok(None);
        };
        let decoded = image::open(&path);
        fs::remove_file(&path).map_err(|err| AppError::sensor_comm("capture", err.to_string()))?;
        let image = decoded.map_err(|source| AppError::ImageDecode {
            path: path.clone(),
            source,
        })?;
        info!(target: "core.sensor", path = %path.display(), "impression read from spool");
        let captured = CapturedImage::new(image.to_luma8());
        self.image_buffer = Some(captured.clone());
        Ok(Some(captured))
    }

    fn convert(&mut self, buffer: CharBuffer) -> AppResult<()> {
        let image = self
            .image_buffer
            .as_ref()
            .ok_or_else(|| AppError::sensor_comm("convert", "no image in buffer"))?;
        let characteristic = Characteristic::from_image(image.image())?;
        self.char_buffers[buffer.index()] = Some(characteristic);
        Ok(())
    }

    fn search(&mut self) -> AppResult<SearchHit> {
        let probe = self.char_buffer(CharBuffer::First, "search")?;
        Ok(self.bank()?.search(probe))
    }

    fn compare(&mut self) -> AppResult<u16> {
        let first = self.char_buffer(CharBuffer::First, "compare")?;
        let second = self.char_buffer(CharBuffer::Second, "compare")?;
        Ok(self.bank()?.compare(first, second))
    }

    fn create_template(&mut self) -> AppResult<()> {
        let first = self.char_buffer(CharBuffer::First, "create")?;
        let second = self.char_buffer(CharBuffer::Second, "create")?;
        let combined = first
            .combine(second)
            .ok_or_else(|| AppError::sensor_comm("create", "characteristics cannot be combined"))?;
        self.pending_template = Some(combined);
        Ok(())
    }

    fn store_template(&mut self) -> AppResult<u32> {
        let template = self
            .pending_template
            .take()
            .ok_or_else(|| AppError::sensor_comm("store", "no template created"))?;
        let bank = self.bank_mut()?;
        let capacity = bank.capacity();
        let position = bank
            .store(template)
            .ok_or(AppError::StoreCapacity { capacity })?;
        if let Err(err) = self.persist_bank() {
            self.bank_mut()?.delete(position);
            return Err(err);
        }
        info!(target: "core.sensor", position, "template stored");
        Ok(position)
    }

    fn delete_template(&mut self, position: u32) -> AppResult<bool> {
        let bank = self.bank_mut()?;
        if position >= bank.capacity() {
            return Err(AppError::sensor_comm(
                "delete",
                format!("position {position} beyond capacity {}", bank.capacity()),
            ));
        }
        let Some(previous) = bank.get(position).cloned() else {
            return Ok(false);
        };
        bank.delete(position);
        if let Err(err) = self.persist_bank() {
            self.bank_mut()?.restore(previous);
            return Err(err);
        }
        info!(target: "core.sensor", position, "template deleted");
        Ok(true)
    }

    fn template_count(&mut self) -> AppResult<u32> {
        Ok(self.bank()?.count())
    }

    fn storage_capacity(&mut self) -> AppResult<u32> {
        Ok(self.bank()?.capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::NO_MATCH;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    fn ridges(period: u32, phase: u32) -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| {
            if ((x + 2 * y + phase) / period) % 2 == 0 {
                Luma([210])
            } else {
                Luma([40])
            }
        })
    }

    fn sensor_in(tmp: &TempDir, capacity: u32) -> SpoolSensor {
        let config = SpoolSensorConfig {
            spool_dir: tmp.path().join("spool"),
            capacity,
            match_threshold: 0.9,
        };
        SpoolSensor::new(config, FileTemplateStore::new(tmp.path().join("templates.json")))
    }

    fn spool(sensor: &SpoolSensor, name: &str, image: &GrayImage) {
        image.save(sensor.spool_dir().join(name)).unwrap();
    }

    fn capture_into(sensor: &mut SpoolSensor, buffer: CharBuffer) {
        assert!(sensor.capture().unwrap().is_some());
        sensor.convert(buffer).unwrap();
    }

    #[test]
    fn operations_require_initialization() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = sensor_in(&tmp, 4);
        assert!(matches!(sensor.capture(), Err(AppError::SensorInit(_))));
        assert!(matches!(sensor.template_count(), Err(AppError::SensorInit(_))));
    }

    #[test]
    fn empty_spool_is_pending() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = sensor_in(&tmp, 4);
        sensor.initialize().unwrap();
        assert!(sensor.capture().unwrap().is_none());
    }

    #[test]
    fn capture_consumes_files_in_name_order() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = sensor_in(&tmp, 4);
        sensor.initialize().unwrap();
        spool(&sensor, "b.png", &GrayImage::from_pixel(5, 5, Luma([2])));
        spool(&sensor, "a.png", &GrayImage::from_pixel(3, 3, Luma([1])));
        fs::write(sensor.spool_dir().join("notes.txt"), "ignored").unwrap();

        let first = sensor.capture().unwrap().unwrap();
        assert_eq!(first.dimensions(), (3, 3));
        let second = sensor.capture().unwrap().unwrap();
        assert_eq!(second.dimensions(), (5, 5));
        assert!(sensor.capture().unwrap().is_none());
        assert!(sensor.spool_dir().join("notes.txt").exists());
    }

    #[test]
    fn undecodable_file_is_removed_and_reported() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = sensor_in(&tmp, 4);
        sensor.initialize().unwrap();
        let bogus = sensor.spool_dir().join("bogus.png");
        fs::write(&bogus, "not an image").unwrap();

        let err = sensor.capture().unwrap_err();
        assert!(matches!(err, AppError::ImageDecode { .. }));
        assert!(!bogus.exists());
    }

    #[test]
    fn enrolled_template_survives_reinitialization() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = sensor_in(&tmp, 4);
        sensor.initialize().unwrap();
        spool(&sensor, "1.png", &ridges(8, 0));
        spool(&sensor, "2.png", &ridges(8, 0));
        capture_into(&mut sensor, CharBuffer::First);
        assert_eq!(sensor.search().unwrap().position, NO_MATCH);
        capture_into(&mut sensor, CharBuffer::Second);
        assert!(sensor.compare().unwrap() > 0);
        sensor.create_template().unwrap();
        assert_eq!(sensor.store_template().unwrap(), 0);

        sensor.initialize().unwrap();
        assert_eq!(sensor.template_count().unwrap(), 1);
        spool(&sensor, "3.png", &ridges(8, 0));
        capture_into(&mut sensor, CharBuffer::First);
        assert_eq!(sensor.search().unwrap().position, 0);
    }

    #[test]
    fn delete_reports_empty_slots_and_rejects_out_of_range() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = sensor_in(&tmp, 2);
        sensor.initialize().unwrap();
        assert!(!sensor.delete_template(1).unwrap());
        let err = sensor.delete_template(2).unwrap_err();
        assert!(matches!(err, AppError::SensorComm { operation: "delete", .. }));
    }

    #[test]
    fn full_store_reports_capacity() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = sensor_in(&tmp, 1);
        sensor.initialize().unwrap();
        for round in 0..2 {
            spool(&sensor, &format!("{round}-a.png"), &ridges(8, round * 8));
            spool(&sensor, &format!("{round}-b.png"), &ridges(8, round * 8));
            capture_into(&mut sensor, CharBuffer::First);
            capture_into(&mut sensor, CharBuffer::Second);
            sensor.create_template().unwrap();
            let stored = sensor.store_template();
            if round == 0 {
                assert_eq!(stored.unwrap(), 0);
            } else {
                assert!(matches!(stored, Err(AppError::StoreCapacity { capacity: 1 })));
            }
        }
    }
}
