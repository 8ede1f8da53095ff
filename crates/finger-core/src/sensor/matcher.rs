use chrono::{SecondsFormat, Utc};
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::sensor::SearchHit;

pub const CHARACTERISTIC_SIDE: u32 = 32;
pub const MAX_SCORE: u16 = 255;

/// Downsampled, mean-centred and L2-normalised intensity map of one
/// impression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Characteristic(Vec<f64>);

impl Characteristic {
    pub fn from_image(image: &GrayImage) -> AppResult<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(AppError::sensor_comm("convert", "image buffer is empty"));
        }
        let small = imageops::resize(
            image,
            CHARACTERISTIC_SIDE,
            CHARACTERISTIC_SIDE,
            FilterType::Triangle,
        );
        let raw: Vec<f64> = small.pixels().map(|p| f64::from(p[0])).collect();
        Self::normalized(raw)
            .ok_or_else(|| AppError::sensor_comm("convert", "image contains no ridge detail"))
    }

    pub fn from_values(values: Vec<f64>) -> Option<Self> {
        Self::normalized(values)
    }

    fn normalized(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        for value in values.iter_mut() {
            *value -= mean;
        }
        let magnitude = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        if magnitude <= f64::EPSILON {
            return None;
        }
        for value in values.iter_mut() {
            *value /= magnitude;
        }
        Some(Self(values))
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Element-wise mean of two characteristics, renormalised.
    pub fn combine(&self, other: &Characteristic) -> Option<Characteristic> {
        if self.len() != other.len() {
            return None;
        }
        let merged = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(l, r)| (l + r) / 2.0)
            .collect();
        Self::normalized(merged)
    }
}

pub fn cosine_similarity(lhs: &[f64], rhs: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_lhs = 0.0;
    let mut norm_rhs = 0.0;

    for (l, r) in lhs.iter().zip(rhs.iter()) {
        dot += l * r;
        norm_lhs += l * l;
        norm_rhs += r * r;
    }

    let denominator = norm_lhs.sqrt() * norm_rhs.sqrt();
    if denominator <= f64::EPSILON {
        return 0.0;
    }
    dot / denominator
}

/// Maps a similarity onto the module's 0..=255 score scale. Anything below
/// `threshold` scores zero; the threshold itself scores one.
pub fn match_score(similarity: f64, threshold: f64) -> u16 {
    if similarity < threshold {
        return 0;
    }
    let headroom = (1.0 - threshold).max(f64::EPSILON);
    let scaled = ((similarity - threshold) / headroom).clamp(0.0, 1.0);
    1 + (scaled * f64::from(MAX_SCORE - 1)).round() as u16
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledTemplate {
    pub position: u32,
    pub characteristic: Characteristic,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct TemplateBank {
    slots: Vec<Option<EnrolledTemplate>>,
    threshold: f64,
}

impl TemplateBank {
    pub fn new(capacity: u32, threshold: f64) -> Self {
        Self {
            slots: vec![None; capacity as usize],
            threshold,
        }
    }

    pub fn from_templates(
        capacity: u32,
        threshold: f64,
        templates: Vec<EnrolledTemplate>,
    ) -> Result<Self, String> {
        let mut bank = Self::new(capacity, threshold);
        let mut expected_len = None;
        for template in templates {
            let position = template.position;
            let len = template.characteristic.len();
            if *expected_len.get_or_insert(len) != len {
                return Err(format!(
                    "template at position {position} has length {len}, expected {}",
                    expected_len.unwrap_or(len)
                ));
            }
            let slot = bank
                .slots
                .get_mut(position as usize)
                .ok_or_else(|| format!("template position {position} exceeds capacity {capacity}"))?;
            if slot.is_some() {
                return Err(format!("duplicate template position {position}"));
            }
            *slot = Some(template);
        }
        Ok(bank)
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn count(&self) -> u32 {
        self.slots.iter().filter(|slot| slot.is_some()).count() as u32
    }

    pub fn compare(&self, lhs: &Characteristic, rhs: &Characteristic) -> u16 {
        match_score(cosine_similarity(lhs.values(), rhs.values()), self.threshold)
    }

    /// Best-scoring template, or `SearchHit::no_match()`.
    pub fn search(&self, probe: &Characteristic) -> SearchHit {
        let mut best: Option<(u32, u16)> = None;
        for template in self.slots.iter().flatten() {
            let score = self.compare(probe, &template.characteristic);
            if score == 0 {
                continue;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((template.position, score));
            }
        }
        match best {
            Some((position, score)) => SearchHit::at(position, score),
            None => SearchHit::no_match(),
        }
    }

    /// Places the template in the first free slot.
    pub fn store(&mut self, characteristic: Characteristic) -> Option<u32> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())?;
        let position = index as u32;
        *slot = Some(EnrolledTemplate {
            position,
            characteristic,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        Some(position)
    }

    pub fn delete(&mut self, position: u32) -> bool {
        match self.slots.get_mut(position as usize) {
            Some(slot) => slot.take().is_some(),
            None => false,
        }
    }

    /// Puts a previously removed template back into its own slot.
    pub fn restore(&mut self, template: EnrolledTemplate) -> bool {
        match self.slots.get_mut(template.position as usize) {
            Some(slot) if slot.is_none() => {
                *slot = Some(template);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, position: u32) -> Option<&EnrolledTemplate> {
        self.slots.get(position as usize).and_then(Option::as_ref)
    }

    pub fn templates(&self) -> Vec<EnrolledTemplate> {
        self.slots.iter().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::NO_MATCH;
    use image::Luma;

    fn ridges(period: u32, phase: u32) -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| {
            if ((x + y + phase) / period) % 2 == 0 {
                Luma([220])
            } else {
                Luma([30])
            }
        })
    }

    #[test]
    fn blank_image_has_no_characteristic() {
        let blank = GrayImage::from_pixel(64, 64, Luma([128]));
        let err = Characteristic::from_image(&blank).unwrap_err();
        assert!(matches!(err, AppError::SensorComm { operation: "convert", .. }));
    }

    #[test]
    fn identical_impressions_score_maximum() {
        let lhs = Characteristic::from_image(&ridges(6, 0)).unwrap();
        let rhs = Characteristic::from_image(&ridges(6, 0)).unwrap();
        let bank = TemplateBank::new(4, 0.9);
        assert_eq!(bank.compare(&lhs, &rhs), MAX_SCORE);
    }

    #[test]
    fn different_impressions_score_zero() {
        let lhs = Characteristic::from_image(&ridges(6, 0)).unwrap();
        let rhs = Characteristic::from_image(&ridges(6, 6)).unwrap();
        let bank = TemplateBank::new(4, 0.9);
        assert_eq!(bank.compare(&lhs, &rhs), 0);
    }

    #[test]
    fn store_uses_first_free_slot_and_search_finds_it() {
        let mut bank = TemplateBank::new(3, 0.9);
        let first = Characteristic::from_image(&ridges(6, 0)).unwrap();
        let second = Characteristic::from_image(&ridges(6, 6)).unwrap();
        assert_eq!(bank.store(first.clone()), Some(0));
        assert_eq!(bank.store(second.clone()), Some(1));
        assert!(bank.delete(0));
        assert_eq!(bank.search(&first).position, NO_MATCH);
        assert_eq!(bank.search(&second).position, 1);
        assert_eq!(bank.store(first.clone()), Some(0));
        assert_eq!(bank.count(), 2);
    }

    #[test]
    fn full_bank_rejects_store() {
        let mut bank = TemplateBank::new(1, 0.9);
        let probe = Characteristic::from_image(&ridges(6, 0)).unwrap();
        assert_eq!(bank.store(probe.clone()), Some(0));
        assert_eq!(bank.store(probe), None);
    }

    #[test]
    fn from_templates_rejects_out_of_range_positions() {
        let template = EnrolledTemplate {
            position: 5,
            characteristic: Characteristic::from_values(vec![1.0, 0.0, 2.0]).unwrap(),
            created_at: "2024-01-01T00:00:00Z".into(),
        };
        let err = TemplateBank::from_templates(2, 0.9, vec![template]).unwrap_err();
        assert!(err.contains("exceeds capacity"));
    }

    #[test]
    fn match_score_is_monotonic_above_threshold() {
        assert_eq!(match_score(0.5, 0.9), 0);
        assert_eq!(match_score(0.9, 0.9), 1);
        assert!(match_score(0.95, 0.9) < match_score(0.99, 0.9));
        assert_eq!(match_score(1.0, 0.9), MAX_SCORE);
    }
}
