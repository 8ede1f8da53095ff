//! Maps sensor search results onto enrolled identities and drives the
//! template mutations (enroll, delete).

use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::sensor::{CharBuffer, FingerprintSensor, SearchHit, NO_MATCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateMatch {
    Found(u32),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled(u32),
    /// The first impression already matches the template at this position.
    Conflict(u32),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(u32),
    NotFound(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateUsage {
    pub used: u32,
    pub capacity: u32,
}

impl TemplateUsage {
    pub fn is_full(&self) -> bool {
        self.used >= self.capacity
    }
}

/// Interprets a raw search result. Only `NO_MATCH` means "unknown"; any
/// other negative position breaks the sensor contract.
pub fn interpret_search(hit: SearchHit) -> AppResult<TemplateMatch> {
    match hit.position {
        position if position >= 0 => Ok(TemplateMatch::Found(position as u32)),
        NO_MATCH => Ok(TemplateMatch::NotFound),
        other => Err(AppError::sensor_comm(
            "search",
            format!("sensor reported invalid position {other}"),
        )),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Converts the impression in the sensor's image buffer and searches the
    /// template bank with it. Never retries.
    pub fn resolve<S>(&self, sensor: &mut S) -> AppResult<TemplateMatch>
    where
        S: FingerprintSensor + ?Sized,
    {
        sensor.convert(CharBuffer::First)?;
        let hit = sensor.search()?;
        let resolved = interpret_search(hit)?;
        debug!(?resolved, accuracy = hit.accuracy, "identity resolved");
        Ok(resolved)
    }

    /// Enrolls the impression already in the image buffer. `represent` asks
    /// the operator for the same finger again and captures it; it returns
    /// `false` when the wait was interrupted.
    pub fn enroll<S, F>(&self, sensor: &mut S, represent: F) -> AppResult<EnrollOutcome>
    where
        S: FingerprintSensor + ?Sized,
        F: FnOnce(&mut S) -> AppResult<bool>,
    {
        if let TemplateMatch::Found(position) = self.resolve(sensor)? {
            info!(position, "finger already enrolled");
            return Ok(EnrollOutcome::Conflict(position));
        }

        if !represent(sensor)? {
            debug!("enrollment interrupted before second impression");
            return Ok(EnrollOutcome::Cancelled);
        }
        sensor.convert(CharBuffer::Second)?;
        if sensor.compare()? == 0 {
            return Err(AppError::TemplateMismatch);
        }

        let usage = self.usage(sensor)?;
        if usage.is_full() {
            return Err(AppError::StoreCapacity {
                capacity: usage.capacity,
            });
        }

        sensor.create_template()?;
        let position = sensor.store_template()?;
        info!(position, "finger enrolled");
        Ok(EnrollOutcome::Enrolled(position))
    }

    pub fn delete<S>(&self, sensor: &mut S, position: u32) -> AppResult<DeleteOutcome>
    where
        S: FingerprintSensor + ?Sized,
    {
        let capacity = sensor.storage_capacity()?;
        if position >= capacity {
            return Err(AppError::sensor_comm(
                "delete",
                format!("position {position} outside 0..{capacity}"),
            ));
        }
        if sensor.delete_template(position)? {
            info!(position, "template deleted");
            Ok(DeleteOutcome::Deleted(position))
        } else {
            Ok(DeleteOutcome::NotFound(position))
        }
    }

    pub fn usage<S>(&self, sensor: &mut S) -> AppResult<TemplateUsage>
    where
        S: FingerprintSensor + ?Sized,
    {
        Ok(TemplateUsage {
            used: sensor.template_count()?,
            capacity: sensor.storage_capacity()?,
        })
    }
}
