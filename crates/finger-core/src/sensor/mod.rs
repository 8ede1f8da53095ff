//! The fingerprint sensor collaborator.
//!
//! The trait mirrors the command set of the serial optical modules the kiosk
//! was built around: the module keeps one image buffer, two characteristic
//! buffers and a bank of numbered template slots. Every call is a discrete,
//! non-interruptible exchange; cancellation happens between calls.

pub mod matcher;
pub mod spool;
pub mod store;

use crate::capture::CapturedImage;
use crate::errors::AppResult;

pub use matcher::{Characteristic, EnrolledTemplate, TemplateBank};
pub use spool::{SpoolSensor, SpoolSensorConfig};
pub use store::{FileTemplateStore, TemplateStore};

/// Position reported by `search` when no template matches.
pub const NO_MATCH: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharBuffer {
    First,
    Second,
}

impl CharBuffer {
    pub fn index(self) -> usize {
        match self {
            CharBuffer::First => 0,
            CharBuffer::Second => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    pub position: i32,
    pub accuracy: u16,
}

impl SearchHit {
    pub fn at(position: u32, accuracy: u16) -> Self {
        Self {
            position: position as i32,
            accuracy,
        }
    }

    pub fn no_match() -> Self {
        Self {
            position: NO_MATCH,
            accuracy: 0,
        }
    }
}

pub trait FingerprintSensor {
    /// Opens the device and verifies the handshake. Called at the start of
    /// every operation.
    fn initialize(&mut self) -> AppResult<()>;

    /// Reads one image into the image buffer. `None` means no finger is on
    /// the sensor yet.
    fn capture(&mut self) -> AppResult<Option<CapturedImage>>;

    /// Converts the image buffer into the given characteristic buffer.
    fn convert(&mut self, buffer: CharBuffer) -> AppResult<()>;

    /// Searches the template bank with the first characteristic buffer.
    fn search(&mut self) -> AppResult<SearchHit>;

    /// Compares both characteristic buffers; zero means no match.
    fn compare(&mut self) -> AppResult<u16>;

    /// Combines both characteristic buffers into a template.
    fn create_template(&mut self) -> AppResult<()>;

    /// Stores the last created template and returns its position.
    fn store_template(&mut self) -> AppResult<u32>;

    fn delete_template(&mut self, position: u32) -> AppResult<bool>;

    fn template_count(&mut self) -> AppResult<u32>;

    fn storage_capacity(&mut self) -> AppResult<u32>;
}
