use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use image::ImageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("sensor initialization failed: {0}")]
    SensorInit(String),

    #[error("sensor communication failed during {operation}: {message}")]
    SensorComm {
        operation: &'static str,
        message: String,
    },

    #[error("fingers do not match")]
    TemplateMismatch,

    #[error("template storage is full ({capacity} templates)")]
    StoreCapacity { capacity: u32 },

    #[error("failed to load liveness model {path}: {message}")]
    ClassifierLoad { path: PathBuf, message: String },

    #[error("liveness inference failed: {0}")]
    Inference(String),

    #[error("no finger presented within {secs}s")]
    CaptureTimeout { secs: u64 },

    #[error("failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("failed to write captured image {path}: {message}")]
    CaptureWrite { path: PathBuf, message: String },

    #[error("failed to read template store {path}: {source}")]
    TemplateStoreRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write template store {path}: {source}")]
    TemplateStoreWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("template store {path} is invalid: {message}")]
    InvalidTemplateStore { path: PathBuf, message: String },

    #[error("button input error: {0}")]
    Input(String),

    #[error("display error: {0}")]
    Display(String),

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("{task} task panicked: {message}")]
    TaskPanicked { task: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn sensor_comm(operation: &'static str, message: impl Into<String>) -> Self {
        AppError::SensorComm {
            operation,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::ConfigRead { .. } => ExitCode::from(2),
            AppError::ConfigParse { .. } => ExitCode::from(2),
            AppError::ClassifierLoad { .. } => ExitCode::from(3),
            _ => ExitCode::from(1),
        }
    }

    /// Text for the second line of a failure screen; the kiosk display is
    /// only twenty columns wide so the full error goes to the log instead.
    pub fn short_message(&self) -> String {
        match self {
            AppError::SensorInit(message) => message.clone(),
            AppError::SensorComm { operation, .. } => format!("Sensor {operation} error"),
            AppError::TemplateMismatch => "Fingers do not match".into(),
            AppError::StoreCapacity { .. } => "Storage full".into(),
            AppError::ClassifierLoad { .. } => "No liveness model".into(),
            AppError::Inference(_) => "Liveness failed".into(),
            AppError::CaptureTimeout { .. } => "No finger detected".into(),
            AppError::ImageDecode { .. } => "Unreadable image".into(),
            AppError::CaptureWrite { .. } => "Audit write failed".into(),
            AppError::TemplateStoreRead { .. }
            | AppError::TemplateStoreWrite { .. }
            | AppError::InvalidTemplateStore { .. } => "Template store error".into(),
            AppError::Input(_) => "Button error".into(),
            AppError::Display(_) => "Display error".into(),
            AppError::ConfigRead { .. } | AppError::ConfigParse { .. } => "Config error".into(),
            AppError::TaskPanicked { .. } => "Internal error".into(),
            AppError::Io(_) => "I/O error".into(),
            AppError::Serialization(_) => "Data error".into(),
        }
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<candle_core::Error> for AppError {
    fn from(err: candle_core::Error) -> Self {
        AppError::Inference(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_load_has_distinct_exit_code() {
        let load = AppError::ClassifierLoad {
            path: PathBuf::from("liveness.pt"),
            message: "missing".into(),
        };
        let comm = AppError::sensor_comm("capture", "timeout");
        assert_ne!(load.exit_code(), comm.exit_code());
        assert_eq!(load.exit_code(), ExitCode::from(3));
    }

    #[test]
    fn short_messages_fit_the_screen() {
        let errors = [
            AppError::TemplateMismatch,
            AppError::StoreCapacity { capacity: 10 },
            AppError::CaptureTimeout { secs: 30 },
            AppError::sensor_comm("search", "checksum mismatch"),
        ];
        for err in errors {
            assert!(err.short_message().len() <= 20, "{}", err.short_message());
        }
    }
}
