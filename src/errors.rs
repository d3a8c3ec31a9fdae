// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the depth camera session

use std::fmt;

/// Result type alias for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Result type alias for configuration loading and saving
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors reported by the driver collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Global driver initialization failed
    InitFailed(String),
    /// No device exists at the requested index
    DeviceNotFound(usize),
    /// Opening the device failed
    OpenFailed(String),
    /// Starting or stopping a stream failed
    StreamFailed(String),
    /// Event processing returned a negative status (fatal for the context)
    EventsFailed(i32),
    /// Applying a device flag failed
    FlagFailed(String),
    /// The driver does not support the requested operation
    Unsupported(String),
    /// Generic error with message
    Other(String),
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Reading or writing the config file failed
    Io(String),
    /// The config file is not valid JSON for the schema
    Parse(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::InitFailed(msg) => write!(f, "Driver initialization failed: {}", msg),
            DriverError::DeviceNotFound(index) => write!(f, "No device at index {}", index),
            DriverError::OpenFailed(msg) => write!(f, "Failed to open device: {}", msg),
            DriverError::StreamFailed(msg) => write!(f, "Stream error: {}", msg),
            DriverError::EventsFailed(code) => {
                write!(f, "Event processing failed with status {}", code)
            }
            DriverError::FlagFailed(msg) => write!(f, "Failed to set flag: {}", msg),
            DriverError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            DriverError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {}
impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
