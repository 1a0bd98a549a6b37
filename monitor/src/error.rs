//! Error handling for the hostwatch monitor
//!
//! Errors are split by concern (configuration, metric collection, log
//! persistence, notification delivery) and wrapped by [`MonitorError`],
//! which is what a polling cycle returns to the main loop.

use std::io;

use thiserror::Error;

/// The main error type for the monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metric or process status could not be read
    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    /// Log file persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Notification transport errors
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A fault escaped a polling cycle
    #[error("Cycle failed: {0}")]
    CycleFailed(String),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },
}

/// A metric or process status could not be read this cycle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectionError {
    #[error("{metric} reading unavailable: {reason}")]
    MetricUnavailable { metric: String, reason: String },

    #[error("No disk mounted at {path}")]
    MountNotFound { path: String },

    #[error("Process table query failed: {reason}")]
    ProcessQuery { reason: String },

    /// More than one OS process matches a configured name
    #[error("Ambiguous process name: {name} matches {matches} processes")]
    AmbiguousProcess { name: String, matches: usize },
}

/// Log persistence errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// No historical log exists for the requested period
    #[error("No data for {what}: {path}")]
    MissingData { what: String, path: String },

    #[error("Directory creation failed: {path}")]
    DirectoryCreationFailed { path: String },

    #[error("CSV error in {path}: {reason}")]
    Csv { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Notification transport errors
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("No recipients configured")]
    NoRecipients,

    #[error("Invalid email address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("Email build error: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),

    #[error("Delivery timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for collection operations
pub type CollectionResult<T> = std::result::Result<T, CollectionError>;

/// A specialized result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A specialized result type for delivery operations
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

impl MonitorError {
    /// Whether the loop can expect the next cycle to succeed without
    /// operator intervention
    pub fn is_recoverable(&self) -> bool {
        match self {
            MonitorError::Config(_) => false,
            MonitorError::Storage(StorageError::DirectoryCreationFailed { .. }) => false,
            MonitorError::Io(io_error) => !matches!(io_error.kind(), io::ErrorKind::PermissionDenied),
            _ => true,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::Config(_) => "config",
            MonitorError::Collection(_) => "collection",
            MonitorError::Storage(_) => "storage",
            MonitorError::Delivery(_) => "delivery",
            MonitorError::Io(_) => "io",
            MonitorError::CycleFailed(_) => "cycle",
            MonitorError::Generic(_) => "generic",
        }
    }
}

impl StorageError {
    pub fn is_missing_data(&self) -> bool {
        matches!(self, StorageError::MissingData { .. })
    }
}
