// ============================================================================
// SECTION 4: ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every subsystem of the telemetry core:
// - Gateway errors never escape a poll cycle
// - Query errors split into client and server faults
// - Storage errors carry enough context to log and skip
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{SensorId, SensorKey};

// ----------------------------------------------------------------------------
// 4.1 Top-Level Error
// ----------------------------------------------------------------------------

/// The main error type of the telemetry core.
/// All subsystem errors convert into it.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TelemetryError {
    /// Check if this error is recoverable without operator action
    pub fn is_recoverable(&self) -> bool {
        match self {
            TelemetryError::Config(_) => false,
            TelemetryError::Gateway(e) => e.is_recoverable(),
            TelemetryError::Storage(e) => e.is_recoverable(),
            TelemetryError::Query(_) => true,
            TelemetryError::Io(_) => true,
            TelemetryError::Internal(_) => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TelemetryError::Config(_) => "config",
            TelemetryError::Gateway(e) => e.category(),
            TelemetryError::Storage(_) => "storage",
            TelemetryError::Query(_) => "query",
            TelemetryError::Io(_) => "io",
            TelemetryError::Internal(_) => "internal",
        }
    }
}

/// Result alias used across the crate.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

// ----------------------------------------------------------------------------
// 4.2 Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Configuration reload failed: {message}")]
    ReloadFailed { message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// 4.3 Gateway Errors
// ----------------------------------------------------------------------------

/// Errors from a single gateway round-trip.
///
/// Any of these aborts the affected gateway (or LAN device) for the current
/// cycle only.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Request to '{gateway}' failed: {message}")]
    Transport { gateway: String, message: String },

    #[error("Gateway '{gateway}' returned HTTP {status}")]
    Status { gateway: String, status: u16 },

    #[error("Invalid payload from '{gateway}': {message}")]
    Parse { gateway: String, message: String },

    #[error("Gateway address '{address}' is not a private or local host")]
    InvalidAddress { address: String },

    /// The gateway answered but refused the request (bad credentials)
    #[error("Gateway '{gateway}' rejected the request: {message}")]
    Rejected { gateway: String, message: String },
}

impl GatewayError {
    pub fn transport(gateway: impl Into<String>, message: impl ToString) -> Self {
        GatewayError::Transport {
            gateway: gateway.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(gateway: impl Into<String>, message: impl ToString) -> Self {
        GatewayError::Parse {
            gateway: gateway.into(),
            message: message.to_string(),
        }
    }

    /// Transport and status failures may clear up by the next cycle.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            GatewayError::InvalidAddress { .. } | GatewayError::Rejected { .. }
        )
    }

    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::Transport { .. } | GatewayError::Status { .. } => "transport",
            GatewayError::Parse { .. } => "parse",
            GatewayError::InvalidAddress { .. } => "validation",
            GatewayError::Rejected { .. } => "auth",
        }
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

// ----------------------------------------------------------------------------
// 4.4 Storage Errors
// ----------------------------------------------------------------------------

/// Errors raised by the storage collaborator
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sensor already exists: {key}")]
    Conflict { key: SensorKey },

    #[error("Sensor not found: {id}")]
    SensorNotFound { id: SensorId },

    #[error("No sensor could be resolved for {key}")]
    UnresolvedSensor { key: SensorKey },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Read failed: {message}")]
    ReadFailed { message: String },
}

impl StorageError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StorageError::Conflict { .. })
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// ----------------------------------------------------------------------------
// 4.5 Query Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by the chart query path.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("sensor parameter is required")]
    MissingSensor,

    #[error("invalid sensor identifier '{raw}'")]
    InvalidSensor { raw: String },

    #[error("Either minutes or start and end dates must be provided")]
    MissingWindow,

    #[error("invalid minutes value '{raw}'")]
    InvalidMinutes { raw: String },

    #[error("invalid time bound '{raw}': {message}")]
    InvalidBound { raw: String, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QueryError {
    /// Validation failures are the caller's fault and must not be retried.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueryError::Storage(_))
    }

    pub fn invalid_bound(raw: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::InvalidBound {
            raw: raw.into(),
            message: message.into(),
        }
    }
}
