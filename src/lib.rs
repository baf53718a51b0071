//! # Isley Telemetry - Sensor Acquisition & Chart Queries
//!
//! The telemetry core of the Isley grow tracker. It polls third-party sensor
//! gateways on a configurable cadence, records every reading against a lazily
//! created sensor, and serves time-ranged readings to the charting frontend.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            ISLEY TELEMETRY CORE                             │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  WRITE:  POLLER → GATEWAY CLIENT → SENSOR REGISTRY → READING STORE          │
//! │  PUSH:   INGEST ENDPOINT → SENSOR REGISTRY → READING STORE                  │
//! │  READ:   CHART SERVICE → QUERY CACHE → READING STORE → DOWNSAMPLER          │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Gateways
//!
//! - **AC Infinity** (cloud): one token-authenticated POST per cycle, values
//!   arrive scaled by 100.
//! - **EcoWitt** (LAN): one GET per console address, values arrive as strings
//!   with a trailing unit.
//!
//! Scripts may also push single readings over HTTP when `ingest.enabled` is
//! set; they go through the same registry and store as polled values.
//!
//! Configuration is read through [`config::ConfigSource`] snapshots, so an
//! interval or gateway change takes effect on the next poll cycle without
//! restarting anything.

// ============================================================================
// SECTION 1: MODULES
// ============================================================================

pub mod cache;
pub mod chart;
pub mod config;
pub mod downsample;
pub mod error;
pub mod gateway;
pub mod grouping;
pub mod logging;
pub mod model;
pub mod poller;
pub mod readings;
pub mod registry;
pub mod retention;
pub mod server;
pub mod storage;

pub use cache::QueryCache;
pub use chart::{ChartQueryService, ChartRequest};
pub use config::{ConfigManager, ConfigSource, TelemetryConfig};
pub use error::{ConfigError, GatewayError, QueryError, StorageError, TelemetryError, TelemetryResult};
pub use gateway::{GatewayClient, GatewayTarget, HttpGatewayClient};
pub use grouping::{GroupedCache, Trend};
pub use model::{ChartRecord, Reading, Sensor, SensorId, SensorKey, SensorSource, SensorUpdate, ZoneId};
pub use poller::Poller;
pub use readings::ReadingStore;
pub use registry::SensorRegistry;
pub use storage::{MemoryStorage, TelemetryStorage};

// ============================================================================
// SECTION 2: CONSTANTS & VERSION INFORMATION
// ============================================================================

// ----------------------------------------------------------------------------
// 2.1 Version Information
// ----------------------------------------------------------------------------

/// Crate version, as published in the health endpoint.
pub const TELEMETRY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short service name used in logs and the CLI.
pub const TELEMETRY_NAME: &str = "isley-telemetry";

// ----------------------------------------------------------------------------
// 2.2 Polling Defaults
// ----------------------------------------------------------------------------

/// Default polling interval (seconds).
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;

/// Smallest accepted polling interval (seconds).
pub const MIN_POLLING_INTERVAL_SECS: u64 = 1;

/// Largest accepted polling interval (one day).
pub const MAX_POLLING_INTERVAL_SECS: u64 = 86_400;

/// Default deadline for a single gateway round-trip.
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

/// Divisor applied to the polling interval to obtain the chart cache TTL.
pub const CACHE_TTL_DIVISOR: u32 = 10;

// ----------------------------------------------------------------------------
// 2.3 Gateway Endpoints
// ----------------------------------------------------------------------------

/// Base URL of the AC Infinity cloud API.
pub const DEFAULT_AC_INFINITY_BASE_URL: &str = "http://www.acinfinityserver.com";

/// Device listing path on the AC Infinity API.
pub const AC_INFINITY_DEVICE_PATH: &str = "/api/user/devInfoListAll";

/// User agent the AC Infinity API expects (it mirrors the vendor's app).
pub const AC_INFINITY_USER_AGENT: &str = "okhttp/3.10.0";

/// Account login path on the AC Infinity API.
pub const AC_INFINITY_LOGIN_PATH: &str = "/api/user/appUserLogin";

/// User agent for the login call, which only accepts the iOS app's.
pub const AC_INFINITY_LOGIN_USER_AGENT: &str =
    "ACController/1.8.2 (com.acinfinity.humiture; build:489; iOS 16.5.1) Alamofire/5.4.4";

/// Live data path on an EcoWitt console.
pub const ECOWITT_LIVEDATA_PATH: &str = "/get_livedata_info";

// ----------------------------------------------------------------------------
// 2.4 Storage & Serving Defaults
// ----------------------------------------------------------------------------

/// Default reading retention horizon (days).
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Default interval between retention sweeps (seconds).
pub const DEFAULT_RETENTION_SWEEP_SECS: u64 = 3600;

/// Default upper bound on cached chart queries.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1024;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
