//! Configuration loaded from a JSON settings file and environment variables
//!
//! Precedence, lowest first: built-in defaults, `appsettings.json` (or the file
//! named by `TRACKER_SETTINGS`), then `TRACKER__*` environment variables, e.g.
//! `TRACKER__PORT=30003` or `TRACKER__API__AIRLABS_KEY=...`.

use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::Deserialize;

use crate::tracking::AircraftBehaviour;

/// Default settings file, looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// BaseStation feed host
    pub host: String,

    /// BaseStation feed port
    pub port: u16,

    /// Reconnect when no line arrives within this many milliseconds
    pub socket_read_timeout_ms: u64,

    /// Silence before an aircraft is reported as recent (inactive)
    pub time_to_recent_ms: u64,

    /// Silence before an aircraft is reported as stale
    pub time_to_stale_ms: u64,

    /// Silence before an aircraft is dropped from the live table
    pub time_to_removal_ms: u64,

    /// Age after which a persisted aircraft row is closed and a new one started
    pub time_to_lock_ms: u64,

    /// Queued writer tick interval
    pub writer_interval_ms: u64,

    /// Maximum items processed per writer tick
    pub writer_batch_size: usize,

    /// Persist to Postgres rather than the in-memory store
    pub enable_sql_writer: bool,

    /// Queue a lookup request for every newly tracked aircraft
    pub auto_lookup: bool,

    /// Truncate tracking tables at startup
    pub clear_down: bool,

    /// Maximum lookup attempts per aircraft, 0 for unlimited
    pub maximum_lookups: u32,

    /// Receiver position used for distance calculation
    pub receiver_latitude: Option<f64>,
    pub receiver_longitude: Option<f64>,

    /// Tracking criteria for added/updated notifications
    pub maximum_tracked_distance: Option<f64>,
    pub minimum_tracked_altitude: Option<f64>,
    pub maximum_tracked_altitude: Option<f64>,
    pub tracked_behaviours: Vec<AircraftBehaviour>,

    /// Addresses never tracked
    pub excluded_addresses: Vec<String>,

    /// Callsigns whose aircraft are excluded for the rest of the run
    pub excluded_callsigns: Vec<String>,

    /// Postgres connection string (key=value form)
    pub database_url: String,

    /// Port for the WebSocket/REST hub, 0 disables it
    pub hub_port: u16,

    /// Default tracing directive for this crate
    pub log_level: String,

    /// External API configuration
    pub api: ApiSettings,
}

/// External API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub airlabs_key: Option<String>,
    pub airlabs_base_url: String,
    pub checkwx_key: Option<String>,
    pub checkwx_base_url: String,

    /// Whether the flight API can be queried by ICAO address directly
    pub flight_api_supports_address_lookup: bool,

    /// HTTP request timeout
    pub timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 30003,
            socket_read_timeout_ms: 60_000,
            time_to_recent_ms: 60_000,
            time_to_stale_ms: 120_000,
            time_to_removal_ms: 180_000,
            time_to_lock_ms: 900_000,
            writer_interval_ms: 30_000,
            writer_batch_size: 20_000,
            enable_sql_writer: false,
            auto_lookup: false,
            clear_down: false,
            maximum_lookups: 5,
            receiver_latitude: None,
            receiver_longitude: None,
            maximum_tracked_distance: None,
            minimum_tracked_altitude: None,
            maximum_tracked_altitude: None,
            tracked_behaviours: AircraftBehaviour::ALL.to_vec(),
            excluded_addresses: Vec::new(),
            excluded_callsigns: Vec::new(),
            database_url: "host=localhost port=5432 dbname=basestation user=basestation password=basestation"
                .to_string(),
            hub_port: 8888,
            log_level: "info".to_string(),
            api: ApiSettings::default(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            airlabs_key: None,
            airlabs_base_url: "https://airlabs.co/api/v9".to_string(),
            checkwx_key: None,
            checkwx_base_url: "https://api.checkwx.com".to_string(),
            flight_api_supports_address_lookup: true,
            timeout_ms: 10_000,
        }
    }
}

impl Settings {
    /// Load settings from the default file location and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("TRACKER_SETTINGS").unwrap_or_else(|_| DEFAULT_SETTINGS_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load settings from a specific JSON file (optional) and the environment
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(File::new(path, FileFormat::Json).required(false))
            .add_source(
                Environment::with_prefix("TRACKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("excluded_addresses")
                    .with_list_parse_key("excluded_callsigns")
                    .with_list_parse_key("tracked_behaviours"),
            )
            .build()?
            .try_deserialize()
    }

    /// Receiver position, if both coordinates are configured
    pub fn receiver_position(&self) -> Option<(f64, f64)> {
        self.receiver_latitude.zip(self.receiver_longitude)
    }

    pub fn socket_read_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_read_timeout_ms)
    }

    pub fn time_to_recent(&self) -> Duration {
        Duration::from_millis(self.time_to_recent_ms)
    }

    pub fn time_to_stale(&self) -> Duration {
        Duration::from_millis(self.time_to_stale_ms)
    }

    pub fn time_to_removal(&self) -> Duration {
        Duration::from_millis(self.time_to_removal_ms)
    }

    pub fn time_to_lock(&self) -> Duration {
        Duration::from_millis(self.time_to_lock_ms)
    }

    pub fn writer_interval(&self) -> Duration {
        Duration::from_millis(self.writer_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 30003);
        assert!(settings.time_to_recent_ms < settings.time_to_stale_ms);
        assert!(settings.time_to_stale_ms < settings.time_to_removal_ms);
        assert_eq!(settings.tracked_behaviours.len(), 4);
        assert!(settings.receiver_position().is_none());
    }

    #[test]
    fn test_load_from_json_file() {
        let path = std::env::temp_dir().join(format!("basestation-settings-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{
                "host": "192.168.0.10",
                "time_to_lock_ms": 500,
                "receiver_latitude": 51.47,
                "receiver_longitude": -0.45,
                "tracked_behaviours": ["Climbing", "Descending"],
                "excluded_callsigns": ["TEST01"],
                "api": { "airlabs_key": "abc" }
            }"#,
        )
        .unwrap();

        let settings = Settings::load_from(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.host, "192.168.0.10");
        assert_eq!(settings.time_to_lock(), Duration::from_millis(500));
        assert_eq!(settings.receiver_position(), Some((51.47, -0.45)));
        assert_eq!(
            settings.tracked_behaviours,
            vec![AircraftBehaviour::Climbing, AircraftBehaviour::Descending]
        );
        assert_eq!(settings.excluded_callsigns, vec!["TEST01".to_string()]);
        assert_eq!(settings.api.airlabs_key.as_deref(), Some("abc"));
        // Untouched fields keep their defaults
        assert_eq!(settings.port, 30003);
        assert_eq!(settings.api.airlabs_base_url, "https://airlabs.co/api/v9");
    }
}
