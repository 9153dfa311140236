// Runtime configuration: built-in defaults, optionally overridden by a JSON
// file (SUBWAY_PULSE_CONFIG) and then by individual environment variables.

use chrono_tz::Tz;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TrackerError};
use crate::geometry::Projection;

const MTA_BASE_URL: &str = "https://api-endpoint.mta.info/Dataservice/mtagtfsfeeds/nyct%2F";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
}

impl FeedSource {
    pub fn new(name: &str, url: &str) -> Self {
        FeedSource { name: name.to_string(), url: url.to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feeds: Vec<FeedSource>,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub tick_interval_secs: u64,
    pub retention_secs: i64,
    pub static_path: PathBuf,
    pub snapshot_path: PathBuf,
    /// (lat, lon)
    pub projection_center: (f64, f64),
    pub projection_scale: f64,
    pub track_width: f64,
    /// Hex color (no '#', upper case) -> offset, overriding the rank-based default
    pub track_offsets: HashMap<String, f64>,
    pub timezone: String,
    pub bind_address: String,
}

impl Default for Config {
    fn default() -> Self {
        let feeds = [
            ("ACE", "gtfs-ace"),
            ("BDFM", "gtfs-bdfm"),
            ("G", "gtfs-g"),
            ("JZ", "gtfs-jz"),
            ("NQRW", "gtfs-nqrw"),
            ("L", "gtfs-l"),
            ("1234567", "gtfs"),
            ("SIR", "gtfs-si"),
        ]
        .iter()
        .map(|(name, path)| FeedSource::new(name, &format!("{}{}", MTA_BASE_URL, path)))
        .collect();

        Config {
            feeds,
            api_key: None,
            request_timeout_secs: 30,
            tick_interval_secs: 30,
            retention_secs: 3 * 3600,
            static_path: PathBuf::from("data/gtfs_subway"),
            snapshot_path: Self::default_snapshot_path(),
            projection_center: (40.734789, -73.990568),
            projection_scale: 100.0,
            track_width: 0.15,
            track_offsets: HashMap::new(),
            timezone: "America/New_York".to_string(),
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    pub fn default_snapshot_path() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("subway_pulse");
        path.push("realtime_snapshot.json");
        path
    }

    /// Defaults, then the JSON file named by `SUBWAY_PULSE_CONFIG`, then
    /// single-value environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("SUBWAY_PULSE_CONFIG") {
            Ok(path) => {
                let contents = fs::read_to_string(&path)
                    .map_err(|e| TrackerError::Config(format!("Failed to read {}: {}", path, e)))?;
                let config = Self::from_json(&contents)?;
                info!("✓ Configuration loaded from {}", path);
                config
            }
            Err(_) => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| TrackerError::Config(format!("Invalid config file: {}", e)))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = var("SUBWAY_PULSE_STATIC_DIR") {
            self.static_path = PathBuf::from(dir);
        }
        if let Some(path) = var("SUBWAY_PULSE_SNAPSHOT") {
            self.snapshot_path = PathBuf::from(path);
        }
        if let Some(bind) = var("SUBWAY_PULSE_BIND") {
            self.bind_address = bind;
        }
        if let Some(key) = var("SUBWAY_PULSE_API_KEY") {
            self.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(secs) = var("SUBWAY_PULSE_TICK_SECS") {
            self.tick_interval_secs = secs.parse().map_err(|_| {
                TrackerError::Config(format!("SUBWAY_PULSE_TICK_SECS is not a number: {}", secs))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(TrackerError::Config("no feed sources configured".to_string()));
        }
        if self.tick_interval_secs == 0 {
            return Err(TrackerError::Config("tick interval must be positive".to_string()));
        }
        if self.retention_secs <= 0 {
            return Err(TrackerError::Config("retention window must be positive".to_string()));
        }
        self.tz()?;
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| TrackerError::Config(format!("Unknown timezone {}: {}", self.timezone, e)))
    }

    pub fn projection(&self) -> Projection {
        Projection::new(self.projection_center.0, self.projection_center.1, self.projection_scale)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.feeds.len(), 8);
        assert_eq!(config.retention_secs, 10_800);
        assert_eq!(config.tick_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json(r#"{"tick_interval_secs": 10, "track_offsets": {"EE352E": 0.3}}"#)
            .unwrap();
        assert_eq!(config.tick_interval_secs, 10);
        assert_eq!(config.track_offsets["EE352E"], 0.3);
        assert_eq!(config.feeds.len(), 8);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("SUBWAY_PULSE_STATIC_DIR", "/srv/gtfs.zip"),
            ("SUBWAY_PULSE_TICK_SECS", "15"),
            ("SUBWAY_PULSE_API_KEY", ""),
        ]
        .into_iter()
        .collect();

        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.static_path, PathBuf::from("/srv/gtfs.zip"));
        assert_eq!(config.tick_interval_secs, 15);
        assert_eq!(config.api_key, None);

        let bad: HashMap<&str, &str> = [("SUBWAY_PULSE_TICK_SECS", "soon")].into_iter().collect();
        assert!(config.apply_env(|k| bad.get(k).map(|v| v.to_string())).is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.feeds.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tick_interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
