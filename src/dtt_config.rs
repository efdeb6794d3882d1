// Application configuration: simulation tuning, editor policies, assistant
// settings and the route catalog.
//
// Every field has a default so a partial (or missing) config file works.

use crate::dtt_editor::{DuplicateIdPolicy, EditorPolicy, MergeMode};
use crate::dtt_models::{DEFAULT_ROUTES, DIU_LOCATION, DTTError, Location, Result, Route};
use crate::dtt_sim::SimulationParams;
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted per-tick position step, in degrees
const MAX_POSITION_JITTER: f64 = 1.0;

lazy_static! {
    static ref COLOR_TOKEN: Regex = Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tick_interval_ms: u64,
    pub position_jitter: f64,
    pub speed_jitter: f64,
    pub max_speed: f64,
    pub default_origin: Location,
    pub seed_fleet_size: usize,
    pub default_capacity: u32,
    pub toast_ttl_secs: u64,
    pub duplicate_id_policy: DuplicateIdPolicy,
    pub reject_empty_ids: bool,
    pub merge_mode: MergeMode,
    pub timezone: String,
    pub assistant: AssistantConfig,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub model_id: String,
    pub endpoint: String,
    pub request_timeout_secs: u64,
    /// Normally left empty and taken from the environment
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        AssistantConfig {
            model_id: "gemini-2.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            request_timeout_secs: 20,
            api_key: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            tick_interval_ms: 2000,
            position_jitter: 0.0005,
            speed_jitter: 2.5,
            max_speed: 60.0,
            default_origin: DIU_LOCATION,
            seed_fleet_size: 60,
            default_capacity: 50,
            toast_ttl_secs: 3,
            duplicate_id_policy: DuplicateIdPolicy::Allow,
            reject_empty_ids: false,
            merge_mode: MergeMode::Truthy,
            timezone: "Asia/Dhaka".to_string(),
            assistant: AssistantConfig::default(),
            routes: DEFAULT_ROUTES.clone(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("dtt");
        path.push("config.json");
        path
    }

    /// Load from an explicit path, or from the default location if a file
    /// exists there, or fall back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    log::info!("No config file at {:?}, using defaults", path);
                    AppConfig::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| DTTError::FileError(format!("Failed to read {:?}: {}", path, e)))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| DTTError::Config(format!("Failed to parse {:?}: {}", path, e)))?;
        log::info!("Loaded configuration from {:?} ({} routes)", path, config.routes.len());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(DTTError::Config("tick_interval_ms must be positive".to_string()));
        }
        if !self.max_speed.is_finite() || self.max_speed <= 0.0 {
            return Err(DTTError::Config("max_speed must be a positive number".to_string()));
        }
        if !(0.0..=MAX_POSITION_JITTER).contains(&self.position_jitter) {
            return Err(DTTError::Config(format!(
                "position_jitter must be between 0 and {} degrees",
                MAX_POSITION_JITTER
            )));
        }
        if !(0.0..=self.max_speed).contains(&self.speed_jitter) {
            return Err(DTTError::Config("speed_jitter must be between 0 and max_speed".to_string()));
        }
        if self.default_capacity == 0 {
            return Err(DTTError::Config("default_capacity must be positive".to_string()));
        }
        self.tz()?;
        Self::validate_routes(&self.routes)
    }

    pub fn validate_routes(routes: &[Route]) -> Result<()> {
        if routes.is_empty() {
            return Err(DTTError::Config("route catalog is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for route in routes {
            if !seen.insert(route.id.as_str()) {
                return Err(DTTError::Config(format!("duplicate route id '{}'", route.id)));
            }
            if route.stops.is_empty() {
                return Err(DTTError::Config(format!("route '{}' has no stops", route.id)));
            }
            if !COLOR_TOKEN.is_match(&route.color) {
                return Err(DTTError::Config(format!(
                    "route '{}' has invalid color '{}'",
                    route.id, route.color
                )));
            }
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| DTTError::Config(format!("unknown timezone '{}': {}", self.timezone, e)))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn toast_ttl(&self) -> Duration {
        Duration::from_secs(self.toast_ttl_secs)
    }

    pub fn simulation_params(&self) -> SimulationParams {
        SimulationParams {
            position_jitter: self.position_jitter,
            speed_jitter: self.speed_jitter,
            max_speed: self.max_speed,
        }
    }

    pub fn editor_policy(&self) -> EditorPolicy {
        EditorPolicy {
            duplicate_ids: self.duplicate_id_policy,
            reject_empty_ids: self.reject_empty_ids,
            merge_mode: self.merge_mode,
            default_origin: self.default_origin,
        }
    }

    /// Key lookup order: config file, GEMINI_API_KEY, API_KEY
    pub fn resolve_api_key(&mut self) {
        if self.assistant.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            return;
        }
        self.assistant.api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_millis(2000));
        assert_eq!(config.routes.len(), 6);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "tick_interval_ms": 500, "merge_mode": "explicit" }}"#).unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.tick_interval_ms, 500);
        assert_eq!(config.merge_mode, MergeMode::Explicit);
        assert_eq!(config.seed_fleet_size, 60);
        assert_eq!(config.routes, *DEFAULT_ROUTES);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(AppConfig::load(Some(file.path())), Err(DTTError::Config(_))));
    }

    #[test]
    fn missing_file_is_a_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(AppConfig::load(Some(&path)), Err(DTTError::FileError(_))));
    }

    #[test]
    fn catalog_validation_rejects_bad_routes() {
        let mut routes = DEFAULT_ROUTES.clone();
        routes[1].id = "R1".to_string();
        assert!(AppConfig::validate_routes(&routes).is_err());

        let mut routes = DEFAULT_ROUTES.clone();
        routes[0].stops.clear();
        assert!(AppConfig::validate_routes(&routes).is_err());

        let mut routes = DEFAULT_ROUTES.clone();
        routes[0].color = "emerald".to_string();
        assert!(AppConfig::validate_routes(&routes).is_err());

        assert!(AppConfig::validate_routes(&[]).is_err());
    }

    #[test]
    fn jitter_bounds_must_be_finite_and_capped() {
        for config in [
            AppConfig { position_jitter: 1e308, ..AppConfig::default() },
            AppConfig { position_jitter: f64::NAN, ..AppConfig::default() },
            AppConfig { position_jitter: -0.1, ..AppConfig::default() },
            AppConfig { speed_jitter: 61.0, ..AppConfig::default() },
            AppConfig { speed_jitter: f64::INFINITY, ..AppConfig::default() },
            AppConfig { max_speed: f64::INFINITY, ..AppConfig::default() },
            AppConfig { max_speed: 0.0, ..AppConfig::default() },
        ] {
            assert!(matches!(config.validate(), Err(DTTError::Config(_))));
        }

        let edge = AppConfig { position_jitter: 1.0, speed_jitter: 60.0, ..AppConfig::default() };
        assert!(edge.validate().is_ok());
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let fleet = crate::dtt_fleet::FleetSnapshot::new(crate::dtt_fleet::seed_mock_fleet(
            5,
            &edge.routes,
            edge.default_origin,
            edge.default_capacity,
            &mut rng,
            chrono::Utc::now(),
        ));
        crate::dtt_sim::advance(&fleet, &edge.simulation_params(), &mut rng, chrono::Utc::now());
    }

    #[test]
    fn zero_tick_and_unknown_timezone_are_rejected() {
        let config = AppConfig { tick_interval_ms: 0, ..AppConfig::default() };
        assert!(config.validate().is_err());

        let config = AppConfig { timezone: "Mars/Olympus".to_string(), ..AppConfig::default() };
        assert!(config.validate().is_err());
    }
}
