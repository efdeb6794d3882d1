// Data model for the DIU Transport Smart Tracker
//
// Routes are static and loaded once at startup. Buses live in the fleet store
// (see dtt_fleet.rs) and are mutated by the simulation driver and the
// reconciling editor only.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Location { lat, lng }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusStatus {
    Active,
    Inactive,
    Maintenance,
}

impl BusStatus {
    pub const ALL: [BusStatus; 3] = [BusStatus::Active, BusStatus::Inactive, BusStatus::Maintenance];

    pub fn as_str(&self) -> &'static str {
        match self {
            BusStatus::Active => "active",
            BusStatus::Inactive => "inactive",
            BusStatus::Maintenance => "maintenance",
        }
    }

    /// Label used by the status pickers in both front ends
    pub fn label(&self) -> &'static str {
        match self {
            BusStatus::Active => "Active (On Route)",
            BusStatus::Inactive => "Inactive (Parked)",
            BusStatus::Maintenance => "Maintenance",
        }
    }
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusStatus {
    type Err = DTTError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "a" => Ok(BusStatus::Active),
            "inactive" | "i" => Ok(BusStatus::Inactive),
            "maintenance" | "m" => Ok(BusStatus::Maintenance),
            other => Err(DTTError::InvalidInput(format!("unknown bus status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub id: String,
    pub name: String,
    pub route_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
    pub status: BusStatus,
    pub location: Location,
    /// km/h
    pub speed: f64,
    pub capacity: u32,
    pub passengers: u32,
    pub last_updated: DateTime<Utc>,
}

impl Bus {
    pub fn is_active(&self) -> bool {
        self.status == BusStatus::Active
    }

    pub fn occupancy_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.passengers as f64 / self.capacity as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub name: String,
    pub origin: String,
    pub destination: String,
    pub stops: Vec<String>,
    pub color: String,
}

impl Route {
    fn new(id: &str, name: &str, destination: &str, stops: &[&str], color: &str) -> Self {
        Route {
            id: id.to_string(),
            name: name.to_string(),
            origin: "Daffodil Smart City".to_string(),
            destination: destination.to_string(),
            stops: stops.iter().map(|s| s.to_string()).collect(),
            color: color.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Driver,
    Admin,
}

impl Role {
    pub fn can_manage_fleet(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn can_use_assistant(&self) -> bool {
        !matches!(self, Role::Driver)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Student => "Student View",
            Role::Driver => "Driver Mode",
            Role::Admin => "Admin Portal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        ChatMessage {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Static Route Catalog
// ============================================================================

/// DSC campus, the origin of every route
pub const DIU_LOCATION: Location = Location::new(23.8768, 90.3204);

lazy_static! {
    pub static ref DEFAULT_ROUTES: Vec<Route> = vec![
        Route::new("R1", "DSC - Mirpur", "Mirpur 10", &["DSC", "Birulia", "Mirpur 1", "Mirpur 10"], "#10b981"),
        Route::new("R2", "DSC - Savar", "Savar Bus Stand", &["DSC", "Khagan", "Savar"], "#3b82f6"),
        Route::new("R3", "DSC - Mugda", "Mugda Stadium", &["DSC", "Gabtoli", "Asad Gate", "Mugda"], "#f59e0b"),
        Route::new("R4", "DSC - Dhanmondi", "Dhanmondi 32", &["DSC", "Shyamoli", "Dhanmondi 27", "Dhanmondi 32"], "#8b5cf6"),
        Route::new("R5", "DSC - Uttara", "Uttara House Building", &["DSC", "Abdullahpur", "Uttara"], "#ec4899"),
        Route::new("R6", "DSC - ECB", "ECB Chattar", &["DSC", "Kalshi", "ECB"], "#ef4444"),
    ];
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, Error)]
pub enum DTTError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Bus '{0}' already exists in the fleet")]
    DuplicateBusId(String),
    #[error("Bus id must not be empty")]
    EmptyBusId,
    #[error("File error: {0}")]
    FileError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, DTTError>;

// ============================================================================
// Helpers
// ============================================================================

pub struct DTTModels;

impl DTTModels {
    pub fn get_route_by_id<'a>(route_id: &str, routes: &'a [Route]) -> Option<&'a Route> {
        routes.iter().find(|r| r.id == route_id)
    }

    pub fn get_route_color(route_id: &str, routes: &[Route]) -> String {
        Self::get_route_by_id(route_id, routes)
            .map(|r| r.color.clone())
            .unwrap_or_else(|| "#808080".to_string())
    }

    pub fn parse_hex_color(hex_color: &str) -> (u8, u8, u8) {
        let hex = hex_color.trim_start_matches('#');
        if hex.len() != 6 {
            return (128, 128, 128);
        }
        let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(128);
        let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(128);
        let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(128);
        (r, g, b)
    }

    pub fn format_time(timestamp: &DateTime<Utc>, tz: Tz) -> String {
        timestamp.with_timezone(&tz).format("%H:%M:%S").to_string()
    }

    /// Seconds elapsed since a bus was last touched, never negative
    pub fn age_seconds(timestamp: &DateTime<Utc>, now: &DateTime<Utc>) -> i64 {
        (*now - *timestamp).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_names_and_shortcuts() {
        assert_eq!("Active".parse::<BusStatus>().unwrap(), BusStatus::Active);
        assert_eq!(" m ".parse::<BusStatus>().unwrap(), BusStatus::Maintenance);
        assert!("parked".parse::<BusStatus>().is_err());
    }

    #[test]
    fn bus_serializes_with_camel_case_keys() {
        let bus = Bus {
            id: "B-1000".to_string(),
            name: "DIU Bus 1000".to_string(),
            route_id: "R1".to_string(),
            driver_name: None,
            status: BusStatus::Maintenance,
            location: DIU_LOCATION,
            speed: 0.0,
            capacity: 50,
            passengers: 3,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_value(&bus).unwrap();
        assert_eq!(json["routeId"], "R1");
        assert_eq!(json["status"], "maintenance");
        assert!(json.get("driverName").is_none());
    }

    #[test]
    fn default_catalog_has_unique_ids_and_stops() {
        let mut ids: Vec<&str> = DEFAULT_ROUTES.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), DEFAULT_ROUTES.len());
        assert!(DEFAULT_ROUTES.iter().all(|r| !r.stops.is_empty()));
    }

    #[test]
    fn hex_colors_fall_back_to_grey() {
        assert_eq!(DTTModels::parse_hex_color("#10b981"), (0x10, 0xb9, 0x81));
        assert_eq!(DTTModels::parse_hex_color("nope"), (128, 128, 128));
        assert_eq!(DTTModels::get_route_color("R9", &DEFAULT_ROUTES), "#808080");
    }

    #[test]
    fn only_admins_manage_the_fleet() {
        assert!(Role::Admin.can_manage_fleet());
        assert!(!Role::Student.can_manage_fleet());
        assert!(!Role::Driver.can_use_assistant());
    }
}
