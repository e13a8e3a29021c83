//! Tracked aircraft state

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of altitude deltas kept per aircraft
pub const ALTITUDE_HISTORY_CAPACITY: usize = 50;

/// Behaviour derived from the altitude history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AircraftBehaviour {
    #[default]
    Unknown,
    Climbing,
    Descending,
    LevelFlight,
}

impl AircraftBehaviour {
    pub const ALL: [AircraftBehaviour; 4] = [
        AircraftBehaviour::Unknown,
        AircraftBehaviour::Climbing,
        AircraftBehaviour::Descending,
        AircraftBehaviour::LevelFlight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Climbing => "Climbing",
            Self::Descending => "Descending",
            Self::LevelFlight => "LevelFlight",
        }
    }
}

impl fmt::Display for AircraftBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AircraftBehaviour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

/// Lifecycle status of a tracked aircraft
///
/// `Locked` only appears on persisted records and marks a closed tracking session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingStatus {
    #[default]
    Active,
    Inactive,
    Stale,
    Removed,
    Locked,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
            Self::Stale => "Stale",
            Self::Removed => "Removed",
            Self::Locked => "Locked",
        }
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Inactive" => Ok(Self::Inactive),
            "Stale" => Ok(Self::Stale),
            "Removed" => Ok(Self::Removed),
            "Locked" => Ok(Self::Locked),
            other => Err(other.to_string()),
        }
    }
}

/// Fixed-capacity FIFO of signed altitude deltas
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AltitudeHistory {
    deltas: VecDeque<f64>,
}

impl AltitudeHistory {
    /// Append a delta, evicting the oldest entry once full
    pub fn push(&mut self, delta: f64) {
        if self.deltas.len() == ALTITUDE_HISTORY_CAPACITY {
            self.deltas.pop_front();
        }
        self.deltas.push_back(delta);
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.deltas.iter()
    }
}

/// Aggregated aircraft state, one per ICAO address in the live table
///
/// The same shape is persisted by the queued writer; `id` is 0 until the
/// record has been written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedAircraft {
    /// Persisted row id, 0 when not yet written
    pub id: i64,
    /// ICAO 24-bit address as six hex characters
    pub address: String,
    pub callsign: Option<String>,
    pub squawk: Option<String>,
    /// Altitude in feet
    pub altitude: Option<f64>,
    /// Ground speed in knots
    pub ground_speed: Option<f64>,
    /// Track in degrees
    pub track: Option<f64>,
    /// Vertical rate in feet per minute
    pub vertical_rate: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Distance from the receiver in nautical miles
    pub distance: Option<f64>,
    pub messages: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub position_last_updated: Option<DateTime<Utc>>,
    pub status: TrackingStatus,
    pub behaviour: AircraftBehaviour,
    #[serde(skip)]
    pub altitude_history: AltitudeHistory,
    pub lookup_timestamp: Option<DateTime<Utc>>,
    pub lookup_attempts: u32,
}

impl TrackedAircraft {
    pub fn new(address: &str, seen: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            address: address.to_string(),
            callsign: None,
            squawk: None,
            altitude: None,
            ground_speed: None,
            track: None,
            vertical_rate: None,
            latitude: None,
            longitude: None,
            distance: None,
            messages: 0,
            first_seen: seen,
            last_seen: seen,
            position_last_updated: None,
            status: TrackingStatus::Active,
            behaviour: AircraftBehaviour::Unknown,
            altitude_history: AltitudeHistory::default(),
            lookup_timestamp: None,
            lookup_attempts: 0,
        }
    }

    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Point-in-time position snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftPosition {
    /// Persisted row id, 0 when not yet written
    pub id: i64,
    /// Owning persisted aircraft, 0 until resolved by address at write time
    pub aircraft_id: i64,
    pub address: String,
    pub altitude: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub distance: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl AircraftPosition {
    /// Snapshot the aircraft's current position, if it has one
    pub fn from_aircraft(aircraft: &TrackedAircraft) -> Option<Self> {
        let (latitude, longitude) = aircraft.latitude.zip(aircraft.longitude)?;
        Some(Self {
            id: 0,
            aircraft_id: 0,
            address: aircraft.address.clone(),
            altitude: aircraft.altitude,
            latitude,
            longitude,
            distance: aircraft.distance,
            timestamp: aircraft.position_last_updated.unwrap_or(aircraft.last_seen),
        })
    }
}
