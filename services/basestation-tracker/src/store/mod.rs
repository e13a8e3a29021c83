//! Persistence for tracked aircraft, positions and lookup results
//!
//! Writes are upserts: a record with id 0 is created and returned with its
//! new id, any other id is updated in place.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::tracking::{AircraftPosition, TrackedAircraft};

pub mod lock;
pub mod memory;
pub mod postgres;

pub use lock::AircraftLockManager;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Confirmed mapping from a broadcast callsign to a flight number
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightNumberMapping {
    pub callsign: String,
    pub flight_iata: String,
    pub flight_icao: Option<String>,
    pub airline_iata: Option<String>,
    pub airline_icao: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Airline {
    pub id: i64,
    pub icao: Option<String>,
    pub iata: Option<String>,
    pub name: String,
}

/// Airframe details resolved for an ICAO address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AircraftDetails {
    pub id: i64,
    pub address: String,
    pub registration: String,
    pub manufactured: Option<i32>,
    pub manufacturer: Option<String>,
    pub model_icao: Option<String>,
    pub model_iata: Option<String>,
    pub model_name: Option<String>,
}

impl AircraftDetails {
    /// Age in years relative to the given year
    pub fn age(&self, year: i32) -> Option<i32> {
        self.manufactured.map(|built| year - built)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flight {
    pub id: i64,
    pub iata: Option<String>,
    pub icao: Option<String>,
    /// Departure airport code
    pub embarkation: Option<String>,
    /// Arrival airport code
    pub destination: Option<String>,
    pub airline_id: Option<i64>,
}

/// Aircraft and flight observed together on a given day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sighting {
    pub id: i64,
    pub aircraft_id: i64,
    pub flight_id: i64,
    pub date: NaiveDate,
}

/// Async record store used by the queued writer and the lookup wrapper
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Most recent persisted record for an address, in any status
    async fn get_latest_aircraft(&self, address: &str) -> Result<Option<TrackedAircraft>, StoreError>;

    /// All persisted records, optionally for one address, oldest first
    async fn list_aircraft(&self, address: Option<&str>) -> Result<Vec<TrackedAircraft>, StoreError>;

    async fn write_aircraft(&self, aircraft: &TrackedAircraft) -> Result<TrackedAircraft, StoreError>;

    /// Lock every record that is not already locked, returning how many changed
    async fn lock_all_unlocked(&self) -> Result<u64, StoreError>;

    async fn list_positions(&self, aircraft_id: i64) -> Result<Vec<AircraftPosition>, StoreError>;

    async fn write_position(&self, position: &AircraftPosition) -> Result<AircraftPosition, StoreError>;

    /// Latest record for an address that has not been looked up and still has
    /// attempts left (`maximum_attempts` of 0 means unlimited)
    async fn get_lookup_candidate(
        &self,
        address: &str,
        maximum_attempts: u32,
    ) -> Result<Option<TrackedAircraft>, StoreError>;

    /// Count a lookup attempt against the latest record for an address and,
    /// when `completed`, stamp its lookup timestamp. Returns false if there is
    /// no record.
    async fn update_lookup_properties(
        &self,
        address: &str,
        attempted_at: DateTime<Utc>,
        completed: bool,
    ) -> Result<bool, StoreError>;

    async fn get_flight_number_mapping(&self, callsign: &str) -> Result<Option<FlightNumberMapping>, StoreError>;

    async fn add_flight_number_mapping(&self, mapping: &FlightNumberMapping) -> Result<(), StoreError>;

    async fn get_aircraft_details(&self, address: &str) -> Result<Option<AircraftDetails>, StoreError>;

    async fn write_aircraft_details(&self, details: &AircraftDetails) -> Result<AircraftDetails, StoreError>;

    /// Find an airline by ICAO code, then IATA code, then name
    async fn get_airline(
        &self,
        icao: Option<&str>,
        iata: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<Airline>, StoreError>;

    async fn write_airline(&self, airline: &Airline) -> Result<Airline, StoreError>;

    /// Find a flight by IATA and ICAO flight number
    async fn get_flight(&self, iata: Option<&str>, icao: Option<&str>) -> Result<Option<Flight>, StoreError>;

    async fn write_flight(&self, flight: &Flight) -> Result<Flight, StoreError>;

    /// Record a sighting; repeated sightings on the same day are kept once
    async fn add_sighting(&self, aircraft_id: i64, flight_id: i64, date: NaiveDate) -> Result<Sighting, StoreError>;

    async fn list_sightings(&self, aircraft_id: i64) -> Result<Vec<Sighting>, StoreError>;
}
