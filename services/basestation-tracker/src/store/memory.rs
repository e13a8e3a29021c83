//! In-memory store, used when SQL writing is disabled and in tests

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use super::{AircraftDetails, Airline, Flight, FlightNumberMapping, Sighting, TrackingStore};
use crate::error::StoreError;
use crate::tracking::{AircraftPosition, TrackedAircraft, TrackingStatus};

#[derive(Default)]
struct Tables {
    aircraft: Vec<TrackedAircraft>,
    positions: Vec<AircraftPosition>,
    mappings: Vec<FlightNumberMapping>,
    details: Vec<AircraftDetails>,
    airlines: Vec<Airline>,
    flights: Vec<Flight>,
    sightings: Vec<Sighting>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn latest_aircraft_mut(&mut self, address: &str) -> Option<&mut TrackedAircraft> {
        self.aircraft
            .iter_mut()
            .filter(|a| a.address == address)
            .max_by_key(|a| a.id)
    }
}

/// Upsert a record into a table keyed by id
fn upsert<T: Clone>(
    rows: &mut Vec<T>,
    record: &T,
    id: impl Fn(&T) -> i64,
    set_id: impl FnOnce(&mut T, i64),
    next_id: impl FnOnce() -> i64,
) -> T {
    let existing = id(record);
    if existing != 0 {
        if let Some(row) = rows.iter_mut().find(|r| id(r) == existing) {
            *row = record.clone();
            return record.clone();
        }
    }

    let mut created = record.clone();
    if existing == 0 {
        set_id(&mut created, next_id());
    }
    rows.push(created.clone());
    created
}

/// Store backed by vectors behind a lock
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn get_latest_aircraft(&self, address: &str) -> Result<Option<TrackedAircraft>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .aircraft
            .iter()
            .filter(|a| a.address == address)
            .max_by_key(|a| a.id)
            .cloned())
    }

    async fn list_aircraft(&self, address: Option<&str>) -> Result<Vec<TrackedAircraft>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .aircraft
            .iter()
            .filter(|a| address.map_or(true, |address| a.address == address))
            .cloned()
            .collect())
    }

    async fn write_aircraft(&self, aircraft: &TrackedAircraft) -> Result<TrackedAircraft, StoreError> {
        let mut tables = self.tables.write().await;
        let next_id = tables.next_id();
        Ok(upsert(&mut tables.aircraft, aircraft, |a| a.id, |a, id| a.id = id, || next_id))
    }

    async fn lock_all_unlocked(&self) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let mut locked = 0;
        for aircraft in tables.aircraft.iter_mut().filter(|a| a.status != TrackingStatus::Locked) {
            aircraft.status = TrackingStatus::Locked;
            locked += 1;
        }
        Ok(locked)
    }

    async fn list_positions(&self, aircraft_id: i64) -> Result<Vec<AircraftPosition>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .positions
            .iter()
            .filter(|p| p.aircraft_id == aircraft_id)
            .cloned()
            .collect())
    }

    async fn write_position(&self, position: &AircraftPosition) -> Result<AircraftPosition, StoreError> {
        let mut tables = self.tables.write().await;
        let next_id = tables.next_id();
        Ok(upsert(&mut tables.positions, position, |p| p.id, |p, id| p.id = id, || next_id))
    }

    async fn get_lookup_candidate(
        &self,
        address: &str,
        maximum_attempts: u32,
    ) -> Result<Option<TrackedAircraft>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .aircraft
            .iter()
            .filter(|a| a.address == address && a.lookup_timestamp.is_none())
            .filter(|a| maximum_attempts == 0 || a.lookup_attempts < maximum_attempts)
            .max_by_key(|a| a.id)
            .cloned())
    }

    async fn update_lookup_properties(
        &self,
        address: &str,
        attempted_at: DateTime<Utc>,
        completed: bool,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(aircraft) = tables.latest_aircraft_mut(address) else {
            return Ok(false);
        };
        aircraft.lookup_attempts += 1;
        if completed {
            aircraft.lookup_timestamp = Some(attempted_at);
        }
        Ok(true)
    }

    async fn get_flight_number_mapping(&self, callsign: &str) -> Result<Option<FlightNumberMapping>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.mappings.iter().find(|m| m.callsign == callsign).cloned())
    }

    async fn add_flight_number_mapping(&self, mapping: &FlightNumberMapping) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.mappings.retain(|m| m.callsign != mapping.callsign);
        tables.mappings.push(mapping.clone());
        Ok(())
    }

    async fn get_aircraft_details(&self, address: &str) -> Result<Option<AircraftDetails>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.details.iter().find(|d| d.address == address).cloned())
    }

    async fn write_aircraft_details(&self, details: &AircraftDetails) -> Result<AircraftDetails, StoreError> {
        let mut tables = self.tables.write().await;
        let next_id = tables.next_id();
        Ok(upsert(&mut tables.details, details, |d| d.id, |d, id| d.id = id, || next_id))
    }

    async fn get_airline(
        &self,
        icao: Option<&str>,
        iata: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<Airline>, StoreError> {
        let tables = self.tables.read().await;
        let by_icao = icao.and_then(|icao| tables.airlines.iter().find(|a| a.icao.as_deref() == Some(icao)));
        let by_iata = || iata.and_then(|iata| tables.airlines.iter().find(|a| a.iata.as_deref() == Some(iata)));
        let by_name = || name.and_then(|name| tables.airlines.iter().find(|a| a.name == name));
        Ok(by_icao.or_else(by_iata).or_else(by_name).cloned())
    }

    async fn write_airline(&self, airline: &Airline) -> Result<Airline, StoreError> {
        let mut tables = self.tables.write().await;
        let next_id = tables.next_id();
        Ok(upsert(&mut tables.airlines, airline, |a| a.id, |a, id| a.id = id, || next_id))
    }

    async fn get_flight(&self, iata: Option<&str>, icao: Option<&str>) -> Result<Option<Flight>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .flights
            .iter()
            .find(|f| f.iata.as_deref() == iata && f.icao.as_deref() == icao)
            .cloned())
    }

    async fn write_flight(&self, flight: &Flight) -> Result<Flight, StoreError> {
        let mut tables = self.tables.write().await;
        let next_id = tables.next_id();
        Ok(upsert(&mut tables.flights, flight, |f| f.id, |f, id| f.id = id, || next_id))
    }

    async fn add_sighting(&self, aircraft_id: i64, flight_id: i64, date: NaiveDate) -> Result<Sighting, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .sightings
            .iter()
            .find(|s| s.aircraft_id == aircraft_id && s.flight_id == flight_id && s.date == date)
        {
            return Ok(existing.clone());
        }

        let sighting = Sighting {
            id: tables.next_id(),
            aircraft_id,
            flight_id,
            date,
        };
        tables.sightings.push(sighting.clone());
        Ok(sighting)
    }

    async fn list_sightings(&self, aircraft_id: i64) -> Result<Vec<Sighting>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sightings
            .iter()
            .filter(|s| s.aircraft_id == aircraft_id)
            .cloned()
            .collect())
    }
}
