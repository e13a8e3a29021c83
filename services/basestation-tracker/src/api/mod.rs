//! External flight, aircraft, airline and weather lookups
//!
//! Remote services return property bags keyed by [`ApiProperty`]. The
//! [`ExternalApiWrapper`] combines them with the local store, which acts as a
//! cache for airlines and aircraft details.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::store::{AircraftDetails, Airline};

pub mod airlabs;
pub mod checkwx;
pub mod eligibility;
pub mod wrapper;

pub use airlabs::AirLabsClient;
pub use checkwx::CheckWxClient;
pub use eligibility::{EligibilityResult, LookupEligibilityAssessor};
pub use wrapper::ApiWrapper;

/// Property returned by an external API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiProperty {
    AirlineIata,
    AirlineIcao,
    AirlineName,
    DepartureAirportIata,
    DepartureAirportIcao,
    DestinationAirportIata,
    DestinationAirportIcao,
    FlightIata,
    FlightIcao,
    FlightNumber,
    AircraftRegistration,
    AircraftManufactured,
    ManufacturerName,
    ModelIcao,
    ModelIata,
    ModelName,
}

pub type ApiProperties = HashMap<ApiProperty, String>;

/// Kind of remote endpoint a lookup goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiEndpointType {
    ActiveFlights,
    HistoricalFlights,
    Aircraft,
    Airlines,
    Metar,
}

/// Deferred lookup of flight and aircraft details for an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiLookupRequest {
    pub address: String,
    /// Only accept flights departing from one of these airports (IATA or ICAO)
    pub departure_airport_codes: Vec<String>,
    /// Only accept flights arriving at one of these airports (IATA or ICAO)
    pub arrival_airport_codes: Vec<String>,
    pub create_sighting: bool,
    /// Times this request has been deferred
    pub attempts: u32,
}

impl ApiLookupRequest {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            departure_airport_codes: Vec::new(),
            arrival_airport_codes: Vec::new(),
            create_sighting: false,
            attempts: 0,
        }
    }
}

#[async_trait]
pub trait FlightApi: Send + Sync {
    /// Whether flights can be found from the ICAO address alone
    fn supports_lookup_by_address(&self) -> bool;

    async fn lookup_flight_by_address(&self, address: &str) -> Result<Option<ApiProperties>, ApiError>;

    async fn lookup_flight_by_number(&self, flight_iata: &str) -> Result<Option<ApiProperties>, ApiError>;
}

#[async_trait]
pub trait AircraftApi: Send + Sync {
    async fn lookup_aircraft(&self, address: &str) -> Result<Option<ApiProperties>, ApiError>;
}

#[async_trait]
pub trait AirlineApi: Send + Sync {
    async fn lookup_airline(&self, icao: Option<&str>, iata: Option<&str>) -> Result<Option<ApiProperties>, ApiError>;
}

#[async_trait]
pub trait MetarApi: Send + Sync {
    /// Current METAR reports for an airport
    async fn lookup_current_weather(&self, icao: &str) -> Result<Option<Vec<String>>, ApiError>;
}

/// Flight, aircraft, airline and weather lookups with local caching
#[async_trait]
pub trait ExternalApiWrapper: Send + Sync {
    /// Resolve flight and aircraft for a tracked address
    ///
    /// Returns true when both were found. Lookup bookkeeping on the tracked
    /// record is updated whatever the outcome.
    async fn lookup(&self, endpoint: ApiEndpointType, request: &ApiLookupRequest) -> Result<bool, ApiError>;

    async fn lookup_airline(
        &self,
        icao: Option<&str>,
        iata: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<Airline>, ApiError>;

    async fn lookup_aircraft(
        &self,
        address: &str,
        alternate_model_icao: Option<&str>,
    ) -> Result<Option<AircraftDetails>, ApiError>;

    async fn lookup_current_airport_weather(&self, icao: &str) -> Result<Option<Vec<String>>, ApiError>;
}
