//! Lookup orchestration over the external APIs and the local store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use tracing::{debug, info, warn};

use super::{
    AircraftApi, AirlineApi, ApiEndpointType, ApiLookupRequest, ApiProperties, ApiProperty, ExternalApiWrapper,
    FlightApi, MetarApi,
};
use crate::error::ApiError;
use crate::store::{AircraftDetails, Airline, Flight, FlightNumberMapping, TrackingStore};
use crate::tracking::TrackedAircraft;

/// Flight found for a lookup, with the aircraft model it reported
struct ResolvedFlight {
    flight: Flight,
    model_icao: Option<String>,
}

/// Default [`ExternalApiWrapper`]
pub struct ApiWrapper {
    store: Arc<dyn TrackingStore>,
    active_flights: Option<Arc<dyn FlightApi>>,
    aircraft: Option<Arc<dyn AircraftApi>>,
    airlines: Option<Arc<dyn AirlineApi>>,
    metar: Option<Arc<dyn MetarApi>>,
    maximum_lookups: u32,
}

impl ApiWrapper {
    pub fn new(store: Arc<dyn TrackingStore>, maximum_lookups: u32) -> Self {
        Self {
            store,
            active_flights: None,
            aircraft: None,
            airlines: None,
            metar: None,
            maximum_lookups,
        }
    }

    pub fn with_active_flight_api(mut self, api: Arc<dyn FlightApi>) -> Self {
        self.active_flights = Some(api);
        self
    }

    pub fn with_aircraft_api(mut self, api: Arc<dyn AircraftApi>) -> Self {
        self.aircraft = Some(api);
        self
    }

    pub fn with_airline_api(mut self, api: Arc<dyn AirlineApi>) -> Self {
        self.airlines = Some(api);
        self
    }

    pub fn with_metar_api(mut self, api: Arc<dyn MetarApi>) -> Self {
        self.metar = Some(api);
        self
    }

    async fn lookup_flight(
        &self,
        endpoint: ApiEndpointType,
        candidate: &TrackedAircraft,
        request: &ApiLookupRequest,
    ) -> Result<Option<ResolvedFlight>, ApiError> {
        let api = match endpoint {
            ApiEndpointType::ActiveFlights => self.active_flights.as_ref(),
            _ => None,
        };
        let Some(api) = api else {
            warn!("No flight API registered for {:?}", endpoint);
            return Ok(None);
        };

        let properties = if api.supports_lookup_by_address() {
            api.lookup_flight_by_address(&request.address).await?
        } else {
            let Some(callsign) = candidate.callsign.as_deref() else {
                return Ok(None);
            };
            let Some(mapping) = self.store.get_flight_number_mapping(callsign).await? else {
                return Ok(None);
            };
            api.lookup_flight_by_number(&mapping.flight_iata).await?
        };

        let Some(properties) = properties else {
            info!("No flight found for {}", request.address);
            return Ok(None);
        };

        if !matches_airport(
            &properties,
            ApiProperty::DepartureAirportIata,
            ApiProperty::DepartureAirportIcao,
            &request.departure_airport_codes,
        ) || !matches_airport(
            &properties,
            ApiProperty::DestinationAirportIata,
            ApiProperty::DestinationAirportIcao,
            &request.arrival_airport_codes,
        ) {
            info!("Flight for {} does not match the airport filters", request.address);
            return Ok(None);
        }

        let airline = self
            .lookup_airline(
                property(&properties, ApiProperty::AirlineIcao),
                property(&properties, ApiProperty::AirlineIata),
                property(&properties, ApiProperty::AirlineName),
            )
            .await?;

        let iata = property(&properties, ApiProperty::FlightIata);
        let icao = property(&properties, ApiProperty::FlightIcao);
        let flight = match self.store.get_flight(iata, icao).await? {
            Some(flight) => flight,
            None => {
                self.store
                    .write_flight(&Flight {
                        id: 0,
                        iata: iata.map(str::to_string),
                        icao: icao.map(str::to_string),
                        embarkation: airport(&properties, ApiProperty::DepartureAirportIata, ApiProperty::DepartureAirportIcao),
                        destination: airport(
                            &properties,
                            ApiProperty::DestinationAirportIata,
                            ApiProperty::DestinationAirportIcao,
                        ),
                        airline_id: airline.map(|a| a.id),
                    })
                    .await?
            }
        };

        // An address-based hit confirms the callsign's flight number
        if let (Some(callsign), Some(flight_iata)) = (candidate.callsign.as_deref(), iata) {
            self.store
                .add_flight_number_mapping(&FlightNumberMapping {
                    callsign: callsign.to_string(),
                    flight_iata: flight_iata.to_string(),
                    flight_icao: icao.map(str::to_string),
                    airline_iata: property(&properties, ApiProperty::AirlineIata).map(str::to_string),
                    airline_icao: property(&properties, ApiProperty::AirlineIcao).map(str::to_string),
                })
                .await?;
        }

        Ok(Some(ResolvedFlight {
            flight,
            model_icao: property(&properties, ApiProperty::ModelIcao).map(str::to_string),
        }))
    }

    async fn resolve(
        &self,
        endpoint: ApiEndpointType,
        candidate: &TrackedAircraft,
        request: &ApiLookupRequest,
    ) -> Result<(Option<ResolvedFlight>, Option<AircraftDetails>), ApiError> {
        let flight = self.lookup_flight(endpoint, candidate, request).await?;
        let model_icao = flight.as_ref().and_then(|f| f.model_icao.as_deref());
        let aircraft = self.lookup_aircraft(&request.address, model_icao).await?;
        Ok((flight, aircraft))
    }
}

fn property(properties: &ApiProperties, key: ApiProperty) -> Option<&str> {
    properties.get(&key).map(String::as_str)
}

fn airport(properties: &ApiProperties, iata: ApiProperty, icao: ApiProperty) -> Option<String> {
    property(properties, iata)
        .or_else(|| property(properties, icao))
        .map(str::to_string)
}

/// An empty filter matches any airport
fn matches_airport(properties: &ApiProperties, iata: ApiProperty, icao: ApiProperty, filter: &[String]) -> bool {
    filter.is_empty()
        || [iata, icao]
            .into_iter()
            .filter_map(|key| property(properties, key))
            .any(|code| filter.iter().any(|f| f.eq_ignore_ascii_case(code)))
}

#[async_trait]
impl ExternalApiWrapper for ApiWrapper {
    async fn lookup(&self, endpoint: ApiEndpointType, request: &ApiLookupRequest) -> Result<bool, ApiError> {
        let Some(candidate) = self
            .store
            .get_lookup_candidate(&request.address, self.maximum_lookups)
            .await?
        else {
            info!("Aircraft {} is not eligible for lookup", request.address);
            return Ok(false);
        };

        // The attempt counts even when a remote call fails
        let resolved = self.resolve(endpoint, &candidate, request).await;
        self.store
            .update_lookup_properties(&request.address, Utc::now(), true)
            .await?;
        let (flight, aircraft) = resolved?;

        let successful = flight.is_some() && aircraft.is_some();

        if let (true, Some(flight), Some(aircraft)) = (request.create_sighting, &flight, &aircraft) {
            self.store
                .add_sighting(aircraft.id, flight.flight.id, Utc::now().date_naive())
                .await?;
        }

        info!(
            "Lookup for {} {}",
            request.address,
            if successful { "succeeded" } else { "failed" }
        );
        Ok(successful)
    }

    async fn lookup_airline(
        &self,
        icao: Option<&str>,
        iata: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<Airline>, ApiError> {
        if icao.is_none() && iata.is_none() && name.is_none() {
            return Ok(None);
        }

        if let Some(airline) = self.store.get_airline(icao, iata, name).await? {
            debug!("Airline {} found locally", airline.name);
            return Ok(Some(airline));
        }

        let Some(api) = &self.airlines else {
            return Ok(None);
        };
        let Some(properties) = api.lookup_airline(icao, iata).await? else {
            return Ok(None);
        };
        let Some(name) = property(&properties, ApiProperty::AirlineName) else {
            return Ok(None);
        };

        let airline = Airline {
            id: 0,
            icao: property(&properties, ApiProperty::AirlineIcao)
                .or(icao)
                .map(str::to_string),
            iata: property(&properties, ApiProperty::AirlineIata)
                .or(iata)
                .map(str::to_string),
            name: name.to_string(),
        };
        Ok(Some(self.store.write_airline(&airline).await?))
    }

    async fn lookup_aircraft(
        &self,
        address: &str,
        alternate_model_icao: Option<&str>,
    ) -> Result<Option<AircraftDetails>, ApiError> {
        if let Some(details) = self.store.get_aircraft_details(address).await? {
            debug!("Aircraft {} found locally", address);
            return Ok(Some(details));
        }

        let Some(api) = &self.aircraft else {
            return Ok(None);
        };
        let Some(properties) = api.lookup_aircraft(address).await? else {
            return Ok(None);
        };
        let Some(registration) = property(&properties, ApiProperty::AircraftRegistration) else {
            return Ok(None);
        };

        let manufactured = property(&properties, ApiProperty::AircraftManufactured).and_then(|s| s.parse().ok());
        let details = AircraftDetails {
            id: 0,
            address: address.to_string(),
            registration: registration.to_string(),
            manufactured,
            manufacturer: property(&properties, ApiProperty::ManufacturerName).map(str::to_string),
            model_icao: property(&properties, ApiProperty::ModelIcao)
                .or(alternate_model_icao)
                .map(str::to_string),
            model_iata: property(&properties, ApiProperty::ModelIata).map(str::to_string),
            model_name: property(&properties, ApiProperty::ModelName).map(str::to_string),
        };

        let details = self.store.write_aircraft_details(&details).await?;
        if let Some(age) = details.age(Utc::now().year()) {
            debug!("Aircraft {} ({}) is {} years old", address, details.registration, age);
        }
        Ok(Some(details))
    }

    async fn lookup_current_airport_weather(&self, icao: &str) -> Result<Option<Vec<String>>, ApiError> {
        match &self.metar {
            Some(api) => api.lookup_current_weather(icao).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Canned API used by the wrapper and writer tests
    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub(crate) flight: Option<ApiProperties>,
        pub(crate) aircraft: Option<ApiProperties>,
        pub(crate) airline: Option<ApiProperties>,
        pub(crate) calls: AtomicUsize,
        /// Flight lookups fail with a server error
        pub(crate) unavailable: bool,
    }

    impl FakeApi {
        pub(crate) fn complete() -> Self {
            Self {
                flight: Some(ApiProperties::from([
                    (ApiProperty::FlightIata, "BA486".to_string()),
                    (ApiProperty::FlightIcao, "BAW486".to_string()),
                    (ApiProperty::DepartureAirportIata, "LHR".to_string()),
                    (ApiProperty::DestinationAirportIata, "LIS".to_string()),
                    (ApiProperty::AirlineIcao, "BAW".to_string()),
                    (ApiProperty::ModelIcao, "A320".to_string()),
                ])),
                aircraft: Some(ApiProperties::from([
                    (ApiProperty::AircraftRegistration, "G-EUYA".to_string()),
                    (ApiProperty::AircraftManufactured, "2008".to_string()),
                ])),
                airline: Some(ApiProperties::from([
                    (ApiProperty::AirlineIcao, "BAW".to_string()),
                    (ApiProperty::AirlineName, "British Airways".to_string()),
                ])),
                calls: AtomicUsize::new(0),
                unavailable: false,
            }
        }

        fn flight_result(&self) -> Result<Option<ApiProperties>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(ApiError::Status {
                    service: "AirLabs",
                    status: 503,
                });
            }
            Ok(self.flight.clone())
        }
    }

    #[async_trait]
    impl FlightApi for FakeApi {
        fn supports_lookup_by_address(&self) -> bool {
            true
        }

        async fn lookup_flight_by_address(&self, _: &str) -> Result<Option<ApiProperties>, ApiError> {
            self.flight_result()
        }

        async fn lookup_flight_by_number(&self, _: &str) -> Result<Option<ApiProperties>, ApiError> {
            self.flight_result()
        }
    }

    #[async_trait]
    impl AircraftApi for FakeApi {
        async fn lookup_aircraft(&self, _: &str) -> Result<Option<ApiProperties>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.aircraft.clone())
        }
    }

    #[async_trait]
    impl AirlineApi for FakeApi {
        async fn lookup_airline(&self, _: Option<&str>, _: Option<&str>) -> Result<Option<ApiProperties>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.airline.clone())
        }
    }

    pub(crate) fn wrapper(store: Arc<MemoryStore>, api: Arc<FakeApi>) -> ApiWrapper {
        ApiWrapper::new(store, 5)
            .with_active_flight_api(api.clone())
            .with_aircraft_api(api.clone())
            .with_airline_api(api)
    }

    async fn tracked(store: &MemoryStore, callsign: Option<&str>) {
        let mut aircraft = TrackedAircraft::new("406A3D", Utc::now());
        aircraft.callsign = callsign.map(str::to_string);
        store.write_aircraft(&aircraft).await.unwrap();
    }

    #[tokio::test]
    async fn test_successful_lookup_creates_sighting() {
        let store = Arc::new(MemoryStore::new());
        tracked(&store, Some("BAW486")).await;
        let wrapper = wrapper(store.clone(), Arc::new(FakeApi::complete()));

        let mut request = ApiLookupRequest::new("406A3D");
        request.create_sighting = true;
        assert!(wrapper.lookup(ApiEndpointType::ActiveFlights, &request).await.unwrap());

        let details = store.get_aircraft_details("406A3D").await.unwrap().unwrap();
        assert_eq!(details.registration, "G-EUYA");
        assert_eq!(details.model_icao.as_deref(), Some("A320"));
        assert_eq!(store.list_sightings(details.id).await.unwrap().len(), 1);

        let airline = store.get_airline(Some("BAW"), None, None).await.unwrap().unwrap();
        let flight = store.get_flight(Some("BA486"), Some("BAW486")).await.unwrap().unwrap();
        assert_eq!(flight.airline_id, Some(airline.id));
        assert_eq!(flight.embarkation.as_deref(), Some("LHR"));

        let mapping = store.get_flight_number_mapping("BAW486").await.unwrap().unwrap();
        assert_eq!(mapping.flight_iata, "BA486");

        let record = store.get_latest_aircraft("406A3D").await.unwrap().unwrap();
        assert!(record.lookup_timestamp.is_some());
        assert_eq!(record.lookup_attempts, 1);

        // Already looked up
        assert!(!wrapper.lookup(ApiEndpointType::ActiveFlights, &request).await.unwrap());
    }

    #[tokio::test]
    async fn test_airport_filter_rejects_flight() {
        let store = Arc::new(MemoryStore::new());
        tracked(&store, None).await;
        let wrapper = wrapper(store.clone(), Arc::new(FakeApi::complete()));

        let mut request = ApiLookupRequest::new("406A3D");
        request.departure_airport_codes = vec!["EGKK".to_string(), "LGW".to_string()];
        assert!(!wrapper.lookup(ApiEndpointType::ActiveFlights, &request).await.unwrap());

        // The attempt is still recorded
        let record = store.get_latest_aircraft("406A3D").await.unwrap().unwrap();
        assert!(record.lookup_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_failed_lookup_still_counts_attempt() {
        let store = Arc::new(MemoryStore::new());
        tracked(&store, Some("BAW486")).await;
        let api = Arc::new(FakeApi {
            unavailable: true,
            ..FakeApi::complete()
        });
        let wrapper = wrapper(store.clone(), api.clone());

        let request = ApiLookupRequest::new("406A3D");
        let result = wrapper.lookup(ApiEndpointType::ActiveFlights, &request).await;
        assert!(matches!(result, Err(ApiError::Status { status: 503, .. })));

        let record = store.get_latest_aircraft("406A3D").await.unwrap().unwrap();
        assert_eq!(record.lookup_attempts, 1);
        assert!(record.lookup_timestamp.is_some());

        // The stamped record is not retried against the failing API
        assert!(!wrapper.lookup(ApiEndpointType::ActiveFlights, &request).await.unwrap());
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_untracked_address_is_not_looked_up() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(FakeApi::complete());
        let wrapper = wrapper(store, api.clone());

        let request = ApiLookupRequest::new("406A3D");
        assert!(!wrapper.lookup(ApiEndpointType::ActiveFlights, &request).await.unwrap());
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_cache_is_used_first() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(FakeApi::complete());
        let wrapper = wrapper(store, api.clone());

        let first = wrapper.lookup_aircraft("406A3D", None).await.unwrap().unwrap();
        let second = wrapper.lookup_aircraft("406A3D", None).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        wrapper.lookup_airline(Some("BAW"), None, None).await.unwrap().unwrap();
        wrapper.lookup_airline(None, None, Some("British Airways")).await.unwrap().unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_alternate_model_icao() {
        let store = Arc::new(MemoryStore::new());
        let wrapper = wrapper(store, Arc::new(FakeApi::complete()));
        let details = wrapper.lookup_aircraft("406A3D", Some("A20N")).await.unwrap().unwrap();
        assert_eq!(details.model_icao.as_deref(), Some("A20N"));
    }

    #[tokio::test]
    async fn test_weather_without_api() {
        let wrapper = ApiWrapper::new(Arc::new(MemoryStore::new()), 0);
        assert!(wrapper.lookup_current_airport_weather("EGLL").await.unwrap().is_none());
    }
}
