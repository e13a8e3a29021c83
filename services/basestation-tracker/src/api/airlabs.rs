//! AirLabs flight, fleet and airline endpoints

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{AircraftApi, AirlineApi, ApiProperties, ApiProperty, FlightApi};
use crate::error::ApiError;

const SERVICE: &str = "AirLabs";

/// AirLabs REST client
#[derive(Debug, Clone)]
pub struct AirLabsClient {
    client: reqwest::Client,
    base_url: String,
    key: String,
    address_lookup: bool,
}

impl AirLabsClient {
    pub fn new(client: reqwest::Client, base_url: &str, key: &str, address_lookup: bool) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            address_lookup,
        }
    }

    /// First object of the `response` element, if any
    async fn get_first(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Option<Value>, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("{} request to {} {:?}", SERVICE, url, query);

        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                service: SERVICE,
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        Ok(first_response(body))
    }
}

fn first_response(body: Value) -> Option<Value> {
    if let Some(error) = body.get("error") {
        warn!("{} error: {}", SERVICE, error);
        return None;
    }

    match body.get("response")? {
        Value::Array(items) => items.first().cloned(),
        object @ Value::Object(_) => Some(object.clone()),
        _ => None,
    }
}

/// Copy non-empty values from a JSON object into a property bag
fn extract(object: &Value, mapping: &[(ApiProperty, &str)]) -> ApiProperties {
    mapping
        .iter()
        .filter_map(|(property, key)| {
            let value = match object.get(*key)? {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            (!value.is_empty()).then_some((*property, value))
        })
        .collect()
}

const FLIGHT_FIELDS: &[(ApiProperty, &str)] = &[
    (ApiProperty::DepartureAirportIata, "dep_iata"),
    (ApiProperty::DepartureAirportIcao, "dep_icao"),
    (ApiProperty::DestinationAirportIata, "arr_iata"),
    (ApiProperty::DestinationAirportIcao, "arr_icao"),
    (ApiProperty::FlightIata, "flight_iata"),
    (ApiProperty::FlightIcao, "flight_icao"),
    (ApiProperty::FlightNumber, "flight_number"),
    (ApiProperty::AirlineIata, "airline_iata"),
    (ApiProperty::AirlineIcao, "airline_icao"),
    (ApiProperty::ModelIcao, "aircraft_icao"),
];

const AIRCRAFT_FIELDS: &[(ApiProperty, &str)] = &[
    (ApiProperty::AircraftRegistration, "reg_number"),
    (ApiProperty::AircraftManufactured, "built"),
    (ApiProperty::ManufacturerName, "manufacturer"),
    (ApiProperty::ModelIcao, "icao"),
    (ApiProperty::ModelIata, "iata"),
    (ApiProperty::ModelName, "model"),
];

const AIRLINE_FIELDS: &[(ApiProperty, &str)] = &[
    (ApiProperty::AirlineIata, "iata_code"),
    (ApiProperty::AirlineIcao, "icao_code"),
    (ApiProperty::AirlineName, "name"),
];

fn flight_properties(object: &Value) -> Option<ApiProperties> {
    let properties = extract(object, FLIGHT_FIELDS);
    let valid = properties.contains_key(&ApiProperty::FlightIata) || properties.contains_key(&ApiProperty::FlightIcao);
    valid.then_some(properties)
}

fn aircraft_properties(object: &Value) -> Option<ApiProperties> {
    let properties = extract(object, AIRCRAFT_FIELDS);
    properties
        .contains_key(&ApiProperty::AircraftRegistration)
        .then_some(properties)
}

fn airline_properties(object: &Value) -> Option<ApiProperties> {
    let properties = extract(object, AIRLINE_FIELDS);
    properties.contains_key(&ApiProperty::AirlineName).then_some(properties)
}

#[async_trait]
impl FlightApi for AirLabsClient {
    fn supports_lookup_by_address(&self) -> bool {
        self.address_lookup
    }

    async fn lookup_flight_by_address(&self, address: &str) -> Result<Option<ApiProperties>, ApiError> {
        info!("Looking up active flight for aircraft with address {}", address);
        let object = self.get_first("flights", &[("hex", address)]).await?;
        Ok(object.as_ref().and_then(flight_properties))
    }

    async fn lookup_flight_by_number(&self, flight_iata: &str) -> Result<Option<ApiProperties>, ApiError> {
        info!("Looking up active flight {}", flight_iata);
        let object = self.get_first("flights", &[("flight_iata", flight_iata)]).await?;
        Ok(object.as_ref().and_then(flight_properties))
    }
}

#[async_trait]
impl AircraftApi for AirLabsClient {
    async fn lookup_aircraft(&self, address: &str) -> Result<Option<ApiProperties>, ApiError> {
        info!("Looking up aircraft with address {}", address);
        let object = self.get_first("fleets", &[("hex", address)]).await?;
        Ok(object.as_ref().and_then(aircraft_properties))
    }
}

#[async_trait]
impl AirlineApi for AirLabsClient {
    async fn lookup_airline(&self, icao: Option<&str>, iata: Option<&str>) -> Result<Option<ApiProperties>, ApiError> {
        let query = match (icao, iata) {
            (Some(icao), _) => ("icao_code", icao),
            (None, Some(iata)) => ("iata_code", iata),
            (None, None) => return Ok(None),
        };
        info!("Looking up airline {}={}", query.0, query.1);
        let object = self.get_first("airlines", &[query]).await?;
        Ok(object.as_ref().and_then(airline_properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flight_properties() {
        let body = json!({
            "response": [{
                "hex": "406A3D",
                "flight_iata": "BA486",
                "flight_icao": "BAW486",
                "flight_number": "486",
                "dep_iata": "LHR",
                "dep_icao": "EGLL",
                "arr_iata": "LIS",
                "arr_icao": "LPPT",
                "airline_iata": "BA",
                "airline_icao": "BAW",
                "aircraft_icao": "A320"
            }]
        });

        let properties = first_response(body).as_ref().and_then(flight_properties).unwrap();
        assert_eq!(properties[&ApiProperty::FlightIata], "BA486");
        assert_eq!(properties[&ApiProperty::DepartureAirportIcao], "EGLL");
        assert_eq!(properties[&ApiProperty::ModelIcao], "A320");
    }

    #[test]
    fn test_aircraft_properties_need_registration() {
        let with_reg = json!({"reg_number": "G-EUYA", "built": 2008, "icao": "A320", "model": "Airbus A320"});
        let properties = aircraft_properties(&with_reg).unwrap();
        assert_eq!(properties[&ApiProperty::AircraftManufactured], "2008");

        let without_reg = json!({"reg_number": "", "icao": "A320"});
        assert!(aircraft_properties(&without_reg).is_none());
    }

    #[test]
    fn test_error_and_empty_responses() {
        assert!(first_response(json!({"error": {"message": "Unknown api_key"}})).is_none());
        assert!(first_response(json!({"response": []})).is_none());
        assert!(first_response(json!({"response": {"name": "British Airways"}})).is_some());
    }
}
