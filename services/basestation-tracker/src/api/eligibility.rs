//! Whether an aircraft can be looked up yet

use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::ApiEndpointType;
use crate::error::StoreError;
use crate::store::TrackingStore;

static ADDRESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z0-9]{6}$").expect("address pattern is valid"));

/// Outcome of an eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityResult {
    pub eligible: bool,
    /// When not eligible, whether a later attempt may succeed
    pub retryable: bool,
}

impl EligibilityResult {
    pub const ELIGIBLE: Self = Self {
        eligible: true,
        retryable: true,
    };
    pub const RETRY_LATER: Self = Self {
        eligible: false,
        retryable: true,
    };
    pub const NEVER: Self = Self {
        eligible: false,
        retryable: false,
    };
}

pub fn is_valid_address(address: &str) -> bool {
    ADDRESS_PATTERN.is_match(address)
}

/// Decides lookup eligibility from the address, API capabilities and store
pub struct LookupEligibilityAssessor {
    store: Arc<dyn TrackingStore>,
    flight_api_supports_address: bool,
    maximum_lookups: u32,
}

impl LookupEligibilityAssessor {
    pub fn new(store: Arc<dyn TrackingStore>, flight_api_supports_address: bool, maximum_lookups: u32) -> Self {
        Self {
            store,
            flight_api_supports_address,
            maximum_lookups,
        }
    }

    fn supports_address_lookup(&self, endpoint: ApiEndpointType) -> bool {
        match endpoint {
            ApiEndpointType::ActiveFlights => self.flight_api_supports_address,
            ApiEndpointType::Aircraft => true,
            ApiEndpointType::HistoricalFlights | ApiEndpointType::Airlines | ApiEndpointType::Metar => false,
        }
    }

    /// Check an address against the given endpoint
    ///
    /// Without address lookup support, the aircraft needs a tracked record with
    /// a callsign (retry later if missing) and a confirmed flight number for
    /// that callsign (never eligible if missing).
    pub async fn is_eligible_for_lookup(
        &self,
        endpoint: ApiEndpointType,
        address: &str,
    ) -> Result<EligibilityResult, StoreError> {
        if !is_valid_address(address) {
            return Ok(EligibilityResult::NEVER);
        }

        if self.supports_address_lookup(endpoint) {
            return Ok(EligibilityResult::ELIGIBLE);
        }

        let callsign = self
            .store
            .get_lookup_candidate(address, self.maximum_lookups)
            .await?
            .and_then(|aircraft| aircraft.callsign);
        let Some(callsign) = callsign else {
            return Ok(EligibilityResult::RETRY_LATER);
        };

        match self.store.get_flight_number_mapping(&callsign).await? {
            Some(_) => Ok(EligibilityResult::ELIGIBLE),
            None => Ok(EligibilityResult::NEVER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FlightNumberMapping, MemoryStore};
    use crate::tracking::TrackedAircraft;
    use chrono::Utc;

    fn assessor(store: Arc<MemoryStore>, address_lookup: bool) -> LookupEligibilityAssessor {
        LookupEligibilityAssessor::new(store, address_lookup, 5)
    }

    #[tokio::test]
    async fn test_invalid_address_is_never_eligible() {
        let assessor = assessor(Arc::new(MemoryStore::new()), true);
        for address in ["", "406A3", "406A3D7", "40-A3D", "406 3D"] {
            let result = assessor
                .is_eligible_for_lookup(ApiEndpointType::ActiveFlights, address)
                .await
                .unwrap();
            assert_eq!(result, EligibilityResult::NEVER, "address {:?}", address);
        }
    }

    #[tokio::test]
    async fn test_address_lookup_is_immediately_eligible() {
        let assessor = assessor(Arc::new(MemoryStore::new()), true);
        let result = assessor
            .is_eligible_for_lookup(ApiEndpointType::ActiveFlights, "406a3d")
            .await
            .unwrap();
        assert_eq!(result, EligibilityResult::ELIGIBLE);
    }

    #[tokio::test]
    async fn test_callsign_and_mapping_required() {
        let store = Arc::new(MemoryStore::new());
        let assessor = assessor(store.clone(), false);
        let check = || assessor.is_eligible_for_lookup(ApiEndpointType::ActiveFlights, "406A3D");

        // Not yet persisted
        assert_eq!(check().await.unwrap(), EligibilityResult::RETRY_LATER);

        let mut aircraft = TrackedAircraft::new("406A3D", Utc::now());
        aircraft = store.write_aircraft(&aircraft).await.unwrap();
        assert_eq!(check().await.unwrap(), EligibilityResult::RETRY_LATER);

        aircraft.callsign = Some("BAW486".to_string());
        store.write_aircraft(&aircraft).await.unwrap();
        assert_eq!(check().await.unwrap(), EligibilityResult::NEVER);

        store
            .add_flight_number_mapping(&FlightNumberMapping {
                callsign: "BAW486".to_string(),
                flight_iata: "BA486".to_string(),
                flight_icao: None,
                airline_iata: None,
                airline_icao: None,
            })
            .await
            .unwrap();
        assert_eq!(check().await.unwrap(), EligibilityResult::ELIGIBLE);
    }
}
