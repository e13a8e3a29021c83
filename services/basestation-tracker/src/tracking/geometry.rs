//! Great-circle distance from the receiver

/// Earth radius used for distance calculations
const EARTH_RADIUS_M: f64 = 6_378_000.0;

/// Metres per nautical mile
const METRES_PER_NM: f64 = 1852.0;

/// Haversine distance between two lat/lon points in metres
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Distance calculator anchored at the receiver position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceCalculator {
    latitude: f64,
    longitude: f64,
}

impl DistanceCalculator {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Distance from the receiver in nautical miles
    pub fn distance_nm(&self, latitude: f64, longitude: f64) -> f64 {
        haversine_distance_m(self.latitude, self.longitude, latitude, longitude) / METRES_PER_NM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let calc = DistanceCalculator::new(51.47, -0.4543);
        assert_eq!(calc.distance_nm(51.47, -0.4543), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // One degree of arc on a 6378 km sphere is ~111.3 km, ~60.1 nm
        let calc = DistanceCalculator::new(0.0, 0.0);
        let distance = calc.distance_nm(1.0, 0.0);
        assert!((distance - 60.1).abs() < 0.1, "distance was {}", distance);
    }
}
