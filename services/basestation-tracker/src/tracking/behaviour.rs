//! Flight behaviour classification from altitude deltas

use super::AircraftBehaviour;

/// Fewest deltas needed before a behaviour other than Unknown is reported
const MINIMUM_SAMPLES: usize = 3;

/// Classify a rolling history of altitude deltas
///
/// The mean is truncated toward zero, so small oscillations around level
/// flight are reported as `LevelFlight` rather than a climb or descent.
pub fn assess<'a>(history: impl IntoIterator<Item = &'a f64>) -> AircraftBehaviour {
    let (count, sum) = history
        .into_iter()
        .fold((0usize, 0.0f64), |(count, sum), delta| (count + 1, sum + delta));

    if count < MINIMUM_SAMPLES {
        return AircraftBehaviour::Unknown;
    }

    let mean = (sum / count as f64).trunc();
    if mean < 0.0 {
        AircraftBehaviour::Descending
    } else if mean > 0.0 {
        AircraftBehaviour::Climbing
    } else {
        AircraftBehaviour::LevelFlight
    }
}
