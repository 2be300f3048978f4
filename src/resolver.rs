//! Nearest-station lookup for arbitrary coordinates.
//!
//! Distances are planar (`sqrt(dLat² + dLon²)` in degrees), which is good
//! enough to pick the closest station within a region but is not a geodesic
//! distance and should not be read as one.

use crate::aggregate::Stations;
use crate::model::{GeoPoint, StationSnapshot};

pub fn planar_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    ((a.lat - b.lat).powi(2) + (a.lon - b.lon).powi(2)).sqrt()
}

/// Closest located station to `(lat, lon)`, or `None` when no station has
/// usable coordinates. Ties go to the station seen first.
pub fn resolve(lat: f64, lon: f64, stations: &Stations) -> Option<&StationSnapshot> {
    let query = GeoPoint::new(lat, lon);
    if !query.is_finite() {
        return None;
    }

    let mut best: Option<(&StationSnapshot, f64)> = None;
    for snapshot in stations.located() {
        let Some(location) = snapshot.location else {
            continue;
        };
        let distance = planar_distance(query, location);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((snapshot, distance)),
        }
    }

    best.map(|(snapshot, _)| snapshot)
}
