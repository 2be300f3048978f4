use crate::model::{PollutantReading, Reading, StationSnapshot};
use std::collections::HashMap;
use tracing::debug;

/// Station snapshots in first-seen order, indexed by station id.
///
/// Order is part of the contract: the nearest-station tie-break picks the
/// first station in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stations {
    snapshots: Vec<StationSnapshot>,
    index: HashMap<String, usize>,
}

impl Stations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get(&self, station_id: &str) -> Option<&StationSnapshot> {
        self.index.get(station_id).map(|&i| &self.snapshots[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationSnapshot> {
        self.snapshots.iter()
    }

    /// Snapshots that can be placed on a map.
    pub fn located(&self) -> impl Iterator<Item = &StationSnapshot> {
        self.snapshots
            .iter()
            .filter(|s| s.location.map(|p| p.is_finite()).unwrap_or(false))
    }

    pub fn into_vec(self) -> Vec<StationSnapshot> {
        self.snapshots
    }

    fn entry_for(&mut self, reading: &Reading) -> &mut StationSnapshot {
        let next = self.snapshots.len();
        let idx = *self
            .index
            .entry(reading.station_id.clone())
            .or_insert(next);
        if idx == next {
            self.snapshots.push(StationSnapshot::seeded_from(reading));
        }
        &mut self.snapshots[idx]
    }

    /// Merge one reading. A stored value is replaced unless it is strictly newer.
    pub fn merge(&mut self, reading: &Reading) {
        let snapshot = self.entry_for(reading);
        let candidate = PollutantReading {
            value: reading.value,
            unit: reading.unit.clone(),
            timestamp: reading.timestamp,
        };

        match snapshot.latest_by_pollutant.get_mut(&reading.pollutant) {
            Some(current) if current.timestamp > candidate.timestamp => {
                debug!(
                    "Ignoring out-of-order {} reading for station {} ({} < {})",
                    reading.pollutant, reading.station_id, candidate.timestamp, current.timestamp
                );
            }
            Some(current) => *current = candidate,
            None => {
                snapshot
                    .latest_by_pollutant
                    .insert(reading.pollutant.clone(), candidate);
            }
        }
    }
}

impl<'a> FromIterator<&'a Reading> for Stations {
    fn from_iter<I: IntoIterator<Item = &'a Reading>>(iter: I) -> Self {
        let mut stations = Stations::new();
        for reading in iter {
            stations.merge(reading);
        }
        stations
    }
}

/// Group a flat reading batch into one snapshot per station.
pub fn aggregate(readings: &[Reading]) -> Stations {
    let stations: Stations = readings.iter().collect();
    debug!(
        "Aggregated {} readings into {} stations",
        readings.len(),
        stations.len()
    );
    stations
}
