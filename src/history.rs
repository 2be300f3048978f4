use crate::model::{ChartRow, Reading};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

/// Day/month and minute in local time, e.g. `15/01, 14:30`.
pub const BUCKET_LABEL_FORMAT: &str = "%d/%m, %H:%M";

struct Bucket {
    row: ChartRow,
    stamps: HashMap<String, DateTime<Utc>>,
}

/// Group one station's readings into chart rows, one per minute bucket in `tz`.
///
/// Rows are ordered by the timestamp of the first reading that opened each
/// bucket. Labels carry no year, so they are not sortable on their own.
pub fn format_series<Tz>(readings: &[Reading], tz: &Tz) -> impl Iterator<Item = ChartRow>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut buckets: Vec<Bucket> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for reading in readings {
        let label = reading
            .timestamp
            .with_timezone(tz)
            .format(BUCKET_LABEL_FORMAT)
            .to_string();

        let idx = match index.get(&label) {
            Some(&idx) => idx,
            None => {
                buckets.push(Bucket {
                    row: ChartRow {
                        label: label.clone(),
                        sort_key: reading.timestamp,
                        values: BTreeMap::new(),
                    },
                    stamps: HashMap::new(),
                });
                index.insert(label, buckets.len() - 1);
                buckets.len() - 1
            }
        };

        let bucket = &mut buckets[idx];
        let newer_exists = bucket
            .stamps
            .get(&reading.pollutant)
            .map(|seen| *seen > reading.timestamp)
            .unwrap_or(false);
        if newer_exists {
            continue;
        }
        bucket
            .stamps
            .insert(reading.pollutant.clone(), reading.timestamp);
        bucket
            .row
            .values
            .insert(reading.pollutant.clone(), reading.value);
    }

    let mut rows: Vec<ChartRow> = buckets.into_iter().map(|b| b.row).collect();
    rows.sort_by_key(|row| row.sort_key);
    rows.into_iter()
}
