use super::types::PositionRecord;

/// Remembers the last good position and annotates new ones with per-second
/// rates of change relative to it.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    baseline: Option<PositionRecord>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self) -> Option<&PositionRecord> {
        self.baseline.as_ref()
    }

    /// Attaches deltas when `enabled` and a baseline exists. The record always
    /// becomes the new baseline.
    pub fn apply(&mut self, mut record: PositionRecord, enabled: bool) -> PositionRecord {
        if enabled {
            if let Some(baseline) = &self.baseline {
                let (lat_rate, lon_rate) = rate_of_change(baseline, &record);
                record.latitude_delta_per_second = Some(lat_rate);
                record.longitude_delta_per_second = Some(lon_rate);
            }
        }

        self.baseline = Some(record.clone());
        record
    }
}

/// Returns `(latitude, longitude)` degrees per second between two samples.
pub fn rate_of_change(baseline: &PositionRecord, current: &PositionRecord) -> (f64, f64) {
    // Timestamps are whole seconds from the remote service and may be far apart.
    let elapsed = current.timestamp as f64 - baseline.timestamp as f64;
    if elapsed == 0.0 {
        return (0.0, 0.0);
    }

    let lon_diff = (current.longitude - baseline.longitude).abs();
    let lat_diff = latitude_distance(baseline.latitude, current.latitude);

    (lat_diff / elapsed, lon_diff / elapsed)
}

pub fn latitude_distance(from: f64, to: f64) -> f64 {
    let direct = (to - from).abs();
    let same_hemisphere = (to > 0.0 && from > 0.0) || (to < 0.0 && from < 0.0);
    if same_hemisphere {
        return direct;
    }

    let across_pole = (180.0 - to.abs()) + (180.0 - from.abs());
    across_pole.min(direct)
}
