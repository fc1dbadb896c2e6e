use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::normalize::is_truthy;

pub const CALCULATE_CHANGE: &str = "calculateChange";

/// Fixed settings every stream is resolved against.
#[derive(Debug, Clone)]
pub struct StreamDefaults {
    pub valid_ids: &'static [&'static str],
    pub default_id: &'static str,
    pub default_interval_ms: u64,
    pub interval_min_ms: u64,
    pub supported_options: &'static [&'static str],
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            valid_ids: &["25544"],
            default_id: "25544",
            default_interval_ms: 1000,
            interval_min_ms: 500,
            supported_options: &[CALCULATE_CHANGE],
        }
    }
}

impl StreamDefaults {
    /// Intervals under the floor (zero included) or missing fall back to the default.
    pub fn resolve_interval(&self, interval_ms: Option<u64>) -> u64 {
        match interval_ms {
            Some(ms) if ms > 0 && ms >= self.interval_min_ms => ms,
            _ => self.default_interval_ms,
        }
    }
}

/// NORAD catalog number of a supported satellite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SatelliteId(String);

impl SatelliteId {
    pub fn resolve(defaults: &StreamDefaults, id: Option<&str>) -> Self {
        let id = id
            .and_then(|id| defaults.valid_ids.iter().find(|valid| **valid == id))
            .copied()
            .unwrap_or(defaults.default_id);
        SatelliteId(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SatelliteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollOptions {
    #[serde(rename = "calculateChange", skip_serializing_if = "Option::is_none")]
    pub calculate_change: Option<bool>,
}

impl PollOptions {
    /// Keeps only the flags listed in `defaults`, coercing their values to bool.
    pub fn from_map(defaults: &StreamDefaults, opts: &Map<String, Value>) -> Self {
        let mut options = PollOptions::default();

        for (flag, value) in opts {
            if !defaults.supported_options.contains(&flag.as_str()) {
                log::debug!("Dropping unrecognized stream option {}", flag);
                continue;
            }
            if flag == CALCULATE_CHANGE {
                options.calculate_change = Some(is_truthy(value));
            }
        }

        options
    }

    pub fn calculate_change(&self) -> bool {
        self.calculate_change.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub satellite: SatelliteId,
    pub interval_ms: u64,
    pub options: PollOptions,
}

impl PollConfig {
    pub fn resolve(
        defaults: &StreamDefaults,
        id: Option<&str>,
        interval_ms: Option<u64>,
        options: Option<&Map<String, Value>>,
    ) -> Self {
        Self {
            satellite: SatelliteId::resolve(defaults, id),
            interval_ms: defaults.resolve_interval(interval_ms),
            options: options
                .map(|opts| PollOptions::from_map(defaults, opts))
                .unwrap_or_default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::resolve(&StreamDefaults::default(), None, None, None)
    }
}

/// A position sample as reported by the remote service. Fields other than the
/// three used for rate computation are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    #[serde(deserialize_with = "whole_seconds")]
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(
        rename = "latitudeDeltaPerSecond",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub latitude_delta_per_second: Option<f64>,
    #[serde(
        rename = "longitudeDeltaPerSecond",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub longitude_delta_per_second: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accepts integral and floating point timestamps, truncating to whole seconds.
fn whole_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let number = serde_json::Number::deserialize(deserializer)?;
    number
        .as_i64()
        .or_else(|| number.as_f64().filter(|secs| secs.is_finite()).map(|secs| secs as i64))
        .ok_or_else(|| D::Error::custom(format!("timestamp {} is not representable", number)))
}

impl PositionRecord {
    pub fn new(timestamp: i64, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            latitude_delta_per_second: None,
            longitude_delta_per_second: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub error: Value,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Stream output. Built by the stream, never parsed back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LocationItem {
    Error(ErrorRecord),
    Position(PositionRecord),
}

impl LocationItem {
    pub fn is_error(&self) -> bool {
        matches!(self, LocationItem::Error(_))
    }

    pub fn as_position(&self) -> Option<&PositionRecord> {
        match self {
            LocationItem::Position(record) => Some(record),
            LocationItem::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStats {
    pub requests_issued: u64,
    pub responses_received: u64,
    pub last_observed_lag_ms: u64,
}
