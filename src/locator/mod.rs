mod change;
mod error;
mod fetcher;
pub mod normalize;
mod stream;
mod types;

pub use change::{latitude_distance, rate_of_change, ChangeTracker};
pub use error::FetchError;
pub use fetcher::{Fetch, SatLoc, DEFAULT_BASE_URL};
pub use stream::{LocationStream, StreamPhase};
pub use types::{
    ErrorRecord, LocationItem, PollConfig, PollOptions, PositionRecord, RuntimeStats, SatelliteId,
    StreamDefaults, CALCULATE_CHANGE,
};
