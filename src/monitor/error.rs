use thiserror::Error;

use crate::locator::FetchError;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor already running")]
    AlreadyRunning,
    #[error("monitor not running")]
    NotRunning,
    #[error("fetcher error: {0}")]
    Fetch(#[from] FetchError),
}
