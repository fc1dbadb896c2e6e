use futures_util::future::BoxFuture;
use futures_util::Stream;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll, Waker};
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

use super::change::ChangeTracker;
use super::error::FetchError;
use super::fetcher::{Fetch, SatLoc};
use super::normalize;
use super::types::{LocationItem, PollConfig, PositionRecord, RuntimeStats, StreamDefaults};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Waiting,
    Fetching,
    Delivering,
}

enum State {
    Idle,
    Waiting(Pin<Box<Sleep>>),
    Fetching {
        issued: Instant,
        request: BoxFuture<'static, Result<String, FetchError>>,
    },
    Delivering,
}

/// Pull-driven stream of satellite positions.
///
/// Each poll waits `interval - lag` (never negative), where lag is the
/// round-trip time of the previous request, then issues exactly one fetch.
/// Failures are yielded as [`LocationItem::Error`]; the stream never ends.
pub struct LocationStream<F> {
    config: PollConfig,
    fetcher: Arc<F>,
    state: State,
    paused: bool,
    waker: Option<Waker>,
    stats: RuntimeStats,
    change: ChangeTracker,
}

impl LocationStream<SatLoc> {
    pub fn new(config: PollConfig) -> Result<Self, FetchError> {
        let fetcher = SatLoc::new(config.satellite.clone())?;
        Ok(Self::with_fetcher(config, fetcher))
    }

    /// Resolves loose arguments the same way the CLI and config file do.
    pub fn connect(
        id: Option<&str>,
        interval_ms: Option<u64>,
        options: Option<&Map<String, Value>>,
    ) -> Result<Self, FetchError> {
        let defaults = StreamDefaults::default();
        Self::new(PollConfig::resolve(&defaults, id, interval_ms, options))
    }
}

impl<F: Fetch + 'static> LocationStream<F> {
    pub fn with_fetcher(config: PollConfig, fetcher: F) -> Self {
        Self {
            config,
            fetcher: Arc::new(fetcher),
            state: State::Idle,
            paused: false,
            waker: None,
            stats: RuntimeStats::default(),
            change: ChangeTracker::new(),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    pub fn baseline(&self) -> Option<&PositionRecord> {
        self.change.baseline()
    }

    pub fn phase(&self) -> StreamPhase {
        match self.state {
            State::Idle => StreamPhase::Idle,
            State::Waiting(_) => StreamPhase::Waiting,
            State::Fetching { .. } => StreamPhase::Fetching,
            State::Delivering => StreamPhase::Delivering,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// How long to wait before the next request.
    pub fn adjust_for_lag(&self) -> Duration {
        let wait = self
            .config
            .interval_ms
            .saturating_sub(self.stats.last_observed_lag_ms);
        Duration::from_millis(wait)
    }

    /// Stops scheduling new requests. A request already in flight is still
    /// delivered. Returns whether an armed timer was disarmed.
    pub fn pause(&mut self) -> bool {
        self.paused = true;
        match self.state {
            State::Waiting(_) => {
                log::debug!("Disarming poll timer for {}", self.config.satellite);
                self.state = State::Idle;
                true
            }
            State::Delivering => {
                self.state = State::Idle;
                false
            }
            State::Idle | State::Fetching { .. } => false,
        }
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    fn issue_request(&mut self) {
        self.stats.requests_issued += 1;
        let fetcher = Arc::clone(&self.fetcher);
        self.state = State::Fetching {
            issued: Instant::now(),
            request: Box::pin(async move { fetcher.fetch().await }),
        };
    }

    fn resolve(&mut self, result: Result<String, FetchError>, issued: Instant) -> LocationItem {
        self.stats.last_observed_lag_ms = issued.elapsed().as_millis() as u64;
        log::debug!(
            "Request {} for {} resolved after {} ms",
            self.stats.requests_issued,
            self.config.satellite,
            self.stats.last_observed_lag_ms
        );

        let item = match result {
            Ok(body) => self.interpret(&body),
            Err(err) => LocationItem::Error(normalize::from_transport(&err)),
        };

        if let LocationItem::Error(record) = &item {
            log::warn!("{}: {} ({})", self.config.satellite, record.message, record.error);
        }
        item
    }

    fn interpret(&mut self, body: &str) -> LocationItem {
        let payload: Value = match serde_json::from_str(body) {
            Ok(payload) => payload,
            Err(err) => return LocationItem::Error(normalize::from_parse(&err)),
        };

        let payload = match normalize::screen_payload(payload) {
            Ok(payload) => payload,
            Err(record) => return LocationItem::Error(record),
        };

        let record: PositionRecord = match serde_json::from_value(payload) {
            Ok(record) => record,
            Err(err) => return LocationItem::Error(normalize::from_decode(&err)),
        };

        self.stats.responses_received += 1;
        let record = self
            .change
            .apply(record, self.config.options.calculate_change());
        LocationItem::Position(record)
    }
}

impl<F: Fetch + 'static> Stream for LocationStream<F> {
    type Item = LocationItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                State::Fetching { issued, request } => {
                    let result = ready!(request.as_mut().poll(cx));
                    let issued = *issued;
                    let item = this.resolve(result, issued);
                    this.state = if this.paused {
                        State::Idle
                    } else {
                        State::Delivering
                    };
                    return Poll::Ready(Some(item));
                }
                _ if this.paused => {
                    this.waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
                State::Idle | State::Delivering => {
                    let wait = this.adjust_for_lag();
                    log::debug!("Next poll for {} in {:?}", this.config.satellite, wait);
                    this.state = State::Waiting(Box::pin(sleep(wait)));
                }
                State::Waiting(timer) => {
                    ready!(timer.as_mut().poll(cx));
                    this.issue_request();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::locator::{ErrorRecord, PollOptions, SatelliteId};

    enum Reply {
        Body(&'static str),
        Fail,
    }

    /// Replies from a script, each after a fixed simulated round-trip.
    struct ScriptedFetcher {
        replies: Mutex<VecDeque<(u64, Reply)>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedFetcher {
        fn new(replies: Vec<(u64, Reply)>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let fetcher = Self {
                replies: Mutex::new(replies.into()),
                calls: calls.clone(),
            };
            (fetcher, calls)
        }
    }

    #[async_trait]
    impl Fetch for ScriptedFetcher {
        async fn fetch(&self) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            let (delay_ms, reply) = next.unwrap_or((0, Reply::Body(r#"{"timestamp":0,"latitude":0,"longitude":0}"#)));
            sleep(Duration::from_millis(delay_ms)).await;
            match reply {
                Reply::Body(body) => Ok(body.to_string()),
                Reply::Fail => Err(FetchError::Connect("connection refused".into())),
            }
        }
    }

    fn config(interval_ms: u64, calculate_change: bool) -> PollConfig {
        PollConfig {
            satellite: SatelliteId::resolve(&StreamDefaults::default(), None),
            interval_ms,
            options: PollOptions {
                calculate_change: Some(calculate_change),
            },
        }
    }

    fn stream_with(
        interval_ms: u64,
        calculate_change: bool,
        replies: Vec<(u64, Reply)>,
    ) -> (LocationStream<ScriptedFetcher>, Arc<AtomicUsize>) {
        let (fetcher, calls) = ScriptedFetcher::new(replies);
        (
            LocationStream::with_fetcher(config(interval_ms, calculate_change), fetcher),
            calls,
        )
    }

    fn error_of(item: LocationItem) -> ErrorRecord {
        match item {
            LocationItem::Error(record) => record,
            other => panic!("expected error item, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn adjust_for_lag_never_goes_negative() {
        let (mut stream, _) = stream_with(10, false, vec![]);

        stream.stats.last_observed_lag_ms = 5;
        assert_eq!(stream.adjust_for_lag(), Duration::from_millis(5));

        stream.stats.last_observed_lag_ms = 15;
        assert_eq!(stream.adjust_for_lag(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn first_item_arrives_after_one_interval() {
        let (mut stream, calls) = stream_with(
            1000,
            false,
            vec![(0, Reply::Body(r#"{"timestamp":1,"latitude":1.5,"longitude":2.5}"#))],
        );
        let start = Instant::now();

        let item = stream.next().await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert_eq!(item.as_position().map(|p| p.latitude), Some(1.5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stream.phase(), StreamPhase::Delivering);
    }

    #[tokio::test(start_paused = true)]
    async fn lag_shortens_next_wait() {
        let body = r#"{"timestamp":1,"latitude":1,"longitude":1}"#;
        let (mut stream, _) =
            stream_with(1000, false, vec![(300, Reply::Body(body)), (0, Reply::Body(body))]);

        let start = Instant::now();
        stream.next().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1300));
        assert_eq!(stream.stats().last_observed_lag_ms, 300);

        let second = Instant::now();
        stream.next().await.unwrap();
        // 700 ms wait plus an instant reply
        assert_eq!(second.elapsed(), Duration::from_millis(700));
        assert_eq!(stream.stats().last_observed_lag_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lag_beyond_interval_polls_immediately() {
        let body = r#"{"timestamp":1,"latitude":1,"longitude":1}"#;
        let (mut stream, _) =
            stream_with(500, false, vec![(800, Reply::Body(body)), (0, Reply::Body(body))]);

        stream.next().await.unwrap();
        assert_eq!(stream.adjust_for_lag(), Duration::ZERO);

        let second = Instant::now();
        stream.next().await.unwrap();
        assert_eq!(second.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn counters_follow_outcomes() {
        let (mut stream, _) = stream_with(
            500,
            true,
            vec![
                (10, Reply::Body(r#"{"timestamp":5,"latitude":99,"longitude":23}"#)),
                (20, Reply::Body("<html>oops</html>")),
                (30, Reply::Body(r#"{"error":"not found","status":404}"#)),
                (40, Reply::Fail),
                (50, Reply::Body(r#"{"mockProperty":"mockValue"}"#)),
                (60, Reply::Body(r#"{"timestamp":8,"latitude":-3,"longitude":-1}"#)),
            ],
        );

        let first = stream.next().await.unwrap();
        assert!(!first.is_error());
        assert_eq!(stream.stats().responses_received, 1);

        let parse = error_of(stream.next().await.unwrap());
        assert_eq!(parse.error, json!("parse"));
        assert_eq!(stream.stats().last_observed_lag_ms, 20);

        let remote = error_of(stream.next().await.unwrap());
        assert_eq!(remote.error, json!(404));
        assert_eq!(remote.message, "not found");
        assert_eq!(remote.detail.as_deref(), Some(normalize::REMOTE_ERROR_DETAIL));

        let transport = error_of(stream.next().await.unwrap());
        assert_eq!(transport.error, json!("connect"));
        assert_eq!(
            transport.detail.as_deref(),
            Some(normalize::CONNECTION_ERROR_DETAIL)
        );
        assert_eq!(stream.stats().last_observed_lag_ms, 40);

        let decode = error_of(stream.next().await.unwrap());
        assert_eq!(decode.error, json!("decode"));

        assert_eq!(stream.stats().requests_issued, 5);
        assert_eq!(stream.stats().responses_received, 1);
        assert_eq!(stream.baseline().map(|b| b.timestamp), Some(5));

        let last = stream.next().await.unwrap();
        let position = last.as_position().unwrap();
        assert_eq!(position.latitude_delta_per_second, Some(34.0));
        assert_eq!(position.longitude_delta_per_second, Some(8.0));
        assert_eq!(stream.stats().requests_issued, 6);
        assert_eq!(stream.stats().responses_received, 2);
        assert_eq!(stream.baseline().map(|b| b.timestamp), Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn deltas_only_when_enabled() {
        let (mut stream, _) = stream_with(
            500,
            false,
            vec![
                (0, Reply::Body(r#"{"timestamp":5,"latitude":10,"longitude":10}"#)),
                (0, Reply::Body(r#"{"timestamp":6,"latitude":11,"longitude":11}"#)),
            ],
        );

        stream.next().await.unwrap();
        let second = stream.next().await.unwrap();

        let position = second.as_position().unwrap();
        assert_eq!(position.latitude_delta_per_second, None);
        assert_eq!(position.longitude_delta_per_second, None);
        assert_eq!(stream.baseline().map(|b| b.timestamp), Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_disarms_armed_timer() {
        let (mut stream, calls) = stream_with(1000, false, vec![]);

        // Poll once so the timer is armed, then give up on the item.
        assert!(futures_util::poll!(stream.next()).is_pending());
        assert_eq!(stream.phase(), StreamPhase::Waiting);

        assert!(stream.pause());
        assert!(stream.is_paused());
        assert_eq!(stream.phase(), StreamPhase::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(futures_util::poll!(stream.next()).is_pending());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(stream.stats().requests_issued, 0);
    }

    #[tokio::test]
    async fn pause_when_idle_is_a_noop() {
        let (mut stream, _) = stream_with(1000, false, vec![]);

        assert!(!stream.pause());
        assert!(!stream.pause());
        assert!(stream.is_paused());
        assert_eq!(stream.phase(), StreamPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_wakes_parked_consumer() {
        let (mut stream, calls) = stream_with(
            1000,
            false,
            vec![(0, Reply::Body(r#"{"timestamp":1,"latitude":1,"longitude":1}"#))],
        );
        stream.pause();
        assert!(futures_util::poll!(stream.next()).is_pending());

        stream.resume();
        let start = Instant::now();
        let item = stream.next().await.unwrap();

        assert!(!item.is_error());
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_request_survives_pause() {
        let (mut stream, _) = stream_with(
            500,
            false,
            vec![(200, Reply::Body(r#"{"timestamp":1,"latitude":1,"longitude":1}"#))],
        );

        // Advance past the timer into the request.
        let mut next = stream.next();
        assert!(futures_util::poll!(&mut next).is_pending());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(futures_util::poll!(&mut next).is_pending());
        drop(next);
        assert_eq!(stream.phase(), StreamPhase::Fetching);

        assert!(!stream.pause());
        let item = stream.next().await.unwrap();
        assert!(!item.is_error());
        assert!(stream.is_paused());

        // Nothing further is scheduled while paused.
        assert!(futures_util::poll!(stream.next()).is_pending());
        assert_eq!(stream.phase(), StreamPhase::Idle);
        assert_eq!(stream.stats().requests_issued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_after_delivery_returns_to_idle() {
        let (mut stream, calls) = stream_with(
            500,
            false,
            vec![(0, Reply::Body(r#"{"timestamp":1,"latitude":1,"longitude":1}"#))],
        );

        stream.next().await.unwrap();
        assert_eq!(stream.phase(), StreamPhase::Delivering);

        assert!(!stream.pause());
        assert_eq!(stream.phase(), StreamPhase::Idle);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(futures_util::poll!(stream.next()).is_pending());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn falsy_error_field_still_yields_position() {
        let (mut stream, _) = stream_with(
            500,
            false,
            vec![(
                0,
                Reply::Body(
                    r#"{"timestamp":1,"latitude":1,"longitude":2,"error":"","message":"ok"}"#,
                ),
            )],
        );

        let item = stream.next().await.unwrap();

        let position = item.as_position().unwrap();
        assert_eq!(position.longitude, 2.0);
        assert_eq!(position.extra.get("message"), Some(&json!("ok")));
        assert_eq!(stream.stats().responses_received, 1);
    }

    #[test]
    fn connect_resolves_loose_arguments() {
        let opts = json!({ "calculateChange": "yes", "bogusOption": true });

        let stream =
            LocationStream::connect(Some("bogus"), Some(10), opts.as_object()).unwrap();

        assert_eq!(stream.config().satellite.as_str(), "25544");
        assert_eq!(stream.config().interval_ms, 1000);
        assert_eq!(stream.config().options.calculate_change, Some(true));
        assert_eq!(
            serde_json::to_value(&stream.config().options).unwrap(),
            json!({ "calculateChange": true })
        );
        assert_eq!(stream.stats(), RuntimeStats::default());
        assert_eq!(stream.phase(), StreamPhase::Idle);
        assert!(stream.baseline().is_none());
    }
}
