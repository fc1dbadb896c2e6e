use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::locator::{
    Fetch, LocationItem, LocationStream, PollConfig, PositionRecord, RuntimeStats, SatLoc,
};

use super::error::MonitorError;

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub enum MonitorMode {
    Idle,
    Running {
        start: DateTime<Utc>,
        satellite: String,
        interval_ms: u64,
        paused: bool,
    },
}

#[derive(Debug, Clone)]
pub struct MonitorStatus {
    pub mode: MonitorMode,
    pub last_item: Option<LocationItem>,
    pub last_position: Option<PositionRecord>,
    pub updated_at: Option<DateTime<Utc>>,
    pub stats: RuntimeStats,
}

#[derive(Debug)]
struct Shared {
    status: MonitorStatus,
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Pause,
    Resume,
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    control_tx: mpsc::UnboundedSender<Control>,
    join: JoinHandle<()>,
}

/// Drives a [`LocationStream`] on a background task and keeps the latest
/// results around for readers.
pub struct Monitor {
    shared: Arc<StdMutex<Shared>>,
    worker: Option<WorkerHandle>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StdMutex::new(Shared {
                status: MonitorStatus {
                    mode: MonitorMode::Idle,
                    last_item: None,
                    last_position: None,
                    updated_at: None,
                    stats: RuntimeStats::default(),
                },
            })),
            worker: None,
        }
    }

    pub fn status(&self) -> MonitorStatus {
        self.shared.lock().unwrap().status.clone()
    }

    pub fn start_http(
        &mut self,
        config: PollConfig,
        base_url: &str,
        timeout: Option<Duration>,
    ) -> Result<(), MonitorError> {
        if self.worker.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let fetcher = SatLoc::with_base_url(config.satellite.clone(), base_url, timeout)?;
        self.start(LocationStream::with_fetcher(config, fetcher))
    }

    pub fn start<F: Fetch + 'static>(
        &mut self,
        stream: LocationStream<F>,
    ) -> Result<(), MonitorError> {
        if self.worker.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }

        let config = stream.config().clone();
        log::info!(
            "Starting monitor for {} every {} ms",
            config.satellite,
            config.interval_ms
        );

        {
            let mut locked = self.shared.lock().unwrap();
            locked.status.mode = MonitorMode::Running {
                start: Utc::now(),
                satellite: config.satellite.to_string(),
                interval_ms: config.interval_ms,
                paused: false,
            };
            locked.status.stats = stream.stats();
        }

        let shared = self.shared.clone();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let join = tokio::spawn(run_monitor_loop(shared, stream, control_rx, stop_rx));

        self.worker = Some(WorkerHandle {
            stop_tx,
            control_tx,
            join,
        });

        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
            log::info!("Monitor stopped");
        }
        let mut locked = self.shared.lock().unwrap();
        locked.status.mode = MonitorMode::Idle;
    }

    pub fn pause(&mut self) -> Result<(), MonitorError> {
        self.send(Control::Pause)
    }

    pub fn resume(&mut self) -> Result<(), MonitorError> {
        self.send(Control::Resume)
    }

    fn send(&mut self, control: Control) -> Result<(), MonitorError> {
        let worker = self.worker.as_ref().ok_or(MonitorError::NotRunning)?;
        worker
            .control_tx
            .send(control)
            .map_err(|_| MonitorError::NotRunning)?;

        let mut locked = self.shared.lock().unwrap();
        if let MonitorMode::Running { paused, .. } = &mut locked.status.mode {
            *paused = matches!(control, Control::Pause);
        }
        log::info!("Monitor {:?}", control);
        Ok(())
    }
}

async fn run_monitor_loop<F: Fetch + 'static>(
    shared: Arc<StdMutex<Shared>>,
    mut stream: LocationStream<F>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            Some(control) = control_rx.recv() => match control {
                Control::Pause => {
                    stream.pause();
                }
                Control::Resume => stream.resume(),
            },
            Some(item) = stream.next() => {
                let mut locked = shared.lock().unwrap();
                if let Some(position) = item.as_position() {
                    locked.status.last_position = Some(position.clone());
                }
                locked.status.last_item = Some(item);
                locked.status.updated_at = Some(Utc::now());
                locked.status.stats = stream.stats();
            }
        }
    }

    let mut locked = shared.lock().unwrap();
    locked.status.mode = MonitorMode::Idle;
    locked.status.stats = stream.stats();
}
