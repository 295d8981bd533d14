//! Cached host metrics, refreshed by a background ticker.

use serde::Serialize;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemStats {
    pub load_average: [f64; 3],
    pub memory_total_kb: u64,
    pub memory_available_kb: u64,
    pub uptime_secs: u64,
    pub cpu_count: usize,
    /// RFC 3339 time of the last refresh; empty before the first one.
    pub refreshed_at: String,
}

impl SystemStats {
    /// One-off snapshot with a fresh `System`.
    pub fn collect() -> Self {
        Self::collect_from(&mut System::new())
    }

    /// Refresh memory on `sys` and read load, uptime and memory from it.
    /// Values the platform does not report stay at zero.
    pub fn collect_from(sys: &mut System) -> Self {
        sys.refresh_memory();
        let load = System::load_average();
        Self {
            load_average: [load.one, load.five, load.fifteen],
            memory_total_kb: sys.total_memory() / 1024,
            memory_available_kb: sys.available_memory() / 1024,
            uptime_secs: System::uptime(),
            cpu_count: std::thread::available_parallelism().map_or(1, usize::from),
            refreshed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Background thread that calls `tick` every `interval` until stopped.
///
/// Stopping drops the channel sender; the thread sees the disconnect on its
/// next `recv_timeout` and is joined. Dropping the ticker stops it.
pub struct MetricsTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsTicker {
    pub fn start(interval: Duration, mut tick: impl FnMut() + Send + 'static) -> Self {
        let (stop, stop_rx) = channel::<()>();
        let handle = std::thread::spawn(move || {
            tick();
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("metrics ticker stopped");
        });
        Self {
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Refresh `stats` on every tick, then run `also`. One `System` is kept
    /// for the ticker's lifetime.
    pub fn system(
        interval: Duration,
        stats: Arc<RwLock<SystemStats>>,
        mut also: impl FnMut() + Send + 'static,
    ) -> Self {
        let mut sys = System::new();
        Self::start(interval, move || {
            let fresh = SystemStats::collect_from(&mut sys);
            *stats.write().unwrap_or_else(PoisonError::into_inner) = fresh;
            also();
        })
    }

    pub fn shutdown(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("metrics ticker panicked");
            }
        }
    }
}

impl Drop for MetricsTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
