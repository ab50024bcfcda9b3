//! Background modem monitor.
//!
//! A single tokio task polls the [`Modem`] on a fixed interval and keeps the
//! last snapshot behind a lock, so readers never wait on serial I/O. Each
//! snapshot is also pushed onto a small bounded queue for streaming consumers
//! (the dashboard event stream, `ec25-router monitor`); when the queue is
//! full the oldest entry is discarded.
//!
//! Lifecycle:
//!
//! ```text
//! Stopped --start(enabled)--> Running+Enabled  <--set_enabled--> Running+Disabled
//!    ^                               |                                  |
//!    +------------stop()-------------+----------------------------------+
//! ```
//!
//! Serial reads are blocking, so every poll cycle runs on
//! `spawn_blocking`. `stop()` signals the task and waits a bounded time; it
//! cannot interrupt an exchange already in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::metrics;
use crate::modem::transport::{AtTransport, CommandChannel};
use crate::modem::{Modem, NetworkInfo, SignalReading};

/// Idle re-check period while polling is disabled.
pub const DISABLED_RECHECK: Duration = Duration::from_secs(1);

/// Point-in-time view of the modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub signal: SignalReading,
    pub network: NetworkInfo,
    pub timestamp: DateTime<Utc>,
    pub enabled: bool,
    pub detected: bool,
}

impl MonitorSnapshot {
    /// All fields `N/A`, used whenever no modem answers.
    pub fn placeholder(enabled: bool) -> Self {
        Self {
            signal: SignalReading::default(),
            network: NetworkInfo::default(),
            timestamp: Utc::now(),
            enabled,
            detected: false,
        }
    }
}

/// Fixed-capacity FIFO that never blocks the producer: pushing onto a full
/// queue evicts exactly one entry from the front.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `item`; returns `true` if an old entry was evicted.
    pub fn push(&self, item: T) -> bool {
        let dropped = {
            let mut items = self.lock();
            let dropped = if items.len() >= self.capacity {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(item);
            dropped
        };
        self.notify.notify_waiters();
        dropped
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Wait for the next entry.
    pub async fn recv(&self) -> T {
        loop {
            // registered before the check so a push in between is not missed
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub type SnapshotQueue = BoundedQueue<MonitorSnapshot>;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub history_capacity: usize,
    pub stop_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            history_capacity: 10,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

struct Shared {
    current: RwLock<MonitorSnapshot>,
    history: Arc<SnapshotQueue>,
    enabled: AtomicBool,
}

impl Shared {
    fn publish(&self, snapshot: MonitorSnapshot) {
        {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            *current = snapshot.clone();
        }
        if self.history.push(snapshot) {
            metrics::inc_history_drops();
            debug!("monitor history full; dropped oldest snapshot");
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

/// Owns the polling task and the shared snapshot. Create one per process and
/// hand out `Arc<ModemMonitor>` to whatever serves the dashboard.
pub struct ModemMonitor<C = AtTransport> {
    modem: Arc<Modem<C>>,
    settings: MonitorSettings,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl<C: CommandChannel + 'static> ModemMonitor<C> {
    pub fn new(modem: Arc<Modem<C>>, settings: MonitorSettings) -> Self {
        let shared = Shared {
            current: RwLock::new(MonitorSnapshot::placeholder(false)),
            history: Arc::new(BoundedQueue::new(settings.history_capacity)),
            enabled: AtomicBool::new(false),
        };
        Self {
            modem,
            settings,
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    pub fn modem(&self) -> &Arc<Modem<C>> {
        &self.modem
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the polling task. Must be called from within a tokio runtime.
    /// Returns `false` if the monitor is already running. A zero interval is
    /// replaced by the configured one.
    pub fn start(&self, interval: Duration, enabled: bool) -> bool {
        let interval = if interval.is_zero() {
            warn!(
                "Zero monitor interval requested; using {:?}",
                self.settings.interval
            );
            self.settings.interval
        } else {
            interval
        };
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            warn!("Modem monitor already running");
            return false;
        }
        self.shared.enabled.store(enabled, Ordering::SeqCst);
        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.modem.clone(),
            self.shared.clone(),
            interval,
            cancel_rx,
        ));
        *worker = Some(Worker { handle, cancel });
        info!(
            "Modem monitor started (interval {:?}, enabled={})",
            interval, enabled
        );
        true
    }

    /// Start with the configured interval.
    pub fn start_default(&self, enabled: bool) -> bool {
        self.start(self.settings.interval, enabled)
    }

    /// Signal the task and wait up to the configured timeout. Returns `false`
    /// if the task did not finish in time; it is detached either way and the
    /// monitor reports not running. Stopping a stopped monitor is a no-op.
    pub async fn stop(&self) -> bool {
        let worker = self.lock_worker().take();
        let Some(worker) = worker else {
            debug!("Modem monitor not running; stop ignored");
            return true;
        };
        info!("Stopping modem monitor...");
        let _ = worker.cancel.send(true);
        match tokio::time::timeout(self.settings.stop_timeout, worker.handle).await {
            Ok(Ok(())) => {
                info!("Modem monitor stopped");
                true
            }
            Ok(Err(e)) => {
                error!("Modem monitor task ended abnormally: {}", e);
                true
            }
            Err(_) => {
                error!(
                    "Modem monitor did not stop within {:?}",
                    self.settings.stop_timeout
                );
                false
            }
        }
    }

    /// Toggle polling without touching the task.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::SeqCst);
        info!(
            "Modem monitor {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// Copy of the last published snapshot. Never touches the serial port.
    pub fn latest(&self) -> MonitorSnapshot {
        self.shared
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Queue of recent snapshots for streaming consumers.
    pub fn history(&self) -> Arc<SnapshotQueue> {
        self.shared.history.clone()
    }
}

/// One poll cycle. Blocking.
fn poll_once<C: CommandChannel>(modem: &Modem<C>) -> MonitorSnapshot {
    if !modem.is_detected() {
        return MonitorSnapshot::placeholder(true);
    }
    let signal = modem.signal();
    let network = modem.network_info();
    MonitorSnapshot {
        signal,
        network,
        timestamp: Utc::now(),
        enabled: true,
        detected: true,
    }
}

async fn run_loop<C: CommandChannel + 'static>(
    modem: Arc<Modem<C>>,
    shared: Arc<Shared>,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    debug!("monitor loop entered");
    loop {
        if *cancel.borrow() {
            break;
        }
        let wait = if shared.enabled.load(Ordering::SeqCst) {
            metrics::inc_poll_cycles();
            let modem = modem.clone();
            match tokio::task::spawn_blocking(move || poll_once(&modem)).await {
                Ok(snapshot) => {
                    debug!(
                        "modem snapshot: detected={} csq={} operator={}",
                        snapshot.detected,
                        snapshot.signal.csq,
                        snapshot.network.operator_label()
                    );
                    shared.publish(snapshot);
                }
                Err(e) => {
                    metrics::inc_poll_failures();
                    error!("Modem poll cycle failed: {}", e);
                }
            }
            interval
        } else {
            DISABLED_RECHECK
        };
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = cancel.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("monitor loop terminated");
}
