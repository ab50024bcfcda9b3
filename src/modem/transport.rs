//! AT command transport: serial port discovery and one-command-at-a-time
//! request/response framing.
//!
//! The EC25 exposes several ttyUSB interfaces and only one of them answers AT
//! commands, and which one depends on the USB composition in use. Discovery
//! probes candidates with a bare `AT` and caches the winner for a short
//! window; every exchange reopens the device so other processes (ModemManager,
//! a PPP dialer) can use it in between.
//!
//! The serial layer sits behind [`SerialBackend`]/[`SerialLink`] so the
//! framing logic can be driven by scripted links in tests; [`SystemSerial`]
//! is the real implementation on top of the `serialport` crate.

use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use serde::Serialize;

use super::ModemError;
use crate::logutil::{escape_log, summarize_response, MAX_PREVIEW};
use crate::metrics;

/// One open serial connection.
pub trait SerialLink: Send {
    /// Discard anything pending in the input and output buffers.
    fn clear(&mut self) -> io::Result<()>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    /// Read whatever is available. A read timeout is reported as `Ok(0)`.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Enumerates and opens serial devices.
pub trait SerialBackend: Send + Sync {
    /// Device paths matching `pattern`, in any order.
    fn enumerate(&self, pattern: &str) -> Vec<String>;
    /// Open `path` at `baud_rate` with flow control off; `timeout` bounds each
    /// individual read or write.
    fn open(&self, path: &str, baud_rate: u32, timeout: Duration)
        -> io::Result<Box<dyn SerialLink>>;
}

/// Anything that can resolve the modem and run a single AT command. The
/// [`Modem`](super::Modem) facade is written against this so it can be
/// exercised without hardware.
pub trait CommandChannel: Send + Sync {
    fn find_port(&self, force_refresh: bool) -> Option<PortHandle>;
    fn send(&self, command: &str) -> Result<AtExchange, ModemError>;
}

/// A discovered AT port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortHandle {
    pub path: String,
    pub discovered_at: DateTime<Utc>,
    #[serde(skip)]
    probed_at: Instant,
}

impl PortHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            discovered_at: Utc::now(),
            probed_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.probed_at.elapsed()
    }
}

/// Outcome of one command/response round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtExchange {
    pub command: String,
    pub response: String,
    /// Response contains `OK`.
    pub ok: bool,
    /// Response contains `ERROR` (including `+CME ERROR`).
    pub error: bool,
    /// Read iterations used before the response was complete.
    pub attempts: u32,
}

impl AtExchange {
    fn new(command: &str, response: String, attempts: u32) -> Self {
        Self {
            command: command.to_string(),
            ok: response.contains("OK"),
            error: response.contains("ERROR"),
            response,
            attempts,
        }
    }

    /// The modem answered with a final result code.
    pub fn is_complete(&self) -> bool {
        self.ok || self.error
    }
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Device path pattern, e.g. `/dev/ttyUSB*`.
    pub port_glob: String,
    /// Paths probed first, in this order, when present.
    pub priority_ports: Vec<String>,
    pub baud_rate: u32,
    /// Total read budget for the discovery probe.
    pub probe_timeout: Duration,
    /// Total read budget for a command.
    pub command_timeout: Duration,
    pub cache_ttl: Duration,
    /// Delay between writing a command and the first read.
    pub settle_delay: Duration,
    pub probe_read_attempts: u32,
    pub command_read_attempts: u32,
    /// Pause between read iterations.
    pub read_interval: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            port_glob: "/dev/ttyUSB*".to_string(),
            priority_ports: vec!["/dev/ttyUSB2".to_string(), "/dev/ttyUSB3".to_string()],
            baud_rate: 115_200,
            probe_timeout: Duration::from_millis(1000),
            command_timeout: Duration::from_millis(2000),
            cache_ttl: Duration::from_secs(30),
            settle_delay: Duration::from_millis(400),
            probe_read_attempts: 3,
            command_read_attempts: 5,
            read_interval: Duration::from_millis(100),
        }
    }
}

/// Per-read timeout so that `attempts` reads stay within `budget`.
fn per_read_timeout(budget: Duration, attempts: u32) -> Duration {
    (budget / attempts.max(1)).max(Duration::from_millis(50))
}

/// Priority paths that actually exist go first (deduplicated, in the order
/// given), then every other match in lexicographic order.
pub fn order_candidates(priority: &[String], discovered: Vec<String>) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(discovered.len());
    for p in priority {
        if discovered.contains(p) && !ordered.contains(p) {
            ordered.push(p.clone());
        }
    }
    let mut rest: Vec<String> = discovered
        .into_iter()
        .filter(|p| !ordered.contains(p))
        .collect();
    rest.sort();
    rest.dedup();
    ordered.extend(rest);
    ordered
}

/// Read until the text holds `OK` or `ERROR` or `attempts` reads are used.
/// Returns the accumulated text and the number of reads performed.
fn read_response(
    link: &mut dyn SerialLink,
    attempts: u32,
    interval: Duration,
) -> io::Result<(String, u32)> {
    let mut raw: Vec<u8> = Vec::new();
    let mut buf = [0u8; 512];
    let mut used = 0;
    for attempt in 0..attempts.max(1) {
        used = attempt + 1;
        let n = link.read_chunk(&mut buf)?;
        raw.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&raw);
        if text.contains("OK") || text.contains("ERROR") {
            break;
        }
        if used < attempts && !interval.is_zero() {
            sleep(interval);
        }
    }
    Ok((String::from_utf8_lossy(&raw).into_owned(), used))
}

/// Serial AT transport with a cached port.
pub struct AtTransport<B = SystemSerial> {
    backend: B,
    settings: TransportSettings,
    cache: Mutex<Option<PortHandle>>,
    /// Held for the whole of a probe sweep or exchange; interleaved commands
    /// on one port corrupt both replies.
    device: Mutex<()>,
}

impl AtTransport<SystemSerial> {
    pub fn system(settings: TransportSettings) -> Self {
        Self::new(SystemSerial, settings)
    }
}

impl<B: SerialBackend> AtTransport<B> {
    pub fn new(backend: B, settings: TransportSettings) -> Self {
        Self {
            backend,
            settings,
            cache: Mutex::new(None),
            device: Mutex::new(()),
        }
    }

    /// Currently cached port, regardless of age.
    pub fn cached_port(&self) -> Option<PortHandle> {
        self.lock_cache().clone()
    }

    /// Drop the cached port so the next call re-runs discovery.
    pub fn invalidate(&self) {
        if let Some(old) = self.lock_cache().take() {
            debug!("Invalidated cached AT port {}", old.path);
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<PortHandle>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_device(&self) -> MutexGuard<'_, ()> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve the port; caller must hold the device lock.
    fn resolve_port(&self, force_refresh: bool) -> Option<PortHandle> {
        let mut cache = self.lock_cache();
        if !force_refresh {
            if let Some(port) = cache.as_ref() {
                if port.age() < self.settings.cache_ttl {
                    metrics::inc_port_cache_hits();
                    trace!("Using cached AT port {} ({:?} old)", port.path, port.age());
                    return Some(port.clone());
                }
                debug!("Cached AT port {} expired", port.path);
            }
        }
        *cache = None;

        let candidates = order_candidates(
            &self.settings.priority_ports,
            self.backend.enumerate(&self.settings.port_glob),
        );
        if candidates.is_empty() {
            warn!("No serial devices match {}", self.settings.port_glob);
            return None;
        }
        for path in &candidates {
            if self.probe(path) {
                info!("Modem AT port found on {}", path);
                let handle = PortHandle::new(path.clone());
                *cache = Some(handle.clone());
                return Some(handle);
            }
        }
        warn!(
            "No AT port answered among {} candidate(s): {}",
            candidates.len(),
            candidates.join(", ")
        );
        None
    }

    fn probe(&self, path: &str) -> bool {
        metrics::inc_port_probes();
        let s = &self.settings;
        let attempt = || -> io::Result<String> {
            let timeout = per_read_timeout(s.probe_timeout, s.probe_read_attempts);
            let mut link = self.backend.open(path, s.baud_rate, timeout)?;
            link.clear()?;
            link.write_all(b"AT\r\n")?;
            let (text, _) = read_response(link.as_mut(), s.probe_read_attempts, s.read_interval)?;
            Ok(text)
        };
        match attempt() {
            Ok(text) => {
                debug!("Probe {} -> {}", path, escape_log(&text, MAX_PREVIEW));
                text.contains("OK")
            }
            Err(e) => {
                debug!("Probe {} failed: {}", path, e);
                false
            }
        }
    }

    fn exchange(&self, path: &str, command: &str) -> io::Result<AtExchange> {
        let s = &self.settings;
        let timeout = per_read_timeout(s.command_timeout, s.command_read_attempts);
        let mut link = self.backend.open(path, s.baud_rate, timeout)?;
        link.clear()?;
        link.write_all(format!("{command}\r\n").as_bytes())?;
        if !s.settle_delay.is_zero() {
            sleep(s.settle_delay);
        }
        let (text, attempts) =
            read_response(link.as_mut(), s.command_read_attempts, s.read_interval)?;
        Ok(AtExchange::new(command, text, attempts))
    }
}

impl<B: SerialBackend> CommandChannel for AtTransport<B> {
    fn find_port(&self, force_refresh: bool) -> Option<PortHandle> {
        let _device = self.lock_device();
        self.resolve_port(force_refresh)
    }

    fn send(&self, command: &str) -> Result<AtExchange, ModemError> {
        let _device = self.lock_device();
        let port = self.resolve_port(false).ok_or(ModemError::DeviceNotFound)?;
        metrics::inc_at_exchanges();
        match self.exchange(&port.path, command) {
            Ok(exchange) => {
                if exchange.response.is_empty() {
                    // silent port: it may have been renumbered after a reset
                    warn!("{} on {} got no reply", command, port.path);
                    self.invalidate();
                } else {
                    debug!(
                        "{} -> {} ({} read(s))",
                        command,
                        summarize_response(command, &exchange.response),
                        exchange.attempts
                    );
                }
                Ok(exchange)
            }
            Err(source) => {
                metrics::inc_at_failures();
                warn!("{} on {} failed: {}", command, port.path, source);
                self.invalidate();
                Err(ModemError::Transport {
                    port: port.path,
                    source,
                })
            }
        }
    }
}

/// `serialport` backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerial;

struct SystemLink(Box<dyn serialport::SerialPort>);

impl SerialLink for SystemLink {
    fn clear(&mut self) -> io::Result<()> {
        self.0
            .clear(serialport::ClearBuffer::All)
            .map_err(io::Error::from)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.0, data)?;
        self.0.flush()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl SerialBackend for SystemSerial {
    fn enumerate(&self, pattern: &str) -> Vec<String> {
        let entries = match glob::glob(pattern) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Invalid port glob {}: {}", pattern, e);
                return Vec::new();
            }
        };
        let mut found: Vec<String> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path.to_string_lossy().into_owned()),
                Err(e) => {
                    debug!("Skipping {}: {}", e.path().display(), e);
                    None
                }
            })
            .collect();
        found.sort();
        found
    }

    fn open(
        &self,
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> io::Result<Box<dyn SerialLink>> {
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .flow_control(serialport::FlowControl::None)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(io::Error::from)?;
        Ok(Box::new(SystemLink(port)))
    }
}
