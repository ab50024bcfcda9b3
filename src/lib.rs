//! # ec25-router - modem control core for a cellular/WiFi router panel
//!
//! This crate holds the part of the router control panel that talks to the
//! Quectel EC25 LTE module: AT command transport over USB serial, response
//! parsing, and a background monitor that keeps a fresh status snapshot for
//! the dashboard.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ec25_router::config::Config;
//! use ec25_router::modem::{Modem, transport::AtTransport};
//! use ec25_router::monitor::ModemMonitor;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let modem = Arc::new(Modem::new(AtTransport::system(
//!         config.modem.transport_settings(),
//!     )));
//!     let monitor = ModemMonitor::new(modem, config.monitor.settings());
//!     monitor.start_default(config.monitor.enabled);
//!
//!     let latest = monitor.latest(); // never blocks on the serial port
//!     println!("{}", serde_json::to_string(&latest)?);
//!
//!     monitor.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`modem`] - parsers, serial transport and the `Modem` facade
//! - [`monitor`] - polling task, shared snapshot and history queue
//! - [`config`] - TOML configuration
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - log-safe rendering of raw modem output
//!
//! ```text
//! ┌─────────────────┐
//! │  ModemMonitor   │ ← background polling, cached snapshot
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Modem facade   │ ← signal / network / APN / reset
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  AtTransport    │ ← port discovery, AT framing  (+ parser)
//! └─────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod modem;
pub mod monitor;
