//! # EC25 Modem Access
//!
//! This module turns AT command exchanges into the structured readings the
//! dashboard shows. It is layered bottom-up:
//!
//! - [`parser`] - pure functions from raw response text to typed values
//! - [`transport`] - serial port discovery, caching and command framing
//! - [`Modem`] - semantic queries (signal, network info, APN, reset)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ec25_router::modem::{Modem, transport::{AtTransport, TransportSettings}};
//!
//! let modem = Modem::new(AtTransport::system(TransportSettings::default()));
//! if modem.is_detected() {
//!     let signal = modem.signal();
//!     println!("CSQ {} / {}", signal.csq, signal.qcsq);
//! }
//! ```
//!
//! Every call here blocks on serial I/O for up to a couple of seconds per
//! command. Code that must not block reads the cached snapshot from
//! [`crate::monitor::ModemMonitor`] instead.

pub mod parser;
pub mod transport;

use std::fmt;

use log::{debug, info, warn};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::logutil::{summarize_response, MAX_PREVIEW};
use parser::{
    parse_cops, parse_cpin, parse_csq, parse_qcsq, parse_qnwinfo, parse_registration, Csq,
    Qcsq, RegistrationStatus, SimStatus,
};
use transport::{AtExchange, AtTransport, CommandChannel, PortHandle};

/// Marker shown for any field that could not be read.
pub const NOT_AVAILABLE: &str = "N/A";

pub const CMD_CSQ: &str = "AT+CSQ";
pub const CMD_QCSQ: &str = "AT+QCSQ";
pub const CMD_COPS: &str = "AT+COPS?";
pub const CMD_QNWINFO: &str = "AT+QNWINFO";
pub const CMD_CREG: &str = "AT+CREG?";
pub const CMD_CEREG: &str = "AT+CEREG?";
pub const CMD_CPIN: &str = "AT+CPIN?";
pub const CMD_RESET: &str = "AT+CFUN=1,1";

#[derive(Debug, Error)]
pub enum ModemError {
    /// No serial path answered the `AT` probe.
    #[error("modem not detected")]
    DeviceNotFound,

    /// Open, write or read failed on a known port.
    #[error("serial error on {port}: {source}")]
    Transport {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// Rejected before any serial I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking modem call could not be completed on the worker pool.
    #[error("modem task failed: {0}")]
    Join(String),
}

fn or_not_available<T: fmt::Display, S: Serializer>(
    value: &Option<T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_str(NOT_AVAILABLE),
    }
}

/// Signal quality assembled from `+CSQ` and `+QCSQ`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalReading {
    /// 0..=31, or 99 for no signal.
    pub rssi: Option<u8>,
    pub ber: Option<u8>,
    /// Only present for rssi 0..=30.
    pub dbm: Option<i32>,
    pub technology: Option<String>,
    pub rsrp: Option<i32>,
    pub rsrq: Option<i32>,
    pub sinr: Option<i32>,
    /// `20/31 (-73 dBm)` or `N/A`.
    pub csq: String,
    /// `LTE | RSRP -95dBm | RSRQ -12dB | SINR 10dB` or `N/A`.
    pub qcsq: String,
}

impl Default for SignalReading {
    fn default() -> Self {
        Self::from_parts(None, None)
    }
}

impl SignalReading {
    pub fn from_parts(csq: Option<Csq>, qcsq: Option<Qcsq>) -> Self {
        Self {
            rssi: csq.map(|c| c.rssi),
            ber: csq.map(|c| c.ber),
            dbm: csq.and_then(|c| c.dbm()),
            technology: qcsq.as_ref().map(|q| q.technology.clone()),
            rsrp: qcsq.as_ref().and_then(|q| q.rsrp),
            rsrq: qcsq.as_ref().and_then(|q| q.rsrq),
            sinr: qcsq.as_ref().and_then(|q| q.sinr),
            csq: csq
                .map(|c| c.summary())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            qcsq: qcsq
                .map(|q| q.summary())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.rssi.is_some() || self.technology.is_some()
    }
}

/// Operator, radio technology, registration and SIM state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    #[serde(serialize_with = "or_not_available")]
    pub operator: Option<String>,
    /// From `+QNWINFO`, falling back to the `+COPS` access technology.
    #[serde(rename = "network", serialize_with = "or_not_available")]
    pub technology: Option<String>,
    #[serde(serialize_with = "or_not_available")]
    pub registration: Option<RegistrationStatus>,
    #[serde(serialize_with = "or_not_available")]
    pub sim: Option<SimStatus>,
}

fn label<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

impl NetworkInfo {
    pub fn operator_label(&self) -> String {
        label(&self.operator)
    }
    pub fn technology_label(&self) -> String {
        label(&self.technology)
    }
    pub fn registration_label(&self) -> String {
        label(&self.registration)
    }
    pub fn sim_label(&self) -> String {
        label(&self.sim)
    }
}

/// APNs are quoted into the command, so quotes and control bytes are refused.
fn validate_apn(apn: &str) -> Result<&str, ModemError> {
    let apn = apn.trim();
    if apn.is_empty() {
        return Err(ModemError::InvalidArgument("APN is empty".to_string()));
    }
    if apn.len() > 100 || apn.chars().any(|c| c == '"' || c.is_control()) {
        return Err(ModemError::InvalidArgument(format!(
            "APN contains unsupported characters: {}",
            crate::logutil::escape_log(apn, MAX_PREVIEW)
        )));
    }
    Ok(apn)
}

/// Semantic queries over a [`CommandChannel`].
pub struct Modem<C = AtTransport> {
    channel: C,
}

impl<C: CommandChannel> Modem<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Run a status query; any failure is logged and reported as `None`.
    fn query(&self, command: &str) -> Option<String> {
        match self.channel.send(command) {
            Ok(exchange) if exchange.error => {
                debug!(
                    "{} rejected: {}",
                    command,
                    summarize_response(command, &exchange.response)
                );
                None
            }
            Ok(exchange) => Some(exchange.response),
            Err(e) => {
                debug!("{} unavailable: {}", command, e);
                None
            }
        }
    }

    pub fn signal(&self) -> SignalReading {
        let csq = self.query(CMD_CSQ).and_then(|r| parse_csq(&r));
        let qcsq = self.query(CMD_QCSQ).and_then(|r| parse_qcsq(&r));
        SignalReading::from_parts(csq, qcsq)
    }

    pub fn network_info(&self) -> NetworkInfo {
        let cops = self.query(CMD_COPS).and_then(|r| parse_cops(&r));
        let qnwinfo = self.query(CMD_QNWINFO).and_then(|r| parse_qnwinfo(&r));
        let creg = self.query(CMD_CREG).and_then(|r| parse_registration(&r));
        let cereg = self.query(CMD_CEREG).and_then(|r| parse_registration(&r));
        let sim = self.query(CMD_CPIN).and_then(|r| parse_cpin(&r));

        let technology = qnwinfo.map(|n| n.summary()).or_else(|| {
            cops.as_ref()
                .and_then(|c| c.technology)
                .map(|t| t.to_string())
        });
        NetworkInfo {
            operator: cops.and_then(|c| c.name),
            technology,
            registration: cereg.or(creg).map(|r| r.status),
            sim,
        }
    }

    /// Write PDP context 1. The reply is returned as-is; nothing reads the
    /// context back to confirm the modem stored it.
    pub fn set_apn(&self, apn: &str) -> Result<AtExchange, ModemError> {
        let apn = validate_apn(apn)?;
        let exchange = self
            .channel
            .send(&format!("AT+CGDCONT=1,\"IPV4V6\",\"{apn}\""))?;
        if exchange.ok {
            info!("APN set to {}", apn);
        } else {
            warn!(
                "APN write not acknowledged: {}",
                summarize_response(&exchange.command, &exchange.response)
            );
        }
        Ok(exchange)
    }

    /// Ask the module to reboot. Returns as soon as the command is answered;
    /// the modem drops off USB for several seconds afterwards.
    pub fn reset(&self) -> Result<AtExchange, ModemError> {
        let exchange = self.channel.send(CMD_RESET)?;
        info!("Modem reset requested (ok={})", exchange.ok);
        Ok(exchange)
    }

    pub fn is_detected(&self) -> bool {
        self.channel.find_port(false).is_some()
    }

    /// Force a new discovery sweep, ignoring the cache.
    pub fn rediscover(&self) -> Option<PortHandle> {
        self.channel.find_port(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned replies per command; commands not listed fail as transport errors.
    struct Scripted {
        replies: HashMap<&'static str, &'static str>,
        sent: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: &[(&'static str, &'static str)]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandChannel for Scripted {
        fn find_port(&self, _force_refresh: bool) -> Option<PortHandle> {
            Some(PortHandle::new("/dev/ttyUSB2"))
        }

        fn send(&self, command: &str) -> Result<AtExchange, ModemError> {
            self.sent.lock().unwrap().push(command.to_string());
            match self.replies.get(command) {
                Some(reply) => Ok(AtExchange {
                    command: command.to_string(),
                    response: reply.to_string(),
                    ok: reply.contains("OK"),
                    error: reply.contains("ERROR"),
                    attempts: 1,
                }),
                None => Err(ModemError::Transport {
                    port: "/dev/ttyUSB2".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
                }),
            }
        }
    }

    #[test]
    fn signal_from_csq_and_qcsq() {
        let modem = Modem::new(Scripted::new(&[
            (CMD_CSQ, "+CSQ: 20,99\r\nOK\r\n"),
            (CMD_QCSQ, "+QCSQ: \"LTE\",-70,-95,10,-12\r\nOK\r\n"),
        ]));
        let signal = modem.signal();
        assert_eq!(signal.rssi, Some(20));
        assert_eq!(signal.dbm, Some(-73));
        assert_eq!(signal.rsrp, Some(-95));
        assert_eq!(signal.rsrq, Some(-12));
        assert_eq!(signal.sinr, Some(10));
        assert_eq!(signal.qcsq, "LTE | RSRP -95dBm | RSRQ -12dB | SINR 10dB");
    }

    #[test]
    fn signal_partial_failure_keeps_other_fields() {
        let modem = Modem::new(Scripted::new(&[(CMD_CSQ, "+CSQ: 31,99\r\nOK\r\n")]));
        let signal = modem.signal();
        assert_eq!(signal.rssi, Some(31));
        assert_eq!(signal.dbm, None);
        assert_eq!(signal.qcsq, NOT_AVAILABLE);
        assert_eq!(signal.technology, None);
    }

    #[test]
    fn network_info_prefers_cereg() {
        let modem = Modem::new(Scripted::new(&[
            (CMD_COPS, "+COPS: 0,0,\"Entel\",7\r\nOK\r\n"),
            (CMD_QNWINFO, "+QNWINFO: \"FDD LTE\",\"73001\",\"LTE BAND 2\",900\r\nOK\r\n"),
            (CMD_CREG, "+CREG: 0,2\r\nOK\r\n"),
            (CMD_CEREG, "+CEREG: 0,5\r\nOK\r\n"),
            (CMD_CPIN, "+CPIN: READY\r\nOK\r\n"),
        ]));
        let info = modem.network_info();
        assert_eq!(info.operator_label(), "Entel");
        assert_eq!(info.technology_label(), "FDD LTE LTE BAND 2");
        assert_eq!(info.registration, Some(RegistrationStatus::Roaming));
        assert_eq!(info.sim, Some(SimStatus::Ready));
    }

    #[test]
    fn network_info_falls_back_per_field() {
        let modem = Modem::new(Scripted::new(&[
            (CMD_COPS, "+COPS: 0,0,\"Claro\",2\r\nOK\r\n"),
            (CMD_QNWINFO, "+CME ERROR: 30\r\n"),
            (CMD_CREG, "+CREG: 0,1\r\nOK\r\n"),
        ]));
        let info = modem.network_info();
        assert_eq!(info.technology_label(), "UTRAN");
        assert_eq!(info.registration_label(), "Registered");
        assert_eq!(info.sim_label(), NOT_AVAILABLE);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["network"], "UTRAN");
        assert_eq!(json["sim"], NOT_AVAILABLE);
    }

    #[test]
    fn set_apn_quotes_and_returns_raw_result() {
        let channel = Scripted::new(&[("AT+CGDCONT=1,\"IPV4V6\",\"internet.movil\"", "OK\r\n")]);
        let modem = Modem::new(channel);
        let exchange = modem.set_apn(" internet.movil ").expect("exchange");
        assert!(exchange.ok);
        assert_eq!(
            modem.channel().sent.lock().unwrap().as_slice(),
            ["AT+CGDCONT=1,\"IPV4V6\",\"internet.movil\""]
        );
    }

    #[test]
    fn set_apn_rejects_bad_input_without_io() {
        let modem = Modem::new(Scripted::new(&[]));
        assert!(matches!(modem.set_apn("  "), Err(ModemError::InvalidArgument(_))));
        assert!(matches!(
            modem.set_apn("bad\"apn"),
            Err(ModemError::InvalidArgument(_))
        ));
        assert!(modem.channel().sent.lock().unwrap().is_empty());
    }

    #[test]
    fn reset_surfaces_transport_error() {
        let modem = Modem::new(Scripted::new(&[]));
        assert!(matches!(modem.reset(), Err(ModemError::Transport { .. })));
    }
}
