//! Pure parsers for EC25 AT command responses.
//!
//! Every function here takes the raw text returned by the modem (echo, blank
//! lines and the trailing `OK` included) and returns a typed value, or `None`
//! when the expected `+XXX:` line is missing or malformed. Nothing in this
//! module touches the serial port.

use std::fmt;

use serde::Serialize;

/// Radio access technology as reported in the last field of `+COPS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessTechnology {
    Gsm,
    Utran,
    Lte,
    NbIot,
    Unknown(u8),
}

impl AccessTechnology {
    /// Map a 3GPP TS 27.007 `<AcT>` code, using the Quectel meaning for 8/9.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 | 1 | 3 => AccessTechnology::Gsm,
            2 | 4 | 5 | 6 => AccessTechnology::Utran,
            7 | 8 => AccessTechnology::Lte,
            9 => AccessTechnology::NbIot,
            other => AccessTechnology::Unknown(other),
        }
    }
}

impl fmt::Display for AccessTechnology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessTechnology::Gsm => f.write_str("GSM"),
            AccessTechnology::Utran => f.write_str("UTRAN"),
            AccessTechnology::Lte => f.write_str("LTE"),
            AccessTechnology::NbIot => f.write_str("NB-IoT"),
            AccessTechnology::Unknown(code) => write!(f, "unknown ({code})"),
        }
    }
}

/// Network registration state shared by `+CREG` and `+CEREG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegistrationStatus {
    NotRegistered,
    Registered,
    Searching,
    Denied,
    Unknown,
    Roaming,
    /// Any code outside the 0..=5 table, kept so it can still be displayed.
    Other(u32),
}

impl RegistrationStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => RegistrationStatus::NotRegistered,
            1 => RegistrationStatus::Registered,
            2 => RegistrationStatus::Searching,
            3 => RegistrationStatus::Denied,
            4 => RegistrationStatus::Unknown,
            5 => RegistrationStatus::Roaming,
            other => RegistrationStatus::Other(other),
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::NotRegistered => f.write_str("Not registered"),
            RegistrationStatus::Registered => f.write_str("Registered"),
            RegistrationStatus::Searching => f.write_str("Searching"),
            RegistrationStatus::Denied => f.write_str("Denied"),
            RegistrationStatus::Unknown => f.write_str("Unknown"),
            RegistrationStatus::Roaming => f.write_str("Roaming"),
            RegistrationStatus::Other(code) => write!(f, "status {code}"),
        }
    }
}

/// Which registration command produced a [`Registration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegistrationDomain {
    /// `+CREG`
    Circuit,
    /// `+CEREG` (EPS / LTE)
    Packet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub domain: RegistrationDomain,
    pub status: RegistrationStatus,
}

/// SIM state from `+CPIN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SimStatus {
    Ready,
    PinRequired,
    PukRequired,
    /// Unrecognised token, passed through verbatim (e.g. `PH-SIM PIN`).
    Other(String),
}

impl fmt::Display for SimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimStatus::Ready => f.write_str("READY"),
            SimStatus::PinRequired => f.write_str("SIM PIN"),
            SimStatus::PukRequired => f.write_str("SIM PUK"),
            SimStatus::Other(token) => f.write_str(token),
        }
    }
}

/// `+CSQ: <rssi>,<ber>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csq {
    pub rssi: u8,
    pub ber: u8,
}

impl Csq {
    /// RSSI sentinel for "not known or not detectable".
    pub const NO_SIGNAL: u8 = 99;

    /// Received power in dBm. Only defined for rssi 0..=30; 31 is an open
    /// ended bucket and 99 means no signal, so both yield `None`.
    pub fn dbm(&self) -> Option<i32> {
        if self.rssi <= 30 {
            Some(-113 + 2 * i32::from(self.rssi))
        } else {
            None
        }
    }

    pub fn has_signal(&self) -> bool {
        self.rssi != Self::NO_SIGNAL
    }

    /// Dashboard form: `20/31 (-73 dBm)`.
    pub fn summary(&self) -> String {
        if !self.has_signal() {
            return "no signal".to_string();
        }
        match self.dbm() {
            Some(dbm) => format!("{}/31 ({} dBm)", self.rssi, dbm),
            None => format!("{}/31 (unknown)", self.rssi),
        }
    }
}

/// `+QCSQ: "<sysmode>",<value1>,...` (Quectel extension).
///
/// For LTE the values are rssi, rsrp, sinr, rsrq in that order. For other
/// technologies only the leading ones are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qcsq {
    pub technology: String,
    pub rssi: Option<i32>,
    pub rsrp: Option<i32>,
    pub sinr: Option<i32>,
    pub rsrq: Option<i32>,
}

impl Qcsq {
    pub fn is_lte(&self) -> bool {
        self.technology.contains("LTE") || self.technology.contains("CAT")
    }

    pub fn summary(&self) -> String {
        if self.is_lte() {
            if let (Some(rsrp), Some(rsrq), Some(sinr)) = (self.rsrp, self.rsrq, self.sinr) {
                return format!(
                    "{} | RSRP {}dBm | RSRQ {}dB | SINR {}dB",
                    self.technology, rsrp, rsrq, sinr
                );
            }
        }
        match self.rssi {
            Some(rssi) => format!("{} | RSSI {}dBm", self.technology, rssi),
            None => self.technology.clone(),
        }
    }
}

/// `+COPS: <mode>[,<format>,"<oper>"[,<AcT>]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub name: Option<String>,
    pub technology: Option<AccessTechnology>,
}

/// `+QNWINFO: "<Act>","<oper>","<band>",<channel>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServingNetwork {
    pub technology: String,
    pub operator_code: Option<String>,
    pub band: Option<String>,
    pub channel: Option<u32>,
}

impl ServingNetwork {
    pub fn summary(&self) -> String {
        match &self.band {
            Some(band) => format!("{} {}", self.technology, band),
            None => self.technology.clone(),
        }
    }
}

/// Return the payload after `prefix` on the first line that carries it.
fn payload<'a>(response: &'a str, prefix: &str) -> Option<&'a str> {
    response
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix))
        .map(str::trim)
}

/// Split a comma separated AT payload, honouring double quotes so that an
/// operator name like `"AT&T, Inc"` stays a single field. Quotes are removed.
fn split_fields(payload: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in payload.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

fn opt_field(fields: &[String], idx: usize) -> Option<String> {
    fields
        .get(idx)
        .filter(|f| !f.is_empty() && f.as_str() != "-")
        .cloned()
}

pub fn parse_csq(response: &str) -> Option<Csq> {
    let fields = split_fields(payload(response, "+CSQ:")?);
    let rssi = fields.first()?.parse().ok()?;
    let ber = fields.get(1)?.parse().ok()?;
    Some(Csq { rssi, ber })
}

pub fn parse_qcsq(response: &str) -> Option<Qcsq> {
    let fields = split_fields(payload(response, "+QCSQ:")?);
    let technology = fields.first().filter(|t| !t.is_empty())?.clone();
    let value = |idx: usize| fields.get(idx).and_then(|v| v.parse::<i32>().ok());
    Some(Qcsq {
        technology,
        rssi: value(1),
        rsrp: value(2),
        sinr: value(3),
        rsrq: value(4),
    })
}

pub fn parse_cops(response: &str) -> Option<Operator> {
    let fields = split_fields(payload(response, "+COPS:")?);
    // mode must be numeric, otherwise this is not a read response
    fields.first()?.parse::<u8>().ok()?;
    Some(Operator {
        name: opt_field(&fields, 2),
        technology: fields
            .get(3)
            .and_then(|code| code.parse::<u8>().ok())
            .map(AccessTechnology::from_code),
    })
}

pub fn parse_qnwinfo(response: &str) -> Option<ServingNetwork> {
    let fields = split_fields(payload(response, "+QNWINFO:")?);
    let technology = fields.first().filter(|t| !t.is_empty())?.clone();
    Some(ServingNetwork {
        technology,
        operator_code: opt_field(&fields, 1),
        band: opt_field(&fields, 2),
        channel: fields.get(3).and_then(|c| c.parse().ok()),
    })
}

/// Parse either `+CREG:` or `+CEREG:`. Read responses carry `<n>,<stat>`
/// while unsolicited ones carry `<stat>` alone; both are accepted.
pub fn parse_registration(response: &str) -> Option<Registration> {
    let (domain, body) = if let Some(body) = payload(response, "+CEREG:") {
        (RegistrationDomain::Packet, body)
    } else {
        (RegistrationDomain::Circuit, payload(response, "+CREG:")?)
    };
    let fields = split_fields(body);
    let stat = if fields.len() >= 2 {
        &fields[1]
    } else {
        fields.first()?
    };
    let code = stat.parse::<u32>().ok()?;
    Some(Registration {
        domain,
        status: RegistrationStatus::from_code(code),
    })
}

pub fn parse_cpin(response: &str) -> Option<SimStatus> {
    let token = payload(response, "+CPIN:")?;
    if token.is_empty() {
        return None;
    }
    Some(match token {
        "READY" => SimStatus::Ready,
        "SIM PIN" => SimStatus::PinRequired,
        "SIM PUK" => SimStatus::PukRequired,
        other => SimStatus::Other(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csq_dbm_follows_formula_for_valid_range() {
        for rssi in 0..=30u8 {
            let csq = parse_csq(&format!("AT+CSQ\r\n+CSQ: {rssi},99\r\n\r\nOK\r\n")).unwrap();
            assert_eq!(csq.dbm(), Some(-113 + 2 * i32::from(rssi)));
        }
    }

    #[test]
    fn csq_dbm_unknown_for_31_and_sentinel() {
        let csq = parse_csq("+CSQ: 31,0\r\nOK").unwrap();
        assert_eq!(csq.dbm(), None);
        assert_eq!(csq.summary(), "31/31 (unknown)");

        let none = parse_csq("+CSQ: 99,99\r\nOK").unwrap();
        assert_eq!(none.dbm(), None);
        assert!(!none.has_signal());
        assert_eq!(none.summary(), "no signal");
    }

    #[test]
    fn csq_rejects_garbage() {
        assert_eq!(parse_csq(""), None);
        assert_eq!(parse_csq("ERROR"), None);
        assert_eq!(parse_csq("+CSQ: ab,cd\r\nOK"), None);
        assert_eq!(parse_csq("+CSQ: 12"), None);
    }

    #[test]
    fn csq_summary_matches_dashboard_format() {
        let csq = parse_csq("+CSQ: 20,99\r\nOK\r\n").unwrap();
        assert_eq!(csq.summary(), "20/31 (-73 dBm)");
    }

    #[test]
    fn qcsq_lte_fields_in_modem_order() {
        let q = parse_qcsq("+QCSQ: \"LTE\",-70,-95,10,-12\r\nOK\r\n").unwrap();
        assert_eq!(q.technology, "LTE");
        assert_eq!(q.rssi, Some(-70));
        assert_eq!(q.rsrp, Some(-95));
        assert_eq!(q.sinr, Some(10));
        assert_eq!(q.rsrq, Some(-12));
        assert_eq!(q.summary(), "LTE | RSRP -95dBm | RSRQ -12dB | SINR 10dB");
    }

    #[test]
    fn qcsq_noservice_and_gsm() {
        let q = parse_qcsq("+QCSQ: \"NOSERVICE\"\r\nOK").unwrap();
        assert_eq!(q.summary(), "NOSERVICE");
        assert_eq!(q.rsrp, None);

        let gsm = parse_qcsq("+QCSQ: \"GSM\",-69\r\nOK").unwrap();
        assert_eq!(gsm.summary(), "GSM | RSSI -69dBm");
    }

    #[test]
    fn cops_operator_and_technology() {
        let op = parse_cops("+COPS: 0,0,\"Movistar\",7\r\nOK").unwrap();
        assert_eq!(op.name.as_deref(), Some("Movistar"));
        assert_eq!(op.technology, Some(AccessTechnology::Lte));

        let unregistered = parse_cops("+COPS: 0\r\nOK").unwrap();
        assert_eq!(unregistered.name, None);
        assert_eq!(unregistered.technology, None);

        let odd = parse_cops("+COPS: 0,0,\"AT&T, Inc\",42").unwrap();
        assert_eq!(odd.name.as_deref(), Some("AT&T, Inc"));
        assert_eq!(odd.technology, Some(AccessTechnology::Unknown(42)));
    }

    #[test]
    fn access_technology_codes() {
        assert_eq!(AccessTechnology::from_code(0), AccessTechnology::Gsm);
        assert_eq!(AccessTechnology::from_code(2), AccessTechnology::Utran);
        assert_eq!(AccessTechnology::from_code(7), AccessTechnology::Lte);
        assert_eq!(AccessTechnology::from_code(9), AccessTechnology::NbIot);
        assert_eq!(AccessTechnology::from_code(9).to_string(), "NB-IoT");
    }

    #[test]
    fn qnwinfo_tech_band_channel() {
        let n = parse_qnwinfo("+QNWINFO: \"FDD LTE\",\"46001\",\"LTE BAND 3\",1650\r\nOK").unwrap();
        assert_eq!(n.technology, "FDD LTE");
        assert_eq!(n.operator_code.as_deref(), Some("46001"));
        assert_eq!(n.band.as_deref(), Some("LTE BAND 3"));
        assert_eq!(n.channel, Some(1650));
        assert_eq!(n.summary(), "FDD LTE LTE BAND 3");

        assert_eq!(parse_qnwinfo("+QNWINFO: \"\"\r\nOK"), None);
    }

    #[test]
    fn registration_prefers_stat_field() {
        let cereg = parse_registration("+CEREG: 2,1\r\nOK").unwrap();
        assert_eq!(cereg.domain, RegistrationDomain::Packet);
        assert_eq!(cereg.status.to_string(), "Registered");

        let creg = parse_registration("+CREG: 0,5\r\nOK").unwrap();
        assert_eq!(creg.domain, RegistrationDomain::Circuit);
        assert_eq!(creg.status.to_string(), "Roaming");

        let urc = parse_registration("+CREG: 2").unwrap();
        assert_eq!(urc.status, RegistrationStatus::Searching);
    }

    #[test]
    fn registration_unknown_code_falls_back_to_literal() {
        let r = parse_registration("+CEREG: 0,11\r\nOK").unwrap();
        assert_eq!(r.status, RegistrationStatus::Other(11));
        assert!(r.status.to_string().contains("11"));
        let wide = parse_registration("+CEREG: 0,300\r\nOK").unwrap();
        assert_eq!(wide.status.to_string(), "status 300");
        assert_eq!(parse_registration("+CREG: x,y"), None);
    }

    #[test]
    fn cpin_tokens() {
        assert_eq!(parse_cpin("+CPIN: READY\r\nOK"), Some(SimStatus::Ready));
        assert_eq!(parse_cpin("+CPIN: SIM PIN\r\nOK"), Some(SimStatus::PinRequired));
        assert_eq!(parse_cpin("+CPIN: SIM PUK\r\nOK"), Some(SimStatus::PukRequired));
        let other = parse_cpin("+CPIN: PH-SIM PIN\r\nOK").unwrap();
        assert_eq!(other.to_string(), "PH-SIM PIN");
        assert_eq!(parse_cpin("+CME ERROR: 10"), None);
    }
}
