use super::registration::Registration;
use crate::at::response::{field, split_fields};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimStatus {
    Ready,
    PinRequired,
    PukRequired,
    NotInserted,
    Other(String),
}

impl SimStatus {
    /// Parses a `+CPIN: <code>` line.
    pub fn parse(line: &str) -> Option<Self> {
        let code = field(line, "+CPIN")?;
        let status = match code {
            "READY" => Self::Ready,
            "SIM PIN" => Self::PinRequired,
            "SIM PUK" => Self::PukRequired,
            "NOT INSERTED" => Self::NotInserted,
            other => Self::Other(other.to_owned()),
        };

        Some(status)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::PinRequired | Self::PukRequired)
    }
}

/// `+CSQ: <rssi>,<ber>`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalQuality {
    pub rssi: u8,
    pub ber: u8,
    /// `None` when the modem reports 99 (not detectable).
    pub dbm: Option<i16>,
}

impl SignalQuality {
    pub fn parse(line: &str) -> Option<Self> {
        let fields = split_fields(field(line, "+CSQ")?);
        let [rssi, ber] = fields.as_slice() else {
            return None;
        };
        let rssi: u8 = rssi.parse().ok()?;
        let ber = ber.parse().ok()?;
        let dbm = (rssi <= 31).then(|| -113 + 2 * i16::from(rssi));

        Some(Self { rssi, ber, dbm })
    }
}

/// Message storage usage, from the first memory of `+CPMS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCounters {
    pub memory: String,
    pub used: u16,
    pub total: u16,
}

impl StorageCounters {
    /// Parses the read form `+CPMS: "SM",3,30,...` and the write/set form
    /// `+CPMS: 3,30,...`.
    pub fn parse(line: &str) -> Option<Self> {
        let fields = split_fields(field(line, "+CPMS")?);
        let (memory, rest) = match fields.first()?.parse::<u16>() {
            Ok(_) => (String::new(), fields.as_slice()),
            Err(_) => (fields[0].clone(), &fields[1..]),
        };
        let [used, total, ..] = rest else {
            return None;
        };

        Some(Self {
            memory,
            used: used.parse().ok()?,
            total: total.parse().ok()?,
        })
    }
}

/// One coherent view of the modem. Built in one go by the worker and swapped
/// in whole, fields that could not be queried are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModemStatus {
    pub imei: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub product_info: Option<String>,
    pub operator: Option<String>,
    pub sim: Option<SimStatus>,
    pub signal: Option<SignalQuality>,
    pub registration: Option<Registration>,
    pub storage: Option<StorageCounters>,
    /// The failure of the latest poll cycle, if it failed.
    pub last_error: Option<String>,
    pub refreshed_at: DateTime<Utc>,
}

impl ModemStatus {
    pub fn empty(refreshed_at: DateTime<Utc>) -> Self {
        Self {
            imei: None,
            manufacturer: None,
            model: None,
            product_info: None,
            operator: None,
            sim: None,
            signal: None,
            registration: None,
            storage: None,
            last_error: None,
            refreshed_at,
        }
    }
}

/// Operator name from `+COPS: <mode>,<format>,"<oper>"`.
pub fn parse_operator(line: &str) -> Option<String> {
    split_fields(field(line, "+COPS")?)
        .into_iter()
        .nth(2)
        .filter(|op| !op.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_sim_status() {
        assert_eq!(SimStatus::parse("+CPIN: READY"), Some(SimStatus::Ready));
        assert_eq!(
            SimStatus::parse("+CPIN: SIM PIN"),
            Some(SimStatus::PinRequired)
        );
        assert_eq!(
            SimStatus::parse("+CPIN: PH_SIM PIN"),
            Some(SimStatus::Other("PH_SIM PIN".into()))
        );
        assert_eq!(SimStatus::parse("OK"), None);
        assert!(SimStatus::PukRequired.is_locked());
        assert!(!SimStatus::Ready.is_locked());
    }

    #[test]
    fn it_parses_signal_quality() {
        let csq = SignalQuality::parse("+CSQ: 18,0").unwrap();
        let unknown = SignalQuality::parse("+CSQ: 99,99").unwrap();

        assert_eq!(csq.rssi, 18);
        assert_eq!(csq.dbm, Some(-77));
        assert_eq!(unknown.dbm, None);
        assert_eq!(SignalQuality::parse("+CSQ: 18"), None);
    }

    #[test]
    fn it_parses_storage_counters() {
        let read = StorageCounters::parse(r#"+CPMS: "SM",3,30,"SM",3,30,"SM",3,30"#)
            .unwrap();
        let set = StorageCounters::parse("+CPMS: 1,50,1,50,1,50").unwrap();

        assert_eq!(read.memory, "SM");
        assert_eq!((read.used, read.total), (3, 30));
        assert_eq!((set.used, set.total), (1, 50));
        assert_eq!(StorageCounters::parse(r#"+CPMS: "SM""#), None);
    }

    #[test]
    fn it_parses_the_operator() {
        assert_eq!(
            parse_operator(r#"+COPS: 0,0,"Orange F""#).as_deref(),
            Some("Orange F")
        );
        assert_eq!(parse_operator("+COPS: 0"), None);
    }
}
