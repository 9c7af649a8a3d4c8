use crate::{
    at::response::{field, split_fields},
    error::Rejected,
};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// Longest body accepted for a single plain-text SMS.
pub const MAX_TEXT_LEN: usize = 160;

/// A dialable number: an optional leading `+` followed by 3 to 20 digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits a `,` or `;` separated list, as accepted by the send surfaces.
    pub fn parse_list(numbers: &str) -> Result<Vec<Self>, Rejected> {
        let numbers = numbers
            .split([',', ';'])
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(Self::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        if numbers.is_empty() {
            return Err(Rejected::NoDestination);
        }

        Ok(numbers)
    }
}

impl FromStr for PhoneNumber {
    type Err = Rejected;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix('+').unwrap_or(s);
        let valid = (3..=20).contains(&digits.len())
            && digits.chars().all(|c| c.is_ascii_digit());

        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(Rejected::InvalidNumber(s.to_owned()))
        }
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = Rejected;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PhoneNumber> for String {
    fn from(n: PhoneNumber) -> Self {
        n.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks that `text` can go out as one plain-text SMS.
pub fn validate_text(text: &str) -> Result<(), Rejected> {
    if text.is_empty() {
        return Err(Rejected::EmptyText);
    }
    if let Some(c) = text.chars().find(|c| matches!(c, '\x1a' | '\x1b')) {
        return Err(Rejected::UnsupportedCharacter(c));
    }
    let len = text.chars().count();
    if len > MAX_TEXT_LEN {
        return Err(Rejected::TextTooLong {
            len,
            max: MAX_TEXT_LEN,
        });
    }

    Ok(())
}

/// A message as read from a storage slot, including the raw header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMessage {
    pub slot: u16,
    /// The `+CMGR:` line verbatim. Device specific, never leaves the process.
    pub header: String,
    pub unread: bool,
    pub sender: String,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of reading one storage slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Present(DeviceMessage),
    Empty,
}

/// A received message as persisted and published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Content fingerprint, stable across re-reads of the same message.
    pub id: String,
    pub sender: String,
    pub text: String,
    /// Service-center timestamp, or the time we read it when the device gave none.
    pub timestamp: DateTime<Utc>,
    pub slot: u16,
    pub read: bool,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn from_device(msg: &DeviceMessage, received_at: DateTime<Utc>) -> Self {
        let timestamp = msg.timestamp.unwrap_or(received_at);
        Self {
            id: fingerprint(msg),
            sender: msg.sender.clone(),
            text: msg.text.clone(),
            timestamp,
            slot: msg.slot,
            read: !msg.unread,
            received_at,
        }
    }
}

/// Sender, service-center timestamp and text. Without a timestamp the slot
/// stands in for it, so equal texts in different slots stay apart.
fn fingerprint(msg: &DeviceMessage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(msg.sender.as_bytes());
    hasher.update([0]);
    match msg.timestamp {
        Some(ts) => hasher.update(ts.to_rfc3339().as_bytes()),
        None => hasher.update(format!("slot {}", msg.slot).as_bytes()),
    }
    hasher.update([0]);
    hasher.update(msg.text.as_bytes());

    hex::encode(hasher.finalize())
}

/// Parses the body lines of a text-mode `AT+CMGR=<slot>` reply (echo and final
/// `OK` already stripped). No `+CMGR:` header means the slot is empty.
pub fn parse_cmgr(slot: u16, body: &[String]) -> Option<Slot> {
    let Some(pos) = body.iter().position(|l| l.starts_with("+CMGR:")) else {
        return Some(Slot::Empty);
    };
    let header = &body[pos];
    let fields = split_fields(field(header, "+CMGR")?);
    let [stat, sender, rest @ ..] = fields.as_slice() else {
        return None;
    };
    let unread = match stat.as_str() {
        "REC UNREAD" => true,
        "REC READ" => false,
        // stored outgoing messages are not part of the inbox
        _ => return Some(Slot::Empty),
    };
    let timestamp = rest.iter().rev().find_map(|f| parse_scts(f));

    Some(Slot::Present(DeviceMessage {
        slot,
        header: header.clone(),
        unread,
        sender: sender.clone(),
        text: body[pos + 1..].join("\n"),
        timestamp,
    }))
}

/// Parses a service-center timestamp `yy/MM/dd,hh:mm:ss±zz`, where `zz` is in
/// quarter hours.
pub fn parse_scts(s: &str) -> Option<DateTime<Utc>> {
    let split = s.len().checked_sub(3)?;
    let (local, zone) = (s.get(..split)?, s.get(split..)?);
    let sign = match zone.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let quarters: i32 = zone[1..].parse().ok()?;
    let offset = FixedOffset::east_opt(sign * quarters * 15 * 60)?;
    let naive = NaiveDateTime::parse_from_str(local, "%y/%m/%d,%H:%M:%S").ok()?;

    naive
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn it_parses_an_unread_message() {
        // Arrange
        let body = lines(&[
            r#"+CMGR: "REC UNREAD","+33612345678","","24/10/16,12:30:00+08""#,
            "Salut!",
            "second line",
        ]);

        // Act
        let slot = parse_cmgr(4, &body).unwrap();

        // Assert
        let Slot::Present(msg) = slot else {
            panic!("expected a message, got {slot:?}");
        };
        assert_eq!(msg.slot, 4);
        assert!(msg.unread);
        assert_eq!(msg.sender, "+33612345678");
        assert_eq!(msg.text, "Salut!\nsecond line");
        assert_eq!(
            msg.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 10, 16, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn a_reply_without_header_is_an_empty_slot() {
        assert_eq!(parse_cmgr(1, &[]), Some(Slot::Empty));
    }

    #[test]
    fn stored_outgoing_messages_are_skipped() {
        let body = lines(&[r#"+CMGR: "STO UNSENT","+33612345678","""#, "draft"]);

        assert_eq!(parse_cmgr(2, &body), Some(Slot::Empty));
    }

    #[test]
    fn a_malformed_header_does_not_parse() {
        let body = lines(&["+CMGR: 0", "x"]);

        assert_eq!(parse_cmgr(2, &body), None);
    }

    #[test]
    fn it_parses_negative_timezones() {
        assert_eq!(
            parse_scts("24/01/02,03:04:05-20"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 8, 4, 5).unwrap())
        );
        assert_eq!(parse_scts("garbage"), None);
        assert_eq!(parse_scts(""), None);
    }

    #[test]
    fn non_ascii_fields_without_a_timestamp_still_parse() {
        // Arrange
        let body = lines(&[r#"+CMGR: "REC UNREAD","+33612345678","éé""#, "hi"]);

        // Act
        let slot = parse_cmgr(1, &body).unwrap();

        // Assert
        let Slot::Present(msg) = slot else {
            panic!("expected a message, got {slot:?}");
        };
        assert_eq!(msg.timestamp, None);
        assert_eq!(msg.text, "hi");
        assert_eq!(parse_scts("éé"), None);
        assert_eq!(parse_scts("24/10/16,12:30:00é"), None);
    }

    #[test]
    fn equal_texts_without_timestamps_in_different_slots_are_different_messages() {
        // Arrange
        let first = DeviceMessage {
            slot: 1,
            header: String::new(),
            unread: true,
            sender: "+33612345678".into(),
            text: "ok".into(),
            timestamp: None,
        };
        let second = DeviceMessage {
            slot: 2,
            ..first.clone()
        };

        // Act
        let a = InboundMessage::from_device(&first, Utc::now());
        let again = InboundMessage::from_device(&first, Utc::now());
        let b = InboundMessage::from_device(&second, Utc::now());

        // Assert
        assert_eq!(a.id, again.id);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn the_same_message_always_gets_the_same_id() {
        // Arrange
        let msg = DeviceMessage {
            slot: 1,
            header: String::new(),
            unread: true,
            sender: "+33612345678".into(),
            text: "hello".into(),
            timestamp: parse_scts("24/10/16,12:30:00+08"),
        };
        let moved = DeviceMessage { slot: 7, ..msg.clone() };
        let other = DeviceMessage {
            text: "hello!".into(),
            ..msg.clone()
        };

        // Act
        let a = InboundMessage::from_device(&msg, Utc::now());
        let b = InboundMessage::from_device(&moved, Utc::now());
        let c = InboundMessage::from_device(&other, Utc::now());

        // Assert
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn it_validates_numbers_and_text() {
        assert_eq!(
            PhoneNumber::parse_list("+33600000000; 0612345678,").unwrap().len(),
            2
        );
        assert_eq!(PhoneNumber::parse_list(" , "), Err(Rejected::NoDestination));
        assert_eq!(
            PhoneNumber::parse_list("+33 6"),
            Err(Rejected::InvalidNumber("+33 6".into()))
        );

        assert_eq!(validate_text("hello"), Ok(()));
        assert_eq!(validate_text(""), Err(Rejected::EmptyText));
        assert_eq!(
            validate_text("a\x1ab"),
            Err(Rejected::UnsupportedCharacter('\x1a'))
        );
        assert!(matches!(
            validate_text(&"x".repeat(161)),
            Err(Rejected::TextTooLong { len: 161, .. })
        ));
    }
}
