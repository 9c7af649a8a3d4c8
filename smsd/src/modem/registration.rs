use crate::at::response::{field, split_fields};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    NotRegistered,
    RegisteredHome,
    Searching,
    Denied,
    RegisteredRoaming,
}

impl RegistrationState {
    /// Maps the `<stat>` field of `+CREG`. Codes we don't act on (2, 4 "unknown")
    /// are treated as still searching.
    pub fn from_stat(stat: u8) -> Self {
        match stat {
            0 => Self::NotRegistered,
            1 => Self::RegisteredHome,
            3 => Self::Denied,
            5 => Self::RegisteredRoaming,
            _ => Self::Searching,
        }
    }

    /// Whether a registration wait can stop here.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            Self::RegisteredHome | Self::Denied | Self::RegisteredRoaming
        )
    }

    pub fn is_registered(self) -> bool {
        matches!(self, Self::RegisteredHome | Self::RegisteredRoaming)
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotRegistered => "not registered",
            Self::RegisteredHome => "registered, home network",
            Self::Searching => "searching",
            Self::Denied => "registration denied",
            Self::RegisteredRoaming => "registered, roaming",
        };
        f.write_str(s)
    }
}

/// A decoded `+CREG: <n>,<stat>[,<lac>,<ci>]` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub mode: u8,
    pub state: RegistrationState,
    pub lac: Option<String>,
    pub cell_id: Option<String>,
}

/// Parses a full `+CREG: ...` line. Only the two-field and four-field shapes are
/// accepted. Anything else is `None`, which callers treat as "still searching".
pub fn parse_creg(line: &str) -> Option<Registration> {
    let fields = split_fields(field(line, "+CREG")?);
    let (mode, stat, location) = match fields.as_slice() {
        [n, stat] => (n, stat, None),
        [n, stat, lac, ci, ..] => (n, stat, Some((lac.clone(), ci.clone()))),
        _ => return None,
    };

    let mode = mode.parse().ok()?;
    let state = RegistrationState::from_stat(stat.parse().ok()?);
    let (lac, cell_id) = location.unzip();

    Some(Registration {
        mode,
        state,
        lac,
        cell_id,
    })
}
