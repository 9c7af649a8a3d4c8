use crate::modem::registration::RegistrationState;
use std::{io, time::Duration};
use thiserror::Error;

/// Failure of a single AT exchange.
#[derive(Debug, Error)]
pub enum AtError {
    /// No terminal marker was seen before the read deadline. Whatever lines did
    /// arrive are kept for diagnostics but must never be treated as a result.
    #[error("`{command}` timed out after {timeout:?} (got {lines:?})")]
    Timeout {
        command: String,
        timeout: Duration,
        lines: Vec<String>,
    },

    /// The modem answered with an explicit error result code.
    #[error("`{command}` failed with `{reason}`")]
    Device {
        command: String,
        reason: String,
        lines: Vec<String>,
    },

    /// The modem answered, but not in a shape we understand.
    #[error("unexpected response to `{command}`: {reason}")]
    Parse { command: String, reason: String },

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl AtError {
    pub(crate) fn parse(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// The numeric code of a `+CME ERROR: <n>` / `+CMS ERROR: <n>` reply, if any.
    pub fn device_code(&self) -> Option<u16> {
        let Self::Device { reason, .. } = self else {
            return None;
        };

        reason
            .split_once(':')
            .and_then(|(_, code)| code.trim().parse().ok())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// The network never reached a settled registration state in time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("network registration did not settle within {waited:?} (last seen: {last:?})")]
pub struct RegistrationTimeout {
    pub waited: Duration,
    pub last: Option<RegistrationState>,
}

/// Why a send request was refused at enqueue time.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Rejected {
    #[error("no destination number given")]
    NoDestination,
    #[error("invalid destination number `{0}`")]
    InvalidNumber(String),
    #[error("message text is empty")]
    EmptyText,
    #[error("message text is {len} characters long, at most {max} are supported")]
    TextTooLong { len: usize, max: usize },
    #[error("message text contains unsupported character {0:?}")]
    UnsupportedCharacter(char),
    #[error("the modem worker is not running")]
    WorkerStopped,
}
