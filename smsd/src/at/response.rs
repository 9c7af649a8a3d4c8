/// Final result codes that end an ordinary exchange.
pub const FINAL: &[&str] = &["OK", "ERROR", "+CME ERROR", "+CMS ERROR"];

/// The `> ` prompt that opens an SMS body, or any final error code.
pub const PROMPT: &[&str] = &[">", "ERROR", "+CME ERROR", "+CMS ERROR"];

/// Sent by SIM800-class modems once the SIM is unlocked and the SMS stack is
/// up. A rejected PIN ends the exchange with an error code instead.
pub const SMS_READY: &[&str] = &["SMS Ready", "ERROR", "+CME ERROR", "+CMS ERROR"];

const ERRORS: &[&str] = &["ERROR", "+CME ERROR", "+CMS ERROR"];

/// `line` ends a response if it equals a marker, or is a marker followed by `:`
/// (so `+CMS ERROR` matches `+CMS ERROR: 321`).
pub fn matches_marker(line: &str, markers: &[&str]) -> bool {
    let line = line.trim_end();
    markers.iter().any(|marker| {
        let marker = marker.trim_end();
        line == marker
            || line
                .strip_prefix(marker)
                .is_some_and(|rest| rest.starts_with(':'))
    })
}

pub fn is_error(line: &str) -> bool {
    matches_marker(line, ERRORS)
}

/// Decoded lines of one exchange.
///
/// If `complete` is set the last line is the terminal marker that ended the read,
/// otherwise the read was abandoned at its deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub lines: Vec<String>,
    pub complete: bool,
}

impl RawResponse {
    pub fn terminal(&self) -> Option<&str> {
        self.complete
            .then(|| self.lines.last().map(String::as_str))
            .flatten()
    }

    /// Lines between the echoed request (if echo is on) and the terminal marker.
    pub fn body<'a>(&'a self, request: &str) -> &'a [String] {
        let mut lines = self.lines.as_slice();
        if self.complete {
            lines = &lines[..lines.len().saturating_sub(1)];
        }
        if lines.first().is_some_and(|first| first == request) {
            lines = &lines[1..];
        }

        lines
    }

    /// The payload of the first `+PREFIX: payload` line.
    pub fn field(&self, prefix: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| field(line, prefix))
    }

    /// The first body line, for commands like `AT+CGMI` that answer without a prefix.
    pub fn first_body_line(&self, request: &str) -> Option<&str> {
        self.body(request)
            .iter()
            .map(String::as_str)
            .find(|line| !line.is_empty())
    }
}

/// The payload of `line` if it reads `<prefix>: <payload>`.
pub fn field<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?
        .strip_prefix(':')
        .map(str::trim)
}

/// Splits a comma separated field list, honouring double quotes and stripping them.
pub fn split_fields(payload: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in payload.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(current.trim().to_owned());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_owned());

    fields
}
