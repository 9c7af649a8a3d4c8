use super::response::FINAL;
use std::{borrow::Cow, fmt, time::Duration};

/// The four `AT+` request shapes, plus plain `AT<x>` basic commands (`ATI`, `ATE0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// `AT+X=?`, lists accepted values.
    Test,
    /// `AT+X?`, reads the current value.
    Read,
    /// `AT+X=<values>`
    Write,
    /// `AT+X`
    Execute,
    /// `ATX`
    Basic,
}

/// A single argument of a write command.
///
/// Text is sent quoted, numbers and bare tokens are sent as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Number(i64),
    Bare(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Number(n) => write!(f, "{n}"),
            Value::Bare(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

macro_rules! number_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Number(i64::from(n))
            }
        })*
    };
}

number_value!(u8, u16, u32, i32, i64);

#[derive(Debug, Clone)]
pub struct Command {
    pub verb: Verb,
    pub param: Cow<'static, str>,
    pub values: Vec<Value>,
    pub markers: &'static [&'static str],
    /// `None` means the port's base timeout.
    pub timeout: Option<Duration>,
}

impl Command {
    fn new(verb: Verb, param: impl Into<Cow<'static, str>>) -> Self {
        Self {
            verb,
            param: param.into(),
            values: Vec::new(),
            markers: FINAL,
            timeout: None,
        }
    }

    pub fn test(param: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Verb::Test, param)
    }

    pub fn read(param: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Verb::Read, param)
    }

    pub fn write<V, I>(param: impl Into<Cow<'static, str>>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            ..Self::new(Verb::Write, param)
        }
    }

    pub fn execute(param: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Verb::Execute, param)
    }

    pub fn basic(param: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Verb::Basic, param)
    }

    #[must_use]
    pub fn until(self, markers: &'static [&'static str]) -> Self {
        Self { markers, ..self }
    }

    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    /// The request line, without the trailing carriage return.
    pub fn render(&self) -> String {
        let param = &self.param;
        match self.verb {
            Verb::Test => format!("AT+{param}=?"),
            Verb::Read => format!("AT+{param}?"),
            Verb::Execute => format!("AT+{param}"),
            Verb::Basic => format!("AT{param}"),
            Verb::Write => {
                let values: Vec<String> =
                    self.values.iter().map(ToString::to_string).collect();
                format!("AT+{param}={}", values.join(","))
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
