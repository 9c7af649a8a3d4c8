//! Log setup shared by the daemon and the probe.

use std::io::{IsTerminal as _, Write as _};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
};

pub const SYSLOG_IDENTIFIER: &str = "worldcoin-smsd";

#[derive(Debug)]
pub struct Telemetry {
    syslog_identifier: Option<String>,
    filter: EnvFilter,
}

impl Telemetry {
    /// `INFO` unless `RUST_LOG` says otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            syslog_identifier: None,
            filter: EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        }
    }

    /// Logs to journald under `syslog_identifier`, unless stderr is a terminal.
    #[must_use]
    pub fn with_journald(self, syslog_identifier: &str) -> Self {
        Self {
            syslog_identifier: Some(syslog_identifier.to_owned()),
            ..self
        }
    }

    pub fn try_init(self) -> Result<Flusher, tracing_subscriber::util::TryInitError> {
        // under systemd stderr is not a terminal
        let journald_layer = if std::io::stderr().is_terminal() {
            None
        } else {
            self.syslog_identifier.and_then(|syslog_identifier| {
                tracing_journald::layer()
                    .inspect_err(|err| {
                        eprintln!(
                            "failed connecting to journald socket. \
                        will write to stderr: {err}"
                        );
                    })
                    .map(|layer| layer.with_syslog_identifier(syslog_identifier))
                    .ok()
            })
        };
        let stderr_layer = journald_layer
            .is_none()
            .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(journald_layer)
            .with(self.filter)
            .try_init()?;

        Ok(Flusher)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "call .flush() at the end of the program, otherwise logs may get lost"]
pub struct Flusher;

impl Flusher {
    pub fn flush(self) {
        std::io::stderr().flush().ok();
        std::io::stdout().flush().ok();
    }
}
