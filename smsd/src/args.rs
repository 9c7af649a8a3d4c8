use crate::{
    dispatcher::DispatchConfig,
    inbox::PollConfig,
    modem::{sms::PhoneNumber, ModemConfig},
    worker::WorkerConfig,
};
use clap::{
    builder::{styling::AnsiColor, Styles},
    Parser,
};
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};

#[derive(Parser, Debug)]
#[command(about, version, styles = clap_v3_styles())]
pub struct Args {
    /// Serial device the modem is attached to.
    #[arg(long, env = "SMSD_DEVICE", default_value = "/dev/serial0")]
    pub device: String,

    #[arg(long, env = "SMSD_BAUD_RATE", default_value_t = 115_200)]
    pub baud_rate: u32,

    /// SIM PIN, entered whenever the SIM asks for it.
    #[arg(long, env = "SMSD_PIN", hide_env_values = true)]
    pub pin: Option<SecretString>,

    /// Service center number to send through, instead of the SIM's default.
    #[arg(long, env = "SMSD_SMSC")]
    pub smsc: Option<PhoneNumber>,

    /// Read timeout for ordinary AT commands, in milliseconds.
    #[arg(long, env = "SMSD_COMMAND_TIMEOUT_MS", default_value_t = 1_000)]
    pub command_timeout_ms: u64,

    #[arg(long, env = "SMSD_PIN_TIMEOUT_SECS", default_value_t = 5)]
    pub pin_timeout_secs: u64,

    #[arg(long, env = "SMSD_SEND_TIMEOUT_SECS", default_value_t = 60)]
    pub send_timeout_secs: u64,

    #[arg(long, env = "SMSD_SCAN_TIMEOUT_SECS", default_value_t = 45)]
    pub scan_timeout_secs: u64,

    /// Retries after a failed send before giving up on a message.
    #[arg(long, env = "SMSD_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: u32,

    /// Pause after every send attempt, in milliseconds.
    #[arg(long, env = "SMSD_PACING_MS", default_value_t = 1_000)]
    pub pacing_ms: u64,

    /// Pause between worker cycles.
    #[arg(long, env = "SMSD_CYCLE_SECS", default_value_t = 5)]
    pub cycle_secs: u64,

    /// How long to wait for network registration at startup. 0 skips the wait.
    #[arg(long, env = "SMSD_REGISTRATION_WAIT_SECS", default_value_t = 60)]
    pub registration_wait_secs: u64,

    /// Delete messages from the SIM once stored.
    #[arg(long, env = "SMSD_DELETE_AFTER_READ")]
    pub delete_after_read: bool,

    /// SQLite inbox. Without it the inbox only lives in memory.
    #[arg(long, env = "SMSD_DB")]
    pub db: Option<PathBuf>,

    /// zenoh router to publish received messages to and take send requests from.
    #[arg(long, env = "SMSD_ZENOH_ENDPOINT")]
    pub zenoh_endpoint: Option<String>,

    #[arg(long, env = "SMSD_INBOX_TOPIC", default_value = "sms/inbox")]
    pub inbox_topic: String,

    #[arg(long, env = "SMSD_OUTBOX_TOPIC", default_value = "sms/outbox")]
    pub outbox_topic: String,

    /// Run against a simulated modem instead of the serial device.
    #[arg(long)]
    pub simulate: bool,
}

impl Args {
    pub fn modem_config(&self) -> ModemConfig {
        ModemConfig {
            pin: self.pin.clone(),
            base_timeout: Duration::from_millis(self.command_timeout_ms),
            pin_timeout: Duration::from_secs(self.pin_timeout_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            ..ModemConfig::default()
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_retries: self.max_retries,
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            delete_after_read: self.delete_after_read,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            cycle_delay: Duration::from_secs(self.cycle_secs),
            registration_timeout: (self.registration_wait_secs > 0)
                .then(|| Duration::from_secs(self.registration_wait_secs)),
        }
    }
}

fn clap_v3_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Green.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn the_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_match_a_sim800() {
        // Arrange
        let args = Args::parse_from(["orb-smsd"]);

        // Act
        let modem = args.modem_config();
        let dispatch = args.dispatch_config();
        let worker = args.worker_config();

        // Assert
        assert_eq!(args.device, "/dev/serial0");
        assert_eq!(args.baud_rate, 115_200);
        assert_eq!(modem.base_timeout, Duration::from_secs(1));
        assert_eq!(modem.send_timeout, Duration::from_secs(60));
        assert_eq!(dispatch.max_retries, 5);
        assert_eq!(dispatch.pacing, Duration::from_secs(1));
        assert_eq!(worker.cycle_delay, Duration::from_secs(5));
        assert_eq!(worker.registration_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn a_zero_registration_wait_skips_it() {
        let args = Args::parse_from(["orb-smsd", "--registration-wait-secs", "0"]);

        assert_eq!(args.worker_config().registration_timeout, None);
    }

    #[test]
    fn it_rejects_a_malformed_smsc() {
        let result = Args::try_parse_from(["orb-smsd", "--smsc", "not-a-number"]);

        assert!(result.is_err());
    }
}
