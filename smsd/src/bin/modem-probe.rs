//! One-shot modem diagnostics: unlock, dump status, optionally wait for the
//! network, scan cells or send a single message.

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr as _};
use orb_smsd::{
    at::{SerialTransport, Transport},
    modem::{
        sms::{validate_text, PhoneNumber},
        Modem,
    },
    sim::{SimConfig, SimulatedModem},
    telemetry::Telemetry,
};
use secrecy::{ExposeSecret as _, SecretString};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about)]
struct Cli {
    #[arg(long, env = "SMSD_DEVICE", default_value = "/dev/serial0")]
    device: String,

    #[arg(long, env = "SMSD_BAUD_RATE", default_value_t = 115_200)]
    baud_rate: u32,

    #[arg(long, env = "SMSD_PIN", hide_env_values = true)]
    pin: Option<SecretString>,

    /// Wait up to this many seconds for network registration.
    #[arg(long)]
    wait_registration: Option<u64>,

    /// Run a cell network scan (takes up to 45s).
    #[arg(long)]
    scan: bool,

    /// Send `--text` to this number.
    #[arg(long, requires = "text")]
    send_to: Option<PhoneNumber>,

    #[arg(long)]
    text: Option<String>,

    /// Talk to a simulated modem instead.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let telemetry = Telemetry::new().try_init()?;

    let cli = Cli::parse();
    let config = orb_smsd::modem::ModemConfig {
        pin: cli.pin.clone(),
        ..Default::default()
    };

    let result = if cli.simulate {
        let sim = SimulatedModem::new(SimConfig {
            pin: cli.pin.as_ref().map(|pin| pin.expose_secret().clone()),
            ..SimConfig::default()
        });
        probe(Modem::new(sim, config), &cli).await
    } else {
        let mut serial = SerialTransport::new(&cli.device, cli.baud_rate);
        serial
            .open()
            .wrap_err_with(|| format!("failed to open {}", cli.device))?;
        probe(Modem::new(serial, config), &cli).await
    };

    telemetry.flush();

    result
}

async fn probe<T: Transport>(mut modem: Modem<T>, cli: &Cli) -> Result<()> {
    modem.prepare().await?;
    let sim = modem.ensure_unlocked().await?;
    info!(?sim, "SIM checked");

    if let Some(secs) = cli.wait_registration {
        let state = modem
            .wait_for_registration(Duration::from_secs(secs))
            .await?;
        info!(%state, "registered");
    }

    let status = modem.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if cli.scan {
        for cell in modem.scan_cells().await? {
            println!("{cell}");
        }
    }

    if let (Some(to), Some(text)) = (&cli.send_to, &cli.text) {
        validate_text(text)?;
        let reference = modem.send_sms(to, text).await?;
        info!(%to, ?reference, "message sent");
    }

    Ok(())
}
