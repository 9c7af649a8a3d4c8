//! A session with one SIM800-class modem.
//!
//! Everything here assumes exclusive ownership of the port: callers never run
//! two exchanges at once, which is what makes the single worker necessary.

pub mod registration;
pub mod sms;
pub mod status;

use crate::{
    at::{
        response::{split_fields, FINAL, PROMPT, SMS_READY},
        AtPort, Command, RawResponse, Transport,
    },
    error::{AtError, RegistrationTimeout},
};
use chrono::Utc;
use registration::{parse_creg, Registration, RegistrationState};
use secrecy::{ExposeSecret as _, SecretString};
use sms::{parse_cmgr, DeviceMessage, PhoneNumber, Slot};
use status::{parse_operator, ModemStatus, SignalQuality, SimStatus, StorageCounters};
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// `+CMS ERROR: 321`, invalid memory index. Returned for empty slots by some
/// firmwares instead of a bare `OK`.
const INVALID_INDEX: u16 = 321;

const SUB: u8 = 0x1a;
const ESC: u8 = 0x1b;

#[derive(Debug, Clone)]
pub struct ModemConfig {
    pub pin: Option<SecretString>,
    /// Read timeout of ordinary commands.
    pub base_timeout: Duration,
    /// How long `AT+CPIN=<pin>` may take to reach `SMS Ready`.
    pub pin_timeout: Duration,
    /// How long the network may take to accept a submitted message.
    pub send_timeout: Duration,
    pub scan_timeout: Duration,
    /// The unlock loop gives up after `unlock_factor * base_timeout`.
    pub unlock_factor: u32,
    /// Pause around PIN writes.
    pub pin_settle: Duration,
    pub registration_poll: Duration,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            pin: None,
            base_timeout: Duration::from_secs(1),
            pin_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(60),
            scan_timeout: Duration::from_secs(45),
            unlock_factor: 5,
            pin_settle: Duration::from_millis(100),
            registration_poll: Duration::from_secs(1),
        }
    }
}

pub struct Modem<T> {
    at: AtPort<T>,
    config: ModemConfig,
    /// The SIM's own service center, saved before the first override.
    sim_smsc: Option<PhoneNumber>,
    smsc_overridden: bool,
}

impl<T: Transport> Modem<T> {
    pub fn new(transport: T, config: ModemConfig) -> Self {
        Self {
            at: AtPort::new(transport, config.base_timeout),
            config,
            sim_smsc: None,
            smsc_overridden: false,
        }
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn at(&mut self) -> &mut AtPort<T> {
        &mut self.at
    }

    pub fn transport(&self) -> &T {
        self.at.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.at.transport_mut()
    }

    /// Turns echo off and selects text mode.
    pub async fn prepare(&mut self) -> Result<(), AtError> {
        self.at.run(&Command::basic("E0")).await?;
        self.at.write("CMGF", 1).await?;

        Ok(())
    }

    pub async fn reconnect(&mut self) -> Result<(), AtError> {
        self.at.reconnect().await
    }

    pub async fn sim_status(&mut self) -> Result<SimStatus, AtError> {
        let resp = self.at.read("CPIN").await?;
        find_line(&resp, "+CPIN", SimStatus::parse)
            .ok_or_else(|| AtError::parse("AT+CPIN?", "no +CPIN line"))
    }

    /// Enters the PIN for as long as the SIM asks for it, up to the unlock
    /// deadline. Returns the last observed status, which may still be locked.
    pub async fn ensure_unlocked(&mut self) -> Result<SimStatus, AtError> {
        let deadline = Instant::now() + self.config.base_timeout * self.config.unlock_factor;
        let mut sim = self.sim_status().await?;

        while sim == SimStatus::PinRequired && Instant::now() < deadline {
            let Some(pin) = self.config.pin.as_ref() else {
                warn!("SIM asks for a PIN but none is configured");
                break;
            };
            let cmd = Command::write("CPIN", [pin.expose_secret().as_str()])
                .until(SMS_READY)
                .timeout(self.config.pin_timeout);

            time::sleep(self.config.pin_settle).await;
            match self.at.run_redacted(&cmd, "AT+CPIN=<pin>").await {
                Ok(_) => info!("SIM unlocked"),
                Err(e) => warn!(error = %e, "PIN entry did not complete"),
            }
            time::sleep(self.config.pin_settle).await;

            sim = self.sim_status().await?;
        }

        Ok(sim)
    }

    /// Submits one text message and returns the network's message reference.
    pub async fn send_sms(
        &mut self,
        destination: &PhoneNumber,
        text: &str,
    ) -> Result<Option<u16>, AtError> {
        let sim = self.ensure_unlocked().await?;
        if sim != SimStatus::Ready {
            debug!(?sim, "sending with a SIM that is not ready");
        }

        self.at.write("CMGF", 1).await?;
        self.at.write("CSCS", "GSM").await?;

        let compose = Command::write("CMGS", [destination.as_str()]).until(PROMPT);
        if let Err(e) = self.at.run(&compose).await {
            // leave text entry if the prompt showed up late
            if e.is_timeout() {
                self.at.send_bytes(&[ESC]).await?;
            }
            return Err(e);
        }

        let mut body = text.as_bytes().to_vec();
        body.push(SUB);
        self.at.send_bytes(&body).await?;
        let label = format!("AT+CMGS=\"{destination}\" <body>");
        let resp = self
            .at
            .receive(&label, FINAL, self.config.send_timeout)
            .await?;

        Ok(resp.field("+CMGS").and_then(|mr| mr.parse().ok()))
    }

    /// The service center currently configured, `None` if unset.
    pub async fn smsc(&mut self) -> Result<Option<PhoneNumber>, AtError> {
        let resp = self.at.read("CSCA").await?;

        Ok(resp
            .field("+CSCA")
            .and_then(|payload| split_fields(payload).into_iter().next())
            .and_then(|number| number.parse().ok()))
    }

    /// Sets the service center used for subsequent sends. `AT+CSCA` sticks, so
    /// the SIM's own value is saved first for [`Self::restore_smsc`].
    pub async fn set_smsc(&mut self, smsc: &PhoneNumber) -> Result<(), AtError> {
        if !self.smsc_overridden {
            self.sim_smsc = self.smsc().await?;
        }
        self.at.write("CSCA", smsc.as_str()).await?;
        self.smsc_overridden = true;

        Ok(())
    }

    /// Puts back the service center saved by [`Self::set_smsc`], if any.
    pub async fn restore_smsc(&mut self) -> Result<(), AtError> {
        if !self.smsc_overridden {
            return Ok(());
        }
        match self.sim_smsc.clone() {
            Some(smsc) => {
                self.at.write("CSCA", smsc.as_str()).await?;
            }
            None => warn!("SIM had no service center to restore, keeping the override"),
        }
        self.smsc_overridden = false;

        Ok(())
    }

    /// Collects a full snapshot. Queries that fail leave their field empty.
    pub async fn status(&mut self) -> ModemStatus {
        let mut status = ModemStatus::empty(Utc::now());

        status.imei = self.info(Command::execute("CGSN")).await;
        status.manufacturer = self.info(Command::execute("CGMI")).await;
        status.model = self.info(Command::execute("CGMM")).await;
        status.product_info = self.info(Command::basic("I")).await;
        status.operator = self.query(Command::read("COPS"), "+COPS", parse_operator).await;
        status.sim = self.query(Command::read("CPIN"), "+CPIN", SimStatus::parse).await;
        status.signal = self
            .query(Command::execute("CSQ"), "+CSQ", SignalQuality::parse)
            .await;
        status.registration = self.query(Command::read("CREG"), "+CREG", parse_creg).await;
        status.storage = self
            .query(Command::read("CPMS"), "+CPMS", StorageCounters::parse)
            .await;

        status
    }

    async fn info(&mut self, cmd: Command) -> Option<String> {
        let request = cmd.render();
        let resp = self
            .at
            .run(&cmd)
            .await
            .inspect_err(|e| debug!(error = %e, "status query failed"))
            .ok()?;

        resp.first_body_line(&request).map(str::to_owned)
    }

    async fn query<V>(
        &mut self,
        cmd: Command,
        prefix: &str,
        parse: fn(&str) -> Option<V>,
    ) -> Option<V> {
        let resp = self
            .at
            .run(&cmd)
            .await
            .inspect_err(|e| debug!(error = %e, "status query failed"))
            .ok()?;

        find_line(&resp, prefix, parse)
    }

    /// The current `+CREG` reading. `None` if the reply could not be parsed.
    pub async fn registration(&mut self) -> Result<Option<Registration>, AtError> {
        let resp = self.at.read("CREG").await?;

        Ok(find_line(&resp, "+CREG", parse_creg))
    }

    /// Polls registration until home, roaming or denied, tolerating failed and
    /// unparsable reads, for at most `timeout`.
    pub async fn wait_for_registration(
        &mut self,
        timeout: Duration,
    ) -> Result<RegistrationState, RegistrationTimeout> {
        let deadline = Instant::now() + timeout;
        let mut last = None;

        loop {
            if let Err(e) = self.ensure_unlocked().await {
                debug!(error = %e, "SIM check failed while waiting for registration");
            }

            match self.registration().await {
                Ok(Some(reg)) if reg.state.is_settled() => {
                    info!(state = %reg.state, "network registration settled");
                    return Ok(reg.state);
                }
                Ok(Some(reg)) => last = Some(reg.state),
                Ok(None) => debug!("unparsable registration reply, still searching"),
                Err(e) => debug!(error = %e, "registration read failed"),
            }

            if Instant::now() + self.config.registration_poll > deadline {
                return Err(RegistrationTimeout {
                    waited: timeout,
                    last,
                });
            }
            time::sleep(self.config.registration_poll).await;
        }
    }

    pub async fn storage(&mut self) -> Result<StorageCounters, AtError> {
        let resp = self.at.read("CPMS").await?;

        find_line(&resp, "+CPMS", StorageCounters::parse)
            .ok_or_else(|| AtError::parse("AT+CPMS?", "no storage counters"))
    }

    /// Reads one slot. With `peek` the modem leaves the unread flag alone.
    pub async fn read_slot(&mut self, slot: u16, peek: bool) -> Result<Slot, AtError> {
        let cmd = if peek {
            Command::write("CMGR", [slot, 1])
        } else {
            Command::write("CMGR", [slot])
        };
        let request = cmd.render();

        let resp = match self.at.run(&cmd).await {
            Ok(resp) => resp,
            Err(e) if e.device_code() == Some(INVALID_INDEX) => return Ok(Slot::Empty),
            Err(e) => return Err(e),
        };

        parse_cmgr(slot, resp.body(&request))
            .ok_or_else(|| AtError::parse(request, "malformed +CMGR header"))
    }

    /// Peeks at every slot and returns the unread messages, oldest slot first.
    pub async fn unread_messages(&mut self) -> Result<Vec<DeviceMessage>, AtError> {
        let storage = self.storage().await?;
        let mut unread = Vec::new();

        for slot in 1..=storage.total {
            match self.read_slot(slot, true).await {
                Ok(Slot::Present(msg)) if msg.unread => unread.push(msg),
                Ok(Slot::Present(_) | Slot::Empty) => {}
                // a bad slot must not hide the ones after it
                Err(e @ (AtError::Parse { .. } | AtError::Device { .. })) => {
                    warn!(slot, error = %e, "skipping unreadable slot");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(unread)
    }

    /// Clears the unread flag by reading the slot without peeking.
    pub async fn mark_read(&mut self, slot: u16) -> Result<(), AtError> {
        self.read_slot(slot, false).await?;

        Ok(())
    }

    pub async fn delete(&mut self, slot: u16) -> Result<(), AtError> {
        self.at.write("CMGD", slot).await?;

        Ok(())
    }

    /// Runs a cell network scan and returns one line per cell found.
    pub async fn scan_cells(&mut self) -> Result<Vec<String>, AtError> {
        self.at.write("CNETSCAN", 1).await?;

        let cmd = Command::execute("CNETSCAN").timeout(self.config.scan_timeout);
        let request = cmd.render();
        let resp = self.at.run(&cmd).await?;

        Ok(resp
            .body(&request)
            .iter()
            .filter(|l| !l.is_empty())
            .cloned()
            .collect())
    }
}

fn find_line<V>(resp: &RawResponse, prefix: &str, parse: fn(&str) -> Option<V>) -> Option<V> {
    resp.lines
        .iter()
        .filter(|line| line.starts_with(prefix))
        .find_map(|line| parse(line))
}
