//! An in-process SIM800-class modem.
//!
//! Speaks enough of the AT dialect for the daemon to run end to end without
//! hardware: PIN lock, text-mode sends, SIM message storage, registration and
//! identity queries. [`SimHandle`] lets tests and the `--simulate` mode poke at
//! its state while the worker owns the transport.

use crate::at::Transport;
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSms {
    pub destination: String,
    pub text: String,
    pub smsc: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredSms {
    sender: String,
    text: String,
    scts: String,
    unread: bool,
}

#[derive(Debug)]
struct SimState {
    pin: Option<String>,
    locked: bool,
    echo: bool,
    registration: u8,
    slots: Vec<Option<StoredSms>>,
    sticky_unread: bool,
    failing_sends: u32,
    silent: bool,
    smsc: Option<String>,
    composing: Option<String>,
    sent: Vec<SentSms>,
    next_reference: u16,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// `Some` starts the SIM locked behind this PIN.
    pub pin: Option<String>,
    pub capacity: usize,
    /// `<stat>` reported by `AT+CREG?`.
    pub registration: u8,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            pin: None,
            capacity: 10,
            registration: 1,
        }
    }
}

/// Shared control over a [`SimulatedModem`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores an incoming message in the first free slot. Returns the slot, or
    /// `None` when storage is full.
    pub fn deliver(&self, sender: &str, text: &str) -> Option<u16> {
        let mut state = self.lock();
        let free = state.slots.iter().position(Option::is_none)?;
        state.slots[free] = Some(StoredSms {
            sender: sender.to_owned(),
            text: text.to_owned(),
            scts: Utc::now().format("%y/%m/%d,%H:%M:%S+00").to_string(),
            unread: true,
        });

        u16::try_from(free + 1).ok()
    }

    pub fn sent(&self) -> Vec<SentSms> {
        self.lock().sent.clone()
    }

    /// Makes the next `count` submissions fail with `+CMS ERROR: 500`.
    pub fn fail_sends(&self, count: u32) {
        self.lock().failing_sends = count;
    }

    /// Keeps messages unread even after a non-peeking read.
    pub fn set_sticky_unread(&self, sticky: bool) {
        self.lock().sticky_unread = sticky;
    }

    pub fn set_registration(&self, stat: u8) {
        self.lock().registration = stat;
    }

    /// Stops answering anything, as a powered-off modem would.
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    pub fn relock(&self) {
        let mut state = self.lock();
        state.locked = state.pin.is_some();
    }

    pub fn is_locked(&self) -> bool {
        self.lock().locked
    }

    /// Messages still in storage, in slot order.
    pub fn stored(&self) -> Vec<(u16, bool)> {
        self.lock()
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let slot_no = u16::try_from(i + 1).ok()?;
                slot.as_ref().map(|sms| (slot_no, sms.unread))
            })
            .collect()
    }
}

pub struct SimulatedModem {
    handle: SimHandle,
    rx: VecDeque<u8>,
}

impl SimulatedModem {
    pub fn new(config: SimConfig) -> Self {
        let state = SimState {
            locked: config.pin.is_some(),
            pin: config.pin,
            echo: true,
            registration: config.registration,
            slots: vec![None; config.capacity],
            sticky_unread: false,
            failing_sends: 0,
            silent: false,
            smsc: None,
            composing: None,
            sent: Vec::new(),
            next_reference: 1,
        };

        Self {
            handle: SimHandle {
                state: Arc::new(Mutex::new(state)),
            },
            rx: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    fn reply(&mut self, lines: &[String]) {
        for line in lines {
            self.rx.extend(format!("\r\n{line}\r\n").into_bytes());
        }
    }
}

enum Reply {
    Lines(Vec<String>),
    Prompt,
    Nothing,
}

fn lines<const N: usize>(lines: [&str; N]) -> Reply {
    Reply::Lines(lines.iter().map(|l| (*l).to_owned()).collect())
}

impl SimState {
    fn handle_body(&mut self, body: &[u8]) -> Reply {
        let Some(destination) = self.composing.take() else {
            return Reply::Nothing;
        };
        match body.last() {
            Some(0x1b) => lines(["OK"]),
            Some(0x1a) => {
                if self.failing_sends > 0 {
                    self.failing_sends -= 1;
                    return lines(["+CMS ERROR: 500"]);
                }
                let text = String::from_utf8_lossy(&body[..body.len() - 1]).into_owned();
                self.sent.push(SentSms {
                    destination,
                    text,
                    smsc: self.smsc.clone(),
                });
                let reference = self.next_reference;
                self.next_reference = self.next_reference.wrapping_add(1);
                Reply::Lines(vec![format!("+CMGS: {reference}"), "OK".into()])
            }
            _ => {
                self.composing = Some(destination);
                Reply::Nothing
            }
        }
    }

    fn handle_command(&mut self, cmd: &str) -> Reply {
        let unquoted = |s: &str| s.trim_matches('"').to_owned();

        match cmd {
            "AT" | "AT+CMGF=1" | "AT+CSCS=\"GSM\"" | "AT+CNETSCAN=1" => lines(["OK"]),
            "ATE0" => {
                self.echo = false;
                lines(["OK"])
            }
            "ATE1" => {
                self.echo = true;
                lines(["OK"])
            }
            "ATI" => lines(["SIM800 R14.18", "OK"]),
            "AT+CGMI" => lines(["SIMCOM_Ltd", "OK"]),
            "AT+CGMM" => lines(["SIMCOM_SIM800L", "OK"]),
            "AT+CGSN" => lines(["867856030000000", "OK"]),
            "AT+CSQ" => lines(["+CSQ: 18,0", "OK"]),
            "AT+COPS?" => lines([r#"+COPS: 0,0,"SIMULATED""#, "OK"]),
            "AT+CPIN?" if self.locked => lines(["+CPIN: SIM PIN", "OK"]),
            "AT+CPIN?" => lines(["+CPIN: READY", "OK"]),
            "AT+CREG?" => Reply::Lines(vec![
                format!("+CREG: 0,{}", self.registration),
                "OK".into(),
            ]),
            "AT+CSCA?" => Reply::Lines(vec![
                match &self.smsc {
                    Some(smsc) => format!(r#"+CSCA: "{smsc}",145"#),
                    None => r#"+CSCA: "",129"#.to_owned(),
                },
                "OK".into(),
            ]),
            "AT+CPMS?" => {
                let used = self.slots.iter().filter(|s| s.is_some()).count();
                let total = self.slots.len();
                let mem = format!(r#""SM",{used},{total}"#);
                Reply::Lines(vec![format!("+CPMS: {mem},{mem},{mem}"), "OK".into()])
            }
            "AT+CNETSCAN" => lines([
                r#"Operator:"SIMULATED",MCC:001,MNC:01,Rxlev:40,Cellid:0001,Arfcn:10"#,
                "OK",
            ]),
            cmd => {
                if let Some(pin) = cmd.strip_prefix("AT+CPIN=") {
                    self.enter_pin(&unquoted(pin))
                } else if let Some(dest) = cmd.strip_prefix("AT+CMGS=") {
                    if self.locked {
                        return lines(["+CMS ERROR: 311"]);
                    }
                    self.composing = Some(unquoted(dest));
                    Reply::Prompt
                } else if let Some(smsc) = cmd.strip_prefix("AT+CSCA=") {
                    self.smsc = Some(unquoted(smsc));
                    lines(["OK"])
                } else if let Some(args) = cmd.strip_prefix("AT+CMGR=") {
                    self.read_slot(args)
                } else if let Some(slot) = cmd.strip_prefix("AT+CMGD=") {
                    match self.slot_index(slot) {
                        Some(i) => {
                            self.slots[i] = None;
                            lines(["OK"])
                        }
                        None => lines(["+CMS ERROR: 321"]),
                    }
                } else {
                    lines(["ERROR"])
                }
            }
        }
    }

    fn enter_pin(&mut self, pin: &str) -> Reply {
        if !self.locked {
            return lines(["+CME ERROR: 3"]);
        }
        if self.pin.as_deref() != Some(pin) {
            return lines(["+CME ERROR: 16"]);
        }
        self.locked = false;

        lines(["OK", "+CPIN: READY", "Call Ready", "SMS Ready"])
    }

    fn slot_index(&self, slot: &str) -> Option<usize> {
        let slot: usize = slot.trim().parse().ok()?;
        (1..=self.slots.len()).contains(&slot).then(|| slot - 1)
    }

    fn read_slot(&mut self, args: &str) -> Reply {
        let (slot, peek) = match args.split_once(',') {
            Some((slot, mode)) => (slot, mode.trim() == "1"),
            None => (args, false),
        };
        let Some(i) = self.slot_index(slot) else {
            return lines(["+CMS ERROR: 321"]);
        };
        let sticky = self.sticky_unread;
        let Some(sms) = self.slots[i].as_mut() else {
            return lines(["OK"]);
        };

        let stat = if sms.unread { "REC UNREAD" } else { "REC READ" };
        let reply = vec![
            format!(r#"+CMGR: "{stat}","{}","","{}""#, sms.sender, sms.scts),
            sms.text.clone(),
            "OK".into(),
        ];
        if !peek && !sticky {
            sms.unread = false;
        }

        Reply::Lines(reply)
    }
}

#[async_trait]
impl Transport for SimulatedModem {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let reply = {
            let mut state = self.handle.lock();
            if state.silent {
                return Ok(());
            }

            if state.composing.is_some() {
                state.handle_body(data)
            } else {
                let text = String::from_utf8_lossy(data);
                let cmd = text.trim_end_matches(['\r', '\n']).trim();
                trace!(cmd, "simulated modem received");

                let mut reply = state.handle_command(cmd);
                if state.echo && cmd != "ATE0" {
                    reply = match reply {
                        Reply::Lines(mut lines) => {
                            lines.insert(0, cmd.to_owned());
                            Reply::Lines(lines)
                        }
                        other => other,
                    };
                }
                reply
            }
        };

        match reply {
            Reply::Lines(lines) => self.reply(&lines),
            Reply::Prompt => self.rx.extend(b"\r\n> "),
            Reply::Nothing => {}
        }

        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            std::future::pending::<()>().await;
        }

        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }

        Ok(n)
    }
}
