//! Outbound queue. Only the worker touches the modem, callers hand messages
//! over a channel and learn the outcome through a oneshot.

use crate::{
    at::Transport,
    error::AtError,
    modem::{sms::PhoneNumber, Modem},
};
use serde::Serialize;
use std::{collections::VecDeque, time::Duration};
use thiserror::Error;
use tokio::{sync::oneshot, time};
use tracing::{error, info, warn};

pub type SendOutcome = Result<SendReport, SendFailure>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub destination: PhoneNumber,
    /// Message reference assigned by the network, when the modem reported one.
    pub reference: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub id: u64,
    pub attempts: u32,
    pub deliveries: Vec<Delivery>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendFailure {
    #[error("gave up after {attempts} attempts, last error: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: String,
        delivered: Vec<Delivery>,
        undelivered: Vec<PhoneNumber>,
    },
    #[error("gateway stopped before the message was sent")]
    Shutdown {
        delivered: Vec<Delivery>,
        undelivered: Vec<PhoneNumber>,
    },
}

#[derive(Debug)]
pub struct OutboundMessage {
    pub id: u64,
    /// Numbers still waiting for this text. Shrinks as sends succeed.
    pub destinations: VecDeque<PhoneNumber>,
    pub delivered: Vec<Delivery>,
    pub text: String,
    pub smsc: Option<PhoneNumber>,
    pub retry_count: u32,
    notifier: Option<oneshot::Sender<SendOutcome>>,
}

impl OutboundMessage {
    pub fn new(
        id: u64,
        destinations: impl IntoIterator<Item = PhoneNumber>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            destinations: destinations.into_iter().collect(),
            delivered: Vec::new(),
            text: text.into(),
            smsc: None,
            retry_count: 0,
            notifier: None,
        }
    }

    #[must_use]
    pub fn with_smsc(self, smsc: Option<PhoneNumber>) -> Self {
        Self { smsc, ..self }
    }

    /// Attaches a completion notifier and returns its receiving end.
    pub fn notify(&mut self) -> oneshot::Receiver<SendOutcome> {
        let (tx, rx) = oneshot::channel();
        self.notifier = Some(tx);
        rx
    }

    fn finish(mut self, outcome: SendOutcome) {
        if let Some(notifier) = self.notifier.take() {
            // the caller may have stopped waiting
            let _ = notifier.send(outcome);
        }
    }

    fn succeed(self) {
        let report = SendReport {
            id: self.id,
            attempts: self.retry_count + 1,
            deliveries: self.delivered.clone(),
        };
        self.finish(Ok(report));
    }

    fn fail(mut self, last_error: &AtError) {
        let failure = SendFailure::RetriesExhausted {
            attempts: self.retry_count + 1,
            last_error: last_error.to_string(),
            delivered: std::mem::take(&mut self.delivered),
            undelivered: self.destinations.drain(..).collect(),
        };
        self.finish(Err(failure));
    }

    fn abandon(mut self) {
        let failure = SendFailure::Shutdown {
            delivered: std::mem::take(&mut self.delivered),
            undelivered: self.destinations.drain(..).collect(),
        };
        self.finish(Err(failure));
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Pause after every attempt.
    pub pacing: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            pacing: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempts: u32,
    pub sent: u32,
    pub requeued: u32,
    pub failed: u32,
}

pub struct Dispatcher {
    rx: flume::Receiver<OutboundMessage>,
    queue: VecDeque<OutboundMessage>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Creates the dispatcher together with the sending half of its inbox.
    pub fn channel(config: DispatchConfig) -> (flume::Sender<OutboundMessage>, Self) {
        let (tx, rx) = flume::unbounded();
        let dispatcher = Self {
            rx,
            queue: VecDeque::new(),
            config,
        };

        (tx, dispatcher)
    }

    /// Messages waiting, including those not yet pulled from the channel.
    pub fn pending(&self) -> usize {
        self.queue.len() + self.rx.len()
    }

    /// Works the queue until it is empty. Failed messages go to the back of
    /// the queue until they run out of retries.
    pub async fn drain<T: Transport>(&mut self, modem: &mut Modem<T>) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            self.queue.extend(self.rx.try_iter());
            let Some(mut msg) = self.queue.pop_front() else {
                break;
            };

            report.attempts += 1;
            match attempt(modem, &mut msg).await {
                Ok(()) => {
                    info!(id = msg.id, attempts = msg.retry_count + 1, "message sent");
                    report.sent += 1;
                    msg.succeed();
                }
                Err(e) if msg.retry_count < self.config.max_retries => {
                    msg.retry_count += 1;
                    warn!(
                        id = msg.id,
                        retry = msg.retry_count,
                        error = %e,
                        "send failed, requeueing"
                    );
                    report.requeued += 1;
                    // anything queued during the attempt goes ahead of the retry
                    self.queue.extend(self.rx.try_iter());
                    self.queue.push_back(msg);

                    if let Err(e) = modem.ensure_unlocked().await {
                        warn!(error = %e, "SIM check after failed send failed");
                    }
                }
                Err(e) => {
                    error!(id = msg.id, error = %e, "giving up on message");
                    report.failed += 1;
                    msg.fail(&e);
                }
            }

            time::sleep(self.config.pacing).await;
        }

        report
    }

    /// Fails everything still queued with [`SendFailure::Shutdown`].
    pub fn abandon_pending(&mut self) -> usize {
        self.queue.extend(self.rx.try_iter());
        let count = self.queue.len();
        for msg in self.queue.drain(..) {
            msg.abandon();
        }

        count
    }
}

async fn attempt<T: Transport>(
    modem: &mut Modem<T>,
    msg: &mut OutboundMessage,
) -> Result<(), AtError> {
    match &msg.smsc {
        Some(smsc) => modem.set_smsc(smsc).await?,
        None => modem.restore_smsc().await?,
    }

    while let Some(destination) = msg.destinations.front() {
        let reference = modem.send_sms(destination, &msg.text).await?;
        if let Some(destination) = msg.destinations.pop_front() {
            msg.delivered.push(Delivery {
                destination,
                reference,
            });
        }
    }

    Ok(())
}
