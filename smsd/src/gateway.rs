//! What the outside world gets to touch. None of these calls wait on the modem.

use crate::{
    dispatcher::{OutboundMessage, SendFailure, SendOutcome},
    error::Rejected,
    inbox::InboxStore,
    modem::{
        sms::{validate_text, InboundMessage, PhoneNumber},
        status::ModemStatus,
    },
    status::StatusCache,
};
use color_eyre::eyre::Result;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct Gateway {
    outbox: flume::Sender<OutboundMessage>,
    status: StatusCache,
    store: Arc<dyn InboxStore>,
    smsc: Option<PhoneNumber>,
    next_id: Arc<AtomicU64>,
    stopped: CancellationToken,
}

impl Gateway {
    pub fn new(
        outbox: flume::Sender<OutboundMessage>,
        status: StatusCache,
        store: Arc<dyn InboxStore>,
        smsc: Option<PhoneNumber>,
        stopped: CancellationToken,
    ) -> Self {
        Self {
            outbox,
            status,
            store,
            smsc,
            next_id: Arc::new(AtomicU64::new(1)),
            stopped,
        }
    }

    /// Queues `text` for every number in `destinations` (`,` or `;`
    /// separated). Returns as soon as the message is queued.
    pub fn enqueue_send(&self, destinations: &str, text: &str) -> Result<SendTicket, Rejected> {
        let destinations = PhoneNumber::parse_list(destinations)?;
        validate_text(text)?;
        if self.stopped.is_cancelled() {
            return Err(Rejected::WorkerStopped);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut msg = OutboundMessage::new(id, destinations, text).with_smsc(self.smsc.clone());
        let rx = msg.notify();
        let count = msg.destinations.len();

        self.outbox
            .send(msg)
            .map_err(|_| Rejected::WorkerStopped)?;
        info!(id, destinations = count, "message queued");

        Ok(SendTicket { id, rx })
    }

    /// The latest snapshot, `None` before the first worker cycle completed.
    pub fn status(&self) -> Option<Arc<ModemStatus>> {
        self.status.get()
    }

    pub async fn inbox(&self) -> Result<Vec<InboundMessage>> {
        self.store.list().await
    }
}

/// Handle to one queued message.
#[derive(Debug)]
pub struct SendTicket {
    id: u64,
    rx: oneshot::Receiver<SendOutcome>,
}

impl SendTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolves once the message was sent or given up on.
    pub async fn wait(self) -> SendOutcome {
        self.rx.await.unwrap_or_else(|_| {
            Err(SendFailure::Shutdown {
                delivered: Vec::new(),
                undelivered: Vec::new(),
            })
        })
    }
}
