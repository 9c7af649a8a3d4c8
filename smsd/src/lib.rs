//! SMS gateway for SIM800-class GSM modems driven over a serial AT port.
//!
//! One [`worker::Worker`] owns the modem. Everything else goes through a
//! [`gateway::Gateway`]: queue a send, read the cached status, read the inbox.

pub mod args;
pub mod at;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod inbox;
pub mod ingress;
pub mod modem;
pub mod publisher;
pub mod sim;
pub mod status;
pub mod telemetry;
pub mod worker;

use at::Transport;
use dispatcher::{DispatchConfig, Dispatcher};
use gateway::Gateway;
use inbox::{InboxPoller, InboxStore, PollConfig};
use modem::{sms::PhoneNumber, Modem, ModemConfig};
use publisher::{InboxPublisher, NoopPublisher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use worker::{Worker, WorkerConfig, WorkerHandle};

/// Wires up and starts the gateway on top of `transport`. Must be called from
/// within a tokio runtime.
#[bon::builder(finish_fn = start)]
pub fn service<T: Transport + 'static>(
    transport: T,
    store: Arc<dyn InboxStore>,
    publisher: Option<Arc<dyn InboxPublisher>>,
    #[builder(default)] modem: ModemConfig,
    #[builder(default)] dispatch: DispatchConfig,
    #[builder(default)] poll: PollConfig,
    #[builder(default)] worker: WorkerConfig,
    smsc: Option<PhoneNumber>,
    #[builder(default)] cancel: CancellationToken,
) -> (Gateway, WorkerHandle) {
    let publisher: Arc<dyn InboxPublisher> = match publisher {
        Some(publisher) => publisher,
        None => Arc::new(NoopPublisher),
    };
    let (outbox, dispatcher) = Dispatcher::channel(dispatch);
    let (status_writer, status_cache) = status::cache();
    let poller = InboxPoller::new(Arc::clone(&store), publisher, poll);

    let gateway = Gateway::new(outbox, status_cache, store, smsc, cancel.clone());
    let handle = Worker::new(
        Modem::new(transport, modem),
        dispatcher,
        poller,
        status_writer,
        worker,
    )
    .start(cancel);

    (gateway, handle)
}
