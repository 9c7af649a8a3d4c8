//! Send requests arriving over zenoh.

use crate::gateway::{Gateway, SendTicket};
use color_eyre::eyre::{eyre, Result, WrapErr as _};
use serde::Deserialize;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// `{"to": "+33600000000,+33611111111", "text": "hello"}`
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct SendRequest {
    pub to: String,
    pub text: String,
}

/// Parses one payload and queues it.
pub fn handle_payload(gateway: &Gateway, payload: &[u8]) -> Result<SendTicket> {
    let req: SendRequest =
        serde_json::from_slice(payload).wrap_err("malformed send request")?;
    let ticket = gateway.enqueue_send(&req.to, &req.text)?;

    Ok(ticket)
}

pub fn spawn(
    session: zenoh::Session,
    keyexpr: String,
    gateway: Gateway,
    cancel: CancellationToken,
) -> JoinHandle<Result<()>> {
    task::spawn(async move {
        let subscriber = session
            .declare_subscriber(&keyexpr)
            .await
            .map_err(|e| eyre!("{e}"))?;
        info!(%keyexpr, "listening for send requests");

        loop {
            let sample = tokio::select! {
                () = cancel.cancelled() => break,
                sample = subscriber.recv_async() => sample.map_err(|e| eyre!("{e}"))?,
            };

            match handle_payload(&gateway, &sample.payload().to_bytes()) {
                Ok(ticket) => {
                    task::spawn(report(ticket));
                }
                Err(e) => warn!(%keyexpr, "rejected send request: {e:#}"),
            }
        }

        Ok(())
    })
}

async fn report(ticket: SendTicket) {
    let id = ticket.id();
    match ticket.wait().await {
        Ok(report) => info!(id, deliveries = report.deliveries.len(), "send request done"),
        Err(e) => error!(id, "send request failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatcher::{DispatchConfig, Dispatcher},
        error::Rejected,
        inbox::MemoryInbox,
        status,
    };
    use std::sync::Arc;

    fn gateway() -> (Gateway, Dispatcher) {
        let (outbox, dispatcher) = Dispatcher::channel(DispatchConfig::default());
        let (_writer, cache) = status::cache();
        let gateway = Gateway::new(
            outbox,
            cache,
            Arc::new(MemoryInbox::new()),
            None,
            CancellationToken::new(),
        );

        (gateway, dispatcher)
    }

    #[test]
    fn it_queues_well_formed_requests() {
        let (gateway, dispatcher) = gateway();

        handle_payload(&gateway, br#"{"to":"+33600000000","text":"hi"}"#).unwrap();

        assert_eq!(dispatcher.pending(), 1);
    }

    #[test]
    fn it_reports_why_a_request_was_refused() {
        // Arrange
        let (gateway, dispatcher) = gateway();

        // Act
        let garbage = handle_payload(&gateway, b"not json").unwrap_err();
        let invalid = handle_payload(&gateway, br#"{"to":"","text":"hi"}"#).unwrap_err();

        // Assert
        assert!(garbage.to_string().contains("malformed"));
        assert_eq!(invalid.downcast_ref::<Rejected>(), Some(&Rejected::NoDestination));
        assert_eq!(dispatcher.pending(), 0);
    }
}
