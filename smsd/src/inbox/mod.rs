//! Moves received messages off the SIM into the store and out to subscribers.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryInbox;
pub use sqlite::SqliteInbox;

use crate::{
    at::Transport,
    error::AtError,
    modem::{sms::InboundMessage, Modem},
    publisher::InboxPublisher,
};
use async_trait::async_trait;
use chrono::Utc;
use color_eyre::eyre;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Stores `msg` unless a message with the same id is already there.
    /// Returns whether it was new.
    async fn insert(&self, msg: &InboundMessage) -> eyre::Result<bool>;

    /// Every stored message, oldest first.
    async fn list(&self) -> eyre::Result<Vec<InboundMessage>>;
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Modem(#[from] AtError),
    #[error("inbox store failed: {0:#}")]
    Store(eyre::Report),
}

#[derive(Debug, Clone, Default)]
pub struct PollConfig {
    /// Free the slot once the message is stored.
    pub delete_after_read: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub unread: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub published: usize,
}

pub struct InboxPoller {
    store: Arc<dyn InboxStore>,
    publisher: Arc<dyn InboxPublisher>,
    config: PollConfig,
}

impl InboxPoller {
    pub fn new(
        store: Arc<dyn InboxStore>,
        publisher: Arc<dyn InboxPublisher>,
        config: PollConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn InboxStore> {
        &self.store
    }

    /// One pass over the SIM storage.
    ///
    /// Messages are only marked read on the device after they are stored, so a
    /// store failure leaves them for the next pass.
    pub async fn poll<T: Transport>(
        &self,
        modem: &mut Modem<T>,
    ) -> Result<PollReport, PollError> {
        let unread = modem.unread_messages().await?;
        let mut report = PollReport {
            unread: unread.len(),
            ..PollReport::default()
        };

        for device_msg in unread {
            let msg = InboundMessage::from_device(&device_msg, Utc::now());
            let inserted = self.store.insert(&msg).await.map_err(PollError::Store)?;

            if inserted {
                info!(id = %msg.id, slot = msg.slot, sender = %msg.sender, "received message");
                report.stored += 1;
                match self.publisher.publish(&msg).await {
                    Ok(()) => report.published += 1,
                    Err(e) => warn!(id = %msg.id, error = %e, "failed to publish message"),
                }
            } else {
                debug!(id = %msg.id, slot = msg.slot, "message already stored");
                report.duplicates += 1;
            }

            modem.mark_read(device_msg.slot).await?;
            if self.config.delete_after_read {
                modem.delete(device_msg.slot).await?;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        at::testing::ScriptedTransport, modem::ModemConfig, publisher::NoopPublisher,
    };
    use color_eyre::eyre::eyre;
    use std::sync::Mutex;

    const UNREAD: &str = r#"+CMGR: "REC UNREAD","+33612345678","","24/10/16,12:30:00+08""#;
    const READ: &str = r#"+CMGR: "REC READ","+33612345678","","24/10/16,12:30:00+08""#;

    /// One-slot SIM. Non-peeking reads clear the unread flag unless `sticky`.
    fn sim(sticky: bool) -> (Modem<ScriptedTransport>, Arc<Mutex<Vec<String>>>) {
        let mut unread = true;
        let transport = ScriptedTransport::lines(move |line| match line {
            "AT+CPMS?" => Some(vec![r#"+CPMS: "SM",1,1,"SM",1,1,"SM",1,1"#, "OK"]),
            "AT+CMGR=1,1" => Some(vec![if unread { UNREAD } else { READ }, "hi", "OK"]),
            "AT+CMGR=1" => {
                let header = if unread { UNREAD } else { READ };
                unread = sticky;
                Some(vec![header, "hi", "OK"])
            }
            _ => Some(vec!["OK"]),
        });
        let written = transport.written();

        (Modem::new(transport, ModemConfig::default()), written)
    }

    struct FailingStore;

    #[async_trait]
    impl InboxStore for FailingStore {
        async fn insert(&self, _: &InboundMessage) -> eyre::Result<bool> {
            Err(eyre!("disk full"))
        }

        async fn list(&self) -> eyre::Result<Vec<InboundMessage>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn it_stores_then_marks_read() {
        // Arrange
        let (mut modem, written) = sim(false);
        let store = Arc::new(MemoryInbox::new());
        let poller = InboxPoller::new(store.clone(), Arc::new(NoopPublisher), PollConfig::default());

        // Act
        let first = poller.poll(&mut modem).await.unwrap();
        let second = poller.poll(&mut modem).await.unwrap();

        // Assert
        assert_eq!(first.stored, 1);
        assert_eq!(second.unread, 0);
        assert_eq!(store.list().await.unwrap()[0].text, "hi");
        assert!(written.lock().unwrap().iter().any(|l| l == "AT+CMGR=1"));
    }

    #[tokio::test(start_paused = true)]
    async fn a_slot_that_stays_unread_is_stored_once() {
        // Arrange
        let (mut modem, _) = sim(true);
        let store = Arc::new(MemoryInbox::new());
        let poller = InboxPoller::new(store.clone(), Arc::new(NoopPublisher), PollConfig::default());

        // Act
        poller.poll(&mut modem).await.unwrap();
        let second = poller.poll(&mut modem).await.unwrap();

        // Assert
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_store_failure_leaves_the_message_unread() {
        // Arrange
        let (mut modem, written) = sim(false);
        let poller = InboxPoller::new(
            Arc::new(FailingStore),
            Arc::new(NoopPublisher),
            PollConfig::default(),
        );

        // Act
        let err = poller.poll(&mut modem).await.unwrap_err();

        // Assert
        assert!(matches!(err, PollError::Store(_)));
        assert!(!written.lock().unwrap().iter().any(|l| l == "AT+CMGR=1"));
    }

    #[tokio::test(start_paused = true)]
    async fn it_can_free_slots_after_reading() {
        // Arrange
        let (mut modem, written) = sim(false);
        let poller = InboxPoller::new(
            Arc::new(MemoryInbox::new()),
            Arc::new(NoopPublisher),
            PollConfig {
                delete_after_read: true,
            },
        );

        // Act
        poller.poll(&mut modem).await.unwrap();

        // Assert
        assert_eq!(written.lock().unwrap().last().map(String::as_str), Some("AT+CMGD=1"));
    }

    #[tokio::test(start_paused = true)]
    async fn device_failures_surface_as_poll_errors() {
        // Arrange
        let mut modem = Modem::new(
            ScriptedTransport::lines(|_| None),
            ModemConfig::default(),
        );
        let poller = InboxPoller::new(
            Arc::new(MemoryInbox::new()),
            Arc::new(NoopPublisher),
            PollConfig::default(),
        );

        // Act
        let err = poller.poll(&mut modem).await.unwrap_err();

        // Assert
        assert!(matches!(err, PollError::Modem(ref e) if e.is_timeout()));
    }
}
