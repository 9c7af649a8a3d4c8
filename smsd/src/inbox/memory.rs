use super::InboxStore;
use crate::modem::sms::InboundMessage;
use async_trait::async_trait;
use color_eyre::eyre::Result;
use tokio::sync::Mutex;

/// Keeps the inbox for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryInbox {
    messages: Mutex<Vec<InboundMessage>>,
}

impl MemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InboxStore for MemoryInbox {
    async fn insert(&self, msg: &InboundMessage) -> Result<bool> {
        let mut messages = self.messages.lock().await;
        if messages.iter().any(|m| m.id == msg.id) {
            return Ok(false);
        }
        messages.push(msg.clone());

        Ok(true)
    }

    async fn list(&self) -> Result<Vec<InboundMessage>> {
        Ok(self.messages.lock().await.clone())
    }
}
