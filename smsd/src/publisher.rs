use crate::modem::sms::InboundMessage;
use async_trait::async_trait;
use color_eyre::eyre::{eyre, Result, WrapErr as _};
use tracing::debug;

/// Receives every newly stored inbound message. Delivery is best effort, the
/// poller logs failures and carries on.
#[async_trait]
pub trait InboxPublisher: Send + Sync {
    async fn publish(&self, msg: &InboundMessage) -> Result<()>;
}

/// Used when no notification endpoint is configured.
pub struct NoopPublisher;

#[async_trait]
impl InboxPublisher for NoopPublisher {
    async fn publish(&self, msg: &InboundMessage) -> Result<()> {
        debug!(id = %msg.id, "no publisher configured, dropping notification");

        Ok(())
    }
}

/// Client config for a zenoh router at `endpoint` (e.g. `tcp/127.0.0.1:7447`).
pub fn zenoh_client_cfg(endpoint: &str) -> Result<zenoh::Config> {
    let mut cfg = zenoh::Config::default();
    cfg.insert_json5("mode", r#""client""#)
        .map_err(|e| eyre!("{e}"))?;
    cfg.insert_json5("connect/endpoints", &format!(r#"["{endpoint}"]"#))
        .map_err(|e| eyre!("{e}"))?;
    cfg.insert_json5("scouting/multicast/enabled", "false")
        .map_err(|e| eyre!("{e}"))?;

    Ok(cfg)
}

/// Puts each message as JSON on one key expression.
pub struct ZenohPublisher {
    session: zenoh::Session,
    keyexpr: String,
}

impl ZenohPublisher {
    pub fn new(session: zenoh::Session, keyexpr: impl Into<String>) -> Self {
        Self {
            session,
            keyexpr: keyexpr.into(),
        }
    }
}

#[async_trait]
impl InboxPublisher for ZenohPublisher {
    async fn publish(&self, msg: &InboundMessage) -> Result<()> {
        let payload =
            serde_json::to_string(msg).wrap_err("failed to serialize inbound message")?;

        self.session
            .put(&self.keyexpr, payload)
            .await
            .map_err(|e| eyre!("failed to publish to {}: {e}", self.keyexpr))?;
        debug!(id = %msg.id, keyexpr = %self.keyexpr, "published inbound message");

        Ok(())
    }
}
