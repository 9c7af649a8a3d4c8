use crate::modem::status::ModemStatus;
use std::sync::Arc;
use tokio::sync::watch;

/// Creates the worker's writing half and the shared reading half.
pub fn cache() -> (StatusWriter, StatusCache) {
    let (tx, rx) = watch::channel(None);

    (StatusWriter { tx }, StatusCache { rx })
}

/// Owned by the worker. Each snapshot replaces the previous one whole.
pub struct StatusWriter {
    tx: watch::Sender<Option<Arc<ModemStatus>>>,
}

impl StatusWriter {
    pub fn publish(&self, status: ModemStatus) {
        self.tx.send_replace(Some(Arc::new(status)));
    }
}

/// Cheap to clone, never touches the modem.
#[derive(Clone)]
pub struct StatusCache {
    rx: watch::Receiver<Option<Arc<ModemStatus>>>,
}

impl StatusCache {
    /// The latest snapshot, `None` until the worker finished its first cycle.
    pub fn get(&self) -> Option<Arc<ModemStatus>> {
        self.rx.borrow().clone()
    }

    /// Waits for the next snapshot. Errors once the worker is gone.
    pub async fn changed(
        &mut self,
    ) -> Result<Option<Arc<ModemStatus>>, watch::error::RecvError> {
        self.rx.changed().await?;

        Ok(self.get())
    }
}
