//! The one task that owns the modem.
//!
//! Each cycle drains the outbox, polls the inbox once, refreshes the status
//! snapshot and then sleeps. A stop request is honoured between cycles only, so
//! an exchange is never cut off halfway.

use crate::{
    at::Transport,
    dispatcher::Dispatcher,
    inbox::InboxPoller,
    modem::Modem,
    status::StatusWriter,
};
use chrono::Utc;
use color_eyre::eyre::{Result, WrapErr as _};
use std::time::Duration;
use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause between cycles.
    pub cycle_delay: Duration,
    /// Wait this long for network registration before the first cycle.
    /// `None` skips the wait.
    pub registration_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cycle_delay: Duration::from_secs(5),
            registration_timeout: Some(Duration::from_secs(60)),
        }
    }
}

pub struct Worker<T> {
    modem: Modem<T>,
    dispatcher: Dispatcher,
    poller: InboxPoller,
    status: StatusWriter,
    config: WorkerConfig,
    prepared: bool,
    prepare_failing: bool,
}

impl<T: Transport + 'static> Worker<T> {
    pub fn new(
        modem: Modem<T>,
        dispatcher: Dispatcher,
        poller: InboxPoller,
        status: StatusWriter,
        config: WorkerConfig,
    ) -> Self {
        Self {
            modem,
            dispatcher,
            poller,
            status,
            config,
            prepared: false,
            prepare_failing: false,
        }
    }

    /// Spawns the worker loop. Nothing touches the modem before this.
    pub fn start(self, cancel: CancellationToken) -> WorkerHandle {
        let task = tokio::spawn(self.run(cancel.clone()));

        WorkerHandle { cancel, task }
    }

    async fn run(mut self, cancel: CancellationToken) {
        info!("modem worker starting");
        self.startup().await;

        while !cancel.is_cancelled() {
            self.cycle().await;

            tokio::select! {
                () = cancel.cancelled() => {}
                () = time::sleep(self.config.cycle_delay) => {}
            }
        }

        let abandoned = self.dispatcher.abandon_pending();
        info!(abandoned, "modem worker stopped");
    }

    async fn startup(&mut self) {
        self.prepare().await;

        let Some(timeout) = self.config.registration_timeout else {
            return;
        };
        match self.modem.wait_for_registration(timeout).await {
            Ok(state) => info!(%state, "modem registered"),
            Err(e) => warn!(error = %e, "starting without network registration"),
        }
    }

    async fn prepare(&mut self) {
        match self.modem.prepare().await {
            Ok(()) => {
                if self.prepare_failing {
                    info!("modem is back");
                }
                self.prepared = true;
                self.prepare_failing = false;
            }
            Err(e) => {
                // reported once, then retried quietly every cycle
                if self.prepare_failing {
                    debug!(error = %e, "modem still not answering");
                } else {
                    error!(error = %e, "failed to prepare modem, retrying every cycle");
                }
                self.prepare_failing = true;
                if let Err(e) = self.modem.reconnect().await {
                    debug!(error = %e, "reconnect failed");
                }
            }
        }
    }

    /// Drain, poll, refresh.
    pub async fn cycle(&mut self) {
        if !self.prepared {
            self.prepare().await;
        }

        let drained = self.dispatcher.drain(&mut self.modem).await;
        if drained.attempts > 0 {
            info!(
                sent = drained.sent,
                requeued = drained.requeued,
                failed = drained.failed,
                "outbox drained"
            );
        }

        let poll = self.poller.poll(&mut self.modem).await;
        let mut status = self.modem.status().await;
        match poll {
            Ok(report) if report.unread > 0 => info!(
                stored = report.stored,
                duplicates = report.duplicates,
                published = report.published,
                "inbox polled"
            ),
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "inbox poll failed");
                status.last_error = Some(e.to_string());
                self.prepared = false;
            }
        }
        status.refreshed_at = Utc::now();
        self.status.publish(status);
    }
}

pub struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Asks the worker to stop after its current cycle and waits for it.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();

        self.task.await.wrap_err("modem worker panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        at::testing::ScriptedTransport,
        dispatcher::{DispatchConfig, OutboundMessage, SendFailure},
        inbox::{MemoryInbox, PollConfig},
        modem::ModemConfig,
        publisher::NoopPublisher,
        status,
    };
    use std::sync::Arc;

    fn worker(
        respond: impl FnMut(&str) -> Option<Vec<&'static str>> + Send + 'static,
    ) -> (
        Worker<ScriptedTransport>,
        flume::Sender<OutboundMessage>,
        status::StatusCache,
    ) {
        let (outbox, dispatcher) = Dispatcher::channel(DispatchConfig::default());
        let (writer, cache) = status::cache();
        let poller = InboxPoller::new(
            Arc::new(MemoryInbox::new()),
            Arc::new(NoopPublisher),
            PollConfig::default(),
        );
        let worker = Worker::new(
            Modem::new(ScriptedTransport::lines(respond), ModemConfig::default()),
            dispatcher,
            poller,
            writer,
            WorkerConfig {
                cycle_delay: Duration::from_secs(5),
                registration_timeout: None,
            },
        );

        (worker, outbox, cache)
    }

    fn idle_modem(line: &str) -> Option<Vec<&'static str>> {
        match line {
            "AT+CPMS?" => Some(vec![r#"+CPMS: "SM",0,2,"SM",0,2,"SM",0,2"#, "OK"]),
            "AT+CMGR=1,1" | "AT+CMGR=2,1" => Some(vec!["OK"]),
            "AT+CGMM" => Some(vec!["SIMCOM_SIM800L", "OK"]),
            _ => Some(vec!["OK"]),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn a_cycle_publishes_a_fresh_snapshot() {
        // Arrange
        let (mut worker, _outbox, cache) = worker(idle_modem);

        // Act
        worker.cycle().await;

        // Assert
        let status = cache.get().unwrap();
        assert_eq!(status.model.as_deref(), Some("SIMCOM_SIM800L"));
        assert_eq!(status.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_poll_becomes_the_status_error() {
        // Arrange
        let (mut worker, _outbox, cache) = worker(|line| match line {
            "AT+CPMS?" => Some(vec!["+CMS ERROR: 302"]),
            other => idle_modem(other),
        });

        // Act
        worker.cycle().await;
        worker.cycle().await;

        // Assert
        let error = cache.get().unwrap().last_error.clone().unwrap();
        assert!(error.contains("+CMS ERROR: 302"), "{error}");
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_fails_what_is_still_queued() {
        // Arrange
        let (worker, outbox, mut cache) = worker(idle_modem);
        let handle = worker.start(CancellationToken::new());
        cache.changed().await.unwrap();

        let mut msg = OutboundMessage::new(1, ["+33600000000".parse().unwrap()], "late");
        let outcome = msg.notify();
        outbox.send(msg).unwrap();

        // Act
        handle.stop().await.unwrap();

        // Assert
        assert!(matches!(
            outcome.await.unwrap(),
            Err(SendFailure::Shutdown { .. })
        ));
    }
}
