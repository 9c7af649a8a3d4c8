#![allow(dead_code)]
use async_trait::async_trait;
use bon::bon;
use color_eyre::Result;
use mockall::mock;
use orb_smsd::{
    dispatcher::DispatchConfig,
    gateway::Gateway,
    inbox::{InboxStore, MemoryInbox, PollConfig},
    modem::{sms::InboundMessage, ModemConfig},
    publisher::InboxPublisher,
    sim::{SimConfig, SimHandle, SimulatedModem},
    worker::{WorkerConfig, WorkerHandle},
};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tokio::time::{self, Instant};

mock! {
    pub Publisher {}
    #[async_trait]
    impl InboxPublisher for Publisher {
        async fn publish(&self, msg: &InboundMessage) -> Result<()>;
    }
}

pub struct Fixture {
    pub gateway: Gateway,
    pub sim: SimHandle,
    pub store: Arc<dyn InboxStore>,
    worker: Option<WorkerHandle>,
}

#[bon]
impl Fixture {
    #[builder(start_fn = builder, finish_fn = run)]
    pub fn new(
        #[builder(default)] sim: SimConfig,
        #[builder(into)] modem_pin: Option<String>,
        store: Option<Arc<dyn InboxStore>>,
        publisher: Option<Arc<dyn InboxPublisher>>,
        #[builder(default)] poll: PollConfig,
        #[builder(default = 5)] max_retries: u32,
    ) -> Self {
        let modem = SimulatedModem::new(sim);
        let handle = modem.handle();
        let store: Arc<dyn InboxStore> =
            store.unwrap_or_else(|| Arc::new(MemoryInbox::new()));

        let (gateway, worker) = orb_smsd::service()
            .transport(modem)
            .store(Arc::clone(&store))
            .maybe_publisher(publisher)
            .modem(ModemConfig {
                pin: modem_pin.map(SecretString::new),
                base_timeout: Duration::from_millis(200),
                pin_settle: Duration::from_millis(5),
                registration_poll: Duration::from_millis(20),
                ..ModemConfig::default()
            })
            .dispatch(DispatchConfig {
                max_retries,
                pacing: Duration::from_millis(5),
            })
            .poll(poll)
            .worker(WorkerConfig {
                cycle_delay: Duration::from_millis(30),
                registration_timeout: Some(Duration::from_secs(1)),
            })
            .start();

        Self {
            gateway,
            sim: handle,
            store,
            worker: Some(worker),
        }
    }
}

impl Fixture {
    /// Polls the inbox until it holds `count` messages.
    pub async fn inbox_with(&self, count: usize) -> Vec<InboundMessage> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let inbox = self.gateway.inbox().await.unwrap();
            if inbox.len() >= count {
                return inbox;
            }
            assert!(Instant::now() < deadline, "inbox never reached {count} messages");
            time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Waits until the worker has published at least `cycles` more snapshots.
    pub async fn cycles(&self, cycles: usize) {
        for _ in 0..cycles {
            let before = self.gateway.status().map(|s| s.refreshed_at);
            let deadline = Instant::now() + Duration::from_secs(10);
            while self.gateway.status().map(|s| s.refreshed_at) == before {
                assert!(Instant::now() < deadline, "worker stopped cycling");
                time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    pub async fn stop(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop().await.unwrap();
        }
    }
}
