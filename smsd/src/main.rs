use clap::Parser as _;
use color_eyre::eyre::{eyre, Result};
use orb_smsd::{
    args::Args,
    at::{SerialTransport, Transport},
    gateway::Gateway,
    inbox::{InboxStore, MemoryInbox, SqliteInbox},
    ingress,
    publisher::{zenoh_client_cfg, InboxPublisher, ZenohPublisher},
    sim::{SimConfig, SimulatedModem},
    telemetry::{Telemetry, SYSLOG_IDENTIFIER},
    worker::WorkerHandle,
};
use secrecy::ExposeSecret as _;
use std::sync::Arc;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let telemetry = Telemetry::new()
        .with_journald(SYSLOG_IDENTIFIER)
        .try_init()?;

    let args = Args::parse();
    let result = run(args).await;

    telemetry.flush();

    result
}

async fn run(args: Args) -> Result<()> {
    let store: Arc<dyn InboxStore> = match &args.db {
        Some(path) => Arc::new(SqliteInbox::open(path).await?),
        None => Arc::new(MemoryInbox::new()),
    };

    let session = match &args.zenoh_endpoint {
        Some(endpoint) => Some(
            zenoh::open(zenoh_client_cfg(endpoint)?)
                .await
                .map_err(|e| eyre!("failed to open zenoh session: {e}"))?,
        ),
        None => None,
    };
    let publisher = session.as_ref().map(|session| {
        Arc::new(ZenohPublisher::new(session.clone(), &args.inbox_topic))
            as Arc<dyn InboxPublisher>
    });

    let cancel = CancellationToken::new();
    let (gateway, worker) = if args.simulate {
        warn!("running against a simulated modem");
        let sim = SimulatedModem::new(SimConfig {
            pin: args.pin.as_ref().map(|pin| pin.expose_secret().clone()),
            ..SimConfig::default()
        });
        start(sim, &args, store, publisher, cancel.clone())
    } else {
        let mut serial = SerialTransport::new(&args.device, args.baud_rate);
        // reported once here, the worker keeps retrying
        if let Err(e) = serial.open() {
            error!(device = %args.device, error = %e, "failed to open modem port");
        }
        start(serial, &args, store, publisher, cancel.clone())
    };

    let ingress = session.map(|session| {
        ingress::spawn(
            session,
            args.outbox_topic.clone(),
            gateway.clone(),
            cancel.clone(),
        )
    });

    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut sigint = unix::signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => warn!("received SIGTERM"),
        _ = sigint.recv()  => warn!("received SIGINT"),
    }

    info!("stopping after the current cycle");
    worker.stop().await?;
    if let Some(ingress) = ingress {
        ingress.await??;
    }

    Ok(())
}

fn start<T: Transport + 'static>(
    transport: T,
    args: &Args,
    store: Arc<dyn InboxStore>,
    publisher: Option<Arc<dyn InboxPublisher>>,
    cancel: CancellationToken,
) -> (Gateway, WorkerHandle) {
    orb_smsd::service()
        .transport(transport)
        .store(store)
        .maybe_publisher(publisher)
        .modem(args.modem_config())
        .dispatch(args.dispatch_config())
        .poll(args.poll_config())
        .worker(args.worker_config())
        .maybe_smsc(args.smsc.clone())
        .cancel(cancel)
        .start()
}
