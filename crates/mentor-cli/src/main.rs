use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mentor_cli::{
    init_tracing, run_inbound_loop, serve_control_surface, ControlState, HttpResponseGenerator,
    KnownCounterpartyStore, MentorCli,
};
use mentor_delivery::{DeliveryRuntime, GreetingReport, MessagingPlatform};
use mentor_pacing::OutboundRateLimiter;
use mentor_telegram::{TelegramPlatform, TelegramUpdatePoller};
use tokio::sync::{mpsc, oneshot};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MentorCli::parse();
    init_tracing();

    let telegram_config = cli.telegram_config();
    let platform: Arc<dyn MessagingPlatform> = Arc::new(
        TelegramPlatform::new(&telegram_config).context("failed to configure telegram platform")?,
    );
    let generator = Arc::new(
        HttpResponseGenerator::new(&cli.generator_config())
            .context("failed to configure response generator")?,
    );
    let rate_limiter = Arc::new(OutboundRateLimiter::new(cli.rate_limit_config()));
    let store = cli
        .known_counterparties_file
        .clone()
        .map(KnownCounterpartyStore::new);

    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let runtime = Arc::new(DeliveryRuntime::start(
        platform,
        generator,
        rate_limiter,
        cli.runtime_config(),
        Some(report_tx),
    )?);

    if let Some(store) = store.as_ref() {
        let known = store.load()?;
        for counterparty in &known {
            runtime.register_known_counterparty(*counterparty);
        }
        tracing::info!(
            count = known.len(),
            path = %store.path().display(),
            "seeded known counterparties"
        );
    }
    let report_task = tokio::spawn(persist_greeting_reports(report_rx, store.clone()));

    for handle in &cli.greet {
        if let Err(error) = runtime.enqueue_greeting(handle.as_str()) {
            tracing::warn!(handle = %handle, error = %error, "could not enqueue startup greeting");
        }
    }

    let (control_shutdown_tx, control_shutdown_rx) = oneshot::channel::<()>();
    let control_task = cli.control_bind.clone().map(|bind| {
        let state = ControlState {
            runtime: Arc::clone(&runtime),
            store: store.clone(),
        };
        tokio::spawn(async move {
            let shutdown = async {
                let _ = control_shutdown_rx.await;
            };
            if let Err(error) = serve_control_surface(&bind, state, shutdown).await {
                tracing::error!(error = %format!("{error:#}"), "control surface stopped");
            }
        })
    });

    let mut poller =
        TelegramUpdatePoller::new(&telegram_config).context("failed to configure update poller")?;
    tracing::info!("mentor delivery started");
    let dispatched = run_inbound_loop(
        &mut poller,
        &runtime,
        cli.poll_error_backoff(),
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
    )
    .await;
    tracing::info!(dispatched, "shutdown requested");

    let report = runtime.shutdown().await;
    let _ = control_shutdown_tx.send(());
    if let Some(task) = control_task {
        let _ = task.await;
    }
    let _ = report_task.await;
    tracing::info!(
        finished = report.finished.len(),
        aborted = report.aborted,
        "mentor delivery stopped"
    );
    Ok(())
}

async fn persist_greeting_reports(
    mut reports: mpsc::UnboundedReceiver<GreetingReport>,
    store: Option<KnownCounterpartyStore>,
) {
    while let Some(report) = reports.recv().await {
        let (Some(counterparty), Some(store)) = (report.counterparty, store.as_ref()) else {
            continue;
        };
        match store.record(counterparty) {
            Ok(true) => tracing::debug!(counterparty, "persisted greeted counterparty"),
            Ok(false) => {}
            Err(error) => tracing::warn!(
                counterparty,
                error = %format!("{error:#}"),
                "failed to persist greeted counterparty"
            ),
        }
    }
}
