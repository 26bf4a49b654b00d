//! Interchain Relay Node
//!
//! Sealer node for a main chain / side chain wallet pair:
//! 1. Main chain deposits are mirrored onto the side chain wallet
//! 2. Side chain deposits are signed and the signatures recorded on the side chain wallet
//! 3. Once a withdrawal has enough signatures it is finalized on the main chain wallet
//!
//! Each pipeline owns its own ledger connection. A single submission worker
//! performs every write.

use std::sync::Arc;

use interchain_relay::api;
use interchain_relay::config::{ChainConfig, Config, LogFormat};
use interchain_relay::keys::load_sealer_key;
use interchain_relay::ledger::{EvmLedger, LedgerClient};
use interchain_relay::watchers::{RelaySettings, WatcherManager};
use interchain_relay::writers::{RetryConfig, SubmissionWorker, WalletWriter};

use alloy::signers::local::PrivateKeySigner;
use tracing::info;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    let config = Config::load()?;
    init_logging(config.log_format);

    info!("Starting Interchain Relay");
    info!(
        main_wallet = %config.main_chain.wallet,
        side_wallet = %config.side_chain.wallet,
        pipelines = ?config.pipelines,
        scan = ?config.scan,
        deadline_secs = ?config.deadline.map(|d| d.as_secs()),
        "Configuration loaded"
    );

    let sealer = load_sealer_key(&config.sealer_key)?;

    let settings = RelaySettings {
        main_wallet: config.main_chain.wallet,
        side_wallet: config.side_chain.wallet,
        scan: config.scan,
        submission: config.submission,
    };
    let mut manager = WatcherManager::new(settings, sealer.clone());

    // One connection per pipeline, none of them able to sign
    if config.pipelines.watch_main_chain {
        manager = manager.with_mirror(connect(&config.main_chain, None).await?);
    }
    if config.pipelines.watch_side_chain {
        manager = manager.with_attestation(connect(&config.side_chain, None).await?);
    }
    if config.pipelines.aggregate_signatures {
        manager = manager.with_aggregation(connect(&config.side_chain, None).await?);
    }

    // The worker writes to the side chain for mirrors and attestations,
    // and to the main chain for finalized withdrawals
    let side_writer = if config.pipelines.watch_main_chain || config.pipelines.watch_side_chain {
        Some(writer(&config, &config.side_chain, &sealer).await?)
    } else {
        None
    };
    let main_writer = if config.pipelines.aggregate_signatures {
        Some(writer(&config, &config.main_chain, &sealer).await?)
    } else {
        None
    };
    let worker = SubmissionWorker::new(
        main_writer,
        side_writer,
        RetryConfig::with_max_retries(config.submission.max_retries),
    );

    let (api_stop_tx, api_stop_rx) = tokio::sync::watch::channel(false);
    if let Some(port) = config.metrics_port {
        let api_addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        tokio::spawn(async move {
            if let Err(e) = api::start_api_server(api_addr, api_stop_rx).await {
                tracing::error!(error = %e, "API server error");
            }
        });
    }

    info!(watchers = manager.watcher_count(), "Pipelines initialized, starting processing");

    let deadline = config.deadline;
    let shutdown = async move {
        match deadline {
            Some(limit) => {
                tokio::select! {
                    _ = wait_for_shutdown_signal() => {}
                    _ = tokio::time::sleep(limit) => {
                        info!(deadline_secs = limit.as_secs(), "Deadline reached, initiating shutdown");
                    }
                }
            }
            None => wait_for_shutdown_signal().await,
        }
    };

    let result = manager.run(worker, shutdown).await;
    api_stop_tx.send_replace(true);
    let summary = result?;

    for watcher in &summary.watchers {
        info!(
            watcher = watcher.name,
            events = watcher.events_seen,
            queued = watcher.jobs_queued,
            failed = watcher.failed,
            last_block = ?watcher.last_block,
            "Watcher summary"
        );
    }
    info!(
        submitted = summary.worker.submitted,
        failed = summary.worker.failed,
        transfers = summary.worker.transfers_recorded,
        signatures = summary.worker.signatures_recorded,
        withdrawals = summary.worker.withdrawals_finalized,
        "Submission summary"
    );

    info!("Interchain Relay stopped");
    Ok(())
}

async fn connect(
    chain: &ChainConfig,
    signer: Option<PrivateKeySigner>,
) -> eyre::Result<Arc<dyn LedgerClient>> {
    let ledger = EvmLedger::connect(chain.chain, &chain.rpc_url, signer).await?;
    Ok(Arc::new(ledger))
}

async fn writer(
    config: &Config,
    chain: &ChainConfig,
    sealer: &PrivateKeySigner,
) -> eyre::Result<WalletWriter> {
    let ledger = connect(chain, Some(sealer.clone())).await?;
    Ok(WalletWriter::new(
        ledger,
        chain.wallet,
        config.submission.receipt_timeout,
    ))
}

/// Initialize tracing/logging with structured output
fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,interchain_relay=debug"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init(),
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
