//! End-to-end relay runs against simulated main and side chains
//!
//! Each "sealer run" is one node started with a subset of pipelines and
//! `follow = false`, so it scans up to the head it sees at startup, drains
//! its submissions and returns.

mod common;

use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;

use common::{Bridge, GAS_FEE};
use interchain_relay::config::{ScanConfig, SubmissionConfig};
use interchain_relay::hash::{compute_digest, PROTOCOL_VERSION};
use interchain_relay::signer::sign;
use interchain_relay::watchers::{RelaySettings, RelaySummary, WatcherManager};
use interchain_relay::writers::{RetryConfig, SubmissionWorker, WalletWriter};

const TESTER1: Address = Address::repeat_byte(0x11);
const TESTER2: Address = Address::repeat_byte(0x22);

fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(1_000_000_000_000_000_000u128)
}

#[derive(Clone, Copy, Default)]
struct Pipelines {
    mirror: bool,
    attest: bool,
    aggregate: bool,
}

fn one_pass() -> ScanConfig {
    ScanConfig {
        follow: false,
        window_blocks: 100,
        poll_interval: Duration::from_millis(5),
        ..ScanConfig::default()
    }
}

fn manager(bridge: &Bridge, sealer: &PrivateKeySigner, pipelines: Pipelines, scan: ScanConfig) -> (WatcherManager, SubmissionWorker) {
    let settings = RelaySettings {
        main_wallet: bridge.main_wallet,
        side_wallet: bridge.side_wallet,
        scan,
        submission: SubmissionConfig {
            queue_size: 16,
            max_retries: 0,
            receipt_timeout: Duration::from_secs(5),
        },
    };

    let mut manager = WatcherManager::new(settings, sealer.clone());
    if pipelines.mirror {
        manager = manager.with_mirror(bridge.main.client());
    }
    if pipelines.attest {
        manager = manager.with_attestation(bridge.side.client());
    }
    if pipelines.aggregate {
        manager = manager.with_aggregation(bridge.side.client());
    }

    let main_writer = WalletWriter::new(
        bridge.main.signing_client(sealer.clone()),
        bridge.main_wallet,
        Duration::from_secs(5),
    )
    .with_poll_interval(Duration::from_millis(5));
    let side_writer = WalletWriter::new(
        bridge.side.signing_client(sealer.clone()),
        bridge.side_wallet,
        Duration::from_secs(5),
    )
    .with_poll_interval(Duration::from_millis(5));
    let worker = SubmissionWorker::new(Some(main_writer), Some(side_writer), RetryConfig::default());

    (manager, worker)
}

async fn sealer_run(bridge: &Bridge, sealer: &PrivateKeySigner, pipelines: Pipelines) -> RelaySummary {
    let (manager, worker) = manager(bridge, sealer, pipelines, one_pass());
    manager
        .run(worker, std::future::pending())
        .await
        .expect("relay run")
}

const MIRROR: Pipelines = Pipelines {
    mirror: true,
    attest: false,
    aggregate: false,
};
const ATTEST: Pipelines = Pipelines {
    mirror: false,
    attest: true,
    aggregate: false,
};
const AGGREGATE: Pipelines = Pipelines {
    mirror: false,
    attest: false,
    aggregate: true,
};

#[tokio::test]
async fn test_main_chain_deposit_is_mirrored_once_both_sealers_vote() {
    let bridge = Bridge::new(ether(10));
    let value = U256::from(200_000_000u64);
    bridge.main.fund(TESTER2, ether(1));

    let source_tx = bridge
        .main
        .deposit(TESTER2, bridge.main_wallet, TESTER1, value);

    let first = sealer_run(&bridge, &bridge.sealers[0], MIRROR).await;
    assert_eq!(first.watchers.len(), 1);
    assert_eq!(first.watchers[0].jobs_queued, 1);
    assert_eq!(first.worker.transfers_recorded, 1);
    // one vote out of two, nothing released yet
    assert_eq!(bridge.side.balance(TESTER1), U256::ZERO);
    assert!(!bridge.side.is_executed(bridge.side_wallet, source_tx));

    let second = sealer_run(&bridge, &bridge.sealers[1], MIRROR).await;
    assert_eq!(second.worker.transfers_recorded, 1);
    assert!(bridge.side.is_executed(bridge.side_wallet, source_tx));

    assert_eq!(
        bridge.main.balance(TESTER2),
        ether(1) - value - U256::from(GAS_FEE)
    );
    assert_eq!(bridge.main.balance(bridge.main_wallet), ether(10) + value);
    assert_eq!(bridge.side.balance(TESTER1), value);
    assert_eq!(bridge.side.balance(bridge.side_wallet), ether(10) - value);
}

#[tokio::test]
async fn test_rerun_after_mirror_leaves_balances_unchanged() {
    let bridge = Bridge::new(ether(10));
    let value = U256::from(200_000_000u64);
    bridge.main.fund(TESTER2, ether(1));
    bridge
        .main
        .deposit(TESTER2, bridge.main_wallet, TESTER1, value);

    sealer_run(&bridge, &bridge.sealers[0], MIRROR).await;
    sealer_run(&bridge, &bridge.sealers[1], MIRROR).await;

    let rerun = sealer_run(&bridge, &bridge.sealers[0], MIRROR).await;
    assert_eq!(rerun.watchers[0].jobs_queued, 1);
    assert_eq!(rerun.worker.submitted, 0);
    assert_eq!(rerun.worker.failed, 1);
    assert_eq!(bridge.side.balance(TESTER1), value);
    assert_eq!(bridge.side.balance(bridge.side_wallet), ether(10) - value);
}

#[tokio::test]
async fn test_side_chain_withdrawal_is_finalized_after_quorum() {
    let bridge = Bridge::new(ether(10));
    let value = U256::from(200_000_000u64);
    bridge.side.fund(TESTER1, ether(1));

    let source_tx = bridge
        .side
        .deposit(TESTER1, bridge.side_wallet, TESTER2, value);

    for sealer in &bridge.sealers {
        let attest = sealer_run(&bridge, sealer, ATTEST).await;
        assert_eq!(attest.worker.signatures_recorded, 1);
    }
    assert!(!bridge.main.is_executed(bridge.main_wallet, source_tx));

    let aggregate = sealer_run(&bridge, &bridge.sealers[0], AGGREGATE).await;
    assert_eq!(aggregate.watchers[0].events_seen, 2);
    assert_eq!(aggregate.watchers[0].jobs_queued, 1);
    assert_eq!(aggregate.worker.withdrawals_finalized, 1);
    assert!(bridge.main.is_executed(bridge.main_wallet, source_tx));

    assert_eq!(
        bridge.side.balance(TESTER1),
        ether(1) - value - U256::from(GAS_FEE)
    );
    assert_eq!(bridge.side.balance(bridge.side_wallet), ether(10) + value);
    assert_eq!(bridge.main.balance(TESTER2), value);
    assert_eq!(bridge.main.balance(bridge.main_wallet), ether(10) - value);
}

#[tokio::test]
async fn test_aggregated_signatures_match_each_sealer() {
    let bridge = Bridge::new(ether(10));
    let value = U256::from(200_000_000u64);
    bridge.side.fund(TESTER1, ether(1));
    let source_tx = bridge
        .side
        .deposit(TESTER1, bridge.side_wallet, TESTER2, value);

    for sealer in &bridge.sealers {
        sealer_run(&bridge, sealer, ATTEST).await;
    }

    let aggregated = interchain_relay::quorum::fetch_aggregated(
        bridge.side.client().as_ref(),
        bridge.side_wallet,
        bridge.sealers[0].address(),
        source_tx,
    )
    .await
    .unwrap();
    assert_eq!(aggregated.destination, TESTER2);
    assert_eq!(aggregated.value, value);
    assert_eq!(aggregated.signature_count(), 2);

    let digest = compute_digest(
        bridge.side_wallet,
        source_tx,
        TESTER2,
        value,
        &[],
        PROTOCOL_VERSION,
    );
    for (i, sealer) in bridge.sealers.iter().enumerate() {
        let expected = sign(digest, sealer).unwrap();
        assert_eq!(aggregated.v[i], expected.v);
        assert_eq!(aggregated.r[i], expected.r);
        assert_eq!(aggregated.s[i], expected.s);
    }
}

#[tokio::test]
async fn test_rerun_after_finalize_leaves_balances_unchanged() {
    let bridge = Bridge::new(ether(10));
    let value = U256::from(200_000_000u64);
    bridge.side.fund(TESTER1, ether(1));
    bridge
        .side
        .deposit(TESTER1, bridge.side_wallet, TESTER2, value);

    for sealer in &bridge.sealers {
        sealer_run(&bridge, sealer, ATTEST).await;
    }
    sealer_run(&bridge, &bridge.sealers[0], AGGREGATE).await;

    // a second node forwarding the same withdrawal is rejected by the wallet
    let rerun = sealer_run(&bridge, &bridge.sealers[1], AGGREGATE).await;
    assert_eq!(rerun.watchers[0].jobs_queued, 1);
    assert_eq!(rerun.worker.failed, 1);
    assert_eq!(bridge.main.balance(TESTER2), value);
    assert_eq!(bridge.main.balance(bridge.main_wallet), ether(10) - value);

    // attesting again only produces duplicate-signer reverts
    let attest = sealer_run(&bridge, &bridge.sealers[0], ATTEST).await;
    assert_eq!(attest.worker.signatures_recorded, 0);
    assert_eq!(attest.worker.failed, 1);
}

#[tokio::test]
async fn test_single_attestation_is_not_forwarded() {
    let bridge = Bridge::new(ether(10));
    let value = U256::from(5u64);
    bridge.side.fund(TESTER1, ether(1));
    let source_tx = bridge
        .side
        .deposit(TESTER1, bridge.side_wallet, TESTER2, value);

    sealer_run(&bridge, &bridge.sealers[0], ATTEST).await;
    let aggregate = sealer_run(&bridge, &bridge.sealers[0], AGGREGATE).await;

    assert_eq!(aggregate.watchers[0].events_seen, 1);
    assert_eq!(aggregate.watchers[0].jobs_queued, 0);
    assert_eq!(aggregate.worker.submitted, 0);
    assert!(!bridge.main.is_executed(bridge.main_wallet, source_tx));
}

#[tokio::test]
async fn test_all_pipelines_in_one_node() {
    let bridge = Bridge::new(ether(10));
    bridge.main.fund(TESTER2, ether(1));
    bridge.side.fund(TESTER1, ether(1));
    bridge
        .main
        .deposit(TESTER2, bridge.main_wallet, TESTER1, U256::from(7u64));
    bridge
        .side
        .deposit(TESTER1, bridge.side_wallet, TESTER2, U256::from(9u64));

    let all = Pipelines {
        mirror: true,
        attest: true,
        aggregate: true,
    };
    let summary = sealer_run(&bridge, &bridge.sealers[0], all).await;

    assert_eq!(summary.watchers.len(), 3);
    assert_eq!(summary.worker.transfers_recorded, 1);
    assert_eq!(summary.worker.signatures_recorded, 1);
    assert_eq!(summary.worker.failed, 0);
}

#[tokio::test]
async fn test_unreadable_block_is_skipped() {
    let bridge = Bridge::new(ether(10));
    bridge.main.fund(TESTER2, ether(1));
    let lost = bridge
        .main
        .deposit(TESTER2, bridge.main_wallet, TESTER1, U256::from(1u64));
    let kept = bridge
        .main
        .deposit(TESTER2, bridge.main_wallet, TESTER1, U256::from(2u64));
    bridge.main.fail_block(1);

    for sealer in &bridge.sealers {
        let summary = sealer_run(&bridge, sealer, MIRROR).await;
        assert_eq!(summary.watchers[0].events_seen, 1);
    }

    assert!(!bridge.side.is_executed(bridge.side_wallet, lost));
    assert!(bridge.side.is_executed(bridge.side_wallet, kept));
    assert_eq!(bridge.side.balance(TESTER1), U256::from(2u64));
}

#[tokio::test]
async fn test_shutdown_stops_following_node() {
    let bridge = Bridge::new(ether(10));
    bridge.main.fund(TESTER2, ether(1));
    bridge
        .main
        .deposit(TESTER2, bridge.main_wallet, TESTER1, U256::from(3u64));

    let follow = ScanConfig {
        follow: true,
        ..one_pass()
    };
    let (manager, worker) = manager(&bridge, &bridge.sealers[0], MIRROR, follow);
    let summary = manager
        .run(worker, tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();

    assert_eq!(summary.watchers.len(), 1);
    assert_eq!(summary.watchers[0].last_block, Some(1));
    assert_eq!(summary.worker.transfers_recorded, 1);
}

#[tokio::test]
async fn test_end_block_bounds_the_scan() {
    let bridge = Bridge::new(ether(10));
    bridge.main.fund(TESTER2, ether(1));
    let early = bridge
        .main
        .deposit(TESTER2, bridge.main_wallet, TESTER1, U256::from(1u64));
    bridge.main.advance(5);
    bridge
        .main
        .deposit(TESTER2, bridge.main_wallet, TESTER1, U256::from(2u64));

    let bounded = ScanConfig {
        end_block: Some(3),
        ..one_pass()
    };
    for sealer in &bridge.sealers {
        let (manager, worker) = manager(&bridge, sealer, MIRROR, bounded);
        let summary = manager.run(worker, std::future::pending()).await.unwrap();
        assert_eq!(summary.watchers[0].events_seen, 1);
        assert_eq!(summary.watchers[0].last_block, Some(3));
    }

    assert!(bridge.side.is_executed(bridge.side_wallet, early));
    assert_eq!(bridge.side.balance(TESTER1), U256::from(1u64));
}
