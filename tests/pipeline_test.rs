mod common;

use alloy::primitives::{Address, TxHash, U256};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use common::{account, claim, no_retry, TestGrid, PRODUCER};
use microgrid_orchestrator::config::PipelineConfig;
use microgrid_orchestrator::ledger::{
    EventId, LedgerClient, TxStatus, ValidationEvent, VALIDATION_REQUESTED,
};
use microgrid_orchestrator::pipeline::{
    AcceptAll, ClaimJournal, ClaimProcessor, ClaimRetry, ClaimState, ValidationPipeline,
};
use microgrid_orchestrator::Shutdown;

fn temp_journal(name: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("grid_pipeline_{}_{}.json", name, std::process::id()));
    std::fs::remove_file(&path).unwrap_or_default();
    path
}

/// Retries long enough to keep a worker busy re-polling a held receipt.
fn patient_retry() -> ClaimRetry {
    ClaimRetry {
        max_retries: 100,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
    }
}

async fn wait_for(journal: &ClaimJournal, done: impl Fn(&ClaimJournal) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(journal) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pipeline reached the expected state");
}

#[tokio::test]
async fn test_claim_beyond_available_is_rejected() {
    let grid = TestGrid::deployed().await;
    grid.produce(300).await;
    let journal = ClaimJournal::new(None);
    let processor = grid.processor(journal.clone(), no_retry());

    let event = claim("0x01:0", account(PRODUCER), 500);
    journal.try_observe(&event);
    let state = processor.process(event.clone()).await;

    assert_eq!(state, ClaimState::Rejected);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 0);
    let record = journal.get(&event.event_id).unwrap();
    assert!(record.reason.unwrap().contains("exceeds available"));
    assert!(record.tx_hash.is_none());
}

#[tokio::test]
async fn test_claim_within_available_is_minted_once() {
    let grid = TestGrid::deployed().await;
    grid.produce(300).await;
    let journal = ClaimJournal::new(None);
    let processor = grid.processor(journal.clone(), no_retry());

    let event = claim("0x02:0", account(PRODUCER), 200);
    journal.try_observe(&event);

    assert_eq!(processor.process(event).await, ClaimState::Approved);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 1);
    assert_eq!(
        grid.clients.exchange.balance_of(account(PRODUCER)).await.unwrap(),
        U256::from(200)
    );
}

#[tokio::test]
async fn test_claim_from_non_producer_is_rejected() {
    let grid = TestGrid::deployed().await;
    let journal = ClaimJournal::new(None);
    let processor = grid.processor(journal.clone(), no_retry());

    let event = claim("0x03:0", Address::with_last_byte(0x77), 10);
    journal.try_observe(&event);

    assert_eq!(processor.process(event).await, ClaimState::Rejected);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 0);
}

#[tokio::test]
async fn test_reverted_mint_is_rejected_without_retry() {
    let grid = TestGrid::deployed().await;
    let journal = ClaimJournal::new(None);
    let processor = ClaimProcessor::new(
        grid.clients.exchange.clone(),
        Arc::new(AcceptAll),
        journal.clone(),
        ClaimRetry {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    );

    let event = claim("0x04:0", Address::with_last_byte(0x66), 10);
    journal.try_observe(&event);

    assert_eq!(processor.process(event.clone()).await, ClaimState::Rejected);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 1);
    assert_eq!(journal.get(&event.event_id).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_submission_failure_is_retried() {
    let grid = TestGrid::deployed().await;
    grid.produce(300).await;
    let journal = ClaimJournal::new(None);
    let processor = grid.processor(
        journal.clone(),
        ClaimRetry {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    );
    // Enough to exhaust the first attempt's transport retries.
    grid.ledger.fail_next_sends(3);

    let event = claim("0x05:0", account(PRODUCER), 100);
    journal.try_observe(&event);

    assert_eq!(processor.process(event.clone()).await, ClaimState::Approved);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 1);
    assert_eq!(journal.get(&event.event_id).unwrap().attempts, 2);
}

#[tokio::test]
async fn test_exhausted_claim_reaches_failure_sink() {
    let grid = TestGrid::deployed().await;
    grid.produce(300).await;
    let journal = ClaimJournal::new(None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let processor = grid.processor(journal.clone(), no_retry()).with_failure_sink(tx);
    grid.ledger.fail_next_sends(100);

    let event = claim("0x06:0", account(PRODUCER), 100);
    journal.try_observe(&event);

    assert_eq!(processor.process(event.clone()).await, ClaimState::Failed);
    let failure = rx.recv().await.unwrap();
    assert_eq!(failure.event_id, event.event_id);
    assert!(failure.reason.contains("approveMint"));
    assert_eq!(journal.summary().failed, 1);
}

#[tokio::test]
async fn test_timed_out_mint_is_repolled_not_resent() {
    let grid = TestGrid::deployed().await;
    grid.produce(300).await;
    let journal = ClaimJournal::new(None);
    let processor = Arc::new(grid.processor(
        journal.clone(),
        ClaimRetry {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    ));
    grid.ledger.hold_receipts(1);

    let event = claim("0x07:0", account(PRODUCER), 100);
    journal.try_observe(&event);

    let worker = {
        let processor = processor.clone();
        let event = event.clone();
        tokio::spawn(async move { processor.process(event).await })
    };

    // Outlast the first confirmation window, then let the transaction land.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let tx_hash = journal.get(&event.event_id).unwrap().tx_hash.unwrap();
    grid.ledger.release(tx_hash);

    assert_eq!(worker.await.unwrap(), ClaimState::Approved);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 1);
    assert!(journal.get(&event.event_id).unwrap().attempts >= 2);
}

#[tokio::test]
async fn test_reconcile_after_restart_detects_prior_submission() {
    let path = temp_journal("restart");
    let grid = TestGrid::deployed().await;
    grid.produce(300).await;
    grid.ledger.hold_receipts(1);

    let event = claim("0x08:0", account(PRODUCER), 200);
    let tx_hash = {
        let journal = ClaimJournal::open(Some(&path)).unwrap();
        let processor = grid.processor(journal.clone(), no_retry());
        journal.try_observe(&event);

        assert_eq!(processor.process(event.clone()).await, ClaimState::Failed);
        let record = journal.get(&event.event_id).unwrap();
        assert!(record.reason.unwrap().contains("not confirmed"));
        record.tx_hash.unwrap()
    };

    // The transaction is mined while the orchestrator is down.
    grid.ledger.release(tx_hash);
    assert_eq!(
        grid.ledger.get_receipt(tx_hash).await.unwrap().status,
        TxStatus::Success
    );

    let journal = ClaimJournal::open(Some(&path)).unwrap();
    let processor = grid.processor(journal.clone(), no_retry());
    let report = processor.reconcile().await.unwrap();

    assert_eq!(report.approved, 1);
    assert!(report.resumable.is_empty());
    assert_eq!(journal.get(&event.event_id).unwrap().state, ClaimState::Approved);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 1);
    assert!(!journal.try_observe(&event));

    std::fs::remove_file(&path).unwrap_or_default();
}

#[tokio::test]
async fn test_reconcile_fails_interrupted_claim_without_hash() {
    let path = temp_journal("interrupted");
    let grid = TestGrid::deployed().await;
    let observed = claim("0x09:0", account(PRODUCER), 50);
    let interrupted = claim("0x09:1", account(PRODUCER), 60);
    {
        let journal = ClaimJournal::open(Some(&path)).unwrap();
        journal.try_observe(&observed);
        journal.try_observe(&interrupted);
        journal.transition(&interrupted.event_id, ClaimState::Validating, None);
    }

    let journal = ClaimJournal::open(Some(&path)).unwrap();
    let processor = grid.processor(journal.clone(), no_retry());
    let report = processor.reconcile().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.resumable, vec![observed.clone()]);
    assert_eq!(journal.get(&interrupted.event_id).unwrap().state, ClaimState::Failed);
    assert_eq!(journal.get(&observed.event_id).unwrap().state, ClaimState::Observed);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 0);

    std::fs::remove_file(&path).unwrap_or_default();
}

#[tokio::test]
async fn test_pipeline_dedupes_redelivered_events() {
    let grid = TestGrid::deployed().await;
    grid.produce(1_000).await;
    let exchange = grid.exchange_address();
    let journal = ClaimJournal::new(None);
    let processor = Arc::new(grid.processor(journal.clone(), no_retry()));
    let pipeline = ValidationPipeline::new(
        grid.ledger.clone(),
        processor,
        exchange,
        &PipelineConfig::default(),
    );

    let events = grid
        .ledger
        .subscribe_events(exchange, VALIDATION_REQUESTED, None)
        .await
        .unwrap();
    let shutdown = Shutdown::new();
    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pipeline.run_with(events, shutdown, Vec::new()).await })
    };

    // Two claims through the contract, one of them delivered twice more.
    let producer = grid.clients.exchange.acting_as(account(PRODUCER));
    producer.request_validation(U256::from(200)).await.unwrap();
    producer.request_validation(U256::from(300)).await.unwrap();
    let redelivered = journal_event(&journal, 200).await;
    grid.ledger.emit(exchange, redelivered.clone());
    grid.ledger.emit(exchange, redelivered);

    wait_for(&journal, |j| j.summary().approved == 2).await;
    shutdown.trigger();
    let report = run.await.unwrap();

    assert_eq!(report.accepted, 2);
    assert_eq!(report.duplicates, 2);
    assert_eq!(report.abandoned, 0);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 2);
    assert_eq!(
        grid.clients.exchange.balance_of(account(PRODUCER)).await.unwrap(),
        U256::from(500)
    );
}

/// The journaled event carrying `wh`, once the pipeline has seen it.
async fn journal_event(journal: &ClaimJournal, wh: u64) -> ValidationEvent {
    let find = |j: &ClaimJournal| {
        [
            ClaimState::Observed,
            ClaimState::Validating,
            ClaimState::Approved,
            ClaimState::Rejected,
            ClaimState::Failed,
        ]
        .into_iter()
        .flat_map(|s| j.in_state(s))
        .find(|r| r.event.claimed_wh == U256::from(wh))
        .map(|r| r.event)
    };
    wait_for(journal, |j| find(j).is_some()).await;
    find(journal).unwrap()
}

#[tokio::test]
async fn test_generated_kwh_is_relayed_for_validation() {
    let grid = TestGrid::deployed().await;
    grid.produce(5_000).await;
    let exchange = grid.exchange_address();
    let journal = ClaimJournal::new(None);
    let pipeline = ValidationPipeline::new(
        grid.ledger.clone(),
        Arc::new(grid.processor(journal.clone(), no_retry())),
        exchange,
        &PipelineConfig::default(),
    );
    let events = grid
        .ledger
        .subscribe_events(exchange, VALIDATION_REQUESTED, None)
        .await
        .unwrap();
    let shutdown = Shutdown::new();
    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pipeline.run_with(events, shutdown, Vec::new()).await })
    };

    grid.clients
        .operators
        .acting_as(account(PRODUCER))
        .generate_kwh(U256::from(3))
        .await
        .unwrap();

    wait_for(&journal, |j| j.summary().approved == 1).await;
    shutdown.trigger();
    run.await.unwrap();

    assert_eq!(
        grid.clients.exchange.balance_of(account(PRODUCER)).await.unwrap(),
        U256::from(3_000)
    );
}

#[tokio::test]
async fn test_pipeline_resumes_reconciled_claims() {
    let grid = TestGrid::deployed().await;
    grid.produce(300).await;
    let journal = ClaimJournal::new(None);
    let pending = claim("0x0a:0", account(PRODUCER), 120);
    journal.try_observe(&pending);

    let pipeline = ValidationPipeline::new(
        grid.ledger.clone(),
        Arc::new(grid.processor(journal.clone(), no_retry())),
        grid.exchange_address(),
        &PipelineConfig::default(),
    );
    let report = pipeline.reconcile().await.unwrap();
    assert_eq!(report.resumable.len(), 1);

    let summary = pipeline
        .run_with(futures_util::stream::empty().boxed(), Shutdown::new(), report.resumable)
        .await;

    assert_eq!(summary.journal.approved, 1);
    assert_eq!(summary.accepted, 0);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 1);
}

#[tokio::test]
async fn test_second_claim_cannot_spend_minted_energy() {
    let grid = TestGrid::deployed().await;
    grid.produce(300).await;
    let journal = ClaimJournal::new(None);
    let processor = grid.processor(journal.clone(), no_retry());

    let first = claim("0x0b:0", account(PRODUCER), 200);
    let mut second = claim("0x0c:0", account(PRODUCER), 200);
    second.block_number = 2;
    journal.try_observe(&first);
    journal.try_observe(&second);

    assert_eq!(processor.process(first).await, ClaimState::Approved);
    assert_eq!(processor.process(second.clone()).await, ClaimState::Rejected);
    assert!(journal
        .get(&second.event_id)
        .unwrap()
        .reason
        .unwrap()
        .contains("200 Wh already committed"));
    assert_eq!(grid.ledger.transaction_count("approveMint"), 1);
    assert_eq!(
        grid.clients.exchange.balance_of(account(PRODUCER)).await.unwrap(),
        U256::from(200)
    );
}

#[tokio::test]
async fn test_reconcile_survives_receipt_lookup_failure() {
    let grid = TestGrid::deployed().await;
    let journal = ClaimJournal::new(None);
    let in_flight = claim("0x0d:0", account(PRODUCER), 50);
    let failed = claim("0x0d:1", account(PRODUCER), 60);
    for (event, hash) in [(&in_flight, 0xd0), (&failed, 0xd1)] {
        journal.try_observe(event);
        journal.transition(&event.event_id, ClaimState::Validating, None);
        journal.record_submission(&event.event_id, TxHash::with_last_byte(hash));
    }
    journal.transition(&failed.event_id, ClaimState::Failed, Some("not confirmed".into()));
    grid.ledger.fail_next_receipts(2);

    let processor = grid.processor(journal.clone(), no_retry());
    let report = processor.reconcile().await.unwrap();

    assert_eq!(report.resumable, vec![in_flight.clone()]);
    assert_eq!(report.deferred, 1);
    assert_eq!(journal.get(&failed.event_id).unwrap().state, ClaimState::Failed);
    assert_eq!(journal.get(&in_flight.event_id).unwrap().state, ClaimState::Validating);
}

#[tokio::test]
async fn test_shutdown_is_not_blocked_by_a_full_worker_pool() {
    let grid = TestGrid::deployed().await;
    grid.produce(1_000).await;
    let exchange = grid.exchange_address();
    let journal = ClaimJournal::new(None);
    let config = PipelineConfig {
        max_workers: 1,
        drain_timeout_secs: 0,
        ..PipelineConfig::default()
    };
    let pipeline = ValidationPipeline::new(
        grid.ledger.clone(),
        Arc::new(grid.processor(journal.clone(), patient_retry())),
        exchange,
        &config,
    );
    let events = grid
        .ledger
        .subscribe_events(exchange, VALIDATION_REQUESTED, None)
        .await
        .unwrap();
    let shutdown = Shutdown::new();
    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pipeline.run_with(events, shutdown, Vec::new()).await })
    };

    // The only worker sits on a mint whose receipt never arrives.
    grid.ledger.hold_receipts(1);
    let busy = claim("0x0e:0", account(PRODUCER), 100);
    grid.ledger.emit(exchange, busy.clone());
    wait_for(&journal, |j| j.get(&busy.event_id).and_then(|r| r.tx_hash).is_some()).await;

    let waiting = claim("0x0e:1", account(PRODUCER), 100);
    grid.ledger.emit(exchange, waiting.clone());
    wait_for(&journal, |j| j.get(&waiting.event_id).is_some()).await;

    let started = tokio::time::Instant::now();
    shutdown.trigger();
    let report = tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("shutdown is honoured while waiting for a worker")
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.abandoned, 1);
    assert_eq!(journal.get(&waiting.event_id).unwrap().state, ClaimState::Observed);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 1);
}

#[tokio::test]
async fn test_drained_claim_resumes_after_restart_without_second_mint() {
    let path = temp_journal("drain");
    let grid = TestGrid::deployed().await;
    grid.produce(300).await;
    let exchange = grid.exchange_address();
    let config = PipelineConfig {
        drain_timeout_secs: 0,
        ..PipelineConfig::default()
    };
    grid.ledger.hold_receipts(1);
    let event = claim("0x0f:0", account(PRODUCER), 150);

    let tx_hash = {
        let journal = ClaimJournal::open(Some(&path)).unwrap();
        let pipeline = ValidationPipeline::new(
            grid.ledger.clone(),
            Arc::new(grid.processor(journal.clone(), patient_retry())),
            exchange,
            &config,
        );
        let events = grid
            .ledger
            .subscribe_events(exchange, VALIDATION_REQUESTED, None)
            .await
            .unwrap();
        let shutdown = Shutdown::new();
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { pipeline.run_with(events, shutdown, Vec::new()).await })
        };

        grid.ledger.emit(exchange, event.clone());
        wait_for(&journal, |j| j.get(&event.event_id).and_then(|r| r.tx_hash).is_some()).await;
        shutdown.trigger();
        let report = run.await.unwrap();

        assert_eq!(report.abandoned, 1);
        let record = journal.get(&event.event_id).unwrap();
        assert_eq!(record.state, ClaimState::Validating);
        record.tx_hash.unwrap()
    };

    let journal = ClaimJournal::open(Some(&path)).unwrap();
    assert_eq!(journal.get(&event.event_id).unwrap().tx_hash, Some(tx_hash));
    let pipeline = ValidationPipeline::new(
        grid.ledger.clone(),
        Arc::new(grid.processor(journal.clone(), no_retry())),
        exchange,
        &config,
    );
    let report = pipeline.reconcile().await.unwrap();
    assert_eq!(report.resumable, vec![event.clone()]);

    grid.ledger.release(tx_hash);
    let summary = pipeline
        .run_with(futures_util::stream::empty().boxed(), Shutdown::new(), report.resumable)
        .await;

    assert_eq!(summary.journal.approved, 1);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 1);
    assert_eq!(
        grid.clients.exchange.balance_of(account(PRODUCER)).await.unwrap(),
        U256::from(150)
    );

    std::fs::remove_file(&path).unwrap_or_default();
}

#[tokio::test]
async fn test_pipeline_catches_up_on_requests_missed_while_down() {
    let grid = TestGrid::deployed().await;
    grid.produce(1_000).await;
    let exchange = grid.exchange_address();
    let producer = grid.clients.exchange.acting_as(account(PRODUCER));
    let journal = ClaimJournal::new(None);
    let processor = Arc::new(grid.processor(journal.clone(), no_retry()));

    // Handled by an earlier run.
    let receipt = producer.request_validation(U256::from(200)).await.unwrap();
    let handled = ValidationEvent {
        event_id: EventId::from_log(receipt.tx_hash, 0),
        asset: account(PRODUCER),
        claimed_wh: U256::from(200),
        block_number: receipt.block_number.unwrap(),
    };
    journal.try_observe(&handled);
    assert_eq!(processor.process(handled).await, ClaimState::Approved);

    // Emitted while nothing is subscribed.
    producer.request_validation(U256::from(300)).await.unwrap();

    let pipeline = ValidationPipeline::new(
        grid.ledger.clone(),
        processor,
        exchange,
        &PipelineConfig::default(),
    );
    let shutdown = Shutdown::new();
    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pipeline.run(shutdown, Vec::new()).await })
    };

    wait_for(&journal, |j| j.summary().approved == 2).await;
    shutdown.trigger();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(grid.ledger.transaction_count("approveMint"), 2);
    assert_eq!(
        grid.clients.exchange.balance_of(account(PRODUCER)).await.unwrap(),
        U256::from(500)
    );
}
