//! Shared fixtures for integration tests: a fully wired marketplace on the
//! in-process ledger.

#![allow(dead_code)]

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;

use microgrid_orchestrator::contracts::{ClientContext, GridClients, GridSetup, SetupPlan};
use microgrid_orchestrator::ledger::{EventId, InMemoryLedger, LedgerClient, TransactionSubmitter, ValidationEvent};
use microgrid_orchestrator::pipeline::{CapacityPolicy, ClaimJournal, ClaimProcessor, ClaimRetry};
use microgrid_orchestrator::resilience::RetryPolicy;

pub const OPERATOR: u8 = 1;
pub const PRODUCER: u8 = 2;
pub const CONSUMER: u8 = 3;

pub fn account(n: u8) -> Address {
    Address::with_last_byte(n)
}

/// Short waits so timeouts trigger quickly.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(2),
        max_backoff: Duration::from_millis(10),
        max_wait: Duration::from_millis(100),
    }
}

pub fn no_retry() -> ClaimRetry {
    ClaimRetry {
        max_retries: 0,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

pub fn context(ledger: &Arc<InMemoryLedger>) -> ClientContext {
    let ledger: Arc<dyn LedgerClient> = ledger.clone();
    ClientContext::new(TransactionSubmitter::new(ledger), account(OPERATOR)).with_policy(fast_policy())
}

pub struct TestGrid {
    pub ledger: Arc<InMemoryLedger>,
    pub clients: GridClients,
}

impl TestGrid {
    /// Deploy and wire the contracts, whitelisting the producer and
    /// enrolling one producer and one consumer.
    pub async fn deployed() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let plan = SetupPlan {
            assets: vec![account(PRODUCER)],
            producers: vec![account(PRODUCER)],
            consumers: vec![account(CONSUMER)],
        };
        let (clients, _) = GridSetup::new(context(&ledger), ledger.as_ref())
            .run(&plan)
            .await
            .expect("setup succeeds on a fresh ledger");
        Self { ledger, clients }
    }

    /// Record `wh` of production for the producer on the Device Registry.
    pub async fn produce(&self, wh: u64) {
        self.clients
            .registry
            .acting_as(account(PRODUCER))
            .generate_watt_hours(U256::from(wh))
            .await
            .expect("producer can report production");
    }

    pub fn exchange_address(&self) -> Address {
        self.clients.exchange.binding().unwrap().address
    }

    pub fn processor(&self, journal: ClaimJournal, retry: ClaimRetry) -> ClaimProcessor {
        ClaimProcessor::new(
            self.clients.exchange.clone(),
            Arc::new(CapacityPolicy::new(self.clients.registry.clone()).with_journal(journal.clone())),
            journal,
            retry,
        )
    }
}

pub fn claim(id: &str, asset: Address, wh: u64) -> ValidationEvent {
    ValidationEvent {
        event_id: EventId::from(id),
        asset,
        claimed_wh: U256::from(wh),
        block_number: 1,
    }
}
