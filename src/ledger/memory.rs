//! In-process ledger simulating the marketplace contracts.
//!
//! Used by tests and by `grid-cli --simulate`. Reproduces the externally
//! observable rules of the three contracts (ownership checks, role grants,
//! whitelists, ordering requirements) plus knobs for transport failures and
//! withheld receipts.

use alloy::primitives::{keccak256, Address, Bytes, TxHash, U256};
use alloy::sol_types::{SolEvent, SolInterface, SolValue};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::contracts::abi::IDeviceRegistry::IDeviceRegistryCalls;
use crate::contracts::abi::IMicrogridExchange::{IMicrogridExchangeCalls, ValidationRequested};
use crate::contracts::abi::IOperatorsAgreement::IOperatorsAgreementCalls;
use crate::contracts::binding::{ArtifactSource, ContractArtifact};
use crate::contracts::{DEVICE_REGISTRY, MICROGRID_EXCHANGE, OPERATORS_AGREEMENT};
use crate::error::{GridError, GridResult};
use crate::ledger::client::{EventStream, LedgerClient, VALIDATION_REQUESTED};
use crate::ledger::types::{
    EventId, LedgerError, LedgerResult, TransactionReceipt, TxStatus, ValidationEvent,
};

const BYTECODE_PREFIX: &str = "sim:";
const ACCOUNT_COUNT: u8 = 5;

#[derive(Debug, Default)]
struct DeviceState {
    wh_produced: U256,
    wh_consumed: U256,
    wh_available: U256,
    wh_deficit: U256,
    valid_consumer: bool,
    valid_producer: bool,
}

#[derive(Debug)]
enum SimContract {
    DeviceRegistry {
        ceo: Address,
        devices: HashMap<Address, DeviceState>,
    },
    Exchange {
        owner: Address,
        operators_agreement: Option<Address>,
        whitelisted: HashSet<Address>,
        balances: HashMap<Address, U256>,
    },
    OperatorsAgreement {
        owner: Address,
        exchange: Option<Address>,
        whitelisted: HashSet<Address>,
        produced_kwh: HashMap<Address, U256>,
    },
}

impl SimContract {
    fn from_bytecode(bytecode: &[u8], deployer: Address) -> Option<Self> {
        let name = std::str::from_utf8(bytecode).ok()?.strip_prefix(BYTECODE_PREFIX)?;
        match name {
            DEVICE_REGISTRY => Some(SimContract::DeviceRegistry {
                ceo: deployer,
                devices: HashMap::new(),
            }),
            MICROGRID_EXCHANGE => Some(SimContract::Exchange {
                owner: deployer,
                operators_agreement: None,
                whitelisted: HashSet::new(),
                balances: HashMap::new(),
            }),
            OPERATORS_AGREEMENT => Some(SimContract::OperatorsAgreement {
                owner: deployer,
                exchange: None,
                whitelisted: HashSet::new(),
                produced_kwh: HashMap::new(),
            }),
            _ => None,
        }
    }
}

/// What executing a transaction produced.
struct Execution {
    method: &'static str,
    result: Result<(), String>,
    emitted: Option<(Address, Address, U256)>,
}

#[derive(Default)]
struct SimState {
    contracts: HashMap<Address, SimContract>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    withheld: HashMap<TxHash, TransactionReceipt>,
    hold_next: usize,
    fail_next_sends: u32,
    fail_next_receipts: u32,
    nonce: u64,
    block_number: u64,
    method_counts: HashMap<String, usize>,
}

type Subscriber = (Address, mpsc::UnboundedSender<LedgerResult<ValidationEvent>>);

/// Emitted events and the live subscriptions they are pushed to.
#[derive(Default)]
struct EventLog {
    history: Vec<(Address, ValidationEvent)>,
    subscribers: Vec<Subscriber>,
}

/// Simulated ledger. Every accepted transaction is mined immediately into
/// its own block unless its receipt is being withheld.
pub struct InMemoryLedger {
    accounts: Vec<Address>,
    state: Mutex<SimState>,
    events: Mutex<EventLog>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            accounts: (1..=ACCOUNT_COUNT).map(Address::with_last_byte).collect(),
            state: Mutex::new(SimState::default()),
            events: Mutex::new(EventLog::default()),
        }
    }

    /// Creation bytecode understood by this ledger for `contract`.
    pub fn artifact(contract: &str) -> ContractArtifact {
        ContractArtifact {
            name: contract.to_string(),
            abi: serde_json::Value::Array(Vec::new()),
            bytecode: Bytes::from(format!("{}{}", BYTECODE_PREFIX, contract).into_bytes()),
        }
    }

    /// Make the next `count` sends fail before a hash is assigned.
    pub fn fail_next_sends(&self, count: u32) {
        self.lock().fail_next_sends = count;
    }

    /// Make the next `count` receipt lookups fail.
    pub fn fail_next_receipts(&self, count: u32) {
        self.lock().fail_next_receipts = count;
    }

    /// Report the next `count` transactions as pending until released.
    ///
    /// Their effects are applied on acceptance; only the receipt is held back.
    pub fn hold_receipts(&self, count: usize) {
        self.lock().hold_next = count;
    }

    /// Publish a withheld receipt.
    pub fn release(&self, tx_hash: TxHash) {
        let mut state = self.lock();
        if let Some(receipt) = state.withheld.remove(&tx_hash) {
            state.receipts.insert(tx_hash, receipt);
        }
    }

    /// Number of transactions, successful or reverted, sent for `method`.
    pub fn transaction_count(&self, method: &str) -> usize {
        self.lock().method_counts.get(method).copied().unwrap_or(0)
    }

    /// Total number of transactions accepted.
    pub fn total_transactions(&self) -> u64 {
        self.lock().nonce
    }

    /// Log `event` for `contract` and deliver it to current subscribers.
    pub fn emit(&self, contract: Address, event: ValidationEvent) {
        let mut log = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        log.subscribers
            .retain(|(address, tx)| *address != contract || tx.send(Ok(event.clone())).is_ok());
        log.history.push((contract, event));
    }

    /// Height of the latest mined block.
    pub fn block_number(&self) -> u64 {
        self.lock().block_number
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accept(&self, from: Address, to: Option<Address>, data: Bytes) -> LedgerResult<TxHash> {
        let mut state = self.lock();
        if state.fail_next_sends > 0 {
            state.fail_next_sends -= 1;
            return Err(LedgerError::Rpc("simulated transport failure".to_string()));
        }

        let nonce = state.nonce;
        state.nonce += 1;
        state.block_number += 1;
        let block_number = state.block_number;
        let tx_hash = keccak256(nonce.to_be_bytes());

        let mut emitted = None;
        let (status, contract_address) = match to {
            None => match SimContract::from_bytecode(&data, from) {
                Some(contract) => {
                    let address = from.create(nonce);
                    state.contracts.insert(address, contract);
                    (TxStatus::Success, Some(address))
                }
                None if data.is_empty() => (TxStatus::Reverted, None),
                // Unrecognised code: the node reports success without an address.
                None => (TxStatus::Success, None),
            },
            Some(to) => {
                let execution = execute(&mut state.contracts, from, to, &data);
                *state.method_counts.entry(execution.method.to_string()).or_default() += 1;
                emitted = execution.emitted;
                match execution.result {
                    Ok(()) => (TxStatus::Success, None),
                    Err(reason) => {
                        tracing::debug!(method = execution.method, reason = %reason, "Simulated revert");
                        (TxStatus::Reverted, None)
                    }
                }
            }
        };

        let receipt = TransactionReceipt {
            tx_hash,
            status,
            contract_address,
            block_number: Some(block_number),
        };
        if state.hold_next > 0 {
            state.hold_next -= 1;
            state.withheld.insert(tx_hash, receipt);
        } else {
            state.receipts.insert(tx_hash, receipt);
        }
        drop(state);

        if let Some((exchange, asset, claimed_wh)) = emitted {
            self.emit(
                exchange,
                ValidationEvent {
                    event_id: EventId::from_log(tx_hash, 0),
                    asset,
                    claimed_wh,
                    block_number,
                },
            );
        }
        Ok(tx_hash)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn require(condition: bool, reason: &str) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason.to_string())
    }
}

fn execute(
    contracts: &mut HashMap<Address, SimContract>,
    from: Address,
    to: Address,
    data: &[u8],
) -> Execution {
    let relay_to = match contracts.get(&to) {
        Some(SimContract::OperatorsAgreement { exchange, .. }) => *exchange,
        _ => None,
    };
    let relay_whitelisted = match relay_to.and_then(|exchange| contracts.get(&exchange)) {
        Some(SimContract::Exchange { whitelisted, .. }) => whitelisted.contains(&from),
        _ => false,
    };

    let Some(contract) = contracts.get_mut(&to) else {
        return Execution {
            method: "unknown",
            result: Err(format!("no contract at {}", to)),
            emitted: None,
        };
    };

    let mut emitted = None;
    let (method, result) = match contract {
        SimContract::DeviceRegistry { ceo, devices } => match IDeviceRegistryCalls::abi_decode(data) {
            Ok(IDeviceRegistryCalls::setCEO(call)) => ("setCEO", {
                require(from == *ceo, "caller is not CEO").map(|()| *ceo = call.newCeo)
            }),
            Ok(IDeviceRegistryCalls::designateProducer(call)) => ("designateProducer", {
                require(from == *ceo, "caller is not CEO")
                    .map(|()| devices.entry(call.producer).or_default().valid_producer = true)
            }),
            Ok(IDeviceRegistryCalls::designateConsumer(call)) => ("designateConsumer", {
                require(from == *ceo, "caller is not CEO")
                    .map(|()| devices.entry(call.consumer).or_default().valid_consumer = true)
            }),
            Ok(IDeviceRegistryCalls::generateWattHours(call)) => ("generateWattHours", {
                let device = devices.entry(from).or_default();
                require(device.valid_producer, "caller is not a producer").map(|()| {
                    device.wh_produced += call.wattHours;
                    device.wh_available += call.wattHours;
                })
            }),
            Ok(IDeviceRegistryCalls::consumeWattHours(call)) => ("consumeWattHours", {
                let device = devices.entry(from).or_default();
                require(device.valid_consumer, "caller is not a consumer").map(|()| {
                    device.wh_consumed += call.wattHours;
                    if call.wattHours > device.wh_available {
                        device.wh_deficit += call.wattHours - device.wh_available;
                        device.wh_available = U256::ZERO;
                    } else {
                        device.wh_available -= call.wattHours;
                    }
                })
            }),
            Ok(_) => ("view", Err("view method sent as transaction".to_string())),
            Err(e) => ("unknown", Err(format!("unrecognised call data: {}", e))),
        },
        SimContract::Exchange {
            owner,
            operators_agreement,
            whitelisted,
            balances,
        } => match IMicrogridExchangeCalls::abi_decode(data) {
            Ok(IMicrogridExchangeCalls::setOperatorsAgreement(call)) => ("setOperatorsAgreement", {
                require(from == *owner, "caller is not owner")
                    .map(|()| *operators_agreement = Some(call.agreement))
            }),
            Ok(IMicrogridExchangeCalls::whitelistAsset(call)) => ("whitelistAsset", {
                require(from == *owner, "caller is not owner").map(|()| {
                    whitelisted.insert(call.asset);
                })
            }),
            Ok(IMicrogridExchangeCalls::approveMint(call)) => ("approveMint", {
                require(from == *owner, "caller is not owner")
                    .and_then(|()| require(whitelisted.contains(&call.asset), "asset not whitelisted"))
                    .map(|()| *balances.entry(call.asset).or_default() += call.amount)
            }),
            Ok(IMicrogridExchangeCalls::requestValidation(call)) => ("requestValidation", {
                require(operators_agreement.is_some(), "operators agreement not set")
                    .and_then(|()| require(whitelisted.contains(&from), "caller not whitelisted"))
                    .map(|()| emitted = Some((to, from, call.wattHours)))
            }),
            Ok(_) => ("view", Err("view method sent as transaction".to_string())),
            Err(e) => ("unknown", Err(format!("unrecognised call data: {}", e))),
        },
        SimContract::OperatorsAgreement {
            owner,
            exchange,
            whitelisted,
            produced_kwh,
        } => match IOperatorsAgreementCalls::abi_decode(data) {
            Ok(IOperatorsAgreementCalls::setExchange(call)) => ("setExchange", {
                require(from == *owner, "caller is not owner").map(|()| *exchange = Some(call.exchange))
            }),
            Ok(IOperatorsAgreementCalls::whitelistAsset(call)) => ("whitelistAsset", {
                require(from == *owner, "caller is not owner")
                    .and_then(|()| require(exchange.is_some(), "exchange not set"))
                    .map(|()| {
                        whitelisted.insert(call.asset);
                    })
            }),
            Ok(IOperatorsAgreementCalls::generateKwh(call)) => ("generateKwh", {
                require(exchange.is_some(), "exchange not set")
                    .and_then(|()| require(whitelisted.contains(&from), "caller not whitelisted"))
                    .map(|()| {
                        *produced_kwh.entry(from).or_default() += call.kwh;
                        if let (Some(exchange), true) = (relay_to, relay_whitelisted) {
                            emitted = Some((exchange, from, call.kwh * U256::from(1000u64)));
                        }
                    })
            }),
            Ok(_) => ("view", Err("view method sent as transaction".to_string())),
            Err(e) => ("unknown", Err(format!("unrecognised call data: {}", e))),
        },
    };

    Execution {
        method,
        result,
        emitted,
    }
}

fn view(contract: &SimContract, data: &[u8]) -> LedgerResult<Bytes> {
    let unsupported = || LedgerError::CallReverted("unsupported view".to_string());
    let encoded = match contract {
        SimContract::DeviceRegistry { ceo, devices } => match IDeviceRegistryCalls::abi_decode(data) {
            Ok(IDeviceRegistryCalls::ceo_address(_)) => ceo.abi_encode(),
            Ok(IDeviceRegistryCalls::device_index(call)) => {
                let empty = DeviceState::default();
                let d = devices.get(&call.device).unwrap_or(&empty);
                (
                    d.wh_produced,
                    d.wh_consumed,
                    d.wh_available,
                    d.wh_deficit,
                    d.valid_consumer,
                    d.valid_producer,
                )
                    .abi_encode_params()
            }
            _ => return Err(unsupported()),
        },
        SimContract::Exchange { owner, balances, .. } => match IMicrogridExchangeCalls::abi_decode(data) {
            Ok(IMicrogridExchangeCalls::owner(_)) => owner.abi_encode(),
            Ok(IMicrogridExchangeCalls::balanceOf(call)) => balances
                .get(&call.account)
                .copied()
                .unwrap_or_default()
                .abi_encode(),
            _ => return Err(unsupported()),
        },
        SimContract::OperatorsAgreement { owner, .. } => match IOperatorsAgreementCalls::abi_decode(data) {
            Ok(IOperatorsAgreementCalls::owner(_)) => owner.abi_encode(),
            _ => return Err(unsupported()),
        },
    };
    Ok(Bytes::from(encoded))
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn accounts(&self) -> LedgerResult<Vec<Address>> {
        Ok(self.accounts.clone())
    }

    async fn deploy(&self, from: Address, bytecode: Bytes, _gas_limit: u64) -> LedgerResult<TxHash> {
        self.accept(from, None, bytecode)
    }

    async fn call(&self, to: Address, data: Bytes) -> LedgerResult<Bytes> {
        let state = self.lock();
        let contract = state
            .contracts
            .get(&to)
            .ok_or_else(|| LedgerError::CallReverted(format!("no contract at {}", to)))?;
        view(contract, &data)
    }

    async fn transact(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        _gas_limit: u64,
    ) -> LedgerResult<TxHash> {
        self.accept(from, Some(to), data)
    }

    async fn get_receipt(&self, tx_hash: TxHash) -> LedgerResult<TransactionReceipt> {
        let mut state = self.lock();
        if state.fail_next_receipts > 0 {
            state.fail_next_receipts -= 1;
            return Err(LedgerError::Rpc("simulated receipt lookup failure".to_string()));
        }
        Ok(match state.receipts.get(&tx_hash) {
            Some(receipt) => receipt.clone(),
            None if state.withheld.contains_key(&tx_hash) => TransactionReceipt::pending(tx_hash),
            None => TransactionReceipt {
                status: TxStatus::Unknown,
                ..TransactionReceipt::pending(tx_hash)
            },
        })
    }

    async fn subscribe_events(
        &self,
        contract: Address,
        event: &str,
        from_block: Option<u64>,
    ) -> LedgerResult<EventStream> {
        if event != VALIDATION_REQUESTED && event != ValidationRequested::SIGNATURE {
            return Err(LedgerError::NotAvailable(format!(
                "subscriptions to '{}' are not supported",
                event
            )));
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut log = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(from_block) = from_block {
            for (_, past) in log
                .history
                .iter()
                .filter(|(address, e)| *address == contract && e.block_number >= from_block)
            {
                let _ = tx.send(Ok(past.clone()));
            }
        }
        log.subscribers.push((contract, tx));
        drop(log);
        Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

impl ArtifactSource for InMemoryLedger {
    fn load(&self, name: &str) -> GridResult<ContractArtifact> {
        match name {
            DEVICE_REGISTRY | MICROGRID_EXCHANGE | OPERATORS_AGREEMENT => Ok(Self::artifact(name)),
            other => Err(GridError::InvalidConfiguration(format!(
                "no simulated artifact for contract '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::abi::IDeviceRegistry;
    use alloy::sol_types::SolCall;

    #[tokio::test]
    async fn test_deploy_assigns_address() {
        let ledger = InMemoryLedger::new();
        let deployer = ledger.accounts().await.unwrap()[0];
        let tx = ledger
            .deploy(deployer, InMemoryLedger::artifact(DEVICE_REGISTRY).bytecode, 1)
            .await
            .unwrap();
        let receipt = ledger.get_receipt(tx).await.unwrap();
        assert_eq!(receipt.status, TxStatus::Success);
        assert!(receipt.contract_address.is_some());
    }

    #[tokio::test]
    async fn test_non_ceo_cannot_designate() {
        let ledger = InMemoryLedger::new();
        let accounts = ledger.accounts().await.unwrap();
        let tx = ledger
            .deploy(accounts[0], InMemoryLedger::artifact(DEVICE_REGISTRY).bytecode, 1)
            .await
            .unwrap();
        let registry = ledger.get_receipt(tx).await.unwrap().contract_address.unwrap();

        let data = SolCall::abi_encode(&IDeviceRegistry::designateProducerCall { producer: accounts[2] });
        let tx = ledger.transact(accounts[1], registry, data.into(), 1).await.unwrap();
        assert_eq!(ledger.get_receipt(tx).await.unwrap().status, TxStatus::Reverted);
        assert_eq!(ledger.transaction_count("designateProducer"), 1);
    }

    #[tokio::test]
    async fn test_withheld_receipt_is_pending_until_released() {
        let ledger = InMemoryLedger::new();
        let deployer = ledger.accounts().await.unwrap()[0];
        ledger.hold_receipts(1);
        let tx = ledger
            .deploy(deployer, InMemoryLedger::artifact(MICROGRID_EXCHANGE).bytecode, 1)
            .await
            .unwrap();
        assert_eq!(ledger.get_receipt(tx).await.unwrap().status, TxStatus::Pending);
        ledger.release(tx);
        assert_eq!(ledger.get_receipt(tx).await.unwrap().status, TxStatus::Success);
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let ledger = InMemoryLedger::new();
        let receipt = ledger.get_receipt(TxHash::ZERO).await.unwrap();
        assert_eq!(receipt.status, TxStatus::Unknown);
    }

    #[tokio::test]
    async fn test_subscription_replays_from_block() {
        let ledger = InMemoryLedger::new();
        let exchange = Address::with_last_byte(0xee);
        let logged = |id: &str, block_number| ValidationEvent {
            event_id: EventId::from(id),
            asset: Address::with_last_byte(2),
            claimed_wh: U256::from(10),
            block_number,
        };
        ledger.emit(exchange, logged("a:0", 3));
        ledger.emit(exchange, logged("b:0", 7));
        ledger.emit(Address::with_last_byte(0xdd), logged("c:0", 8));

        let mut events = ledger
            .subscribe_events(exchange, VALIDATION_REQUESTED, Some(5))
            .await
            .unwrap();
        ledger.emit(exchange, logged("d:0", 9));

        let first = events.next().await.unwrap().unwrap();
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(first.event_id, EventId::from("b:0"));
        assert_eq!(second.event_id, EventId::from("d:0"));
    }

    #[tokio::test]
    async fn test_live_subscription_skips_history() {
        let ledger = InMemoryLedger::new();
        let exchange = Address::with_last_byte(0xee);
        ledger.emit(
            exchange,
            ValidationEvent {
                event_id: EventId::from("old:0"),
                asset: Address::with_last_byte(2),
                claimed_wh: U256::from(10),
                block_number: 1,
            },
        );
        let mut events = ledger.subscribe_events(exchange, VALIDATION_REQUESTED, None).await.unwrap();
        let next = tokio::time::timeout(std::time::Duration::from_millis(20), events.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_receipt_lookup_failures() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next_receipts(1);
        assert!(matches!(ledger.get_receipt(TxHash::ZERO).await, Err(LedgerError::Rpc(_))));
        assert!(ledger.get_receipt(TxHash::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_failures() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next_sends(1);
        let deployer = ledger.accounts().await.unwrap()[0];
        let bytecode = InMemoryLedger::artifact(DEVICE_REGISTRY).bytecode;
        assert!(ledger.deploy(deployer, bytecode.clone(), 1).await.is_err());
        assert!(ledger.deploy(deployer, bytecode, 1).await.is_ok());
        assert_eq!(ledger.total_transactions(), 1);
    }
}
