//! Idempotency journal: eventId → claim outcome, optionally persisted.
//!
//! The journal is the pipeline's only shared mutable state. Inserting an
//! event is atomic, so two deliveries of the same event cannot both be
//! accepted for processing.

use alloy::primitives::{TxHash, U256};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{GridError, GridResult};
use crate::ledger::types::{EventId, ValidationEvent};
use crate::pipeline::types::{now_secs, ClaimRecord, ClaimState};

/// Claim counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JournalSummary {
    pub observed: usize,
    pub validating: usize,
    pub approved: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Thread-safe record of every claim seen.
#[derive(Clone, Default)]
pub struct ClaimJournal {
    inner: Arc<DashMap<EventId, ClaimRecord>>,
    persistence_path: Option<PathBuf>,
    /// Serializes file writes so the newest snapshot lands last.
    write_lock: Arc<Mutex<()>>,
}

impl ClaimJournal {
    /// Create a new empty journal.
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            persistence_path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open the journal at `path`, loading it if the file exists.
    pub fn open(path: Option<&Path>) -> GridResult<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::new(None)),
        }
    }

    /// Load from file if exists.
    pub fn load_from_file(path: &Path) -> GridResult<Self> {
        let journal = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let file = File::open(path)
                .map_err(|e| GridError::Journal(format!("cannot open {}: {}", path.display(), e)))?;
            let records: BTreeMap<EventId, ClaimRecord> =
                serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                    GridError::Journal(format!("cannot parse {}: {}", path.display(), e))
                })?;
            for (id, record) in records {
                journal.inner.insert(id, record);
            }
            tracing::info!(path = %path.display(), claims = journal.inner.len(), "Loaded claim journal");
        }
        Ok(journal)
    }

    /// Write the journal to its file, replacing the previous one atomically.
    pub fn save(&self) -> GridResult<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot: BTreeMap<EventId, ClaimRecord> = self
            .inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let tmp = path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            std::fs::rename(&tmp, path)
        };
        write().map_err(|e| GridError::Journal(format!("cannot write {}: {}", path.display(), e)))
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            tracing::error!(error = %e, "Claim journal not persisted");
        }
    }

    /// Record `event` as observed. Returns false if its id was already known.
    pub fn try_observe(&self, event: &ValidationEvent) -> bool {
        let inserted = match self.inner.entry(event.event_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ClaimRecord::observed(event.clone()));
                true
            }
        };
        if inserted {
            self.persist();
        }
        inserted
    }

    /// Move a claim to `state`, recording `reason` when given.
    pub fn transition(&self, event_id: &EventId, state: ClaimState, reason: Option<String>) {
        let updated = match self.inner.get_mut(event_id) {
            Some(mut record) => {
                record.state = state;
                if state == ClaimState::Validating {
                    record.attempts += 1;
                }
                if reason.is_some() {
                    record.reason = reason;
                }
                record.updated_at = now_secs();
                true
            }
            None => false,
        };
        if updated {
            self.persist();
        } else {
            tracing::warn!(event_id = %event_id, state = state.as_str(), "Transition for unknown claim");
        }
    }

    /// Remember the transaction sent for a claim.
    pub fn record_submission(&self, event_id: &EventId, tx_hash: TxHash) {
        if let Some(mut record) = self.inner.get_mut(event_id) {
            record.tx_hash = Some(tx_hash);
            record.updated_at = now_secs();
        }
        self.persist();
    }

    pub fn get(&self, event_id: &EventId) -> Option<ClaimRecord> {
        self.inner.get(event_id).map(|r| r.value().clone())
    }

    /// Claims in `state`, oldest event first.
    pub fn in_state(&self, state: ClaimState) -> Vec<ClaimRecord> {
        let mut records: Vec<ClaimRecord> = self
            .inner
            .iter()
            .filter(|r| r.value().state == state)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| {
            (a.event.block_number, &a.event.event_id).cmp(&(b.event.block_number, &b.event.event_id))
        });
        records
    }

    /// Claims not yet in a terminal state.
    pub fn unfinished(&self) -> Vec<ClaimRecord> {
        let mut records = self.in_state(ClaimState::Observed);
        records.extend(self.in_state(ClaimState::Validating));
        records
    }

    /// Block to resume the event subscription from after a restart.
    ///
    /// Events are observed in block order, so every block below the highest
    /// journaled one was fully seen. That block itself may have been cut
    /// short and is scanned again; redelivered events are deduplicated.
    pub fn resume_block(&self) -> Option<u64> {
        self.inner.iter().map(|r| r.value().event.block_number).max()
    }

    /// Energy already spoken for on `asset` ahead of `event`: every approved
    /// claim, plus claims still validating that were emitted earlier.
    pub fn committed_wh(&self, event: &ValidationEvent) -> U256 {
        let position = (event.block_number, &event.event_id);
        self.inner
            .iter()
            .filter(|r| r.key() != &event.event_id && r.value().event.asset == event.asset)
            .filter(|r| match r.value().state {
                ClaimState::Approved => true,
                ClaimState::Validating => {
                    (r.value().event.block_number, &r.value().event.event_id) < position
                }
                _ => false,
            })
            .fold(U256::ZERO, |total, r| total.saturating_add(r.value().event.claimed_wh))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn summary(&self) -> JournalSummary {
        let mut summary = JournalSummary::default();
        for r in self.inner.iter() {
            match r.value().state {
                ClaimState::Observed => summary.observed += 1,
                ClaimState::Validating => summary.validating += 1,
                ClaimState::Approved => summary.approved += 1,
                ClaimState::Rejected => summary.rejected += 1,
                ClaimState::Failed => summary.failed += 1,
            }
        }
        summary
    }
}
