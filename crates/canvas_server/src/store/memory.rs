//! In-memory [`CanvasStore`] with an optional journal.

use super::journal::{Journal, JournalEntry};
use super::{CanvasStore, Commit, HistoryQuery, PlacementRequest};
use crate::error::{StoreError, StoreResult};
use crate::types::{Balance, Coordinate, Identity, Placement, Seq};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug)]
struct Account {
    identity: Identity,
    balance: Balance,
}

/// What a mutation decided after looking at the current state.
enum Plan<T> {
    /// Nothing to write; answer with `T`.
    Read(T),
    /// Make the entry durable, then answer with `T`.
    Write(JournalEntry, T),
}

#[derive(Debug)]
struct Inner {
    accounts: HashMap<String, Account>,
    /// Sorted by `seq`.
    placements: Vec<Placement>,
    next_seq: Seq,
    journal: Option<Journal>,
}

impl Inner {
    fn empty(journal: Option<Journal>) -> Self {
        Self {
            accounts: HashMap::new(),
            placements: Vec::new(),
            next_seq: 1,
            journal,
        }
    }

    fn account(&self, key: &str) -> Result<&Account, String> {
        self.accounts
            .get(key)
            .ok_or_else(|| format!("unknown account {key}"))
    }

    /// Checks that `entry` applies cleanly. Callers have already checked the
    /// floor; this guards journal replay and the arithmetic.
    fn validate(&self, entry: &JournalEntry) -> Result<(), String> {
        match entry {
            JournalEntry::Account { .. } => {}
            JournalEntry::Credit { keys, delta } => {
                for key in keys {
                    self.account(key)?
                        .balance
                        .checked_add(*delta)
                        .ok_or_else(|| format!("balance of {key} out of range"))?;
                }
            }
            JournalEntry::Placement { placement } => {
                if placement.seq < self.next_seq {
                    return Err(format!("placement #{} out of order", placement.seq));
                }
                self.account(&placement.author)?
                    .balance
                    .checked_sub(1)
                    .ok_or_else(|| format!("balance of {} out of range", placement.author))?;
            }
        }
        Ok(())
    }

    /// Applies an entry that passed [`validate`](Self::validate).
    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Account { identity, balance } => {
                self.accounts
                    .insert(identity.email.clone(), Account { identity, balance });
            }
            JournalEntry::Credit { keys, delta } => {
                for key in keys {
                    if let Some(account) = self.accounts.get_mut(&key) {
                        account.balance = account.balance.saturating_add(delta);
                    }
                }
            }
            JournalEntry::Placement { placement } => {
                if let Some(account) = self.accounts.get_mut(&placement.author) {
                    account.balance = account.balance.saturating_sub(1);
                }
                self.next_seq = placement.seq + 1;
                self.placements.push(placement);
            }
        }
    }

    /// Executes `plan` and answers through `reply`.
    ///
    /// The answer goes out after the entry is durable and before it is
    /// applied. If nobody is listening any more the entry is rewound, so the
    /// caller's view and the store never disagree.
    async fn run<T, F>(&mut self, plan: F, reply: oneshot::Sender<StoreResult<T>>)
    where
        F: FnOnce(&Inner) -> StoreResult<Plan<T>>,
    {
        let (entry, value) = match plan(&*self) {
            Ok(Plan::Read(value)) => {
                let _ = reply.send(Ok(value));
                return;
            }
            Ok(Plan::Write(entry, value)) => (entry, value),
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        if let Err(reason) = self.validate(&entry) {
            error!("Refusing inconsistent transaction: {}", reason);
            let _ = reply.send(Err(StoreError::Corrupt { line: 0, reason }));
            return;
        }

        let mark = match self.journal.as_mut() {
            Some(journal) => match journal.append(&entry).await {
                Ok(mark) => Some(mark),
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return;
                }
            },
            None => None,
        };

        if reply.send(Ok(value)).is_err() {
            warn!("Transaction abandoned by its caller, rewinding");
            if let (Some(journal), Some(mark)) = (self.journal.as_mut(), mark) {
                // Failure poisons the journal and is logged there.
                let _ = journal.rewind(mark).await;
            }
            return;
        }
        self.apply(entry);
    }
}

/// Ledger and placement log held in memory.
///
/// All mutations go through one async mutex, which is what makes the
/// debit-and-append of [`CanvasStore::commit_placement`] atomic and keeps two
/// placements from the same identity from overspending. Each mutation runs
/// on its own task, so a caller that times out or is cancelled cannot leave
/// the journal ahead of memory.
#[derive(Debug)]
pub struct MemoryStore {
    starting_balance: Balance,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// A volatile store; everything is lost when the process exits.
    pub fn new(starting_balance: Balance) -> Self {
        Self {
            starting_balance,
            inner: Arc::new(Mutex::new(Inner::empty(None))),
        }
    }

    /// Opens a journaled store, replaying everything already on disk.
    pub async fn open(path: &Path, starting_balance: Balance) -> StoreResult<Self> {
        let (journal, entries) = Journal::open(path).await?;
        let mut inner = Inner::empty(Some(journal));
        for (line, entry) in entries {
            inner
                .validate(&entry)
                .map_err(|reason| StoreError::Corrupt { line, reason })?;
            inner.apply(entry);
        }
        info!(
            "Replayed journal: {} accounts, {} placements",
            inner.accounts.len(),
            inner.placements.len()
        );
        Ok(Self {
            starting_balance,
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Runs one mutation to completion on a task of its own.
    ///
    /// With a `deadline`, the caller stops waiting at that instant and gets
    /// `Timeout`; the transaction then has no effect.
    async fn transact<T, F>(&self, deadline: Option<Instant>, plan: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> StoreResult<Plan<T>> + Send + 'static,
    {
        let (reply, outcome) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut inner = inner.lock_owned().await;
            if reply.is_closed() {
                debug!("Transaction abandoned before it started");
                return;
            }
            inner.run(plan, reply).await;
        });

        let outcome = match deadline {
            Some(deadline) => timeout_at(deadline, outcome)
                .await
                .map_err(|_| StoreError::Timeout)?,
            None => outcome.await,
        };
        outcome.map_err(|_| StoreError::Aborted)?
    }
}

#[async_trait]
impl CanvasStore for MemoryStore {
    #[instrument(skip(self, identity), fields(account = %identity.email))]
    async fn ensure_account(&self, identity: &Identity) -> StoreResult<Balance> {
        let identity = identity.clone();
        let starting_balance = self.starting_balance;
        self.transact(None, move |inner| {
            Ok(match inner.accounts.get(identity.key()) {
                Some(account) => Plan::Read(account.balance),
                None => {
                    info!("Creating account {} with balance {}", identity.email, starting_balance);
                    Plan::Write(
                        JournalEntry::Account {
                            identity,
                            balance: starting_balance,
                        },
                        starting_balance,
                    )
                }
            })
        })
        .await
    }

    async fn balance(&self, key: &str) -> StoreResult<Balance> {
        self.inner
            .lock()
            .await
            .accounts
            .get(key)
            .map(|account| account.balance)
            .ok_or_else(|| StoreError::AccountNotFound(key.to_string()))
    }

    #[instrument(skip(self))]
    async fn credit(&self, key: &str, delta: Balance) -> StoreResult<Balance> {
        let key = key.to_string();
        self.transact(None, move |inner| {
            let account = inner
                .accounts
                .get(&key)
                .ok_or_else(|| StoreError::AccountNotFound(key.clone()))?;
            let balance = account
                .balance
                .checked_add(delta)
                .ok_or(StoreError::Overflow)?;
            if balance < 0 {
                return Err(StoreError::InsufficientBalance);
            }
            Ok(Plan::Write(
                JournalEntry::Credit {
                    keys: vec![key],
                    delta,
                },
                balance,
            ))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn credit_by_name(&self, name: &str, delta: Balance) -> StoreResult<usize> {
        let name = name.to_string();
        self.transact(None, move |inner| {
            let mut keys = Vec::new();
            for account in inner.accounts.values().filter(|a| a.identity.name == name) {
                let balance = account
                    .balance
                    .checked_add(delta)
                    .ok_or(StoreError::Overflow)?;
                if balance < 0 {
                    return Err(StoreError::InsufficientBalance);
                }
                keys.push(account.identity.email.clone());
            }
            if keys.is_empty() {
                return Ok(Plan::Read(0));
            }
            let updated = keys.len();
            Ok(Plan::Write(JournalEntry::Credit { keys, delta }, updated))
        })
        .await
    }

    #[instrument(skip(self, request), fields(author = %request.author, coordinate = %request.coordinate))]
    async fn commit_placement(
        &self,
        request: PlacementRequest,
        deadline: Instant,
    ) -> StoreResult<Commit> {
        self.transact(Some(deadline), move |inner| {
            let balance = inner
                .accounts
                .get(&request.author)
                .map(|account| account.balance)
                .ok_or_else(|| StoreError::AccountNotFound(request.author.clone()))?;
            if balance < 1 {
                debug!("Rejected placement, balance exhausted");
                return Err(StoreError::InsufficientBalance);
            }

            let placement = Placement {
                seq: inner.next_seq,
                coordinate: request.coordinate,
                color: request.color,
                author: request.author,
                created_at: Utc::now(),
            };
            Ok(Plan::Write(
                JournalEntry::Placement {
                    placement: placement.clone(),
                },
                Commit {
                    placement,
                    balance: balance - 1,
                },
            ))
        })
        .await
    }

    async fn latest_per_coordinate(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Placement>> {
        let inner = self.inner.lock().await;
        let mut latest: HashMap<Coordinate, &Placement> = HashMap::new();
        for placement in inner
            .placements
            .iter()
            .filter(|p| since.map_or(true, |since| p.created_at >= since))
        {
            // Placements are in seq order, so later entries win.
            latest.insert(placement.coordinate, placement);
        }
        let mut result: Vec<Placement> = latest.into_values().cloned().collect();
        result.sort_by_key(|p| p.seq);
        Ok(result)
    }

    async fn history(&self, query: HistoryQuery) -> StoreResult<Vec<Placement>> {
        let inner = self.inner.lock().await;
        let start = query
            .after
            .map_or(0, |after| inner.placements.partition_point(|p| p.seq <= after));
        Ok(inner.placements[start..]
            .iter()
            .filter(|p| query.since.map_or(true, |since| p.created_at >= since))
            .take(query.limit)
            .cloned()
            .collect())
    }
}
