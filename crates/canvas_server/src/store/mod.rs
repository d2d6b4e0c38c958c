//! Ledger and placement persistence.
//!
//! The [`CanvasStore`] trait is the seam between the live engine and durable
//! storage. It combines the user ledger (identity → balance) with the
//! append-only placement log because a placement is only valid together with
//! its debit: [`CanvasStore::commit_placement`] must perform both in one
//! transaction or neither.
//!
//! [`MemoryStore`] is the bundled implementation. It keeps all state in
//! memory and can be backed by a JSON-lines journal for durability.

mod journal;
mod memory;

pub use memory::MemoryStore;

use crate::error::StoreResult;
use crate::types::{Balance, Color, Coordinate, Identity, Placement, Seq};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// A validated request to debit one pixel and record a placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRequest {
    /// Ledger key of the author (the identity's email)
    pub author: String,
    pub coordinate: Coordinate,
    pub color: Color,
}

/// Result of a committed placement transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub placement: Placement,
    /// Author balance after the debit
    pub balance: Balance,
}

/// Filter for paging through placement history in commit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only placements created at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only placements with a sequence strictly greater than this cursor
    pub after: Option<Seq>,
    /// Maximum number of placements to return
    pub limit: usize,
}

/// Transactional ledger + placement store.
#[async_trait]
pub trait CanvasStore: Send + Sync + 'static {
    /// Returns the balance of `identity`, creating the account if it does not exist yet.
    async fn ensure_account(&self, identity: &Identity) -> StoreResult<Balance>;

    /// Current balance of the account keyed by `key`.
    async fn balance(&self, key: &str) -> StoreResult<Balance>;

    /// Atomically adds `delta` to one account. Fails without effect if the
    /// result would be negative or out of range.
    async fn credit(&self, key: &str, delta: Balance) -> StoreResult<Balance>;

    /// Atomically adds `delta` to every account whose display name is `name`.
    /// Returns how many accounts were updated.
    async fn credit_by_name(&self, name: &str, delta: Balance) -> StoreResult<usize>;

    /// Debits one pixel from the author and appends the placement, atomically.
    ///
    /// Fails with `InsufficientBalance` (and no effect at all) if the debit
    /// would leave a negative balance, and with `Timeout` if the transaction,
    /// durable write included, does not finish before `deadline`. A timed-out
    /// transaction has no effect either.
    async fn commit_placement(
        &self,
        request: PlacementRequest,
        deadline: Instant,
    ) -> StoreResult<Commit>;

    /// The most recent placement of every coordinate, optionally restricted to
    /// placements created at or after `since`.
    async fn latest_per_coordinate(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Placement>>;

    /// Placements in commit order matching `query`.
    async fn history(&self, query: HistoryQuery) -> StoreResult<Vec<Placement>>;
}
