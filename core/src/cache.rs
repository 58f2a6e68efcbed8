//! Concurrent owner → aggregate cache.
//!
//! The cache is the only mutable state shared between the HTTP handlers and the
//! background consumer. It is a sharded-lock map ([`DashMap`]), so reads of one owner
//! never wait behind work on another and no operation ever holds a lock across an
//! `.await`.
//!
//! # Race-free fills
//!
//! A plain get-miss → read store → put sequence can resurrect stale data: if an
//! invalidation for the same owner lands while the store read is in flight, the late
//! `put` would store an aggregate computed before the change. Each owner therefore
//! carries a generation counter that [`AnalyticsCache::invalidate`] bumps. The resolver
//! takes a [`FillTicket`] before reading and commits through
//! [`AnalyticsCache::put_if_fresh`], which discards the write if the generation moved.
//!
//! ```
//! use taskflow_analytics_core::cache::{Aggregate, AnalyticsCache};
//!
//! let cache = AnalyticsCache::new();
//! let ticket = cache.ticket("alice");
//! cache.invalidate("alice"); // a change event arrives mid-read
//! assert!(!cache.put_if_fresh(ticket, Aggregate::new("alice", 3, 2)));
//! assert!(cache.get("alice").is_none());
//! ```
//!
//! There is no eviction, TTL or capacity bound. Memory grows with the number of distinct
//! owners seen.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Completed / pending counts for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// The user the counts belong to
    pub owner: String,
    /// Number of completed todos
    pub completed: i64,
    /// Number of todos not yet completed
    pub pending: i64,
}

impl Aggregate {
    /// Build an aggregate, clamping negative counts to zero.
    #[must_use]
    pub fn new(owner: impl Into<String>, completed: i64, pending: i64) -> Self {
        Self {
            owner: owner.into(),
            completed: completed.max(0),
            pending: pending.max(0),
        }
    }

    /// Sum of completed and pending.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.completed.saturating_add(self.pending)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    aggregate: Option<Aggregate>,
}

/// Proof that a fill started at a given generation of an owner's entry.
///
/// Obtained from [`AnalyticsCache::ticket`] *before* the backing read and redeemed with
/// [`AnalyticsCache::put_if_fresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a ticket does nothing unless redeemed with put_if_fresh"]
pub struct FillTicket {
    owner: String,
    generation: u64,
}

impl FillTicket {
    /// The owner this ticket was issued for.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Concurrency-safe map from owner to [`Aggregate`].
#[derive(Debug, Default)]
pub struct AnalyticsCache {
    slots: DashMap<String, Slot>,
}

impl AnalyticsCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current aggregate for `owner`, if cached.
    #[must_use]
    pub fn get(&self, owner: &str) -> Option<Aggregate> {
        self.slots.get(owner).and_then(|slot| slot.aggregate.clone())
    }

    /// Unconditionally store `aggregate` under `owner`. Last writer wins.
    pub fn put(&self, owner: &str, aggregate: Aggregate) {
        self.slots.entry(owner.to_string()).or_default().aggregate = Some(aggregate);
    }

    /// Remove the entry for `owner`.
    ///
    /// Returns whether a cached value was removed. Always advances the owner's
    /// generation, so any fill in flight for this owner is rejected. Idempotent with
    /// respect to cache contents.
    pub fn invalidate(&self, owner: &str) -> bool {
        let mut slot = self.slots.entry(owner.to_string()).or_default();
        slot.generation = slot.generation.wrapping_add(1);
        let removed = slot.aggregate.take().is_some();
        drop(slot);

        tracing::trace!(owner = %owner, removed, "Cache entry invalidated");
        removed
    }

    /// Start a fill for `owner`.
    pub fn ticket(&self, owner: &str) -> FillTicket {
        let generation = self.slots.get(owner).map_or(0, |slot| slot.generation);
        FillTicket {
            owner: owner.to_string(),
            generation,
        }
    }

    /// Store `aggregate` only if no invalidation for the ticket's owner happened since
    /// the ticket was issued.
    ///
    /// Returns whether the value was stored.
    pub fn put_if_fresh(&self, ticket: FillTicket, aggregate: Aggregate) -> bool {
        let FillTicket { owner, generation } = ticket;
        let mut slot = self.slots.entry(owner).or_default();
        if slot.generation != generation {
            return false;
        }
        slot.aggregate = Some(aggregate);
        true
    }

    /// Number of owners with a cached aggregate.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.aggregate.is_some())
            .count()
    }

    /// Whether no aggregate is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
