//! In-memory node universe keyed by fingerprint.
//!
//! All mutation goes through one `RwLock`: upserts, evictions and probe
//! applications are serialized, while readers proceed concurrently and always
//! receive owned clones, never a partially-written node.
//!
//! Eviction is a recency policy on `last_checked`, not LRU-on-read: exports and
//! lookups never change which node leaves first.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::dedupe::{merge_cosmetic, Fingerprint};
use crate::node::{Health, Node};
use crate::probe::ProbeResult;
use crate::score;

/// What an upsert did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// New fingerprint; `evicted` holds the node removed to make room, if any.
    Inserted { evicted: Option<Box<Node>> },
    /// Known fingerprint; cosmetic fields refreshed, measurements kept.
    Updated,
}

#[derive(Debug)]
struct Slot {
    node: Node,
    /// Insertion order, used as the eviction tie-breaker.
    seq: u64,
}

/// Eviction rank: `last_checked` (never-checked first), then insertion order.
type Rank = (Option<DateTime<Utc>>, u64, String);

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    /// One entry per slot, ordered by eviction rank.
    order: BTreeSet<Rank>,
    next_seq: u64,
}

impl Inner {
    fn insert(&mut self, key: String, node: Node) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert((node.last_checked, seq, key.clone()));
        self.slots.insert(key, Slot { node, seq });
    }

    /// Remove the lowest-ranked node.
    fn evict(&mut self) -> Option<Node> {
        let (_, _, key) = self.order.pop_first()?;
        self.slots.remove(&key).map(|slot| slot.node)
    }

    fn record(&mut self, key: &str, result: &ProbeResult, checked_at: DateTime<Utc>) -> bool {
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        self.order
            .remove(&(slot.node.last_checked, slot.seq, key.to_string()));
        record_probe(&mut slot.node, result, checked_at);
        self.order
            .insert((slot.node.last_checked, slot.seq, key.to_string()));
        true
    }
}

/// Capacity-bounded, fingerprint-keyed node store.
#[derive(Debug)]
pub struct NodeStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl NodeStore {
    /// `capacity` must be non-zero; `EngineConfig::validate` enforces it.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a new node or refresh the cosmetic fields of a known one.
    ///
    /// A new node that would exceed capacity first evicts the least recently
    /// checked entry.
    pub fn upsert(&self, node: Node) -> UpsertOutcome {
        let key = node.fingerprint().key();
        let mut inner = self.inner.write();

        if let Some(slot) = inner.slots.get_mut(&key) {
            merge_cosmetic(&mut slot.node, node);
            return UpsertOutcome::Updated;
        }

        let mut evicted = None;
        if inner.slots.len() >= self.capacity {
            if let Some(victim) = inner.evict() {
                tracing::info!(
                    "store at capacity ({}), evicting {} (last checked: {})",
                    self.capacity,
                    victim.fingerprint(),
                    victim
                        .last_checked
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".into()),
                );
                evicted = Some(Box::new(victim));
            }
        }

        inner.insert(key, node);
        UpsertOutcome::Inserted { evicted }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Node> {
        self.get_by_key(&fingerprint.key())
    }

    /// Look up by the hex key from [`Fingerprint::key`].
    pub fn get_by_key(&self, key: &str) -> Option<Node> {
        self.inner.read().slots.get(key).map(|slot| slot.node.clone())
    }

    /// Consistent snapshot of every node, in insertion order.
    pub fn all(&self) -> Vec<Node> {
        let inner = self.inner.read();
        let mut slots: Vec<&Slot> = inner.slots.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.node.clone()).collect()
    }

    /// Record a probe outcome and recompute the node's score.
    ///
    /// Returns `false` if the node has left the store since the probe started.
    pub fn apply(&self, result: &ProbeResult, checked_at: DateTime<Utc>) -> bool {
        let key = result.fingerprint.key();
        self.inner.write().record(&key, result, checked_at)
    }
}

/// Write a probe outcome into `node` and rescore it.
pub fn record_probe(node: &mut Node, result: &ProbeResult, checked_at: DateTime<Utc>) {
    node.last_checked = Some(checked_at);
    if result.success {
        node.healthy = Health::Healthy;
        node.latency_ms = result.latency_ms;
    } else {
        node.healthy = Health::Unhealthy;
        node.latency_ms = None;
    }
    node.score = score::score(node);
}
