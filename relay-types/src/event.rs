use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::tier::Tier;

/// Universal currency of the pipeline: a normalized notification of a new
/// block (or, for Solana, a new slot), common to every upstream chain.
///
/// `hash` is unique within `chain` modulo reorgs; the broadcaster guarantees
/// at most one event per `(chain, hash)` within the deduper's TTL window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub chain: Chain,
    pub hash: String,
    pub height: u64,
    /// Wall-clock time reported by the chain itself, if any.
    pub timestamp: Option<DateTime<Utc>>,
    /// When this relay instance first observed the event.
    pub detected_at: DateTime<Utc>,
    /// Symbolic id of the upstream endpoint that produced this event.
    pub source: String,
    /// Nominal SLA class this event is tagged with for diagnostics, not an
    /// access-control decision.
    pub tier_hint: Tier,
    /// Ingestion-to-broadcast latency in milliseconds, filled by the
    /// ingestion pipeline. `None` when the event was replayed from the
    /// prefetch cache rather than freshly ingested.
    pub relay_time_ms: Option<u64>,
}

impl BlockEvent {
    pub fn dedup_key(&self) -> (Chain, String) {
        (self.chain, self.hash.clone())
    }
}
