//! Core result types exchanged between shards and the coordinator.
//!
//! A shard answers every query round with one [`ShardQueryResult`]. The
//! envelope carries exactly one payload: a flat [`RankedResultSet`] or a
//! [`GroupedResultSet`](crate::group::GroupedResultSet). Result values are
//! never edited after a shard produces them; merges build new structures.

use crate::group::GroupedResultSet;
use crate::sort::{SortKey, SortValue};
use serde::{Deserialize, Serialize};

/// Shard-local document number.
pub type DocId = u32;

/// Unique identifier for a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ShardId(pub u32);

impl ShardId {
    /// Create a new shard identifier.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the underlying shard number.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Which query shape a shard ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultPhase {
    /// Ungrouped top-K search.
    Plain,
    /// First grouped round: top groups with one representative hit each.
    Groups,
    /// Second grouped round: full hits for the accepted groups.
    Hits,
}

impl std::fmt::Display for ResultPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultPhase::Plain => write!(f, "plain"),
            ResultPhase::Groups => write!(f, "groups"),
            ResultPhase::Hits => write!(f, "hits"),
        }
    }
}

/// One matching document as ranked by its shard.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub doc_id: DocId,
    pub score: f32,
    /// Per-field sort values; `None` for plain relevance order.
    pub sort_values: Option<Vec<SortValue>>,
}

impl RankedHit {
    pub fn new(doc_id: DocId, score: f32) -> Self {
        Self {
            doc_id,
            score,
            sort_values: None,
        }
    }

    pub fn with_sort_values(mut self, values: Vec<SortValue>) -> Self {
        self.sort_values = Some(values);
        self
    }

    pub fn sort_key(&self) -> SortKey<'_> {
        SortKey {
            values: self.sort_values.as_deref(),
            score: self.score,
            doc: Some(self.doc_id),
        }
    }
}

impl PartialEq for RankedHit {
    fn eq(&self, other: &Self) -> bool {
        self.doc_id == other.doc_id
            && self.score.to_bits() == other.score.to_bits()
            && self.sort_values == other.sort_values
    }
}

/// A shard's ordered top hits plus its exact match count.
#[derive(Debug, Clone)]
pub struct RankedResultSet {
    pub total_hits: u64,
    pub max_score: f32,
    pub hits: Vec<RankedHit>,
}

impl RankedResultSet {
    pub fn new(total_hits: u64, max_score: f32, hits: Vec<RankedHit>) -> Self {
        Self {
            total_hits,
            max_score,
            hits,
        }
    }

    /// No matches and no score.
    pub fn empty() -> Self {
        Self::new(0, f32::NAN, Vec::new())
    }

    /// Result of a count-only query: totals without hits.
    pub fn count_only(total_hits: u64) -> Self {
        Self::new(total_hits, 0.0, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

impl PartialEq for RankedResultSet {
    fn eq(&self, other: &Self) -> bool {
        self.total_hits == other.total_hits
            && self.max_score.to_bits() == other.max_score.to_bits()
            && self.hits == other.hits
    }
}

/// The single result carried by a shard envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardPayload {
    Ranked(RankedResultSet),
    Grouped(GroupedResultSet),
}

impl ShardPayload {
    pub fn total_hits(&self) -> u64 {
        match self {
            ShardPayload::Ranked(r) => r.total_hits,
            ShardPayload::Grouped(g) => g.total_hit_count,
        }
    }

    pub fn max_score(&self) -> f32 {
        match self {
            ShardPayload::Ranked(r) => r.max_score,
            ShardPayload::Grouped(g) => g.max_score,
        }
    }

    pub fn is_grouped(&self) -> bool {
        matches!(self, ShardPayload::Grouped(_))
    }
}

impl From<RankedResultSet> for ShardPayload {
    fn from(set: RankedResultSet) -> Self {
        ShardPayload::Ranked(set)
    }
}

impl From<GroupedResultSet> for ShardPayload {
    fn from(set: GroupedResultSet) -> Self {
        ShardPayload::Grouped(set)
    }
}

/// Facet and suggestion payloads. Opaque to merging; passed through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxiliaryPayloads {
    pub facets: Option<Vec<u8>>,
    pub suggest: Option<Vec<u8>>,
}

impl AuxiliaryPayloads {
    pub fn is_empty(&self) -> bool {
        self.facets.is_none() && self.suggest.is_none()
    }
}

/// Everything one shard returns for one query round.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardQueryResult {
    pub shard_id: ShardId,
    /// Search context opened on the shard for this round.
    pub context_id: u64,
    pub from: u32,
    pub size: u32,
    pub group_from: u32,
    pub group_size: u32,
    pub phase: ResultPhase,
    pub payload: ShardPayload,
    pub aux: AuxiliaryPayloads,
    /// The local search stopped early because of its time budget.
    pub timed_out: bool,
}

impl ShardQueryResult {
    pub fn ranked(&self) -> Option<&RankedResultSet> {
        match &self.payload {
            ShardPayload::Ranked(r) => Some(r),
            ShardPayload::Grouped(_) => None,
        }
    }

    pub fn grouped(&self) -> Option<&GroupedResultSet> {
        match &self.payload {
            ShardPayload::Grouped(g) => Some(g),
            ShardPayload::Ranked(_) => None,
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.payload.total_hits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_id_display() {
        assert_eq!(ShardId::new(3).to_string(), "shard-3");
        assert_eq!(ShardId::new(3).as_u32(), 3);
    }

    #[test]
    fn test_count_only_has_zero_max_score() {
        let set = RankedResultSet::count_only(42);
        assert_eq!(set.total_hits, 42);
        assert_eq!(set.max_score, 0.0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_empty_sets_compare_equal_despite_nan() {
        assert_eq!(RankedResultSet::empty(), RankedResultSet::empty());
    }

    #[test]
    fn test_payload_accessors() {
        let result = ShardQueryResult {
            shard_id: ShardId::new(0),
            context_id: 7,
            from: 0,
            size: 10,
            group_from: 0,
            group_size: 0,
            phase: ResultPhase::Plain,
            payload: RankedResultSet::new(1, 0.5, vec![RankedHit::new(4, 0.5)]).into(),
            aux: AuxiliaryPayloads::default(),
            timed_out: false,
        };
        assert!(result.ranked().is_some());
        assert!(result.grouped().is_none());
        assert_eq!(result.total_hits(), 1);
        assert!(result.aux.is_empty());
    }
}
