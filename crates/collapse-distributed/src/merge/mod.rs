//! Cross-shard merging.
//!
//! Both merges are k-way merges over inputs each shard already sorted. A
//! binary heap holds the head of every shard stream; ties on the sort
//! criteria fall back to relevance score, then shard id, then the
//! shard-local doc id, so repeated merges of the same inputs are identical.
//! Each stream is validated with the same comparator the heap uses.

mod grouped;
mod ranked;

pub use grouped::{merge_grouped, GroupCountMode, GroupMergeParams, MergedGroup, MergedGroups};
pub use ranked::{merge_hit_streams, merge_ranked, MergedHits, ShardedHit};

use crate::error::MergeError;
use collapse_core::group::GroupedResultSet;
use collapse_core::types::{DocId, RankedResultSet, ResultPhase, ShardId, ShardQueryResult};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Head<'a, T, F> {
    item: &'a T,
    shard: ShardId,
    local: Option<DocId>,
    stream: usize,
    position: usize,
    cmp: &'a F,
}

impl<T, F: Fn(&T, &T) -> Ordering> Head<'_, T, F> {
    fn order(&self, other: &Self) -> Ordering {
        (self.cmp)(self.item, other.item)
            .then(self.shard.cmp(&other.shard))
            .then(self.local.cmp(&other.local))
            .then(self.position.cmp(&other.position))
    }
}

impl<T, F: Fn(&T, &T) -> Ordering> PartialEq for Head<'_, T, F> {
    fn eq(&self, other: &Self) -> bool {
        self.order(other) == Ordering::Equal
    }
}

impl<T, F: Fn(&T, &T) -> Ordering> Eq for Head<'_, T, F> {}

impl<T, F: Fn(&T, &T) -> Ordering> PartialOrd for Head<'_, T, F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, F: Fn(&T, &T) -> Ordering> Ord for Head<'_, T, F> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; the smallest head must pop first.
        self.order(other).reverse()
    }
}

/// Lazily merges sorted per-shard streams into one ordered stream.
pub(crate) struct KWayMerge<'a, T, F> {
    streams: Vec<(ShardId, &'a [T])>,
    heap: BinaryHeap<Head<'a, T, F>>,
    cmp: &'a F,
    local: fn(&T) -> Option<DocId>,
}

impl<'a, T, F: Fn(&T, &T) -> Ordering> KWayMerge<'a, T, F> {
    /// `local` gives the shard-local doc id used as the last tie-break.
    pub(crate) fn new(
        streams: Vec<(ShardId, &'a [T])>,
        cmp: &'a F,
        local: fn(&T) -> Option<DocId>,
    ) -> Self {
        let mut heap = BinaryHeap::with_capacity(streams.len());
        for (stream, (shard, items)) in streams.iter().enumerate() {
            if let Some(item) = items.first() {
                heap.push(Head {
                    item,
                    shard: *shard,
                    local: local(item),
                    stream,
                    position: 0,
                    cmp,
                });
            }
        }
        Self {
            streams,
            heap,
            cmp,
            local,
        }
    }
}

impl<'a, T, F: Fn(&T, &T) -> Ordering> Iterator for KWayMerge<'a, T, F> {
    type Item = (ShardId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let head = self.heap.pop()?;
        let (shard, items) = self.streams[head.stream];
        let next = head.position + 1;
        if let Some(item) = items.get(next) {
            self.heap.push(Head {
                item,
                shard,
                local: (self.local)(item),
                stream: head.stream,
                position: next,
                cmp: self.cmp,
            });
        }
        Some((head.shard, head.item))
    }
}

/// Checks that a shard stream is non-decreasing under `cmp`.
pub(crate) fn check_sorted<T>(
    shard: ShardId,
    items: &[T],
    what: &str,
    cmp: &impl Fn(&T, &T) -> Ordering,
) -> Result<(), MergeError> {
    for (position, pair) in items.windows(2).enumerate() {
        if cmp(&pair[0], &pair[1]) == Ordering::Greater {
            return Err(MergeError::violation(
                shard,
                position + 1,
                format!("{} not sorted by the requested order", what),
            ));
        }
    }
    Ok(())
}

/// The ranked payload of every result, or an error if any is grouped.
pub fn ranked_inputs<'a>(
    results: &[&'a ShardQueryResult],
) -> Result<Vec<(ShardId, &'a RankedResultSet)>, MergeError> {
    results
        .iter()
        .map(|r| {
            r.ranked()
                .map(|set| (r.shard_id, set))
                .ok_or_else(|| MergeError::violation(r.shard_id, 0, "expected a ranked result"))
        })
        .collect()
}

/// The grouped payload of every result, all from the same phase.
pub fn grouped_inputs<'a>(
    results: &[&'a ShardQueryResult],
    phase: ResultPhase,
) -> Result<Vec<(ShardId, &'a GroupedResultSet)>, MergeError> {
    results
        .iter()
        .map(|r| match r.grouped() {
            Some(set) if r.phase == phase => Ok((r.shard_id, set)),
            Some(_) => Err(MergeError::violation(
                r.shard_id,
                0,
                format!("expected a {} phase result, found {}", phase, r.phase),
            )),
            None => Err(MergeError::violation(r.shard_id, 0, "expected a grouped result")),
        })
        .collect()
}

fn max_score(scores: impl Iterator<Item = f32>) -> f32 {
    scores.filter(|s| !s.is_nan()).fold(f32::NAN, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kway_merges_sorted_streams() {
        let a = [1, 4, 9];
        let b = [2, 3, 10];
        let c: [i32; 0] = [];
        let cmp = |x: &i32, y: &i32| x.cmp(y);
        let merged: Vec<i32> = KWayMerge::new(
            vec![(ShardId::new(0), &a[..]), (ShardId::new(1), &b[..]), (ShardId::new(2), &c[..])],
            &cmp,
            |_| None,
        )
        .map(|(_, v)| *v)
        .collect();
        assert_eq!(merged, vec![1, 2, 3, 4, 9, 10]);
    }

    #[test]
    fn test_kway_ties_break_on_shard() {
        let a = [5];
        let b = [5];
        let cmp = |x: &i32, y: &i32| x.cmp(y);
        let shards: Vec<ShardId> = KWayMerge::new(
            vec![(ShardId::new(3), &a[..]), (ShardId::new(1), &b[..])],
            &cmp,
            |_| None,
        )
        .map(|(s, _)| s)
        .collect();
        assert_eq!(shards, vec![ShardId::new(1), ShardId::new(3)]);
    }

    #[test]
    fn test_check_sorted_reports_position() {
        let err = check_sorted(ShardId::new(2), &[1, 3, 2], "hits", &|a: &i32, b: &i32| a.cmp(b))
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::InvariantViolation {
                shard: ShardId::new(2),
                position: 2,
                detail: "hits not sorted by the requested order".to_string(),
            }
        );
    }

    #[test]
    fn test_kway_equal_heads_break_on_local_doc_id() {
        let a = [(9u32, 5)];
        let b = [(1u32, 5)];
        let cmp = |x: &(u32, i32), y: &(u32, i32)| x.1.cmp(&y.1);
        let docs: Vec<u32> = KWayMerge::new(
            vec![(ShardId::new(0), &a[..]), (ShardId::new(0), &b[..])],
            &cmp,
            |item| Some(item.0),
        )
        .map(|(_, item)| item.0)
        .collect();
        assert_eq!(docs, vec![1, 9]);
    }
}
