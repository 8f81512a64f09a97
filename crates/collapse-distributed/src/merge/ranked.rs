use super::{check_sorted, max_score, KWayMerge};
use crate::error::MergeError;
use collapse_core::sort::{compare_keys, SortSpec, SortValue};
use collapse_core::types::{DocId, RankedHit, RankedResultSet, ShardId};

/// A hit tagged with the shard that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardedHit {
    pub shard_id: ShardId,
    pub doc_id: DocId,
    pub score: f32,
    pub sort_values: Option<Vec<SortValue>>,
}

impl ShardedHit {
    fn new(shard_id: ShardId, hit: &RankedHit) -> Self {
        Self {
            shard_id,
            doc_id: hit.doc_id,
            score: hit.score,
            sort_values: hit.sort_values.clone(),
        }
    }
}

/// Global page of hits plus exact totals.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedHits {
    pub total_hits: u64,
    pub max_score: f32,
    pub hits: Vec<ShardedHit>,
}

/// Merge sorted hit streams and return the hits ranked
/// `offset..offset + limit`.
pub fn merge_hit_streams(
    streams: Vec<(ShardId, &[RankedHit])>,
    sort: &SortSpec,
    limit: usize,
    offset: usize,
) -> Result<Vec<ShardedHit>, MergeError> {
    let cmp = |a: &RankedHit, b: &RankedHit| compare_keys(sort, &a.sort_key(), &b.sort_key());
    for (shard, hits) in &streams {
        check_sorted(*shard, hits, "hits", &cmp)?;
    }
    Ok(KWayMerge::new(streams, &cmp, |hit| Some(hit.doc_id))
        .skip(offset)
        .take(limit)
        .map(|(shard, hit)| ShardedHit::new(shard, hit))
        .collect())
}

/// Merge per-shard ranked results into the global page.
///
/// `total_hits` sums every shard's exact total; `max_score` is the best
/// shard max score, or NaN if no shard reported one.
pub fn merge_ranked(
    results: &[(ShardId, &RankedResultSet)],
    sort: &SortSpec,
    limit: usize,
    offset: usize,
) -> Result<MergedHits, MergeError> {
    let streams = results
        .iter()
        .map(|(shard, set)| (*shard, set.hits.as_slice()))
        .collect();
    let hits = merge_hit_streams(streams, sort, limit, offset)?;
    Ok(MergedHits {
        total_hits: results.iter().map(|(_, set)| set.total_hits).sum(),
        max_score: max_score(results.iter().map(|(_, set)| set.max_score)),
        hits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use collapse_core::sort::{SortField, SortFieldKind};

    fn docs(merged: &MergedHits) -> Vec<(DocId, f32)> {
        merged.hits.iter().map(|h| (h.doc_id, h.score)).collect()
    }

    #[test]
    fn test_two_shard_relevance_merge() {
        let a = RankedResultSet::new(
            2,
            0.9,
            vec![RankedHit::new(1, 0.9), RankedHit::new(2, 0.5)],
        );
        let b = RankedResultSet::new(1, 0.7, vec![RankedHit::new(3, 0.7)]);
        let merged = merge_ranked(
            &[(ShardId::new(0), &a), (ShardId::new(1), &b)],
            &SortSpec::relevance(),
            2,
            0,
        )
        .unwrap();
        assert_eq!(docs(&merged), vec![(1, 0.9), (3, 0.7)]);
        assert_eq!(merged.total_hits, 3);
        assert_eq!(merged.max_score, 0.9);
    }

    #[test]
    fn test_offset_drops_leading_hits() {
        let a = RankedResultSet::new(
            2,
            0.9,
            vec![RankedHit::new(1, 0.9), RankedHit::new(2, 0.5)],
        );
        let b = RankedResultSet::new(1, 0.7, vec![RankedHit::new(3, 0.7)]);
        let merged = merge_ranked(
            &[(ShardId::new(0), &a), (ShardId::new(1), &b)],
            &SortSpec::relevance(),
            5,
            1,
        )
        .unwrap();
        assert_eq!(docs(&merged), vec![(3, 0.7), (2, 0.5)]);
    }

    #[test]
    fn test_zero_limit_keeps_totals() {
        let a = RankedResultSet::new(40, 0.9, vec![RankedHit::new(1, 0.9)]);
        let merged = merge_ranked(&[(ShardId::new(0), &a)], &SortSpec::relevance(), 0, 0).unwrap();
        assert!(merged.hits.is_empty());
        assert_eq!(merged.total_hits, 40);
    }

    #[test]
    fn test_no_scores_gives_nan() {
        let a = RankedResultSet::empty();
        let merged = merge_ranked(&[(ShardId::new(0), &a)], &SortSpec::relevance(), 10, 0).unwrap();
        assert!(merged.max_score.is_nan());
        let merged = merge_ranked(&[], &SortSpec::relevance(), 10, 0).unwrap();
        assert!(merged.max_score.is_nan());
        assert_eq!(merged.total_hits, 0);
    }

    #[test]
    fn test_equal_scores_break_on_shard_then_position() {
        let a = RankedResultSet::new(1, 0.5, vec![RankedHit::new(9, 0.5)]);
        let b = RankedResultSet::new(1, 0.5, vec![RankedHit::new(1, 0.5)]);
        let merged = merge_ranked(
            &[(ShardId::new(1), &b), (ShardId::new(0), &a)],
            &SortSpec::relevance(),
            2,
            0,
        )
        .unwrap();
        let shards: Vec<ShardId> = merged.hits.iter().map(|h| h.shard_id).collect();
        assert_eq!(shards, vec![ShardId::new(0), ShardId::new(1)]);
    }

    #[test]
    fn test_field_sort_merge() {
        let sort = SortSpec::new(vec![SortField::field("price", SortFieldKind::Long)]);
        let hit = |doc, price| RankedHit::new(doc, 1.0).with_sort_values(vec![SortValue::Long(price)]);
        let a = RankedResultSet::new(2, 1.0, vec![hit(1, 5), hit(2, 50)]);
        let b = RankedResultSet::new(2, 1.0, vec![hit(7, 10), hit(8, 20)]);
        let merged = merge_ranked(&[(ShardId::new(0), &a), (ShardId::new(1), &b)], &sort, 3, 0)
            .unwrap();
        assert_eq!(
            merged.hits.iter().map(|h| h.doc_id).collect::<Vec<_>>(),
            vec![1, 7, 8]
        );
    }

    #[test]
    fn test_unsorted_input_is_rejected() {
        let a = RankedResultSet::new(
            2,
            0.9,
            vec![RankedHit::new(1, 0.2), RankedHit::new(2, 0.9)],
        );
        let err = merge_ranked(&[(ShardId::new(4), &a)], &SortSpec::relevance(), 2, 0).unwrap_err();
        assert!(matches!(
            err,
            MergeError::InvariantViolation { shard, position: 1, .. } if shard == ShardId::new(4)
        ));
    }

    #[test]
    fn test_merging_global_top_k_with_itself_alone_is_identity() {
        let top = RankedResultSet::new(
            3,
            0.9,
            vec![RankedHit::new(4, 0.9), RankedHit::new(2, 0.6), RankedHit::new(7, 0.1)],
        );
        let merged = merge_ranked(&[(ShardId::new(0), &top)], &SortSpec::relevance(), 3, 0).unwrap();
        let again: Vec<RankedHit> = merged
            .hits
            .iter()
            .map(|h| RankedHit::new(h.doc_id, h.score))
            .collect();
        assert_eq!(again, top.hits);
    }

    #[test]
    fn test_tie_on_sort_field_must_follow_score_order() {
        let sort = SortSpec::new(vec![SortField::field("price", SortFieldKind::Long)]);
        let hit = |doc, score| {
            RankedHit::new(doc, score).with_sort_values(vec![SortValue::Long(5)])
        };
        let a = RankedResultSet::new(2, 0.9, vec![hit(0, 0.1), hit(1, 0.9)]);
        let b = RankedResultSet::new(1, 0.5, vec![hit(0, 0.5)]);
        let err = merge_ranked(&[(ShardId::new(0), &a), (ShardId::new(1), &b)], &sort, 1, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::InvariantViolation { shard, position: 1, .. } if shard == ShardId::new(0)
        ));

        let a = RankedResultSet::new(2, 0.9, vec![hit(1, 0.9), hit(0, 0.1)]);
        let merged = merge_ranked(&[(ShardId::new(0), &a), (ShardId::new(1), &b)], &sort, 1, 0)
            .unwrap();
        assert_eq!(docs(&merged), vec![(1, 0.9)]);
        assert_eq!(merged.hits[0].shard_id, ShardId::new(0));
    }
}
