use collapse_core::sort::{SortField, SortFieldKind, SortSpec, SortValue};
use collapse_core::types::{RankedHit, RankedResultSet, ShardId};
use std::cmp::Ordering;
use collapse_distributed::merge::merge_ranked;
use proptest::prelude::*;

/// Split scores across shards; each shard sorts its share by score
/// descending and numbers its docs in that order.
fn partition(scores: &[(u16, usize)], shard_count: usize) -> Vec<RankedResultSet> {
    let mut per_shard: Vec<Vec<f32>> = vec![Vec::new(); shard_count];
    for &(score, shard) in scores {
        per_shard[shard % shard_count].push(score as f32 / 8.0);
    }
    per_shard
        .into_iter()
        .map(|mut shard_scores| {
            shard_scores.sort_by(|a, b| b.partial_cmp(a).unwrap());
            let hits: Vec<RankedHit> = shard_scores
                .iter()
                .enumerate()
                .map(|(doc, &score)| RankedHit::new(doc as u32, score))
                .collect();
            let max = shard_scores.first().copied().unwrap_or(f32::NAN);
            RankedResultSet::new(hits.len() as u64, max, hits)
        })
        .collect()
}

fn inputs(sets: &[RankedResultSet]) -> Vec<(ShardId, &RankedResultSet)> {
    sets.iter()
        .enumerate()
        .map(|(id, set)| (ShardId::new(id as u32), set))
        .collect()
}

proptest! {
    #[test]
    fn merged_page_equals_global_sort(
        scores in prop::collection::vec((0u16..40, 0usize..8), 0..80),
        shard_count in 1usize..6,
        limit in 0usize..100,
    ) {
        let sets = partition(&scores, shard_count);

        let mut expected: Vec<(u32, u32, f32)> = sets
            .iter()
            .enumerate()
            .flat_map(|(shard, set)| {
                set.hits.iter().map(move |h| (shard as u32, h.doc_id, h.score))
            })
            .collect();
        expected.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap()
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });
        expected.truncate(limit);

        let merged = merge_ranked(&inputs(&sets), &SortSpec::relevance(), limit, 0).unwrap();
        let actual: Vec<(u32, u32, f32)> = merged
            .hits
            .iter()
            .map(|h| (h.shard_id.as_u32(), h.doc_id, h.score))
            .collect();

        prop_assert_eq!(actual, expected);
        prop_assert_eq!(merged.total_hits, scores.len() as u64);
    }

    #[test]
    fn merging_a_global_page_alone_is_identity(
        scores in prop::collection::vec((0u16..40, 0usize..8), 0..60),
        shard_count in 1usize..5,
        limit in 0usize..60,
    ) {
        let sets = partition(&scores, shard_count);
        let first = merge_ranked(&inputs(&sets), &SortSpec::relevance(), limit, 0).unwrap();

        let page = RankedResultSet::new(
            first.total_hits,
            first.max_score,
            first.hits.iter().map(|h| RankedHit::new(h.doc_id, h.score)).collect(),
        );
        let again = merge_ranked(&[(ShardId::new(0), &page)], &SortSpec::relevance(), limit, 0)
            .unwrap();

        let scores_first: Vec<(u32, f32)> = first.hits.iter().map(|h| (h.doc_id, h.score)).collect();
        let scores_again: Vec<(u32, f32)> = again.hits.iter().map(|h| (h.doc_id, h.score)).collect();
        prop_assert_eq!(scores_first, scores_again);
    }

    #[test]
    fn paging_is_a_window_over_the_full_merge(
        scores in prop::collection::vec((0u16..40, 0usize..8), 0..60),
        shard_count in 1usize..5,
        offset in 0usize..30,
        limit in 0usize..30,
    ) {
        let sets = partition(&scores, shard_count);
        let all = merge_ranked(&inputs(&sets), &SortSpec::relevance(), usize::MAX, 0).unwrap();
        let page = merge_ranked(&inputs(&sets), &SortSpec::relevance(), limit, offset).unwrap();

        let window: Vec<_> = all.hits.into_iter().skip(offset).take(limit).collect();
        prop_assert_eq!(page.hits, window);
    }
}

/// Descending price with missing prices last, then score descending.
fn price_desc(a: &(Option<i64>, f32), b: &(Option<i64>, f32)) -> Ordering {
    b.0.cmp(&a.0).then(b.1.partial_cmp(&a.1).unwrap())
}

/// Split (price, score) pairs across shards; each shard sorts its share by
/// price descending and numbers its docs in that order.
fn partition_priced(
    entries: &[(Option<i64>, u16, usize)],
    shard_count: usize,
) -> Vec<RankedResultSet> {
    let mut per_shard: Vec<Vec<(Option<i64>, f32)>> = vec![Vec::new(); shard_count];
    for &(price, score, shard) in entries {
        per_shard[shard % shard_count].push((price, score as f32 / 4.0));
    }
    per_shard
        .into_iter()
        .map(|mut share| {
            share.sort_by(price_desc);
            let hits: Vec<RankedHit> = share
                .iter()
                .enumerate()
                .map(|(doc, &(price, score))| {
                    let value = price.map(SortValue::Long).unwrap_or(SortValue::Null);
                    RankedHit::new(doc as u32, score).with_sort_values(vec![value])
                })
                .collect();
            let max = share.iter().map(|e| e.1).fold(f32::NAN, f32::max);
            RankedResultSet::new(hits.len() as u64, max, hits)
        })
        .collect()
}

proptest! {
    #[test]
    fn merged_page_equals_global_sort_on_reversed_field(
        entries in prop::collection::vec(
            (prop::option::of(0i64..5), 0u16..6, 0usize..8),
            0..80,
        ),
        shard_count in 1usize..6,
        limit in 0usize..100,
    ) {
        let sets = partition_priced(&entries, shard_count);
        let sort = SortSpec::new(vec![
            SortField::field("price", SortFieldKind::Long).reversed(),
        ]);

        let mut expected: Vec<(u32, u32, Option<i64>, f32)> = sets
            .iter()
            .enumerate()
            .flat_map(|(shard, set)| {
                set.hits.iter().map(move |h| {
                    let price = match h.sort_values.as_deref() {
                        Some([SortValue::Long(p)]) => Some(*p),
                        _ => None,
                    };
                    (shard as u32, h.doc_id, price, h.score)
                })
            })
            .collect();
        expected.sort_by(|a, b| {
            price_desc(&(a.2, a.3), &(b.2, b.3))
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });
        expected.truncate(limit);
        let expected: Vec<(u32, u32)> = expected.iter().map(|e| (e.0, e.1)).collect();

        let merged = merge_ranked(&inputs(&sets), &sort, limit, 0).unwrap();
        let actual: Vec<(u32, u32)> = merged
            .hits
            .iter()
            .map(|h| (h.shard_id.as_u32(), h.doc_id))
            .collect();

        prop_assert_eq!(actual, expected);
        prop_assert_eq!(merged.total_hits, entries.len() as u64);
    }
}
