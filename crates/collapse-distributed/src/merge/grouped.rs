use super::{check_sorted, max_score, merge_hit_streams, KWayMerge, ShardedHit};
use crate::error::MergeError;
use collapse_core::group::{GroupIdentity, GroupResult, GroupValue, GroupedResultSet};
use collapse_core::sort::{compare_keys, SortSpec};
use collapse_core::types::{RankedHit, ShardId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the merged `total_group_count` is derived from shard values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupCountMode {
    /// Distinct identities seen across the returned shard pages, raised to
    /// the largest single shard count. A lower bound on the true count.
    #[default]
    Distinct,
    /// Sum of the per-shard counts.
    Sum,
    /// The first shard's raw count, unreconciled.
    PassThrough,
}

/// Paging and pass settings for [`merge_grouped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMergeParams {
    pub group_limit: usize,
    pub group_offset: usize,
    pub hits_per_group: usize,
    pub hit_offset: usize,
    /// Merge full per-group hit lists. Otherwise keep one representative hit.
    pub is_final_pass: bool,
    pub count_mode: GroupCountMode,
}

/// One group after coalescing across shards.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedGroup {
    pub identity: GroupIdentity,
    pub max_score: f32,
    pub score: f32,
    pub total_hits: u64,
    pub hits: Vec<ShardedHit>,
}

/// The globally selected page of groups.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedGroups {
    pub group_sort: SortSpec,
    pub within_group_sort: SortSpec,
    pub total_hit_count: u64,
    pub total_grouped_hit_count: u64,
    pub total_group_count: Option<u64>,
    pub max_score: f32,
    pub groups: Vec<MergedGroup>,
}

impl MergedGroups {
    /// Group values selected by this merge, in group order.
    pub fn accepted_values(&self) -> Vec<GroupValue> {
        self.groups.iter().map(|g| g.identity.value.clone()).collect()
    }

    /// All hits, group order outer and within-group order inner.
    pub fn flatten_hits(&self) -> Vec<ShardedHit> {
        self.groups.iter().flat_map(|g| g.hits.iter().cloned()).collect()
    }
}

struct Coalesced<'a> {
    identity: &'a GroupIdentity,
    score: f32,
    max_score: f32,
    total_hits: u64,
    contributions: Vec<(ShardId, &'a [RankedHit])>,
}

/// Merge per-shard top groups into the global page of groups.
///
/// Groups with the same value are coalesced: hit totals add up, scores take
/// the maximum, and the group ranks where its best shard ranked it. Only the
/// final pass merges per-group hit lists.
pub fn merge_grouped(
    results: &[(ShardId, &GroupedResultSet)],
    params: &GroupMergeParams,
) -> Result<MergedGroups, MergeError> {
    let Some((_, first)) = results.first() else {
        return Ok(MergedGroups {
            group_sort: SortSpec::relevance(),
            within_group_sort: SortSpec::relevance(),
            total_hit_count: 0,
            total_grouped_hit_count: 0,
            total_group_count: None,
            max_score: f32::NAN,
            groups: Vec::new(),
        });
    };
    let group_sort = &first.group_sort;
    let within_group_sort = &first.within_group_sort;
    let cmp = |a: &GroupResult, b: &GroupResult| {
        compare_keys(group_sort, &a.sort_key(), &b.sort_key())
            .then_with(|| a.identity.value.cmp(&b.identity.value))
    };

    for (shard, set) in results {
        if &set.group_sort != group_sort || &set.within_group_sort != within_group_sort {
            return Err(MergeError::violation(
                *shard,
                0,
                "sort descriptors differ between shards",
            ));
        }
        check_sorted(*shard, &set.groups, "groups", &cmp)?;
    }

    let streams = results
        .iter()
        .map(|(shard, set)| (*shard, set.groups.as_slice()))
        .collect();

    let mut coalesced: Vec<Coalesced<'_>> = Vec::new();
    let mut index: HashMap<&GroupValue, usize> = HashMap::new();
    for (shard, group) in KWayMerge::new(streams, &cmp, |_| None) {
        match index.get(&group.identity.value) {
            Some(&slot) => {
                let entry = &mut coalesced[slot];
                entry.score = entry.score.max(group.score);
                entry.max_score = entry.max_score.max(group.max_score);
                entry.total_hits += group.total_hits;
                entry.contributions.push((shard, group.hits.as_slice()));
            }
            None => {
                index.insert(&group.identity.value, coalesced.len());
                coalesced.push(Coalesced {
                    identity: &group.identity,
                    score: group.score,
                    max_score: group.max_score,
                    total_hits: group.total_hits,
                    contributions: vec![(shard, group.hits.as_slice())],
                });
            }
        }
    }

    let total_grouped_hit_count = coalesced.iter().map(|g| g.total_hits).sum();
    let shard_counts: Vec<u64> = results
        .iter()
        .filter_map(|(_, set)| set.total_group_count)
        .collect();
    let total_group_count = match params.count_mode {
        GroupCountMode::Distinct => shard_counts
            .iter()
            .max()
            .map(|&largest| largest.max(coalesced.len() as u64)),
        GroupCountMode::Sum if !shard_counts.is_empty() => Some(shard_counts.iter().sum()),
        GroupCountMode::Sum => None,
        GroupCountMode::PassThrough => first.total_group_count,
    };

    let mut groups = Vec::with_capacity(params.group_limit.min(coalesced.len()));
    for group in coalesced
        .into_iter()
        .skip(params.group_offset)
        .take(params.group_limit)
    {
        let hits = if params.is_final_pass {
            merge_hit_streams(
                group.contributions,
                within_group_sort,
                params.hits_per_group,
                params.hit_offset,
            )?
        } else {
            group
                .contributions
                .first()
                .and_then(|(shard, hits)| hits.first().map(|h| (*shard, h)))
                .map(|(shard, hit)| ShardedHit {
                    shard_id: shard,
                    doc_id: hit.doc_id,
                    score: hit.score,
                    sort_values: hit.sort_values.clone(),
                })
                .into_iter()
                .collect()
        };
        groups.push(MergedGroup {
            identity: group.identity.clone(),
            max_score: group.max_score,
            score: group.score,
            total_hits: group.total_hits,
            hits,
        });
    }

    Ok(MergedGroups {
        group_sort: group_sort.clone(),
        within_group_sort: within_group_sort.clone(),
        total_hit_count: results.iter().map(|(_, set)| set.total_hit_count).sum(),
        total_grouped_hit_count,
        total_group_count,
        max_score: max_score(results.iter().map(|(_, set)| set.max_score)),
        groups,
    })
}
