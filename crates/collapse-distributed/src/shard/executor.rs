//! Per-shard query execution.
//!
//! Chooses which local search to run for a round:
//!
//! | grouping | mode   | engine call                                              | payload |
//! |----------|--------|----------------------------------------------------------|---------|
//! | no       | plain  | `search`, limit `from + size`                            | ranked  |
//! | yes      | groups | `search_grouped`, `from + size` groups, 1 hit each       | grouped |
//! | yes      | hits   | `search_grouped` on the given groups, `group_from + group_size` hits each | grouped |
//!
//! Limits are never below 1 so a shard always reports its totals, even for
//! an empty page. Count searches skip hit collection entirely.

use super::{GroupSpec, LocalSearchEngine};
use crate::error::{EngineError, QueryExecutionError};
use crate::types::{QueryMode, SearchType, ShardSearchRequest};
use collapse_core::types::{
    AuxiliaryPayloads, RankedResultSet, ResultPhase, ShardId, ShardPayload, ShardQueryResult,
};
use std::time::Instant;
use tracing::debug;

fn limit(offset: u32, size: u32) -> usize {
    (offset as usize + size as usize).max(1)
}

/// Run one query round against a local engine.
///
/// Engine failures are wrapped with the shard id and returned as-is; this
/// layer never retries.
pub fn run_query(
    engine: &dyn LocalSearchEngine,
    shard_id: ShardId,
    context_id: u64,
    request: &ShardSearchRequest,
) -> Result<ShardQueryResult, QueryExecutionError> {
    let wrap = |source: EngineError| QueryExecutionError { shard_id, source };
    let started = Instant::now();

    let (phase, payload, group_from, group_size) = if request.search_type == SearchType::Count {
        let total = engine.count(&request.query).map_err(wrap)?;
        (
            ResultPhase::Plain,
            ShardPayload::Ranked(RankedResultSet::count_only(total)),
            0,
            0,
        )
    } else {
        match &request.mode {
            QueryMode::Plain => {
                let set = engine
                    .search(&request.query, &request.sort, limit(request.from, request.size))
                    .map_err(wrap)?;
                (ResultPhase::Plain, ShardPayload::Ranked(set), 0, 0)
            }
            QueryMode::Groups { grouping } => {
                debug!("Groups phase on {} by {}", shard_id, grouping.group_by);
                let spec = GroupSpec {
                    group_by: grouping.group_by.clone(),
                    group_sort: request.sort.clone(),
                    within_group_sort: grouping.within_group_sort.clone(),
                    num_groups: limit(request.from, request.size),
                    hits_per_group: 1,
                    restrict_to: None,
                    track_group_count: true,
                };
                let mut set = engine
                    .search_grouped(&request.query, &spec)
                    .map_err(wrap)?;
                if set.groups.is_empty() {
                    set.max_score = f32::NAN;
                }
                debug!("Found {} groups on {}", set.groups.len(), shard_id);
                (
                    ResultPhase::Groups,
                    ShardPayload::Grouped(set),
                    grouping.group_from,
                    grouping.group_size,
                )
            }
            QueryMode::Hits { grouping, groups } => {
                debug!("Hits phase on {} for {} groups", shard_id, groups.len());
                let spec = GroupSpec {
                    group_by: grouping.group_by.clone(),
                    group_sort: request.sort.clone(),
                    within_group_sort: grouping.within_group_sort.clone(),
                    num_groups: groups.len().max(1),
                    hits_per_group: limit(grouping.group_from, grouping.group_size),
                    restrict_to: Some(groups.clone()),
                    track_group_count: true,
                };
                let mut set = engine
                    .search_grouped(&request.query, &spec)
                    .map_err(wrap)?;
                if set.groups.is_empty() {
                    set.max_score = f32::NAN;
                }
                (
                    ResultPhase::Hits,
                    ShardPayload::Grouped(set),
                    grouping.group_from,
                    grouping.group_size,
                )
            }
        }
    };

    let facets = if request.facets.is_empty() {
        None
    } else {
        engine
            .facets(&request.query, &request.facets)
            .map_err(wrap)?
    };
    let suggest = match &request.suggest {
        Some(prefix) => engine.suggest(prefix).map_err(wrap)?,
        None => None,
    };

    let timed_out = request
        .timeout_ms
        .map(|budget| started.elapsed().as_millis() as u64 > budget)
        .unwrap_or(false);

    Ok(ShardQueryResult {
        shard_id,
        context_id,
        from: request.from,
        size: request.size,
        group_from,
        group_size,
        phase,
        payload,
        aux: AuxiliaryPayloads { facets, suggest },
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroupBy, Grouping, Query, SearchRequest, StoredDocument};
    use collapse_core::group::{GroupIdentity, GroupResult, GroupValue, GroupedResultSet};
    use collapse_core::sort::SortSpec;
    use collapse_core::types::{DocId, RankedHit};
    use std::sync::Mutex;

    /// Records every call and answers with canned results.
    #[derive(Default)]
    struct RecordingEngine {
        search_limits: Mutex<Vec<usize>>,
        group_specs: Mutex<Vec<GroupSpec>>,
        no_groups: bool,
        fail: bool,
    }

    impl LocalSearchEngine for RecordingEngine {
        fn search(
            &self,
            _query: &Query,
            _sort: &SortSpec,
            limit: usize,
        ) -> Result<RankedResultSet, EngineError> {
            if self.fail {
                return Err(EngineError::new("disk on fire"));
            }
            self.search_limits.lock().unwrap().push(limit);
            Ok(RankedResultSet::new(3, 0.9, vec![RankedHit::new(1, 0.9)]))
        }

        fn search_grouped(
            &self,
            _query: &Query,
            spec: &GroupSpec,
        ) -> Result<GroupedResultSet, EngineError> {
            self.group_specs.lock().unwrap().push(spec.clone());
            let mut set = GroupedResultSet::empty(
                spec.group_sort.clone(),
                spec.within_group_sort.clone(),
                7,
            );
            if !self.no_groups {
                set.max_score = 0.9;
                set.groups.push(GroupResult::new(
                    GroupIdentity::new("bond", vec![]),
                    0.9,
                    2,
                    vec![RankedHit::new(1, 0.9)],
                ));
            } else {
                set.max_score = 0.0;
            }
            Ok(set)
        }

        fn fetch(&self, _doc_ids: &[DocId]) -> Result<Vec<StoredDocument>, EngineError> {
            Ok(Vec::new())
        }

        fn count(&self, _query: &Query) -> Result<u64, EngineError> {
            Ok(12)
        }
    }

    fn grouping() -> Grouping {
        Grouping {
            group_by: GroupBy::field("kind"),
            within_group_sort: SortSpec::relevance(),
            group_from: 1,
            group_size: 4,
        }
    }

    fn request(mode: QueryMode) -> ShardSearchRequest {
        let search = SearchRequest::new(Query::new("rates")).from(2).size(3);
        ShardSearchRequest::for_shard(ShardId::new(1), &search, mode)
    }

    #[test]
    fn test_plain_mode_requests_from_plus_size() {
        let engine = RecordingEngine::default();
        let result = run_query(&engine, ShardId::new(1), 5, &request(QueryMode::Plain)).unwrap();
        assert_eq!(*engine.search_limits.lock().unwrap(), vec![5]);
        assert_eq!(result.phase, ResultPhase::Plain);
        assert_eq!(result.context_id, 5);
        assert!(result.ranked().is_some());
    }

    #[test]
    fn test_zero_size_still_fetches_one_hit() {
        let engine = RecordingEngine::default();
        let mut req = request(QueryMode::Plain);
        req.from = 0;
        req.size = 0;
        let result = run_query(&engine, ShardId::new(1), 1, &req).unwrap();
        assert_eq!(*engine.search_limits.lock().unwrap(), vec![1]);
        assert_eq!(result.total_hits(), 3);
    }

    #[test]
    fn test_groups_mode_collects_one_hit_per_group() {
        let engine = RecordingEngine::default();
        let req = request(QueryMode::Groups {
            grouping: grouping(),
        });
        let result = run_query(&engine, ShardId::new(1), 1, &req).unwrap();

        let specs = engine.group_specs.lock().unwrap();
        assert_eq!(specs[0].num_groups, 5);
        assert_eq!(specs[0].hits_per_group, 1);
        assert_eq!(specs[0].restrict_to, None);
        assert_eq!(result.phase, ResultPhase::Groups);
        assert_eq!(result.group_from, 1);
        assert_eq!(result.group_size, 4);
    }

    #[test]
    fn test_hits_mode_restricts_to_supplied_groups() {
        let engine = RecordingEngine::default();
        let req = request(QueryMode::Hits {
            grouping: grouping(),
            groups: vec![GroupValue::from("bond")],
        });
        let result = run_query(&engine, ShardId::new(1), 1, &req).unwrap();

        let specs = engine.group_specs.lock().unwrap();
        assert_eq!(specs[0].hits_per_group, 5);
        assert_eq!(specs[0].num_groups, 1);
        assert_eq!(specs[0].restrict_to, Some(vec![GroupValue::from("bond")]));
        assert_eq!(result.phase, ResultPhase::Hits);
    }

    #[test]
    fn test_zero_groups_reports_nan_max_score() {
        let engine = RecordingEngine {
            no_groups: true,
            ..Default::default()
        };
        let req = request(QueryMode::Groups {
            grouping: grouping(),
        });
        let result = run_query(&engine, ShardId::new(1), 1, &req).unwrap();
        let grouped = result.grouped().unwrap();
        assert!(grouped.groups.is_empty());
        assert!(grouped.max_score.is_nan());
        assert_eq!(grouped.total_hit_count, 7);
    }

    #[test]
    fn test_count_skips_hit_collection() {
        let engine = RecordingEngine::default();
        let mut req = request(QueryMode::Groups {
            grouping: grouping(),
        });
        req.search_type = SearchType::Count;
        let result = run_query(&engine, ShardId::new(1), 1, &req).unwrap();

        let ranked = result.ranked().unwrap();
        assert_eq!(ranked.total_hits, 12);
        assert_eq!(ranked.max_score, 0.0);
        assert!(ranked.hits.is_empty());
        assert!(engine.search_limits.lock().unwrap().is_empty());
        assert!(engine.group_specs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_engine_failure_is_wrapped_with_shard() {
        let engine = RecordingEngine {
            fail: true,
            ..Default::default()
        };
        let err = run_query(&engine, ShardId::new(1), 1, &request(QueryMode::Plain)).unwrap_err();
        assert_eq!(err.shard_id, ShardId::new(1));
        assert_eq!(err.source, EngineError::new("disk on fire"));
    }
}
