//! Scatter-gather controller.
//!
//! A search walks an explicit state machine:
//!
//! ```text
//! Init -> QueryScatter -> GroupMerge -> GroupHitsScatter -> HitsMerge -> FetchScatter -> Finalize -> Done
//!                      \-> DocMerge ------------------------------------/
//! ```
//!
//! Each scatter round fans one call per shard out through the
//! [`SearchTransport`], collects the answers in a [`ShardResultTable`] and
//! waits on a [`Countdown`] that exactly one completing call drives to zero.
//! Shard failures are recorded and never abort their siblings; the round
//! moves on with whatever slots were filled.

pub mod response;
pub mod result_table;
pub mod scroll;
pub mod topology;

pub use response::{status_of, ResponseStatus, SearchGroup, SearchHit, SearchResponse};
pub use result_table::{Countdown, CountdownGuard, ShardResultTable};
pub use scroll::{ScrollContext, ScrollId};
pub use topology::{ShardTopology, StaticTopology};

use crate::error::{
    FailureStage, ReduceFailure, SearchError, SearchResult, ShardFailure, TransportError,
};
use crate::merge::{
    grouped_inputs, merge_grouped, merge_ranked, ranked_inputs, GroupCountMode, GroupMergeParams,
    MergedGroups, MergedHits, ShardedHit,
};
use crate::transport::SearchTransport;
use crate::types::{
    FetchRequest, FetchResult, NodeId, QueryMode, SearchRequest, SearchType, ShardSearchRequest,
};
use collapse_core::types::{DocId, ResultPhase, ShardId, ShardPayload, ShardQueryResult};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Controller states, in the order a search can traverse them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchState {
    Init,
    QueryScatter,
    GroupMerge,
    GroupHitsScatter,
    HitsMerge,
    DocMerge,
    FetchScatter,
    Finalize,
    Done,
    Failed,
}

impl std::fmt::Display for SearchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SearchState::Init => "init",
            SearchState::QueryScatter => "query scatter",
            SearchState::GroupMerge => "group merge",
            SearchState::GroupHitsScatter => "group hits scatter",
            SearchState::HitsMerge => "hits merge",
            SearchState::DocMerge => "doc merge",
            SearchState::FetchScatter => "fetch scatter",
            SearchState::Finalize => "finalize",
            SearchState::Done => "done",
            SearchState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Where calls to shards hosted on this node run.
///
/// Calls to remote shards are always spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationThreading {
    /// Await each local call on the coordinating task.
    NoThreads,
    /// One spawned task works through all local calls in turn.
    SingleThread,
    /// One spawned task per local call.
    #[default]
    ThreadPerShard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub threading: OperationThreading,
    pub group_count: GroupCountMode,
    /// Forwarded to every shard request; transports enforce it.
    pub shard_timeout_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            threading: OperationThreading::ThreadPerShard,
            group_count: GroupCountMode::Distinct,
            shard_timeout_ms: None,
        }
    }
}

/// A search context a shard holds open for this operation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenContext {
    shard_id: ShardId,
    node: NodeId,
    context_id: u64,
}

/// Totals from the groups round; the hits round only sees accepted groups.
#[derive(Debug, Clone, Copy)]
struct GroupTotals {
    total_hit_count: u64,
    total_grouped_hit_count: u64,
    total_group_count: Option<u64>,
    max_score: f32,
}

impl GroupTotals {
    fn of(merged: &MergedGroups) -> Self {
        Self {
            total_hit_count: merged.total_hit_count,
            total_grouped_hit_count: merged.total_grouped_hit_count,
            total_group_count: merged.total_group_count,
            max_score: merged.max_score,
        }
    }
}

/// What the merge rounds selected for fetching.
enum Selection {
    Hits(MergedHits),
    Groups {
        merged: MergedGroups,
        totals: GroupTotals,
    },
}

impl Selection {
    fn hits(&self) -> Vec<ShardedHit> {
        match self {
            Selection::Hits(merged) => merged.hits.clone(),
            Selection::Groups { merged, .. } => merged.flatten_hits(),
        }
    }
}

/// State carried through one search.
struct Operation {
    id: u64,
    request: SearchRequest,
    shards: Vec<ShardId>,
    transitions: Vec<SearchState>,
    failures: Vec<ShardFailure>,
    /// Contexts opened by the latest query round and not yet released.
    contexts: Vec<OpenContext>,
    /// The latest query round, kept for auxiliary payloads.
    last_round: Option<Arc<ShardResultTable<ShardQueryResult>>>,
    timed_out: bool,
    started: Instant,
}

impl Operation {
    fn new(id: u64, request: SearchRequest, shards: Vec<ShardId>) -> Self {
        Self {
            id,
            request,
            shards,
            transitions: vec![SearchState::Init],
            failures: Vec::new(),
            contexts: Vec::new(),
            last_round: None,
            timed_out: false,
            started: Instant::now(),
        }
    }

    fn transition(&mut self, state: SearchState) {
        debug!("Search {} entered state {}", self.id, state);
        self.transitions.push(state);
    }

    fn state(&self) -> SearchState {
        self.transitions.last().copied().unwrap_or(SearchState::Init)
    }

    fn reduce_error(&self, source: impl Into<ReduceFailure>) -> SearchError {
        SearchError::Reduce {
            state: self.state(),
            source: source.into(),
            failures: self.failures.clone(),
        }
    }

    fn context_for(&self, shard_id: ShardId) -> Option<&OpenContext> {
        self.contexts.iter().find(|c| c.shard_id == shard_id)
    }
}

/// One call to one shard, ready to be dispatched.
struct ShardJob {
    local: bool,
    future: BoxFuture<'static, ()>,
}

/// Runs distributed searches over a shard topology.
pub struct SearchCoordinator {
    transport: Arc<dyn SearchTransport>,
    topology: Arc<dyn ShardTopology>,
    config: CoordinatorConfig,
    next_request: AtomicU64,
}

impl SearchCoordinator {
    pub fn new(
        transport: Arc<dyn SearchTransport>,
        topology: Arc<dyn ShardTopology>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            transport,
            topology,
            config,
            next_request: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Start a search without waiting for it. `listener` receives the
    /// outcome on the task that finishes the search.
    pub fn execute<F>(
        self: &Arc<Self>,
        request: SearchRequest,
        listener: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(SearchResult<SearchResponse>) + Send + 'static,
    {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let result = coordinator.search(request).await;
            listener(result);
        })
    }

    /// Run a search to completion.
    pub async fn search(&self, request: SearchRequest) -> SearchResult<SearchResponse> {
        let shards = self.topology.shards();
        if shards.is_empty() {
            return Err(SearchError::InvalidRequest("no shards to search".into()));
        }
        if request.grouping.as_ref().is_some_and(|g| g.group_size == 0)
            && request.search_type != SearchType::Count
        {
            return Err(SearchError::InvalidRequest(
                "group_size must be at least 1".into(),
            ));
        }

        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let mut op = Operation::new(id, request, shards);
        info!(
            "Search {} started on {} shards (grouped: {})",
            id,
            op.shards.len(),
            op.request.grouping.is_some()
        );

        let outcome = self.run(&mut op).await;
        let keep_contexts = outcome.is_ok() && op.request.scroll;
        if !keep_contexts {
            let contexts = std::mem::take(&mut op.contexts);
            self.release(op.id, contexts).await;
        }

        match outcome {
            Ok(mut response) => {
                op.transition(SearchState::Done);
                response.transitions = op.transitions;
                response.took = op.started.elapsed();
                info!(
                    "Search {} finished: {} hits, {}/{} shards, {:?}",
                    id,
                    response.hits.len(),
                    response.successful_shards,
                    response.total_shards,
                    response.took
                );
                Ok(response)
            }
            Err(err) => {
                op.transition(SearchState::Failed);
                warn!("Search {} failed: {}", id, err);
                Err(err)
            }
        }
    }

    async fn run(&self, op: &mut Operation) -> SearchResult<SearchResponse> {
        let mut mode = match (&op.request.grouping, op.request.search_type) {
            (Some(grouping), SearchType::QueryThenFetch) => QueryMode::Groups {
                grouping: grouping.clone(),
            },
            _ => QueryMode::Plain,
        };
        let mut scatter_state = SearchState::QueryScatter;
        let mut stage = FailureStage::Query;
        let mut group_totals = None;

        let selection = loop {
            op.transition(scatter_state);
            let round = self.scatter_query(op, &mode, stage).await;

            let Some((_, representative)) = round.first_filled() else {
                return Err(SearchError::AllShardsFailed {
                    state: scatter_state,
                    failures: op.failures.clone(),
                });
            };
            let results: Vec<&ShardQueryResult> = round.filled().map(|(_, r)| r).collect();

            match (&representative.payload, representative.phase) {
                (ShardPayload::Grouped(_), ResultPhase::Groups) => {
                    op.transition(SearchState::GroupMerge);
                    let params = GroupMergeParams {
                        group_limit: op.request.size as usize,
                        group_offset: op.request.from as usize,
                        hits_per_group: 1,
                        hit_offset: 0,
                        is_final_pass: false,
                        count_mode: self.config.group_count,
                    };
                    let merged = grouped_inputs(&results, ResultPhase::Groups)
                        .and_then(|inputs| merge_grouped(&inputs, &params))
                        .map_err(|e| op.reduce_error(e))?;
                    let grouping = mode
                        .grouping()
                        .cloned()
                        .ok_or_else(|| op.reduce_error(ReduceFailure::Internal(
                            "groups phase result for an ungrouped request".into(),
                        )))?;

                    // The hits round opens fresh contexts.
                    let contexts = std::mem::take(&mut op.contexts);
                    self.release(op.id, contexts).await;

                    debug!("Search {} accepted {} groups", op.id, merged.groups.len());
                    if merged.groups.is_empty() {
                        let totals = GroupTotals::of(&merged);
                        break Selection::Groups { merged, totals };
                    }

                    group_totals = Some(GroupTotals::of(&merged));
                    mode = QueryMode::Hits {
                        grouping,
                        groups: merged.accepted_values(),
                    };
                    scatter_state = SearchState::GroupHitsScatter;
                    stage = FailureStage::GroupHits;
                }
                (ShardPayload::Grouped(_), ResultPhase::Hits) => {
                    op.transition(SearchState::HitsMerge);
                    let grouping = mode.grouping().cloned().ok_or_else(|| {
                        op.reduce_error(ReduceFailure::Internal(
                            "hits phase result for an ungrouped request".into(),
                        ))
                    })?;
                    let params = GroupMergeParams {
                        group_limit: op.request.size as usize,
                        group_offset: 0,
                        hits_per_group: grouping.group_size as usize,
                        hit_offset: grouping.group_from as usize,
                        is_final_pass: true,
                        count_mode: self.config.group_count,
                    };
                    let merged = grouped_inputs(&results, ResultPhase::Hits)
                        .and_then(|inputs| merge_grouped(&inputs, &params))
                        .map_err(|e| op.reduce_error(e))?;
                    let totals = group_totals.unwrap_or_else(|| GroupTotals::of(&merged));
                    break Selection::Groups { merged, totals };
                }
                (ShardPayload::Ranked(_), _) => {
                    op.transition(SearchState::DocMerge);
                    let limit = match op.request.search_type {
                        SearchType::Count => 0,
                        SearchType::QueryThenFetch => op.request.size as usize,
                    };
                    let merged = ranked_inputs(&results)
                        .and_then(|inputs| {
                            merge_ranked(&inputs, &op.request.sort, limit, op.request.from as usize)
                        })
                        .map_err(|e| op.reduce_error(e))?;
                    break Selection::Hits(merged);
                }
                (ShardPayload::Grouped(_), ResultPhase::Plain) => {
                    return Err(op.reduce_error(crate::error::MergeError::violation(
                        representative.shard_id,
                        0,
                        "grouped result without a grouping phase",
                    )));
                }
            }
        };

        let fetched = self.scatter_fetch(op, &selection).await;
        op.transition(SearchState::Finalize);
        self.finalize(op, selection, fetched)
    }

    /// One query round over every shard.
    async fn scatter_query(
        &self,
        op: &mut Operation,
        mode: &QueryMode,
        stage: FailureStage,
    ) -> Arc<ShardResultTable<ShardQueryResult>> {
        let table = Arc::new(ShardResultTable::new(op.shards.len()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let (countdown, done) = Countdown::new(op.shards.len());

        let mut jobs = Vec::with_capacity(op.shards.len());
        for (ordinal, &shard_id) in op.shards.iter().enumerate() {
            let guard = countdown.guard();
            let Some(node) = self.topology.node_for(shard_id) else {
                record_failure(&failures, shard_id, stage, TransportError::UnknownShard(shard_id).into());
                continue;
            };

            let mut request = ShardSearchRequest::for_shard(shard_id, &op.request, mode.clone());
            request.timeout_ms = self.config.shard_timeout_ms;
            let transport = Arc::clone(&self.transport);
            let table = Arc::clone(&table);
            let failures = Arc::clone(&failures);
            let request_id = op.id;

            let future = async move {
                let _guard = guard;
                match transport.send_query(&node, request).await {
                    Ok(result) => {
                        if table.set(ordinal, result).is_err() {
                            warn!("Search {}: dropped duplicate answer from {}", request_id, shard_id);
                        }
                    }
                    Err(cause) => {
                        debug!("Search {}: query on {} failed: {}", request_id, shard_id, cause);
                        record_failure(&failures, shard_id, stage, cause);
                    }
                }
            }
            .boxed();
            jobs.push(ShardJob {
                local: self.topology.is_local(shard_id),
                future,
            });
        }

        self.dispatch(jobs).await;
        let _ = done.await;

        self.absorb_failures(op, &failures);
        op.contexts = table
            .filled()
            .filter_map(|(ordinal, result)| {
                let shard_id = op.shards.get(ordinal).copied()?;
                let node = self.topology.node_for(shard_id)?;
                Some(OpenContext {
                    shard_id,
                    node,
                    context_id: result.context_id,
                })
            })
            .collect();
        op.timed_out |= table.filled().any(|(_, r)| r.timed_out);
        op.last_round = Some(Arc::clone(&table));
        table
    }

    /// Load the stored documents of the selected hits, one call per shard.
    async fn scatter_fetch(
        &self,
        op: &mut Operation,
        selection: &Selection,
    ) -> HashMap<(ShardId, DocId), String> {
        op.transition(SearchState::FetchScatter);

        let mut per_shard: BTreeMap<ShardId, Vec<DocId>> = BTreeMap::new();
        for hit in selection.hits() {
            per_shard.entry(hit.shard_id).or_default().push(hit.doc_id);
        }

        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut targets = Vec::with_capacity(per_shard.len());
        for (shard_id, doc_ids) in per_shard {
            match op.context_for(shard_id) {
                Some(ctx) => targets.push((ctx.clone(), doc_ids)),
                None => record_failure(
                    &failures,
                    shard_id,
                    FailureStage::Fetch,
                    TransportError::UnknownShard(shard_id).into(),
                ),
            }
        }

        let table = Arc::new(ShardResultTable::new(targets.len()));
        let (countdown, done) = Countdown::new(targets.len());
        let keep_context = op.request.scroll;

        let mut jobs = Vec::with_capacity(targets.len());
        for (slot, (ctx, doc_ids)) in targets.into_iter().enumerate() {
            let guard = countdown.guard();
            let local = self.topology.is_local(ctx.shard_id);
            let transport = Arc::clone(&self.transport);
            let table = Arc::clone(&table);
            let failures = Arc::clone(&failures);
            let request_id = op.id;
            let request = FetchRequest {
                shard_id: ctx.shard_id,
                context_id: ctx.context_id,
                doc_ids,
                keep_context,
            };

            let future = async move {
                let _guard = guard;
                match transport.send_fetch(&ctx.node, request).await {
                    Ok(result) => {
                        let _ = table.set(slot, result);
                    }
                    Err(cause) => {
                        debug!("Search {}: fetch on {} failed: {}", request_id, ctx.shard_id, cause);
                        record_failure(&failures, ctx.shard_id, FailureStage::Fetch, cause);
                    }
                }
            }
            .boxed();
            jobs.push(ShardJob { local, future });
        }

        self.dispatch(jobs).await;
        let _ = done.await;
        self.absorb_failures(op, &failures);

        let mut documents = HashMap::new();
        for (_, result) in table.filled() {
            let result: &FetchResult = result;
            if !keep_context {
                // The shard frees a context once it has served the fetch.
                op.contexts.retain(|c| c.shard_id != result.shard_id);
            }
            for doc in &result.documents {
                documents.insert((result.shard_id, doc.doc_id), doc.source.clone());
            }
        }
        documents
    }

    /// Run prepared shard calls according to the threading policy.
    async fn dispatch(&self, jobs: Vec<ShardJob>) {
        let (local, remote): (Vec<_>, Vec<_>) = jobs.into_iter().partition(|job| job.local);
        for job in remote {
            tokio::spawn(job.future);
        }
        match self.config.threading {
            OperationThreading::ThreadPerShard => {
                for job in local {
                    tokio::spawn(job.future);
                }
            }
            OperationThreading::SingleThread => {
                if !local.is_empty() {
                    tokio::spawn(async move {
                        for job in local {
                            job.future.await;
                        }
                    });
                }
            }
            OperationThreading::NoThreads => {
                for job in local {
                    job.future.await;
                }
            }
        }
    }

    fn absorb_failures(&self, op: &mut Operation, failures: &Mutex<Vec<ShardFailure>>) {
        let mut round = std::mem::take(&mut *failures.lock().unwrap_or_else(PoisonError::into_inner));
        round.sort_by_key(|f| f.shard_id);
        for failure in &round {
            warn!("Search {}: shard failure {}", op.id, failure);
        }
        op.failures.extend(round);
    }

    /// Best-effort release of search contexts.
    async fn release(&self, request_id: u64, contexts: Vec<OpenContext>) {
        if contexts.is_empty() {
            return;
        }
        let calls = contexts
            .iter()
            .map(|ctx| self.transport.free_context(&ctx.node, ctx.shard_id, ctx.context_id));
        let outcomes = join_all(calls).await;
        for (ctx, outcome) in contexts.iter().zip(outcomes) {
            if let Err(err) = outcome {
                debug!(
                    "Search {}: failed to release context {} on {}: {}",
                    request_id, ctx.context_id, ctx.shard_id, err
                );
            }
        }
    }

    fn finalize(
        &self,
        op: &mut Operation,
        selection: Selection,
        documents: HashMap<(ShardId, DocId), String>,
    ) -> SearchResult<SearchResponse> {
        let load = |hit: &ShardedHit| {
            documents
                .get(&(hit.shard_id, hit.doc_id))
                .map(|source| SearchHit {
                    shard_id: hit.shard_id,
                    doc_id: hit.doc_id,
                    score: hit.score,
                    sort_values: hit.sort_values.clone(),
                    source: source.clone(),
                })
        };

        let (hits, groups, total_hits, max_score, grouped_hits, group_count) = match &selection {
            Selection::Hits(merged) => (
                merged.hits.iter().filter_map(load).collect::<Vec<_>>(),
                None,
                merged.total_hits,
                merged.max_score,
                None,
                None,
            ),
            Selection::Groups { merged, totals } => {
                let groups: Vec<SearchGroup> = merged
                    .groups
                    .iter()
                    .map(|g| SearchGroup {
                        value: g.identity.value.clone(),
                        sort_values: g.identity.sort_values.clone(),
                        score: g.score,
                        max_score: g.max_score,
                        total_hits: g.total_hits,
                        hits: g.hits.iter().filter_map(load).collect(),
                    })
                    .collect();
                let hits: Vec<SearchHit> = groups.iter().flat_map(|g| g.hits.iter().cloned()).collect();
                (
                    hits,
                    Some(groups),
                    totals.total_hit_count,
                    totals.max_score,
                    Some(totals.total_grouped_hit_count),
                    totals.total_group_count,
                )
            }
        };

        let round = op.last_round.clone().ok_or_else(|| {
            op.reduce_error(ReduceFailure::Internal("no query round completed".into()))
        })?;
        let mut facets = Vec::new();
        let mut suggest = Vec::new();
        for (_, result) in round.filled() {
            if let Some(bytes) = &result.aux.facets {
                facets.push((result.shard_id, bytes.clone()));
            }
            if let Some(bytes) = &result.aux.suggest {
                suggest.push((result.shard_id, bytes.clone()));
            }
        }

        let mut fetch_failed: Vec<ShardId> = op
            .failures
            .iter()
            .filter(|f| f.stage == FailureStage::Fetch)
            .map(|f| f.shard_id)
            .collect();
        fetch_failed.sort();
        fetch_failed.dedup();
        let successful_shards = round.filled_count().saturating_sub(fetch_failed.len());

        let scroll_id = op.request.scroll.then(|| {
            ScrollId {
                search_type: op.request.search_type,
                contexts: op
                    .contexts
                    .iter()
                    .map(|c| ScrollContext {
                        shard_id: c.shard_id,
                        node: c.node.clone(),
                        context_id: c.context_id,
                    })
                    .collect(),
            }
            .encode()
        });

        Ok(SearchResponse {
            hits,
            groups,
            total_hits,
            max_score,
            total_grouped_hit_count: grouped_hits,
            total_group_count: group_count,
            facets,
            suggest,
            scroll_id,
            total_shards: op.shards.len(),
            successful_shards,
            failures: op.failures.clone(),
            timed_out: op.timed_out,
            transitions: Vec::new(),
            took: op.started.elapsed(),
        })
    }
}

fn record_failure(
    failures: &Mutex<Vec<ShardFailure>>,
    shard_id: ShardId,
    stage: FailureStage,
    cause: crate::error::ShardError,
) {
    failures
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(ShardFailure {
            shard_id,
            stage,
            cause,
        });
}
