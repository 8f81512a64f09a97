mod common;

use async_trait::async_trait;
use collapse_core::types::{ShardId, ShardQueryResult};
use collapse_distributed::coordinator::{
    status_of, CoordinatorConfig, ResponseStatus, SearchCoordinator, SearchState, StaticTopology,
};
use collapse_distributed::shard::{MemoryIndex, SearchShard};
use collapse_distributed::transport::{LocalTransport, SearchTransport};
use collapse_distributed::{
    EngineError, FailureStage, FetchExecutionError, FetchRequest, FetchResult, GroupBy,
    GroupCountMode, Grouping, NodeId, Query, SearchError, SearchRequest, ShardError,
    ShardSearchRequest, TransportError,
};
use common::{coordinator, local_node, local_transport, open_contexts, BrokenEngine};
use std::sync::Arc;

const DOC: &str = r#"[{"body": "replica lag alert"}, {"body": "replica promoted"}]"#;

fn healthy(id: u32) -> Arc<SearchShard> {
    Arc::new(SearchShard::new(
        ShardId::new(id),
        Arc::new(MemoryIndex::from_json_array(DOC).unwrap()),
    ))
}

fn broken(id: u32) -> Arc<SearchShard> {
    Arc::new(SearchShard::new(ShardId::new(id), Arc::new(BrokenEngine)))
}

#[tokio::test]
async fn test_one_failed_shard_leaves_a_partial_result() {
    let shards = vec![healthy(0), broken(1), healthy(2)];
    let coordinator = coordinator(
        Arc::new(local_transport(&shards)),
        3,
        CoordinatorConfig::default(),
    );

    let result = coordinator
        .search(SearchRequest::new(Query::new("replica")))
        .await;
    assert_eq!(
        status_of(&result),
        ResponseStatus::Partial {
            successful: 2,
            total: 3
        }
    );

    let response = result.unwrap();
    assert_eq!(response.successful_shards, 2);
    assert_eq!(response.total_shards, 3);
    assert_eq!(response.failed_shards(), 1);
    let failure = &response.failures[0];
    assert_eq!(failure.shard_id, ShardId::new(1));
    assert_eq!(failure.stage, FailureStage::Query);
    assert!(matches!(failure.cause, ShardError::Query(_)));
    assert!(failure.to_string().contains("index corrupted"));

    assert_eq!(response.hits.len(), 4);
    assert!(response.hits.iter().all(|h| h.shard_id != ShardId::new(1)));
    assert_eq!(response.total_hits, 4);
    assert_eq!(open_contexts(&shards).await, 0);
}

#[tokio::test]
async fn test_all_shards_failing_fails_the_request() {
    let shards = vec![broken(0), broken(1)];
    let coordinator = coordinator(
        Arc::new(local_transport(&shards)),
        2,
        CoordinatorConfig::default(),
    );

    let result = coordinator
        .search(SearchRequest::new(Query::new("replica")))
        .await;
    assert_eq!(status_of(&result), ResponseStatus::Failed);

    match result.unwrap_err() {
        SearchError::AllShardsFailed { state, failures } => {
            assert_eq!(state, SearchState::QueryScatter);
            assert_eq!(failures.len(), 2);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_unrouted_shard_is_a_failure() {
    let shards = vec![healthy(0)];
    let topology = StaticTopology::new(local_node())
        .assign(ShardId::new(0), local_node())
        .assign(ShardId::new(1), NodeId::new("elsewhere"));
    let coordinator = SearchCoordinator::new(
        Arc::new(local_transport(&shards)),
        Arc::new(topology),
        CoordinatorConfig::default(),
    );

    let response = coordinator
        .search(SearchRequest::new(Query::new("promoted")))
        .await
        .unwrap();
    assert_eq!(response.successful_shards, 1);
    assert_eq!(
        response.failures[0].cause,
        ShardError::Transport(TransportError::UnknownShard(ShardId::new(1)))
    );
    assert_eq!(response.hits.len(), 1);
}

/// Fails every fetch sent to one shard.
struct FailingFetch {
    inner: LocalTransport,
    failing: ShardId,
}

#[async_trait]
impl SearchTransport for FailingFetch {
    async fn send_query(
        &self,
        node: &NodeId,
        request: ShardSearchRequest,
    ) -> Result<ShardQueryResult, ShardError> {
        self.inner.send_query(node, request).await
    }

    async fn send_fetch(
        &self,
        node: &NodeId,
        request: FetchRequest,
    ) -> Result<FetchResult, ShardError> {
        if request.shard_id == self.failing {
            return Err(FetchExecutionError {
                shard_id: request.shard_id,
                source: EngineError::new("stored fields unavailable"),
            }
            .into());
        }
        self.inner.send_fetch(node, request).await
    }

    async fn free_context(
        &self,
        node: &NodeId,
        shard_id: ShardId,
        context_id: u64,
    ) -> Result<bool, ShardError> {
        self.inner.free_context(node, shard_id, context_id).await
    }
}

#[tokio::test]
async fn test_failed_fetch_drops_hits_and_releases_context() {
    let shards = vec![healthy(0), healthy(1)];
    let transport = FailingFetch {
        inner: local_transport(&shards),
        failing: ShardId::new(0),
    };
    let coordinator = coordinator(Arc::new(transport), 2, CoordinatorConfig::default());

    let response = coordinator
        .search(SearchRequest::new(Query::new("replica")))
        .await
        .unwrap();

    assert_eq!(response.successful_shards, 1);
    assert_eq!(response.failures.len(), 1);
    assert_eq!(response.failures[0].stage, FailureStage::Fetch);
    assert_eq!(response.total_hits, 4);
    assert_eq!(response.hits.len(), 2);
    assert!(response.hits.iter().all(|h| h.shard_id == ShardId::new(1)));
    assert_eq!(open_contexts(&shards).await, 0);
}

#[tokio::test]
async fn test_grouped_search_survives_a_failed_lowest_shard() {
    let docs = r#"[
        {"body": "replica lag alert", "team": "storage"},
        {"body": "replica promoted", "team": "network"}
    ]"#;
    let shards = vec![
        broken(0),
        Arc::new(SearchShard::new(
            ShardId::new(1),
            Arc::new(MemoryIndex::from_json_array(docs).unwrap()),
        )),
    ];
    let coordinator = coordinator(
        Arc::new(local_transport(&shards)),
        2,
        CoordinatorConfig {
            group_count: GroupCountMode::PassThrough,
            ..CoordinatorConfig::default()
        },
    );

    let result = coordinator
        .search(
            SearchRequest::new(Query::new("replica"))
                .grouping(Grouping::new(GroupBy::field("team"), 1)),
        )
        .await;
    assert_eq!(
        status_of(&result),
        ResponseStatus::Partial {
            successful: 1,
            total: 2
        }
    );

    let response = result.unwrap();
    assert_eq!(response.groups.as_ref().map(Vec::len), Some(2));
    assert_eq!(response.total_group_count, Some(2));
    assert!(response.hits.iter().all(|h| h.shard_id == ShardId::new(1)));
    assert!(response
        .failures
        .iter()
        .all(|f| f.shard_id == ShardId::new(0) && f.stage == FailureStage::Query));
    assert_eq!(open_contexts(&shards).await, 0);
}
