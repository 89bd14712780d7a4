mod common;

use std::sync::Arc;

use common::*;
use relaygraph::graph::GraphBuilder;
use relaygraph::runtime::{
    Checkpoint, CheckpointFailurePolicy, CheckpointMeta, CheckpointPolicy, CheckpointReason,
    Checkpointer, CheckpointerError, Engine, EngineError, ExecutionContext, InMemoryCheckpointer,
    RuntimeConfig, ThreadStatus,
};
use relaygraph::state::ExecutionState;
use relaygraph::types::NodeKind;

fn cycle_graph() -> relaygraph::graph::Graph {
    GraphBuilder::new()
        .add_node(custom("ping"), NoopNode)
        .add_node(custom("pong"), NoopNode)
        .add_edge(NodeKind::Start, custom("ping"))
        .add_edge(custom("ping"), custom("pong"))
        .add_edge(custom("pong"), custom("ping"))
        .compile()
        .unwrap()
}

fn failing_graph() -> relaygraph::graph::Graph {
    GraphBuilder::new()
        .add_node(custom("fragile"), FailingNode)
        .add_edge(NodeKind::Start, custom("fragile"))
        .add_edge(custom("fragile"), NodeKind::End)
        .compile()
        .unwrap()
}

#[tokio::test]
async fn every_n_policy_checkpoints_every_kth_step() {
    let ctx = ExecutionContext::new(cycle_graph()).with_config(
        RuntimeConfig::default()
            .with_max_iterations(6)
            .with_checkpoint_policy(CheckpointPolicy::EveryN(2)),
    );
    let engine = test_engine_with(ctx);

    engine
        .execute("t1", ExecutionState::new_with_user_message("go"), false)
        .await
        .unwrap();

    let steps: Vec<u64> = engine
        .list_checkpoints("t1")
        .await
        .unwrap()
        .iter()
        .map(|m| m.step)
        .collect();
    assert_eq!(steps, vec![2, 4, 6]);
}

#[tokio::test]
async fn on_error_policy_writes_only_error_checkpoints() {
    let ctx = ExecutionContext::new(failing_graph())
        .with_config(RuntimeConfig::default().with_checkpoint_policy(CheckpointPolicy::OnError));
    let engine = test_engine_with(ctx);

    let result = engine
        .execute("t1", ExecutionState::new_with_user_message("go"), false)
        .await
        .unwrap();
    assert!(matches!(result.status, ThreadStatus::Failed { .. }));

    let metas = engine.list_checkpoints("t1").await.unwrap();
    assert_eq!(metas.len(), 1);
    assert_eq!(metas[0].reason, CheckpointReason::Error);
    // The failed node is recorded as next so a resume retries it.
    assert_eq!(metas[0].next_node, custom("fragile"));
}

#[tokio::test]
async fn disabled_policy_writes_nothing_and_resume_fails() {
    let ctx = ExecutionContext::new(cycle_graph()).with_config(
        RuntimeConfig::default()
            .with_max_iterations(2)
            .with_checkpoint_policy(CheckpointPolicy::Disabled),
    );
    let engine = test_engine_with(ctx);

    engine
        .execute("t1", ExecutionState::new_with_user_message("go"), false)
        .await
        .unwrap();
    assert!(engine.list_checkpoints("t1").await.unwrap().is_empty());

    let err = engine
        .execute("t1", ExecutionState::new_with_user_message("go"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoCheckpoint { .. }));
}

#[tokio::test]
async fn checkpoint_chain_links_parents_and_loads_by_id() {
    let ctx = ExecutionContext::new(cycle_graph())
        .with_config(RuntimeConfig::default().with_max_iterations(3));
    let engine = test_engine_with(ctx);

    engine
        .execute("t1", ExecutionState::new_with_user_message("go"), false)
        .await
        .unwrap();

    let metas = engine.list_checkpoints("t1").await.unwrap();
    assert_eq!(metas.len(), 3);

    let first = engine
        .get_checkpoint("t1", Some(&metas[0].checkpoint_id))
        .await
        .unwrap()
        .unwrap();
    assert!(first.parent_id.is_none());

    let second = engine
        .get_checkpoint("t1", Some(&metas[1].checkpoint_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.parent_id.as_deref(), Some(metas[0].checkpoint_id.as_str()));

    let latest = engine.get_checkpoint("t1", None).await.unwrap().unwrap();
    assert_eq!(latest.seq, 3);
}

#[tokio::test]
async fn delete_and_cleanup_prune_history() {
    let ctx = ExecutionContext::new(cycle_graph())
        .with_config(RuntimeConfig::default().with_max_iterations(5));
    let engine = test_engine_with(ctx);

    engine
        .execute("t1", ExecutionState::new_with_user_message("go"), false)
        .await
        .unwrap();
    assert_eq!(engine.list_checkpoints("t1").await.unwrap().len(), 5);

    let deleted = engine.delete_checkpoints("t1", Some(3)).await.unwrap();
    assert_eq!(deleted, 2);

    let deleted = engine.cleanup_checkpoints("t1", 1).await.unwrap();
    assert_eq!(deleted, 2);
    let metas = engine.list_checkpoints("t1").await.unwrap();
    assert_eq!(metas.len(), 1);
    assert_eq!(metas[0].seq, 5);
}

#[tokio::test]
async fn concurrent_runs_of_one_thread_serialize_and_extend_the_chain() {
    let ctx = ExecutionContext::new(cycle_graph())
        .with_config(RuntimeConfig::default().with_max_iterations(5));
    let engine = Arc::new(test_engine_with(ctx));

    let (a, b) = (Arc::clone(&engine), Arc::clone(&engine));
    let first = tokio::spawn(async move {
        a.execute("t1", ExecutionState::new_with_user_message("go"), false)
            .await
    });
    let second = tokio::spawn(async move {
        b.execute("t1", ExecutionState::new_with_user_message("go"), false)
            .await
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // Never interleaved: the second run waits for the first and appends to
    // its chain, so seq numbers stay unique and monotonic.
    let seqs: Vec<u64> = engine
        .list_checkpoints("t1")
        .await
        .unwrap()
        .iter()
        .map(|m| m.seq)
        .collect();
    assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
}

#[tokio::test]
async fn replaying_any_checkpoint_reproduces_the_terminal_state() {
    let graph = GraphBuilder::new()
        .add_node(custom("draft"), SimpleMessageNode::new("draft"))
        .add_node(custom("review"), SimpleMessageNode::new("review"))
        .add_node(custom("publish"), SimpleMessageNode::new("publish"))
        .add_edge(NodeKind::Start, custom("draft"))
        .add_edge(custom("draft"), custom("review"))
        .add_edge(custom("review"), custom("publish"))
        .add_edge(custom("publish"), NodeKind::End)
        .compile()
        .unwrap();
    let engine = test_engine(graph.clone());

    let original = engine
        .execute("t1", ExecutionState::new_with_user_message("go"), false)
        .await
        .unwrap();
    assert_eq!(original.status, ThreadStatus::Completed);
    let final_messages: Vec<String> = original
        .state
        .snapshot()
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();

    let metas = engine.list_checkpoints("t1").await.unwrap();
    assert_eq!(metas.len(), 3);

    for meta in metas {
        let cp = engine
            .get_checkpoint("t1", Some(&meta.checkpoint_id))
            .await
            .unwrap()
            .unwrap();
        let store = Arc::new(InMemoryCheckpointer::new());
        store.save(cp).await.unwrap();

        let replay = Engine::with_checkpointer(ExecutionContext::new(graph.clone()), store)
            .unwrap()
            .execute("t1", ExecutionState::new_with_user_message("unused"), true)
            .await
            .unwrap();
        assert_eq!(replay.status, ThreadStatus::Completed);
        let messages: Vec<String> = replay
            .state
            .snapshot()
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(messages, final_messages, "replay from seq {} diverged", meta.seq);
    }
}

/// Store whose writes always fail; reads behave as an empty store.
struct BrokenStore;

#[async_trait::async_trait]
impl Checkpointer for BrokenStore {
    async fn save(&self, _: Checkpoint) -> Result<(), CheckpointerError> {
        Err(CheckpointerError::Backend {
            message: "disk on fire".into(),
        })
    }

    async fn load_latest(&self, _: &str) -> Result<Option<Checkpoint>, CheckpointerError> {
        Ok(None)
    }

    async fn load(&self, _: &str, _: &str) -> Result<Option<Checkpoint>, CheckpointerError> {
        Ok(None)
    }

    async fn list(&self, _: &str) -> Result<Vec<CheckpointMeta>, CheckpointerError> {
        Ok(vec![])
    }

    async fn delete(&self, _: &str, _: Option<u64>) -> Result<u64, CheckpointerError> {
        Ok(0)
    }

    async fn cleanup(&self, _: &str, _: usize) -> Result<u64, CheckpointerError> {
        Ok(0)
    }
}

#[tokio::test]
async fn abort_policy_surfaces_checkpoint_write_failures() {
    let graph = GraphBuilder::new()
        .add_node(custom("a"), NoopNode)
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), NodeKind::End)
        .compile()
        .unwrap();
    let engine = Engine::with_checkpointer(
        ExecutionContext::new(graph),
        Arc::new(BrokenStore),
    )
    .unwrap();

    let err = engine
        .execute("t1", ExecutionState::new_with_user_message("go"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Checkpointer(_)));
}

#[tokio::test]
async fn warn_policy_keeps_executing_without_checkpoints() {
    let graph = GraphBuilder::new()
        .add_node(custom("a"), NoopNode)
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), NodeKind::End)
        .compile()
        .unwrap();
    let ctx = ExecutionContext::new(graph).with_config(
        RuntimeConfig::default()
            .with_checkpoint_failure_policy(CheckpointFailurePolicy::Warn),
    );
    let engine = Engine::with_checkpointer(ctx, Arc::new(BrokenStore)).unwrap();

    let result = engine
        .execute("t1", ExecutionState::new_with_user_message("go"), false)
        .await
        .unwrap();
    assert_eq!(result.status, ThreadStatus::Completed);
    assert_eq!(result.steps, 1);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use relaygraph::runtime::SqliteCheckpointer;

    async fn store_in(dir: &std::path::Path) -> SqliteCheckpointer {
        let db = dir.join("checkpoints.db");
        let url = format!("sqlite://{}?mode=rwc", db.display());
        SqliteCheckpointer::connect(&url).await.unwrap()
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        let state = ExecutionState::new_with_user_message("hello");
        let cp = Checkpoint::next_in_chain(
            "t1",
            1,
            None,
            1,
            &state,
            custom("worker"),
            CheckpointReason::Step,
            vec![],
        );
        let id = cp.checkpoint_id.clone();
        store.save(cp).await.unwrap();

        let latest = store.load_latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, id);
        assert_eq!(latest.next_node, custom("worker"));
        assert_eq!(latest.state, state);

        let by_id = store.load("t1", &id).await.unwrap().unwrap();
        assert_eq!(by_id.seq, 1);
        assert!(store.load("t1", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_store_survives_reconnect_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(dir.path()).await;
            let state = ExecutionState::new_with_user_message("hello");
            for seq in 1..=4 {
                let cp = Checkpoint::next_in_chain(
                    "t1",
                    seq,
                    None,
                    seq,
                    &state,
                    custom("worker"),
                    CheckpointReason::Step,
                    vec![],
                );
                store.save(cp).await.unwrap();
            }
        }

        let store = store_in(dir.path()).await;
        assert_eq!(store.list("t1").await.unwrap().len(), 4);

        let deleted = store.delete("t1", Some(2)).await.unwrap();
        assert_eq!(deleted, 1);
        let deleted = store.cleanup("t1", 2).await.unwrap();
        assert_eq!(deleted, 1);
        let metas = store.list("t1").await.unwrap();
        assert_eq!(metas.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[tokio::test]
    async fn engine_resumes_from_a_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(dir.path()).await);

        let graph = GraphBuilder::new()
            .add_node(custom("first"), SimpleMessageNode::new("from first"))
            .add_node(custom("second"), SimpleMessageNode::new("from second"))
            .add_edge(NodeKind::Start, custom("first"))
            .add_edge(custom("first"), custom("second"))
            .add_edge(custom("second"), NodeKind::End)
            .compile()
            .unwrap();
        let ctx = ExecutionContext::new(graph)
            .with_config(RuntimeConfig::default().with_interrupt_before(custom("second")));
        let engine = Engine::with_checkpointer(ctx, store).unwrap();

        let first = engine
            .execute("t1", ExecutionState::new_with_user_message("go"), false)
            .await
            .unwrap();
        assert_eq!(first.status, ThreadStatus::Suspended);

        let resumed = engine
            .execute("t1", ExecutionState::new_with_user_message("ignored"), true)
            .await
            .unwrap();
        assert_eq!(resumed.status, ThreadStatus::Completed);
        assert_eq!(
            resumed.state.snapshot().latest_message_text(),
            Some("from second")
        );
    }
}
