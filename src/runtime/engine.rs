//! The execution engine.
//!
//! [`Engine`] drives threads through a compiled graph one step at a time.
//! Each step follows a fixed cycle: before-hooks, node run, merge barrier,
//! after-hooks, edge resolution, trigger pass, iteration-limit check,
//! checkpoint. Hooks and triggers can redirect a step but never corrupt it:
//! their failures are recorded as error events and the cycle proceeds.
//!
//! The engine itself is stateless between invocations; everything a thread
//! needs to continue lives in its latest checkpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;

use crate::channels::errors::{CauseChain, ErrorEvent};
use crate::event_bus::{ChannelSink, Event, EventBus, EventSink, MemorySink, StepEvent, StdOutSink, TriggerEvent};
use crate::graph::Edge;
use crate::hooks::{HookAction, HookContext, HookPhase};
use crate::node::{NodeContext, NodePartial};
use crate::reducers::ReducerError;
use crate::runtime::checkpointer::{
    Checkpoint, CheckpointMeta, Checkpointer, CheckpointerError, CheckpointReason,
    InMemoryCheckpointer,
};
use crate::runtime::config::{
    CheckpointFailurePolicy, CheckpointPolicy, CheckpointerType, SinkConfig,
};
use crate::runtime::context::ExecutionContext;
use crate::runtime::outcome::{ExecutionResult, TerminationReason, ThreadStatus};
use crate::state::{ExecutionState, StateSnapshot};
use crate::triggers::{Trigger, TriggerAction, TriggerContext};
use crate::types::NodeKind;

/// Fatal engine-level failures. Node errors are not here: they surface as
/// [`ThreadStatus::Failed`] inside a normal [`ExecutionResult`].
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("no routing function registered for tag: {tag}")]
    #[diagnostic(
        code(relaygraph::engine::unknown_router),
        help("Register the router in the RouterRegistry before building the engine.")
    )]
    UnknownRouter { tag: String },

    #[error("no trigger constructor registered for tag: {tag}")]
    #[diagnostic(
        code(relaygraph::engine::unknown_trigger_tag),
        help("Register the constructor in the TriggerRegistry before building the engine.")
    )]
    UnknownTriggerTag { tag: String },

    #[error("trigger {trigger_id} forces a transition to unknown node {node}")]
    #[diagnostic(code(relaygraph::engine::forced_target_missing))]
    ForcedTargetMissing { trigger_id: String, node: String },

    #[error("node {node} has no registered implementation")]
    #[diagnostic(code(relaygraph::engine::missing_node))]
    MissingNode { node: String },

    #[error("node {node} has no outgoing edge")]
    #[diagnostic(code(relaygraph::engine::missing_edge))]
    MissingEdge { node: String },

    #[error("no checkpoint found for thread {thread_id}")]
    #[diagnostic(
        code(relaygraph::engine::no_checkpoint),
        help("Resume requires at least one prior checkpoint; run with resume=false first.")
    )]
    NoCheckpoint { thread_id: String },

    #[error("checkpoint for thread {thread_id} references node {node}, absent from the graph")]
    #[diagnostic(
        code(relaygraph::engine::schema_mismatch),
        help("The graph changed since the checkpoint was written. Migrate or discard the thread.")
    )]
    SchemaMismatch { thread_id: String, node: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Trigger(#[from] crate::triggers::TriggerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reducer(#[from] ReducerError),
}

/// Handle returned by [`Engine::execute_streaming`]: the live event stream
/// plus the join handle resolving to the invocation's result.
pub struct StreamingExecution {
    /// Events in emission order, closed by a stream-end diagnostic.
    pub events: tokio::sync::mpsc::UnboundedReceiver<Event>,
    pub handle: tokio::task::JoinHandle<Result<ExecutionResult, EngineError>>,
}

pub struct Engine {
    ctx: ExecutionContext,
    checkpointer: Arc<dyn Checkpointer>,
    event_bus: EventBus,
    cancellations: Mutex<FxHashMap<String, Arc<AtomicBool>>>,
    // One async mutex per thread id keeps checkpoint writes for a thread
    // strictly sequential across concurrent invocations.
    thread_locks: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Engine {
    /// Build an engine with the checkpointer named in the runtime config.
    pub async fn new(ctx: ExecutionContext) -> Result<Self, EngineError> {
        ctx.validate()?;
        let checkpointer: Arc<dyn Checkpointer> = match ctx.config.checkpointer {
            CheckpointerType::InMemory => Arc::new(InMemoryCheckpointer::new()),
            #[cfg(feature = "sqlite")]
            CheckpointerType::Sqlite => {
                let db_name = ctx
                    .config
                    .sqlite_db_name
                    .clone()
                    .unwrap_or_else(|| "relaygraph.db".to_string());
                let url = format!("sqlite://{db_name}?mode=rwc");
                Arc::new(crate::runtime::checkpointer_sqlite::SqliteCheckpointer::connect(&url).await?)
            }
        };
        Ok(Self::assemble(ctx, checkpointer))
    }

    /// Build an engine around a caller-supplied checkpoint store.
    pub fn with_checkpointer(
        ctx: ExecutionContext,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Result<Self, EngineError> {
        ctx.validate()?;
        Ok(Self::assemble(ctx, checkpointer))
    }

    fn assemble(ctx: ExecutionContext, checkpointer: Arc<dyn Checkpointer>) -> Self {
        let mut sinks: Vec<Box<dyn EventSink>> = Vec::new();
        for sink in &ctx.config.event_bus.sinks {
            match sink {
                SinkConfig::StdOut => sinks.push(Box::new(StdOutSink::default())),
                SinkConfig::Memory => sinks.push(Box::new(MemorySink::new())),
            }
        }
        let event_bus = EventBus::with_sinks(sinks);
        event_bus.listen_for_events();
        Self {
            ctx,
            checkpointer,
            event_bus,
            cancellations: Mutex::new(FxHashMap::default()),
            thread_locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Attach an additional event sink, e.g. a [`MemorySink`] for assertions.
    pub fn add_sink(&self, sink: impl EventSink + 'static) {
        self.event_bus.add_sink(sink);
    }

    /// Request cooperative cancellation of a running invocation. The thread
    /// stops at the next between-step check. Returns `false` when no
    /// invocation is currently running under that id.
    pub fn cancel(&self, thread_id: &str) -> bool {
        match self.cancellations.lock().get(thread_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Run one invocation of a thread to a stopping point.
    ///
    /// With `resume` the thread continues from its latest checkpoint and
    /// `initial_state` is ignored; without it the thread starts fresh at the
    /// graph entry, appending to any checkpoint history the thread already
    /// has. Concurrent calls for the same thread id are serialized: the
    /// second waits until the first finishes.
    #[instrument(skip(self, initial_state), fields(thread_id = thread_id))]
    pub async fn execute(
        &self,
        thread_id: &str,
        initial_state: ExecutionState,
        resume: bool,
    ) -> Result<ExecutionResult, EngineError> {
        let thread_lock = {
            let mut locks = self.thread_locks.lock();
            Arc::clone(locks.entry(thread_id.to_string()).or_default())
        };
        let serial = thread_lock.lock().await;

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.cancellations
            .lock()
            .insert(thread_id.to_string(), cancel_flag.clone());
        let result = self
            .run_thread(thread_id, initial_state, resume, &cancel_flag)
            .await;
        self.cancellations.lock().remove(thread_id);

        drop(serial);
        drop(thread_lock);
        let mut locks = self.thread_locks.lock();
        if locks
            .get(thread_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(thread_id);
        }
        drop(locks);
        result
    }

    /// Run an invocation while streaming its events to the returned channel.
    ///
    /// The stream carries every bus event produced while the invocation runs
    /// and is closed by a stream-end diagnostic once the result is in.
    pub fn execute_streaming(
        self: &Arc<Self>,
        thread_id: &str,
        initial_state: ExecutionState,
        resume: bool,
    ) -> StreamingExecution {
        let (tx, events) = tokio::sync::mpsc::unbounded_channel();
        // Thread-scoped: the sink only forwards this invocation's events and
        // detaches from the bus after the stream-end below.
        self.event_bus
            .add_sink(ChannelSink::for_thread(tx, thread_id));
        let engine = Arc::clone(self);
        let thread = thread_id.to_string();
        let handle = tokio::spawn(async move {
            let result = engine.execute(&thread, initial_state, resume).await;
            let summary = match &result {
                Ok(res) => format!("thread {thread} finished: {:?}", res.status),
                Err(err) => format!("thread {thread} failed: {err}"),
            };
            let _ = engine
                .event_bus
                .get_sender()
                .send(Event::stream_end(&thread, summary));
            result
        });
        StreamingExecution { events, handle }
    }

    /// Load a checkpoint: a specific one by id, or the latest.
    pub async fn get_checkpoint(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<Checkpoint>, EngineError> {
        match checkpoint_id {
            Some(id) => self.checkpointer.load(thread_id, id).await,
            None => self.checkpointer.load_latest(thread_id).await,
        }
        .map_err(Into::into)
    }

    /// Checkpoint metadata for a thread, ordered oldest first.
    pub async fn list_checkpoints(
        &self,
        thread_id: &str,
    ) -> Result<Vec<CheckpointMeta>, EngineError> {
        self.checkpointer.list(thread_id).await.map_err(Into::into)
    }

    /// Delete a thread's checkpoints; with `before_seq`, only those strictly
    /// below it. Returns the number deleted.
    pub async fn delete_checkpoints(
        &self,
        thread_id: &str,
        before_seq: Option<u64>,
    ) -> Result<u64, EngineError> {
        self.checkpointer
            .delete(thread_id, before_seq)
            .await
            .map_err(Into::into)
    }

    /// Prune a thread's history down to the `retain` most recent checkpoints.
    pub async fn cleanup_checkpoints(
        &self,
        thread_id: &str,
        retain: usize,
    ) -> Result<u64, EngineError> {
        self.checkpointer
            .cleanup(thread_id, retain)
            .await
            .map_err(Into::into)
    }

    fn checkpoints_enabled(&self) -> bool {
        self.ctx.config.checkpoint_policy != CheckpointPolicy::Disabled
    }

    fn step_checkpoint_due(&self, step: u64) -> bool {
        match self.ctx.config.checkpoint_policy {
            CheckpointPolicy::Disabled | CheckpointPolicy::OnError => false,
            CheckpointPolicy::EveryStep => true,
            CheckpointPolicy::EveryN(n) => n > 0 && step % n == 0,
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn run_thread(
        &self,
        thread_id: &str,
        initial_state: ExecutionState,
        resume: bool,
        cancel: &AtomicBool,
    ) -> Result<ExecutionResult, EngineError> {
        let graph = &self.ctx.graph;
        let config = &self.ctx.config;
        let sender = self.event_bus.get_sender();

        let mut seq: u64;
        let mut parent_id: Option<String>;
        let mut state: ExecutionState;
        let mut next: NodeKind;
        let mut step: u64;
        let mut fired: Vec<TriggerEvent>;
        // Resume lands on the recorded next node even when it is an
        // interrupt point; suspending again immediately would loop forever.
        let mut skip_interrupt = resume;

        if resume {
            let cp = self
                .checkpointer
                .load_latest(thread_id)
                .await?
                .ok_or_else(|| EngineError::NoCheckpoint {
                    thread_id: thread_id.to_string(),
                })?;
            if !graph.contains(&cp.next_node) {
                return Err(EngineError::SchemaMismatch {
                    thread_id: thread_id.to_string(),
                    node: cp.next_node.to_string(),
                });
            }
            tracing::info!(thread_id, seq = cp.seq, step = cp.step, "resuming from checkpoint");
            seq = cp.seq;
            parent_id = Some(cp.checkpoint_id);
            state = cp.state;
            next = cp.next_node;
            step = cp.step;
            fired = cp.trigger_events;
        } else {
            // A fresh run of a thread with existing history appends to its
            // chain; seq stays monotonic per thread.
            let latest = if self.checkpoints_enabled() {
                self.checkpointer.load_latest(thread_id).await?
            } else {
                None
            };
            seq = latest.as_ref().map_or(0, |cp| cp.seq);
            parent_id = latest.map(|cp| cp.checkpoint_id);
            state = initial_state;
            next = graph.entry().clone();
            step = 0;
            fired = Vec::new();
        }

        let steps_at_start = step;
        let started = Instant::now();
        let mut consecutive_errors: u32 = 0;

        // Fresh trigger instances per invocation; their local counters never
        // leak across threads or invocations.
        let mut triggers: Vec<(Box<dyn Trigger>, TriggerAction)> =
            Vec::with_capacity(self.ctx.trigger_configs.len());
        for cfg in &self.ctx.trigger_configs {
            triggers.push((self.ctx.triggers.instantiate(cfg)?, cfg.action.clone()));
        }

        let status = loop {
            if graph.is_terminal(&next) {
                break ThreadStatus::Completed;
            }
            if cancel.load(Ordering::SeqCst) {
                if self.checkpoints_enabled() {
                    self.write_checkpoint(
                        thread_id,
                        &mut seq,
                        &mut parent_id,
                        step,
                        &state,
                        next.clone(),
                        CheckpointReason::Cancelled,
                        &fired,
                    )
                    .await?;
                }
                break ThreadStatus::Terminated {
                    reason: TerminationReason::Cancelled,
                };
            }
            if !skip_interrupt && config.interrupt_before.contains(&next) {
                if self.checkpoints_enabled() {
                    self.write_checkpoint(
                        thread_id,
                        &mut seq,
                        &mut parent_id,
                        step,
                        &state,
                        next.clone(),
                        CheckpointReason::Suspended,
                        &fired,
                    )
                    .await?;
                }
                tracing::info!(thread_id, node = %next, "thread suspended at interrupt point");
                break ThreadStatus::Suspended;
            }
            skip_interrupt = false;

            let node_kind = next.clone();
            let running_step = step + 1;
            let snapshot = state.snapshot();
            let mut hook_errors: Vec<ErrorEvent> = Vec::new();

            // Before-hooks: the first SkipNode wins; later hooks still run.
            let mut skip: Option<Option<NodePartial>> = None;
            for hook in self.ctx.hooks.hooks_for(&node_kind, HookPhase::Before) {
                let hctx = HookContext {
                    thread_id: thread_id.to_string(),
                    step: running_step,
                    node: node_kind.clone(),
                    phase: HookPhase::Before,
                    error: None,
                };
                match hook.run(&snapshot, &hctx).await {
                    Ok(HookAction::Continue) => {}
                    Ok(HookAction::SkipNode(partial)) => {
                        if skip.is_none() {
                            skip = Some(partial);
                        }
                    }
                    Ok(HookAction::OverrideNext(_)) => {
                        tracing::warn!(hook = hook.name(), "OverrideNext ignored in before phase");
                    }
                    Err(err) => {
                        tracing::warn!(hook = hook.name(), error = %err, "before hook failed");
                        hook_errors.push(ErrorEvent::hook(
                            node_kind.tag(),
                            HookPhase::Before.as_str(),
                            running_step,
                            CauseChain::msg(err.to_string()),
                        ));
                    }
                }
            }

            let run_started = Instant::now();
            let outcome = if let Some(injected) = skip {
                tracing::debug!(thread_id, node = %node_kind, "node skipped by before hook");
                Ok(injected.unwrap_or_default())
            } else {
                let node_impl =
                    graph
                        .node(&node_kind)
                        .ok_or_else(|| EngineError::MissingNode {
                            node: node_kind.to_string(),
                        })?;
                let node_ctx = NodeContext {
                    node_id: node_kind.encode(),
                    step: running_step,
                    thread_id: thread_id.to_string(),
                    event_bus_sender: sender.clone(),
                };
                node_impl.run(snapshot, node_ctx).await
            };
            let duration = run_started.elapsed();

            match outcome {
                Err(node_err) => {
                    consecutive_errors += 1;
                    let rendered = node_err.to_string();
                    tracing::warn!(thread_id, node = %node_kind, error = %rendered, "node failed");

                    // On-error hooks see the state as it was before the step.
                    let error_snapshot = state.snapshot();
                    let mut fallback: Option<NodeKind> = None;
                    for hook in self.ctx.hooks.hooks_for(&node_kind, HookPhase::OnError) {
                        let hctx = HookContext {
                            thread_id: thread_id.to_string(),
                            step: running_step,
                            node: node_kind.clone(),
                            phase: HookPhase::OnError,
                            error: Some(rendered.clone()),
                        };
                        match hook.run(&error_snapshot, &hctx).await {
                            Ok(HookAction::Continue) => {}
                            Ok(HookAction::OverrideNext(target)) => {
                                if fallback.is_some() {
                                    continue;
                                }
                                if graph.contains(&target) {
                                    fallback = Some(target);
                                } else {
                                    tracing::warn!(
                                        hook = hook.name(),
                                        target = %target,
                                        "on-error override targets unknown node"
                                    );
                                }
                            }
                            Ok(HookAction::SkipNode(_)) => {
                                tracing::warn!(
                                    hook = hook.name(),
                                    "SkipNode ignored in on-error phase"
                                );
                            }
                            Err(err) => {
                                tracing::warn!(hook = hook.name(), error = %err, "on-error hook failed");
                                hook_errors.push(ErrorEvent::hook(
                                    node_kind.tag(),
                                    HookPhase::OnError.as_str(),
                                    running_step,
                                    CauseChain::msg(err.to_string()),
                                ));
                            }
                        }
                    }

                    let mut errors = vec![ErrorEvent::node(
                        node_kind.tag(),
                        running_step,
                        CauseChain::msg(rendered.clone()),
                    )];
                    errors.append(&mut hook_errors);
                    self.ctx
                        .reducers
                        .apply_all(&mut state, &NodePartial::new().with_errors(errors))?;

                    match fallback {
                        Some(target) => {
                            step += 1;
                            let mut chosen = target;
                            let tctx = TriggerContext {
                                thread_id: thread_id.to_string(),
                                step,
                                node: node_kind.clone(),
                                last_duration: duration,
                                consecutive_errors,
                                elapsed: started.elapsed(),
                            };
                            let (forced, trigger_errors) =
                                self.run_trigger_pass(&mut triggers, &state.snapshot(), &tctx, &mut fired, &sender);
                            if !trigger_errors.is_empty() {
                                self.ctx.reducers.apply_all(
                                    &mut state,
                                    &NodePartial::new().with_errors(trigger_errors),
                                )?;
                            }
                            if let Some((_, forced_target)) = &forced {
                                chosen = forced_target.clone();
                            }
                            let _ = sender.send(Event::Step(StepEvent {
                                thread_id: thread_id.to_string(),
                                step,
                                node: node_kind.encode(),
                                next: chosen.encode(),
                                duration_ms: duration.as_millis() as u64,
                            }));
                            if self.checkpoints_enabled() {
                                self.write_checkpoint(
                                    thread_id,
                                    &mut seq,
                                    &mut parent_id,
                                    step,
                                    &state,
                                    chosen.clone(),
                                    CheckpointReason::Error,
                                    &fired,
                                )
                                .await?;
                            }
                            if step - steps_at_start >= config.max_iterations
                                && !graph.is_terminal(&chosen)
                            {
                                break ThreadStatus::Terminated {
                                    reason: TerminationReason::IterationLimit,
                                };
                            }
                            next = chosen;
                        }
                        None => {
                            step += 1;
                            // Record the failed node as next so a resume
                            // retries it.
                            if self.checkpoints_enabled() {
                                self.write_checkpoint(
                                    thread_id,
                                    &mut seq,
                                    &mut parent_id,
                                    step,
                                    &state,
                                    node_kind.clone(),
                                    CheckpointReason::Error,
                                    &fired,
                                )
                                .await?;
                            }
                            break ThreadStatus::Failed {
                                node: node_kind,
                                error: rendered,
                            };
                        }
                    }
                }
                Ok(mut partial) => {
                    consecutive_errors = 0;
                    if !hook_errors.is_empty() {
                        partial
                            .errors
                            .get_or_insert_with(Vec::new)
                            .append(&mut hook_errors);
                    }
                    self.ctx.reducers.apply_all(&mut state, &partial)?;

                    // After-hooks observe the merged state; the first valid
                    // OverrideNext wins.
                    let merged_snapshot = state.snapshot();
                    let mut override_next: Option<NodeKind> = None;
                    let mut after_errors: Vec<ErrorEvent> = Vec::new();
                    for hook in self.ctx.hooks.hooks_for(&node_kind, HookPhase::After) {
                        let hctx = HookContext {
                            thread_id: thread_id.to_string(),
                            step: running_step,
                            node: node_kind.clone(),
                            phase: HookPhase::After,
                            error: None,
                        };
                        match hook.run(&merged_snapshot, &hctx).await {
                            Ok(HookAction::Continue) => {}
                            Ok(HookAction::OverrideNext(target)) => {
                                if override_next.is_some() {
                                    continue;
                                }
                                if graph.contains(&target) {
                                    override_next = Some(target);
                                } else {
                                    tracing::warn!(
                                        hook = hook.name(),
                                        target = %target,
                                        "after override targets unknown node"
                                    );
                                }
                            }
                            Ok(HookAction::SkipNode(_)) => {
                                tracing::warn!(
                                    hook = hook.name(),
                                    "SkipNode ignored in after phase"
                                );
                            }
                            Err(err) => {
                                tracing::warn!(hook = hook.name(), error = %err, "after hook failed");
                                after_errors.push(ErrorEvent::hook(
                                    node_kind.tag(),
                                    HookPhase::After.as_str(),
                                    running_step,
                                    CauseChain::msg(err.to_string()),
                                ));
                            }
                        }
                    }
                    if !after_errors.is_empty() {
                        self.ctx
                            .reducers
                            .apply_all(&mut state, &NodePartial::new().with_errors(after_errors))?;
                    }

                    let resolved = self.resolve_edge(&node_kind, &merged_snapshot)?;
                    let mut chosen = override_next.unwrap_or(resolved);
                    step += 1;

                    let tctx = TriggerContext {
                        thread_id: thread_id.to_string(),
                        step,
                        node: node_kind.clone(),
                        last_duration: duration,
                        consecutive_errors,
                        elapsed: started.elapsed(),
                    };
                    let (forced, trigger_errors) =
                        self.run_trigger_pass(&mut triggers, &state.snapshot(), &tctx, &mut fired, &sender);
                    if !trigger_errors.is_empty() {
                        self.ctx
                            .reducers
                            .apply_all(&mut state, &NodePartial::new().with_errors(trigger_errors))?;
                    }
                    // Forced transitions beat both the resolved edge and
                    // after-hook overrides.
                    if let Some((_, target)) = &forced {
                        chosen = target.clone();
                    }

                    let _ = sender.send(Event::Step(StepEvent {
                        thread_id: thread_id.to_string(),
                        step,
                        node: node_kind.encode(),
                        next: chosen.encode(),
                        duration_ms: duration.as_millis() as u64,
                    }));

                    if let Some((trigger_id, _)) = forced {
                        if self.checkpoints_enabled() {
                            self.write_checkpoint(
                                thread_id,
                                &mut seq,
                                &mut parent_id,
                                step,
                                &state,
                                chosen.clone(),
                                CheckpointReason::TriggerForced { trigger_id },
                                &fired,
                            )
                            .await?;
                        }
                    } else if self.step_checkpoint_due(step) {
                        self.write_checkpoint(
                            thread_id,
                            &mut seq,
                            &mut parent_id,
                            step,
                            &state,
                            chosen.clone(),
                            CheckpointReason::Step,
                            &fired,
                        )
                        .await?;
                    }

                    if step - steps_at_start >= config.max_iterations
                        && !graph.is_terminal(&chosen)
                    {
                        tracing::warn!(thread_id, step, "iteration limit reached");
                        break ThreadStatus::Terminated {
                            reason: TerminationReason::IterationLimit,
                        };
                    }
                    next = chosen;
                }
            }
        };

        let result = ExecutionResult {
            thread_id: thread_id.to_string(),
            status,
            state,
            trigger_events: fired,
            steps: step - steps_at_start,
        };
        tracing::info!(thread_id, steps = result.steps, status = ?result.status, "invocation finished");
        Ok(result)
    }

    /// One post-step trigger pass. Every configured trigger is evaluated;
    /// the first firing force-transition trigger decides the transition.
    /// Evaluation errors skip the trigger for this cycle only.
    fn run_trigger_pass(
        &self,
        triggers: &mut [(Box<dyn Trigger>, TriggerAction)],
        snapshot: &StateSnapshot,
        tctx: &TriggerContext,
        fired: &mut Vec<TriggerEvent>,
        sender: &flume::Sender<Event>,
    ) -> (Option<(String, NodeKind)>, Vec<ErrorEvent>) {
        let mut forced: Option<(String, NodeKind)> = None;
        let mut errors: Vec<ErrorEvent> = Vec::new();
        for (trigger, action) in triggers.iter_mut() {
            match trigger.evaluate(snapshot, tctx) {
                Ok(Some(payload)) => {
                    let event = TriggerEvent::new(
                        trigger.id(),
                        tctx.thread_id.clone(),
                        tctx.node.encode(),
                        payload,
                    );
                    tracing::info!(trigger_id = trigger.id(), node = %tctx.node, "trigger fired");
                    fired.push(event.clone());
                    let _ = sender.send(Event::Trigger(event));
                    if let TriggerAction::ForceTransition(target) = action
                        && forced.is_none()
                    {
                        if self.ctx.graph.contains(target) {
                            forced = Some((trigger.id().to_string(), target.clone()));
                        } else {
                            tracing::warn!(
                                trigger_id = trigger.id(),
                                target = %target,
                                "forced transition targets unknown node"
                            );
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(trigger_id = trigger.id(), error = %err, "trigger evaluation failed");
                    errors.push(ErrorEvent::trigger(
                        trigger.id(),
                        tctx.step,
                        CauseChain::msg(err.to_string()),
                    ));
                }
            }
        }
        (forced, errors)
    }

    /// Resolve the outgoing edge of a node against the merged snapshot.
    fn resolve_edge(
        &self,
        node: &NodeKind,
        snapshot: &StateSnapshot,
    ) -> Result<NodeKind, EngineError> {
        let edge = self
            .ctx
            .graph
            .edge(node)
            .ok_or_else(|| EngineError::MissingEdge {
                node: node.to_string(),
            })?;
        Ok(match edge {
            Edge::Direct(target) => target.clone(),
            Edge::Conditional { branches, default } => branches
                .iter()
                .find(|(predicate, _)| predicate(snapshot))
                .map_or_else(|| default.clone(), |(_, target)| target.clone()),
            Edge::Routed {
                router,
                params,
                fallback,
            } => match self.ctx.routers.get(router) {
                // Validated at engine construction; kept as a fallback path.
                None => {
                    tracing::warn!(router, "router missing at run time");
                    fallback.clone()
                }
                Some(routing) => match routing.route(snapshot, params) {
                    Ok(target) if self.ctx.graph.contains(&target) => target,
                    Ok(target) => {
                        tracing::warn!(router, target = %target, "router selected unknown node");
                        fallback.clone()
                    }
                    Err(err) => {
                        tracing::warn!(router, error = %err, "routing failed");
                        fallback.clone()
                    }
                },
            },
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_checkpoint(
        &self,
        thread_id: &str,
        seq: &mut u64,
        parent_id: &mut Option<String>,
        step: u64,
        state: &ExecutionState,
        next_node: NodeKind,
        reason: CheckpointReason,
        fired: &[TriggerEvent],
    ) -> Result<(), EngineError> {
        *seq += 1;
        let checkpoint = Checkpoint::next_in_chain(
            thread_id,
            *seq,
            parent_id.clone(),
            step,
            state,
            next_node,
            reason,
            fired.to_vec(),
        );
        let id = checkpoint.checkpoint_id.clone();
        match self.checkpointer.save(checkpoint).await {
            Ok(()) => {
                *parent_id = Some(id);
                Ok(())
            }
            Err(err) => match self.ctx.config.checkpoint_failure_policy {
                CheckpointFailurePolicy::Abort => Err(err.into()),
                CheckpointFailurePolicy::Warn => {
                    tracing::warn!(thread_id, error = %err, "checkpoint write failed; continuing");
                    *seq -= 1;
                    Ok(())
                }
            },
        }
    }
}
