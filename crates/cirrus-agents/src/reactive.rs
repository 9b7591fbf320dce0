//! Event-driven agent.
//!
//! A [`ReactiveAgent`] owns a FIFO of [`Event`]s and a handler table keyed by
//! [`EventType`]. One background consumer drains the queue and dispatches
//! each event to every handler registered for its type; handlers run
//! concurrently and a failing handler never affects its siblings or later
//! events.

use crate::agent::{Agent, AgentStats};
use crate::config::ReactiveConfig;
use async_trait::async_trait;
use cirrus_core::{
    AgentContext, CirrusResult, Event, EventType, ExecutionPlan, ExecutionResult, PlanStep,
    StepKind, StepResult,
};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Something that reacts to events of the types it is registered for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> CirrusResult<()>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = CirrusResult<()>> + Send,
{
    async fn handle(&self, event: &Event) -> CirrusResult<()> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CirrusResult<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Registration token returned by [`ReactiveAgent::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

enum Envelope {
    Event(Event),
    Stop,
}

type HandlerTable = HashMap<EventType, Vec<(HandlerId, Arc<dyn EventHandler>)>>;

struct Shared {
    handlers: RwLock<HandlerTable>,
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    stop_requested: AtomicBool,
    processed: AtomicU64,
    poll_interval: Duration,
}

impl Shared {
    async fn consume(self: Arc<Self>) {
        let mut queue = self.queue.lock().await;
        loop {
            match timeout(self.poll_interval, queue.recv()).await {
                Err(_) => {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Ok(None) => break,
                Ok(Some(Envelope::Stop)) => {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!("Ignoring stop left over from a previous run");
                }
                Ok(Some(Envelope::Event(event))) => self.dispatch(event).await,
            }
        }
        debug!("Reactive consumer exited");
    }

    async fn dispatch(&self, event: Event) {
        let handlers = self
            .handlers
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(event_type = %event.event_type, event_id = %event.id, "No handlers, dropping event");
            self.processed.fetch_add(1, Ordering::SeqCst);
            return;
        }

        // Owned by this future: aborting the consumer drops the set, which
        // aborts every handler still in flight.
        let event = Arc::new(event);
        let mut tasks = JoinSet::new();
        for (id, handler) in handlers {
            let event = event.clone();
            tasks.spawn(async move { (id, handler.handle(&event).await) });
        }

        while let Some(outcome) = tasks.join_next().await {
            match outcome {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => warn!(
                    handler = %id,
                    event_type = %event.event_type,
                    error = %e,
                    "Event handler failed"
                ),
                Err(join_err) => error!(
                    event_type = %event.event_type,
                    error = %join_err,
                    "Event handler panicked"
                ),
            }
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Agent that reacts to emitted events on a background loop.
///
/// `execute` starts the loop and leaves it running so handlers keep firing
/// after the run; whoever holds the agent calls [`ReactiveAgent::stop`].
pub struct ReactiveAgent {
    name: String,
    context: AgentContext,
    stats: AgentStats,
    config: ReactiveConfig,
    sender: mpsc::UnboundedSender<Envelope>,
    shared: Arc<Shared>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    starts: AtomicU64,
}

impl ReactiveAgent {
    pub fn new(context: AgentContext) -> Self {
        Self::with_config(context, ReactiveConfig::default())
    }

    pub fn with_config(context: AgentContext, config: ReactiveConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: "reactive".to_string(),
            context,
            stats: AgentStats::new(),
            sender,
            shared: Arc::new(Shared {
                handlers: RwLock::new(HashMap::new()),
                queue: tokio::sync::Mutex::new(receiver),
                stop_requested: AtomicBool::new(false),
                processed: AtomicU64::new(0),
                poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            }),
            config,
            worker: tokio::sync::Mutex::new(None),
            starts: AtomicU64::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register `handler` for `event_type`. Handlers for one type keep
    /// registration order, though dispatch runs them concurrently.
    pub fn on(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(Uuid::new_v4());
        self.shared
            .handlers
            .write()
            .entry(event_type)
            .or_default()
            .push((id, handler));
        debug!(agent = %self.name, event_type = %event_type, handler = %id, "Handler registered");
        id
    }

    /// Unregister a handler. Returns whether it was registered.
    pub fn off(&self, event_type: EventType, id: HandlerId) -> bool {
        let mut handlers = self.shared.handlers.write();
        let Some(list) = handlers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() < before;
        if list.is_empty() {
            handlers.remove(&event_type);
        }
        removed
    }

    /// Enqueue an event. Never blocks; the queue is unbounded.
    pub fn emit(&self, event: Event) {
        debug!(agent = %self.name, event_type = %event.event_type, event_id = %event.id, "Event emitted");
        if self.sender.send(Envelope::Event(event)).is_err() {
            warn!(agent = %self.name, "Event queue closed, event dropped");
        }
    }

    /// Spawn the consumer unless one is already running.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(agent = %self.name, "Reactive loop already running");
            return;
        }
        self.shared.stop_requested.store(false, Ordering::SeqCst);
        *worker = Some(tokio::spawn(self.shared.clone().consume()));
        self.starts.fetch_add(1, Ordering::SeqCst);
        info!(agent = %self.name, "Reactive loop started");
    }

    /// Ask the consumer to exit, waiting up to the grace period before
    /// aborting it. A no-op when nothing is running.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(mut handle) = worker.take() else {
            return;
        };
        if handle.is_finished() {
            return;
        }

        self.shared.stop_requested.store(true, Ordering::SeqCst);
        if self.sender.send(Envelope::Stop).is_err() {
            warn!(agent = %self.name, "Event queue closed while stopping");
        }

        let grace = Duration::from_millis(self.config.stop_grace_ms);
        if timeout(grace, &mut handle).await.is_err() {
            warn!(agent = %self.name, grace_ms = self.config.stop_grace_ms, "Reactive loop did not stop in time, aborting");
            handle.abort();
            if let Err(e) = handle.await {
                debug!(agent = %self.name, error = %e, "Aborted reactive loop");
            }
        }
        info!(agent = %self.name, "Reactive loop stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Registered handler count per event type, keyed by wire name.
    pub fn handler_counts(&self) -> BTreeMap<String, usize> {
        self.shared
            .handlers
            .read()
            .iter()
            .map(|(event_type, list)| (event_type.to_string(), list.len()))
            .collect()
    }

    /// Events taken off the queue so far, including dropped ones.
    pub fn processed_events(&self) -> u64 {
        self.shared.processed.load(Ordering::SeqCst)
    }

    /// How many consumers have been spawned over this agent's lifetime.
    pub fn start_count(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }
}

fn alert_categories(goal: &str) -> Vec<&'static str> {
    let lower = goal.to_lowercase();
    [("alert", "alerts"), ("cost", "cost"), ("secur", "security")]
        .into_iter()
        .filter(|(needle, _)| lower.contains(needle))
        .map(|(_, category)| category)
        .collect()
}

#[async_trait]
impl Agent for ReactiveAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> &AgentContext {
        &self.context
    }

    fn stats(&self) -> &AgentStats {
        &self.stats
    }

    async fn plan(&self, goal: &str) -> CirrusResult<ExecutionPlan> {
        let mut args = Map::new();
        args.insert("goal".into(), json!(goal));
        args.insert("environment".into(), json!(self.context.environment.to_string()));

        let mut steps = vec![
            PlanStep::message("reactive_runtime", "Start reactive loop"),
            PlanStep::tool("configure_monitoring", "configure_monitoring", args.clone())
                .with_dependencies(vec!["reactive_runtime".into()]),
        ];

        let categories = alert_categories(goal);
        if !categories.is_empty() {
            args.insert("categories".into(), json!(categories));
            steps.push(
                PlanStep::tool("configure_alerts", "configure_alerts", args)
                    .with_dependencies(vec!["configure_monitoring".into()]),
            );
        }

        Ok(ExecutionPlan::new(steps)
            .with_metadata("goal", json!(goal))
            .with_metadata("context", self.context.snapshot()))
    }

    async fn execute(&self, plan: &ExecutionPlan) -> CirrusResult<ExecutionResult> {
        self.start().await;

        let delay = Duration::from_millis(self.config.tool_delay_ms);
        let mut step_results = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let result = match step.kind {
                StepKind::Tool => {
                    tokio::time::sleep(delay).await;
                    StepResult::success(
                        &step.name,
                        json!({
                            "configured": step.tool.as_deref().unwrap_or(&step.name),
                            "args": step.args.clone().map(Value::Object).unwrap_or(Value::Null),
                        }),
                    )
                }
                StepKind::Message => StepResult::success(
                    &step.name,
                    json!(step.content.as_deref().unwrap_or_default()),
                ),
                _ => StepResult::success(&step.name, json!({"skipped": true})),
            };
            step_results.push(result);
        }

        let success = step_results.iter().all(|s| s.success);
        let loop_active = self.is_running().await;
        let counts = self.handler_counts();
        let summary = json!({"loop_active": loop_active, "handler_counts": counts});

        let result = if success {
            ExecutionResult::success(summary)
        } else {
            ExecutionResult::failure("One or more configuration steps failed")
        };
        Ok(result
            .with_steps(step_results)
            .with_metadata("loop_active", json!(loop_active))
            .with_metadata("handler_counts", json!(counts)))
    }
}
