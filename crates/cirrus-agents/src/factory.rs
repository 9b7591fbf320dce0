//! Agent construction.
//!
//! [`AgentFactory`] maps type names to constructors and builds single
//! agents, pipelines, supervised ensembles and a few fixed topologies. It
//! owns a small cache of named instances. Nothing here runs agents.

use crate::agent::Agent;
use crate::chain::{ChainAgent, ChainLink};
use crate::config::{
    AgentConfig, EnsembleConfig, LearningConfig, ReactiveConfig, SupervisionStrategy, WorkerConfig,
};
use crate::coordinator::CoordinatorAgent;
use crate::learning::LearningAgent;
use crate::orchestrator::OrchestratorAgent;
use crate::reactive::ReactiveAgent;
use crate::supervisor::{SupervisorAgent, WorkerAgent};
use cirrus_core::{
    AgentContext, CirrusError, CirrusResult, CompletionService, ExperienceStore, ToolExecutor,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum number of cached named instances.
pub const INSTANCE_CACHE_CAPACITY: usize = 32;

/// Names accepted by [`AgentFactory::create_specialization`].
pub const SPECIALIZATIONS: &[&str] = &["deployment_pipeline", "incident_response", "self_improving"];

/// Services every constructed agent may draw on.
#[derive(Clone)]
pub struct Collaborators {
    pub completion: Arc<dyn CompletionService>,
    pub tools: Arc<dyn ToolExecutor>,
    pub memory: Arc<dyn ExperienceStore>,
    pub learning: LearningConfig,
    pub reactive: ReactiveConfig,
}

impl Collaborators {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        tools: Arc<dyn ToolExecutor>,
        memory: Arc<dyn ExperienceStore>,
    ) -> Self {
        Self {
            completion,
            tools,
            memory,
            learning: LearningConfig::default(),
            reactive: ReactiveConfig::default(),
        }
    }

    pub fn with_learning_config(mut self, learning: LearningConfig) -> Self {
        self.learning = learning;
        self
    }

    pub fn with_reactive_config(mut self, reactive: ReactiveConfig) -> Self {
        self.reactive = reactive;
        self
    }
}

/// Builds one agent from its config.
pub type AgentConstructor =
    Arc<dyn Fn(&AgentConfig, &Collaborators) -> CirrusResult<Arc<dyn Agent>> + Send + Sync>;

fn normalize(agent_type: &str) -> String {
    agent_type.trim().to_lowercase()
}

fn orchestrator(config: &AgentConfig, deps: &Collaborators) -> OrchestratorAgent {
    OrchestratorAgent::new(config.context.clone(), deps.completion.clone(), deps.tools.clone())
}

fn coordinator(config: &AgentConfig, deps: &Collaborators) -> CoordinatorAgent {
    CoordinatorAgent::new(
        Arc::new(orchestrator(config, deps).with_name(format!("{}-orchestrator", config.display_name()))),
        Arc::new(
            ReactiveAgent::with_config(config.context.clone(), deps.reactive.clone())
                .with_name(format!("{}-reactive", config.display_name())),
        ),
        deps.completion.clone(),
    )
}

fn constructor<F>(f: F) -> AgentConstructor
where
    F: Fn(&AgentConfig, &Collaborators) -> CirrusResult<Arc<dyn Agent>> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn builtin_constructors() -> HashMap<String, AgentConstructor> {
    HashMap::from([
        (
            "chain".to_string(),
            constructor(|config, _| {
                Ok(Arc::new(ChainAgent::new(config.context.clone()).with_name(config.display_name())))
            }),
        ),
        (
            "reactive".to_string(),
            constructor(|config, deps| {
                Ok(Arc::new(
                    ReactiveAgent::with_config(config.context.clone(), deps.reactive.clone())
                        .with_name(config.display_name()),
                ))
            }),
        ),
        (
            "supervisor".to_string(),
            constructor(|config, _| {
                Ok(Arc::new(
                    SupervisorAgent::new(config.context.clone(), config.strategy)
                        .with_name(config.display_name()),
                ))
            }),
        ),
        (
            "orchestrator".to_string(),
            constructor(|config, deps| {
                Ok(Arc::new(orchestrator(config, deps).with_name(config.display_name())))
            }),
        ),
        (
            "coordinator".to_string(),
            constructor(|config, deps| {
                Ok(Arc::new(coordinator(config, deps).with_name(config.display_name())))
            }),
        ),
        (
            "learning".to_string(),
            constructor(|config, deps| {
                let agent = LearningAgent::new(
                    Arc::new(orchestrator(config, deps)),
                    deps.completion.clone(),
                    deps.memory.clone(),
                    deps.learning.clone(),
                )?
                .with_name(config.display_name());
                Ok(Arc::new(agent))
            }),
        ),
    ])
}

/// Registry of agent constructors plus a bounded cache of named instances.
pub struct AgentFactory {
    collaborators: Collaborators,
    constructors: RwLock<HashMap<String, AgentConstructor>>,
    instances: Mutex<VecDeque<(String, Arc<dyn Agent>)>>,
}

impl AgentFactory {
    /// A factory knowing the built-in agent types.
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            constructors: RwLock::new(builtin_constructors()),
            instances: Mutex::new(VecDeque::new()),
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Register (or replace) the constructor for `agent_type`.
    pub fn register<F>(&self, agent_type: &str, constructor: F) -> CirrusResult<()>
    where
        F: Fn(&AgentConfig, &Collaborators) -> CirrusResult<Arc<dyn Agent>> + Send + Sync + 'static,
    {
        let key = normalize(agent_type);
        if key.is_empty() {
            return Err(CirrusError::Config("agent type must be a non-empty string".into()));
        }
        info!(agent_type = %key, "Agent type registered");
        self.constructors.write().insert(key, Arc::new(constructor));
        Ok(())
    }

    /// Registered type names, sorted.
    pub fn list_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build an agent of `agent_type` with default settings and `context`.
    pub fn create(&self, agent_type: &str, context: AgentContext) -> CirrusResult<Arc<dyn Agent>> {
        self.from_config(&AgentConfig::new(normalize(agent_type)).with_context(context))
    }

    /// Validate `config` and build the agent it describes.
    pub fn from_config(&self, config: &AgentConfig) -> CirrusResult<Arc<dyn Agent>> {
        config.validate()?;
        let key = normalize(&config.agent_type);
        let constructor = self.constructors.read().get(&key).cloned();
        let Some(constructor) = constructor else {
            warn!(agent_type = %key, "Unknown agent type requested");
            return Err(CirrusError::Config(format!(
                "Unknown agent type: '{}'. Available: {}",
                config.agent_type,
                self.list_available().join(", ")
            )));
        };
        let agent = constructor(config, &self.collaborators)?;
        debug!(agent_type = %key, agent = %agent.name(), user = %config.context.user_id, "Agent created");
        Ok(agent)
    }

    /// Return the cached instance for `(agent_type, instance_id)`, building
    /// and caching it on first use. The oldest entry is evicted when the cache
    /// is full.
    pub fn get_or_create(
        &self,
        agent_type: &str,
        instance_id: Option<&str>,
        context: AgentContext,
    ) -> CirrusResult<Arc<dyn Agent>> {
        let key = format!("{}:{}", normalize(agent_type), instance_id.unwrap_or("default"));
        if let Some((_, agent)) = self.instances.lock().iter().find(|(k, _)| *k == key) {
            debug!(key = %key, "Returning cached agent");
            return Ok(agent.clone());
        }

        let agent = self.create(agent_type, context)?;
        let mut instances = self.instances.lock();
        // Another caller may have raced us here; keep the first instance.
        if let Some((_, existing)) = instances.iter().find(|(k, _)| *k == key) {
            return Ok(existing.clone());
        }
        if instances.len() == INSTANCE_CACHE_CAPACITY {
            if let Some((evicted, _)) = instances.pop_front() {
                debug!(key = %evicted, "Evicted cached agent");
            }
        }
        instances.push_back((key, agent.clone()));
        Ok(agent)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn clear_instances(&self) {
        let mut instances = self.instances.lock();
        let count = instances.len();
        instances.clear();
        info!(count, "Cleared cached agents");
    }

    /// Chain the given agent types. Each link runs its agent with the goal
    /// found in the running value and forwards the agent's result, or the
    /// unchanged input when the agent fails.
    pub fn create_pipeline(&self, agent_types: &[&str], context: AgentContext) -> CirrusResult<ChainAgent> {
        let mut chain = ChainAgent::new(context.clone()).with_name("pipeline");
        for agent_type in agent_types {
            let agent = self.create(agent_type, context.clone())?;
            chain.add_link(ChainLink::new(
                format!("{}_link", normalize(agent_type)),
                move |data: Value| {
                    let agent = agent.clone();
                    async move {
                        let goal = match &data {
                            Value::String(s) => s.clone(),
                            other => other
                                .get("goal")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_else(|| other.to_string()),
                        };
                        let forwarded = match agent.run(&goal).await {
                            Ok(result) if result.success => result.result.unwrap_or(data),
                            Ok(result) => {
                                debug!(agent = %agent.name(), error = ?result.error, "Pipeline stage failed, forwarding input");
                                data
                            }
                            Err(e) => {
                                warn!(agent = %agent.name(), error = %e, "Pipeline stage errored, forwarding input");
                                data
                            }
                        };
                        Ok::<Value, CirrusError>(forwarded)
                    }
                },
            ));
        }
        info!(links = chain.links().len(), "Pipeline created");
        Ok(chain)
    }

    /// Build a supervisor with one worker per entry of `config.workers`.
    pub async fn create_ensemble(&self, config: &EnsembleConfig) -> CirrusResult<Arc<SupervisorAgent>> {
        let supervisor = SupervisorAgent::new(config.context.clone(), config.strategy);
        for worker in &config.workers {
            let agent = self.from_config(&worker.agent)?;
            supervisor
                .add_worker(
                    WorkerAgent::new(agent)
                        .with_skills(worker.skills().iter().cloned())
                        .with_priority(worker.priority())
                        .with_max_concurrent(worker.capacity()),
                )
                .await;
        }
        info!(workers = config.workers.len(), strategy = %config.strategy, "Ensemble created");
        Ok(Arc::new(supervisor))
    }

    /// Build one of the fixed topologies listed in [`SPECIALIZATIONS`].
    pub async fn create_specialization(
        &self,
        name: &str,
        context: AgentContext,
    ) -> CirrusResult<Arc<dyn Agent>> {
        match normalize(name).as_str() {
            "deployment_pipeline" => Ok(Arc::new(
                self.create_pipeline(&["coordinator", "reactive"], context)?
                    .with_name("deployment_pipeline"),
            )),
            "incident_response" => {
                let worker = |agent_type: &str, skills: &[&str], priority: i32| {
                    let mut worker = WorkerConfig::new(
                        AgentConfig::new(agent_type)
                            .with_context(context.clone())
                            .with_skills(skills),
                    );
                    worker.priority = Some(priority);
                    worker
                };
                let ensemble = EnsembleConfig {
                    context: context.clone(),
                    strategy: SupervisionStrategy::SkillBased,
                    workers: vec![
                        worker("coordinator", &["provisioning"], 5),
                        worker("reactive", &["monitoring", "security", "cost"], 10),
                        worker("orchestrator", &[], 0),
                    ],
                };
                let supervisor: Arc<dyn Agent> = self.create_ensemble(&ensemble).await?;
                Ok(supervisor)
            }
            "self_improving" => {
                let base_config = AgentConfig::new("coordinator").with_context(context);
                let agent = LearningAgent::new(
                    Arc::new(coordinator(&base_config, &self.collaborators)),
                    self.collaborators.completion.clone(),
                    self.collaborators.memory.clone(),
                    self.collaborators.learning.clone(),
                )?
                .with_name("self_improving");
                Ok(Arc::new(agent))
            }
            other => Err(CirrusError::Config(format!(
                "Unknown specialization: '{other}'. Available: {}",
                SPECIALIZATIONS.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use cirrus_llm::StaticCompletion;
    use cirrus_memory::InMemoryExperienceStore;

    fn factory() -> AgentFactory {
        AgentFactory::new(Collaborators::new(
            Arc::new(StaticCompletion::echo()),
            Arc::new(ToolRegistry::with_simulated_defaults()),
            Arc::new(InMemoryExperienceStore::new()),
        ))
    }

    #[test]
    fn test_builtin_types_listed() {
        assert_eq!(
            factory().list_available(),
            vec!["chain", "coordinator", "learning", "orchestrator", "reactive", "supervisor"]
        );
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let err = factory().create("wizard", AgentContext::default()).err().unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Unknown agent type: 'wizard'"));
    }

    #[test]
    fn test_type_names_are_normalized() {
        let agent = factory().create("  Orchestrator ", AgentContext::default()).unwrap();
        assert_eq!(agent.name(), "orchestrator");
    }

    #[test]
    fn test_from_config_rejects_bad_timeout() {
        let mut ctx = AgentContext::default();
        ctx.timeout_seconds = 0.0;
        let err = factory()
            .from_config(&AgentConfig::new("chain").with_context(ctx))
            .err()
            .unwrap();
        assert!(matches!(err, CirrusError::Config(_)));
    }

    #[test]
    fn test_instance_cache_reuses_and_evicts() {
        let factory = factory();
        let first = factory.get_or_create("chain", Some("a"), AgentContext::default()).unwrap();
        let again = factory.get_or_create("CHAIN", Some("a"), AgentContext::default()).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        for i in 0..INSTANCE_CACHE_CAPACITY {
            factory
                .get_or_create("chain", Some(&format!("filler-{i}")), AgentContext::default())
                .unwrap();
        }
        assert_eq!(factory.instance_count(), INSTANCE_CACHE_CAPACITY);
        let rebuilt = factory.get_or_create("chain", Some("a"), AgentContext::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));

        factory.clear_instances();
        assert_eq!(factory.instance_count(), 0);
    }

    #[test]
    fn test_custom_constructor() {
        let factory = factory();
        factory
            .register("Quiet", |config, _| {
                Ok(Arc::new(ChainAgent::new(config.context.clone()).with_name("quiet")) as Arc<dyn Agent>)
            })
            .unwrap();
        assert!(factory.list_available().contains(&"quiet".to_string()));
        let agent = factory.create("quiet", AgentContext::default()).unwrap();
        assert_eq!(agent.name(), "quiet");
        assert!(factory.register("  ", |_, _| unreachable!()).is_err());
    }

    #[tokio::test]
    async fn test_unknown_specialization() {
        let err = factory()
            .create_specialization("moon_landing", AgentContext::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("deployment_pipeline"));
    }
}
