//! Shared test doubles: an in-memory journal, a recording broker, a
//! scripted plugin spawner, and stubbed infrastructure APIs wired into
//! a full pipeline.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use adaptation_engine::domain::error::{BrokerError, OpenStackError, PluginError};
use adaptation_engine::domain::models::action::Action;
use adaptation_engine::domain::models::config::BrokerTargetConfig;
use adaptation_engine::domain::models::journal::JournalType;
use adaptation_engine::domain::models::plugin::PluginInput;
use adaptation_engine::domain::ports::{
    BrokerChannel, ComputeApi, EmbeddedRuntime, HeatReplyPublisher, HypervisorHost, Journal,
    OrchestrationApi, OutboundBroker, Plugin, PluginSpawner,
};
use adaptation_engine::services::{
    Enactor, EventRouter, PluginManager, PollSettings, ResourceRegistry,
};

/// Journal recording entries in memory.
#[derive(Default)]
pub struct MemoryJournal {
    pub entries: Mutex<Vec<(JournalType, String, Value)>>,
}

impl MemoryJournal {
    pub fn types_for(&self, stack_id: &str) -> Vec<JournalType> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, stack, _)| stack == stack_id)
            .map(|(log_type, _, _)| *log_type)
            .collect()
    }

    pub fn details_of(&self, wanted: JournalType) -> Vec<Value> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(log_type, _, _)| *log_type == wanted)
            .map(|(_, _, details)| details.clone())
            .collect()
    }

    pub fn count_of(&self, wanted: JournalType) -> usize {
        self.details_of(wanted).len()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, log_type: JournalType, stack_id: &str, details: Value) {
        self.entries
            .lock()
            .unwrap()
            .push((log_type, stack_id.to_owned(), details));
    }
}

/// Broker double recording every publish as (exchange, key, payload).
pub type Published = Arc<Mutex<Vec<(String, String, Vec<u8>)>>>;

pub struct MemoryBroker {
    pub published: Published,
}

struct MemoryChannel {
    exchange: String,
    published: Published,
}

#[async_trait]
impl OutboundBroker for MemoryBroker {
    async fn open(
        &self,
        target: &BrokerTargetConfig,
    ) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        Ok(Box::new(MemoryChannel {
            exchange: target.exchange.clone(),
            published: self.published.clone(),
        }))
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((self.exchange.clone(), key.to_owned(), payload));
        Ok(())
    }
    async fn close(&self) {}
}

#[derive(Default)]
pub struct MemoryHeatReply {
    pub replies: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl HeatReplyPublisher for MemoryHeatReply {
    async fn publish_to_heat_resource(
        &self,
        resource_id: &str,
        message: String,
    ) -> Result<(), BrokerError> {
        self.replies
            .lock()
            .unwrap()
            .push((resource_id.to_owned(), message));
        Ok(())
    }
}

/// Compute API double: start/stop mutate a power-state map, migrations
/// are confirmed when a placement was pre-seeded.
#[derive(Default)]
pub struct MemoryCompute {
    pub power_states: Mutex<HashMap<String, i64>>,
    pub placements: Mutex<Vec<HypervisorHost>>,
    pub flavors: Mutex<HashMap<String, String>>,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ComputeApi for MemoryCompute {
    async fn live_migrate(&self, server_id: &str, host: &str) -> Result<(), OpenStackError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("migrate:{server_id}->{host}"));
        Ok(())
    }
    async fn resize(&self, server_id: &str, flavor_id: &str) -> Result<(), OpenStackError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("resize:{server_id}:{flavor_id}"));
        Ok(())
    }
    async fn start_server(&self, server_id: &str) -> Result<(), OpenStackError> {
        self.calls.lock().unwrap().push(format!("start:{server_id}"));
        self.power_states
            .lock()
            .unwrap()
            .insert(server_id.to_owned(), 1);
        Ok(())
    }
    async fn stop_server(&self, server_id: &str) -> Result<(), OpenStackError> {
        self.calls.lock().unwrap().push(format!("stop:{server_id}"));
        self.power_states
            .lock()
            .unwrap()
            .insert(server_id.to_owned(), 4);
        Ok(())
    }
    async fn server_power_state(&self, server_id: &str) -> Result<i64, OpenStackError> {
        self.power_states
            .lock()
            .unwrap()
            .get(server_id)
            .copied()
            .ok_or_else(|| OpenStackError::Malformed("unknown server".into()))
    }
    async fn flavor_id_by_name(&self, name: &str) -> Result<Option<String>, OpenStackError> {
        Ok(self.flavors.lock().unwrap().get(name).cloned())
    }
    async fn hypervisor_servers(
        &self,
        _host_pattern: &str,
    ) -> Result<Vec<HypervisorHost>, OpenStackError> {
        Ok(self.placements.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MemoryOrchestration {
    pub status: Mutex<String>,
    pub template: Mutex<Value>,
    pub updates: Mutex<Vec<String>>,
}

#[async_trait]
impl OrchestrationApi for MemoryOrchestration {
    async fn stack_status(&self, _stack_id: &str) -> Result<String, OpenStackError> {
        Ok(self.status.lock().unwrap().clone())
    }
    async fn stack_template(&self, _stack_id: &str) -> Result<Value, OpenStackError> {
        Ok(self.template.lock().unwrap().clone())
    }
    async fn update_stack_template(
        &self,
        _stack_id: &str,
        template_yaml: String,
    ) -> Result<(), OpenStackError> {
        self.updates.lock().unwrap().push(template_yaml);
        Ok(())
    }
}

/// Scripted behavior for one named plugin.
#[derive(Clone)]
pub struct Script {
    pub delay: Duration,
    pub output: Result<Vec<Action>, String>,
    pub weight: i64,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            output: Ok(vec![]),
            weight: 1,
        }
    }
}

struct ScriptedPlugin {
    name: String,
    script: Script,
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }
    fn weight(&self) -> i64 {
        self.script.weight
    }
    async fn run(&self, _input: PluginInput) -> Result<Vec<Action>, PluginError> {
        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
        self.script.output.clone().map_err(PluginError::Failed)
    }
}

pub struct ScriptedSpawner {
    scripts: HashMap<String, Script>,
}

impl PluginSpawner for ScriptedSpawner {
    fn script(&self, name: &str, _path: &Path, _weight: i64) -> Box<dyn Plugin> {
        Box::new(ScriptedPlugin {
            name: name.to_owned(),
            script: self.scripts.get(name).cloned().unwrap_or_default(),
        })
    }
    fn embedded(
        &self,
        name: &str,
        _runtime: Arc<EmbeddedRuntime>,
        _weight: i64,
    ) -> Box<dyn Plugin> {
        self.script(name, Path::new(""), 0)
    }
}

/// A fully wired pipeline over in-memory doubles.
pub struct Pipeline {
    pub router: Arc<EventRouter>,
    pub registry: Arc<ResourceRegistry>,
    pub journal: Arc<MemoryJournal>,
    pub published: Published,
    pub compute: Arc<MemoryCompute>,
    pub orchestration: Arc<MemoryOrchestration>,
    pub heat_replies: Arc<MemoryHeatReply>,
    _plugin_dir: tempfile::TempDir,
}

/// Build a pipeline whose plugin manager knows the given scripted
/// plugins and rounds.
pub async fn pipeline(
    scripts: Vec<(&str, Script)>,
    grouping: Vec<Vec<String>>,
    plugin_timeout: Duration,
) -> Pipeline {
    let journal = Arc::new(MemoryJournal::default());
    let published: Published = Arc::default();
    let compute = Arc::new(MemoryCompute::default());
    let orchestration = Arc::new(MemoryOrchestration::default());
    let heat_replies = Arc::new(MemoryHeatReply::default());

    let registry = Arc::new(ResourceRegistry::new(
        heat_replies.clone(),
        None,
        journal.clone(),
    ));

    // Back the scripted plugins with real on-disk discovery.
    let plugin_dir = tempfile::tempdir().unwrap();
    for (name, _) in &scripts {
        let dir = plugin_dir.path().join(name);
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join(format!("{name}.py")), "# plugin").unwrap();
    }
    let plugins_config = adaptation_engine::domain::models::config::PluginsConfig {
        python: plugin_dir.path().display().to_string(),
        java: "/nonexistent".into(),
        ..Default::default()
    };
    let spawner = ScriptedSpawner {
        scripts: scripts
            .into_iter()
            .map(|(name, script)| (name.to_owned(), script))
            .collect(),
    };
    let plugin_manager = Arc::new(PluginManager::discover(&plugins_config, Arc::new(spawner)));

    let target = |exchange: &str, key: &str| BrokerTargetConfig {
        exchange: exchange.into(),
        key: key.into(),
        ..Default::default()
    };

    let enactor = Arc::new(Enactor::new(
        compute.clone(),
        orchestration.clone(),
        Arc::new(MemoryBroker {
            published: published.clone(),
        }),
        journal.clone(),
        target("openstack", "openstack_event.key"),
        target("feedback", "app_feedback.key"),
        target("adaptation", "mq.outbound"),
        PollSettings {
            retries: 2,
            migrate_interval: Duration::from_millis(1),
            stack_interval: Duration::from_millis(1),
            start_interval: Duration::from_millis(1),
            stop_interval: Duration::from_millis(1),
        },
    ));

    let router = Arc::new(EventRouter::new(
        registry.clone(),
        plugin_manager,
        enactor,
        journal.clone(),
        grouping,
        plugin_timeout,
    ));

    Pipeline {
        router,
        registry,
        journal,
        published,
        compute,
        orchestration,
        heat_replies,
        _plugin_dir: plugin_dir,
    }
}

impl Pipeline {
    /// Register an adaptation response through the real create path.
    pub async fn register(&self, stack_id: &str, event_name: &str, actions: Vec<&str>) {
        self.registry
            .handle_message(&json!({
                "heat": {
                    "type": "heat_create",
                    "data": {
                        "resource_id": format!("res-{stack_id}-{event_name}"),
                        "stack_id": stack_id,
                        "name": event_name,
                        "actions": actions,
                    }
                }
            }))
            .await;
    }

    /// Deliver one raw event message to the router.
    pub async fn send_event(&self, stack_id: &str, event_name: &str, machines: Value) {
        let message = event_message(stack_id, event_name, machines);
        self.router.on_message(message.to_string().as_bytes()).await;
    }

    /// Wait until no stack is locked any more.
    pub async fn wait_idle(&self) {
        wait_until(Duration::from_secs(5), || {
            let router = self.router.clone();
            async move { router.locked_count().await == 0 }
        })
        .await;
    }
}

/// A well-formed inbound event message.
pub fn event_message(stack_id: &str, event_name: &str, machines: Value) -> Value {
    json!({
        "id": {
            "user_id": "user-1",
            "tenant": "tenant-1",
            "stack_id": stack_id,
            "source": "monitor",
            "instance": "inst-1",
            "context": "test",
            "machines": machines,
        },
        "timestamp": 1_458_208_754.0,
        "event": {"name": event_name, "value": 97.5},
        "data": [],
    })
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// An action with a score, for scripted plugin outputs.
pub fn scored(kind: adaptation_engine::domain::models::action::ActionKind, score: i64) -> Action {
    let mut action = Action::new(kind);
    action.score = score;
    action
}
