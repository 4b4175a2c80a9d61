//! Ports implemented by the infrastructure layer.
//!
//! Services depend on these traits so the pipeline can be exercised
//! end-to-end against in-memory doubles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};

use crate::domain::error::{BrokerError, OpenStackError, PluginError, SlaError};
use crate::domain::models::action::Action;
use crate::domain::models::config::BrokerTargetConfig;
use crate::domain::models::journal::JournalType;
use crate::domain::models::plugin::PluginInput;

/// A decision module. One instance serves exactly one invocation.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn weight(&self) -> i64;

    /// Re-score and/or re-order the candidate actions. A returned action
    /// with score -1 is a veto.
    async fn run(&self, input: PluginInput) -> Result<Vec<Action>, PluginError>;
}

/// The shared embedded plugin runtime.
///
/// The runtime is not re-entrant across threads: every embedded plugin
/// execution holds the process-wide lock for its full duration. Script
/// plugins never touch it and run truly concurrently.
pub struct EmbeddedRuntime {
    classpath: String,
    lock: Mutex<()>,
    started: AtomicBool,
}

impl EmbeddedRuntime {
    pub fn new(classpath: String) -> Self {
        Self {
            classpath,
            lock: Mutex::new(()),
            started: AtomicBool::new(false),
        }
    }

    pub fn classpath(&self) -> &str {
        &self.classpath
    }

    /// Mark the runtime started. Returns false if it already was.
    pub fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    /// Acquire exclusive use of the runtime.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

/// Creates plugin instances for the manager's discovered inventory.
pub trait PluginSpawner: Send + Sync {
    /// A script plugin executed out of process.
    fn script(&self, name: &str, path: &std::path::Path, weight: i64) -> Box<dyn Plugin>;

    /// An embedded-runtime plugin serialized on the shared runtime lock.
    fn embedded(
        &self,
        name: &str,
        runtime: Arc<EmbeddedRuntime>,
        weight: i64,
    ) -> Box<dyn Plugin>;
}

/// Append-only lifecycle journal.
///
/// Implementations must swallow their own failures: the pipeline never
/// blocks on, or fails because of, a journal write.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, log_type: JournalType, stack_id: &str, details: Value);
}

/// Factory for ephemeral broker connections.
#[async_trait]
pub trait OutboundBroker: Send + Sync {
    async fn open(&self, target: &BrokerTargetConfig)
        -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// One open channel to a broker target.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
    async fn close(&self);
}

/// Publishes replies to the orchestration-template resource, keyed by
/// resource id.
#[async_trait]
pub trait HeatReplyPublisher: Send + Sync {
    async fn publish_to_heat_resource(
        &self,
        resource_id: &str,
        message: String,
    ) -> Result<(), BrokerError>;
}

/// SLA enforcement API.
#[async_trait]
pub trait SlaApi: Send + Sync {
    async fn start_enforcement(&self, agreement_id: &str) -> Result<(), SlaError>;
}

/// A hypervisor host and the servers currently placed on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypervisorHost {
    pub hostname: String,
    pub server_ids: Vec<String>,
}

/// Compute API surface the enactor needs.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn live_migrate(&self, server_id: &str, host: &str) -> Result<(), OpenStackError>;
    async fn resize(&self, server_id: &str, flavor_id: &str) -> Result<(), OpenStackError>;
    async fn start_server(&self, server_id: &str) -> Result<(), OpenStackError>;
    async fn stop_server(&self, server_id: &str) -> Result<(), OpenStackError>;

    /// The instance's current power state code, or an error when it
    /// cannot be determined.
    async fn server_power_state(&self, server_id: &str) -> Result<i64, OpenStackError>;

    /// Flavor id for an exact flavor name, if one exists.
    async fn flavor_id_by_name(&self, name: &str) -> Result<Option<String>, OpenStackError>;

    /// Hypervisors matching a hostname pattern, with their servers.
    async fn hypervisor_servers(
        &self,
        host_pattern: &str,
    ) -> Result<Vec<HypervisorHost>, OpenStackError>;
}

/// Orchestration API surface the enactor needs.
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    async fn stack_status(&self, stack_id: &str) -> Result<String, OpenStackError>;
    async fn stack_template(&self, stack_id: &str) -> Result<Value, OpenStackError>;
    async fn update_stack_template(
        &self,
        stack_id: &str,
        template_yaml: String,
    ) -> Result<(), OpenStackError>;
}

/// A tenant known to the identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: String,
    pub name: String,
}

/// A stack as listed by the orchestration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSummary {
    pub id: String,
    pub name: String,
}

/// A resource within a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackResource {
    pub resource_name: String,
    pub resource_type: String,
    pub physical_resource_id: String,
}

/// Read-only inventory walk used for state recovery.
#[async_trait]
pub trait CloudInventory: Send + Sync {
    async fn tenants(&self) -> Result<Vec<Tenant>, OpenStackError>;
    async fn stacks(&self, tenant: &Tenant) -> Result<Vec<StackSummary>, OpenStackError>;
    async fn resources(
        &self,
        tenant: &Tenant,
        stack_id: &str,
    ) -> Result<Vec<StackResource>, OpenStackError>;
    async fn stack_template(
        &self,
        tenant: &Tenant,
        stack_id: &str,
    ) -> Result<Value, OpenStackError>;
}

/// Best-effort VM-to-hypervisor location snapshots for journal entries.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Returns `None` rather than an error when the mapping cannot be
    /// obtained.
    async fn stack_location(&self, stack_id: &str) -> Option<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn embedded_runtime_serializes_its_users() {
        let runtime = Arc::new(EmbeddedRuntime::new("a.jar:b.jar".into()));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let runtime = runtime.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = runtime.exclusive().await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Only one embedded plugin may be attached at a time.
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runtime_starts_exactly_once() {
        let runtime = EmbeddedRuntime::new(String::new());
        assert!(runtime.mark_started());
        assert!(!runtime.mark_started());
    }
}
