//! Active-resource registry.
//!
//! The engine's long-lived picture of what is deployed: which
//! (stack, event) pairs have an adaptation response configured, what
//! actions they allow, and which VMs belong to which stack. Hydrated at
//! startup by walking the orchestration API, then mutated only by
//! create/delete messages from the template resource.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::domain::models::action::Action;
use crate::domain::models::journal::JournalType;
use crate::domain::models::resource::{AgreementTarget, ResourceEntry, ScaleOutTemplate};
use crate::domain::ports::{CloudInventory, HeatReplyPublisher, Journal, SlaApi, Tenant};

/// Resource type of the adaptation response in stack templates.
const ADAPTATION_RESPONSE_TYPE: &str = "AdaptationEngine::Heat::AdaptationResponse";
/// Resource type of plain VMs.
const SERVER_TYPE: &str = "OS::Nova::Server";

/// Shared catalog of configured adaptation responses and active VMs.
pub struct ResourceRegistry {
    /// Entries keyed by physical resource id.
    entries: RwLock<HashMap<String, ResourceEntry>>,
    /// VM resource ids per stack.
    active_vms: RwLock<HashMap<String, Vec<String>>>,
    reply: Arc<dyn HeatReplyPublisher>,
    sla: Option<Arc<dyn SlaApi>>,
    journal: Arc<dyn Journal>,
}

impl ResourceRegistry {
    pub fn new(
        reply: Arc<dyn HeatReplyPublisher>,
        sla: Option<Arc<dyn SlaApi>>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            active_vms: RwLock::new(HashMap::new()),
            reply,
            sla,
            journal,
        }
    }

    /// Rebuild state from the deployed stacks.
    ///
    /// Walks tenants, their stacks, and each stack's resources. Access
    /// failures at any level are logged and skipped; recovery itself
    /// never fails.
    pub async fn recover_state(&self, inventory: &dyn CloudInventory) {
        info!("trying to recover stack / resource state");

        let tenants = match inventory.tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(error = %e, "could not connect to infrastructure to recover state");
                return;
            }
        };

        for tenant in tenants {
            let stacks = match inventory.stacks(&tenant).await {
                Ok(stacks) => stacks,
                Err(e) => {
                    warn!(tenant = %tenant.name, error = %e, "not able to recover state for tenant");
                    continue;
                }
            };

            for stack in stacks {
                match self.recover_stack(inventory, &tenant, &stack.id).await {
                    Ok(()) => info!(stack = %stack.id, tenant = %tenant.name, "recovered stack"),
                    Err(e) => warn!(
                        stack = %stack.id,
                        tenant = %tenant.name,
                        error = %e,
                        "tenant cannot access resources of stack"
                    ),
                }
            }
            info!(tenant = %tenant.name, "recovered state for tenant");
        }

        self.journal_stack_list().await;
        debug!(entries = self.entries.read().await.len(), "state recovery finished");
    }

    async fn recover_stack(
        &self,
        inventory: &dyn CloudInventory,
        tenant: &Tenant,
        stack_id: &str,
    ) -> Result<(), crate::domain::error::OpenStackError> {
        self.active_vms
            .write()
            .await
            .insert(stack_id.to_owned(), Vec::new());

        for resource in inventory.resources(tenant, stack_id).await? {
            if resource.resource_type == ADAPTATION_RESPONSE_TYPE {
                let template = inventory.stack_template(tenant, stack_id).await?;
                let properties = template
                    .get("resources")
                    .and_then(|r| r.get(&resource.resource_name))
                    .and_then(|r| r.get("properties"))
                    .cloned()
                    .unwrap_or(Value::Null);

                if let Some(entry) = parse_template_properties(stack_id, &properties) {
                    self.insert_entry(resource.physical_resource_id.clone(), entry)
                        .await;
                } else {
                    warn!(
                        resource = %resource.resource_name,
                        stack = %stack_id,
                        "adaptation response properties not understood, skipping"
                    );
                }
            } else if resource.resource_type == SERVER_TYPE {
                self.active_vms
                    .write()
                    .await
                    .entry(stack_id.to_owned())
                    .or_default()
                    .push(resource.physical_resource_id.clone());
            }
        }

        Ok(())
    }

    /// Allowed actions for this (event, stack) pair, if configured.
    pub async fn initial_actions(&self, event_name: &str, stack_id: &str) -> Option<Vec<Action>> {
        self.resource(event_name, stack_id).await.map(|r| r.actions)
    }

    /// The full registry record for this (event, stack) pair.
    pub async fn resource(&self, event_name: &str, stack_id: &str) -> Option<ResourceEntry> {
        self.entries
            .read()
            .await
            .values()
            .find(|r| r.stack_id == stack_id && r.event_name == event_name)
            .cloned()
    }

    /// Point-in-time copy of the agreement map.
    pub async fn agreement_map(&self) -> HashMap<String, AgreementTarget> {
        self.entries
            .read()
            .await
            .values()
            .filter_map(|entry| {
                entry.agreement_id.as_ref().map(|id| {
                    (
                        id.clone(),
                        AgreementTarget {
                            stack_id: entry.stack_id.clone(),
                            event_name: entry.event_name.clone(),
                        },
                    )
                })
            })
            .collect()
    }

    /// Handle one message from the orchestration-template resource.
    ///
    /// Every recognised message gets exactly one reply, keyed by its
    /// resource id.
    pub async fn handle_message(&self, message: &Value) {
        let Some(heat) = message.get("heat") else {
            error!("heat message missing heat envelope");
            return;
        };
        let Some(msg_type) = heat.get("type").and_then(Value::as_str) else {
            error!("heat message missing type");
            return;
        };
        let data = heat.get("data").cloned().unwrap_or(Value::Null);
        let Some(resource_id) = data.get("resource_id").and_then(Value::as_str) else {
            error!(msg_type, "heat message missing resource_id");
            return;
        };

        info!(msg_type, resource_id, "got heat message");
        match msg_type {
            "heat_create" => self.handle_create(resource_id, &data).await,
            "heat_check_create_complete" => {
                self.reply_to(resource_id, json!({"response": true})).await;
            }
            "heat_delete" => self.handle_delete(resource_id).await,
            "heat_query" => self.handle_query(resource_id).await,
            other => error!(msg_type = other, "unrecognised heat message type"),
        }
    }

    async fn handle_create(&self, resource_id: &str, data: &Value) {
        let (Some(stack_id), Some(event_name)) = (
            data.get("stack_id").and_then(Value::as_str),
            data.get("name").and_then(Value::as_str),
        ) else {
            error!(resource_id, "heat_create missing stack_id or name");
            return;
        };

        let mut actions = Vec::new();
        for raw in data
            .get("actions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
        {
            match Action::from_kind_json(&raw) {
                Ok(action) => actions.push(action),
                Err(e) => {
                    error!(resource_id, error = %e, "heat_create carries invalid action");
                    return;
                }
            }
        }

        let agreement_id = data
            .get("agreement_id")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let entry = ResourceEntry {
            stack_id: stack_id.to_owned(),
            event_name: event_name.to_owned(),
            agreement_id: agreement_id.clone(),
            actions: actions.clone(),
            embargo_secs: data.get("embargo").and_then(Value::as_u64).unwrap_or(0),
            plugin_blacklist: data
                .get("blacklist")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            horizontal_scale_out: ScaleOutTemplate::from_json(data.get("horizontal_scale_out")),
        };

        debug!(stack_id, event_name, ?agreement_id, "adding to active resources");
        self.insert_entry(resource_id.to_owned(), entry).await;
        self.journal_stack_list().await;

        if let (Some(sla), Some(agreement_id)) = (&self.sla, &agreement_id) {
            // Best effort: the SLA service may not know the agreement yet.
            if let Err(e) = sla.start_enforcement(agreement_id).await {
                info!(agreement_id, error = %e, "SLA enforcement start failed");
            }
        }

        self.journal
            .append(
                JournalType::AdaptationResponseCreated,
                stack_id,
                json!({
                    "name": event_name,
                    "allowed_actions": actions.iter().map(Action::to_value).collect::<Vec<_>>(),
                    "horizontal_scale_out": data.get("horizontal_scale_out").cloned(),
                }),
            )
            .await;

        self.reply_to(resource_id, json!({"response": resource_id}))
            .await;
    }

    async fn handle_delete(&self, resource_id: &str) {
        let removed = self.entries.write().await.remove(resource_id);

        match &removed {
            Some(entry) => {
                self.active_vms.write().await.remove(&entry.stack_id);
                self.journal_stack_list().await;
            }
            None => info!(resource_id, "delete for unknown resource, responding as if deleted"),
        }

        self.reply_to(resource_id, json!({"response": true})).await;

        if let Some(entry) = removed {
            self.journal
                .append(
                    JournalType::AdaptationResponseDeleted,
                    &entry.stack_id,
                    json!({"name": entry.event_name}),
                )
                .await;
        }
    }

    async fn handle_query(&self, resource_id: &str) {
        let entries = self.entries.read().await;
        let resources: Vec<Value> = entries
            .iter()
            .map(|(id, entry)| {
                json!({
                    "resource_id": id,
                    "stack_id": entry.stack_id,
                    "agreement_id": entry.agreement_id,
                    "event_name": entry.event_name,
                    "embargo": entry.embargo_secs,
                    "blacklist": entry.plugin_blacklist,
                    "actions": entry.actions.iter().map(Action::to_value).collect::<Vec<_>>(),
                    "horizontal_scale_out": entry.horizontal_scale_out,
                })
            })
            .collect();
        drop(entries);

        self.reply_to(resource_id, json!({"resources": resources}))
            .await;
    }

    /// Insert an entry, evicting any previous entry for the same
    /// (stack, event) pair so the pair stays unique.
    async fn insert_entry(&self, resource_id: String, entry: ResourceEntry) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, existing| {
            existing.stack_id != entry.stack_id || existing.event_name != entry.event_name
        });
        entries.insert(resource_id, entry);
    }

    async fn reply_to(&self, resource_id: &str, message: Value) {
        if let Err(e) = self
            .reply
            .publish_to_heat_resource(resource_id, message.to_string())
            .await
        {
            warn!(resource_id, error = %e, "heat resource reply failed");
        }
    }

    /// Journal the current stack -> VM index.
    async fn journal_stack_list(&self) {
        let stacks = self.active_vms.read().await.clone();
        self.journal
            .append(JournalType::StackCreated, "", json!({"stacks": stacks}))
            .await;
    }
}

/// Materialize a registry entry from an adaptation response's template
/// properties. Returns `None` when the properties are unusable.
fn parse_template_properties(stack_id: &str, properties: &Value) -> Option<ResourceEntry> {
    let event_name = properties.get("name").and_then(Value::as_str)?;

    let mut actions = Vec::new();
    for raw in properties.get("allowed_actions").and_then(Value::as_array)? {
        actions.push(Action::from_kind_json(raw).ok()?);
    }

    Some(ResourceEntry {
        stack_id: stack_id.to_owned(),
        event_name: event_name.to_owned(),
        agreement_id: properties
            .get("agreement_id")
            .and_then(Value::as_str)
            .map(str::to_owned),
        actions,
        embargo_secs: properties
            .get("extend_embargo")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        plugin_blacklist: properties
            .get("plugins")
            .and_then(|p| p.get("blacklist"))
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        horizontal_scale_out: ScaleOutTemplate::from_json(properties.get("horizontal_scale_out")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::{BrokerError, OpenStackError, SlaError};
    use crate::domain::models::action::ActionKind;
    use crate::domain::ports::{StackResource, StackSummary};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingReply {
        replies: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl HeatReplyPublisher for RecordingReply {
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

    #[derive(Default)]
    struct RecordingSla {
        started: StdMutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl SlaApi for RecordingSla {
        async fn start_enforcement(&self, agreement_id: &str) -> Result<(), SlaError> {
            self.started.lock().unwrap().push(agreement_id.to_owned());
            if self.fail {
                Err(SlaError::UnexpectedStatus(500))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct NullJournal;

    #[async_trait]
    impl Journal for NullJournal {
        async fn append(&self, _log_type: JournalType, _stack_id: &str, _details: Value) {}
    }

    fn registry(
        reply: Arc<RecordingReply>,
        sla: Option<Arc<RecordingSla>>,
    ) -> ResourceRegistry {
        ResourceRegistry::new(
            reply,
            sla.map(|s| s as Arc<dyn SlaApi>),
            Arc::new(NullJournal),
        )
    }

    fn create_message(resource_id: &str, stack_id: &str, name: &str) -> Value {
        json!({
            "heat": {
                "type": "heat_create",
                "data": {
                    "resource_id": resource_id,
                    "stack_id": stack_id,
                    "name": name,
                    "actions": ["MigrateAction", 7],
                    "agreement_id": "agreement-1",
                    "embargo": 30,
                    "blacklist": ["noisy-plugin"],
                    "horizontal_scale_out": {"name_prefix": "web"},
                }
            }
        })
    }

    #[tokio::test]
    async fn create_registers_entry_and_replies_with_resource_id() {
        let reply = Arc::new(RecordingReply::default());
        let sla = Arc::new(RecordingSla::default());
        let registry = registry(reply.clone(), Some(sla.clone()));

        registry
            .handle_message(&create_message("res-1", "stack-1", "overload"))
            .await;

        let actions = registry.initial_actions("overload", "stack-1").await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, ActionKind::Migrate);
        assert_eq!(actions[1].kind, ActionKind::Stop);

        let entry = registry.resource("overload", "stack-1").await.unwrap();
        assert_eq!(entry.embargo_secs, 30);
        assert_eq!(entry.plugin_blacklist, vec!["noisy-plugin"]);
        assert_eq!(entry.agreement_id.as_deref(), Some("agreement-1"));

        let replies = reply.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, "res-1");
        assert_eq!(replies[0].1, json!({"response": "res-1"}).to_string());

        assert_eq!(*sla.started.lock().unwrap(), vec!["agreement-1"]);
    }

    #[tokio::test]
    async fn sla_failure_does_not_block_create() {
        let reply = Arc::new(RecordingReply::default());
        let sla = Arc::new(RecordingSla {
            fail: true,
            ..Default::default()
        });
        let registry = registry(reply.clone(), Some(sla));

        registry
            .handle_message(&create_message("res-1", "stack-1", "overload"))
            .await;

        assert!(registry.resource("overload", "stack-1").await.is_some());
        assert_eq!(reply.replies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_stack_event_pair_is_replaced() {
        let reply = Arc::new(RecordingReply::default());
        let registry = registry(reply, None);

        registry
            .handle_message(&create_message("res-1", "stack-1", "overload"))
            .await;
        registry
            .handle_message(&create_message("res-2", "stack-1", "overload"))
            .await;

        // Exactly one entry remains for the pair, under the new id.
        let query = json!({
            "heat": {"type": "heat_query", "data": {"resource_id": "q"}}
        });
        registry.handle_message(&query).await;

        let entry = registry.resource("overload", "stack-1").await.unwrap();
        assert_eq!(entry.stack_id, "stack-1");

        let map = registry.agreement_map().await;
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn check_create_complete_replies_true() {
        let reply = Arc::new(RecordingReply::default());
        let registry = registry(reply.clone(), None);

        registry
            .handle_message(&json!({
                "heat": {"type": "heat_check_create_complete", "data": {"resource_id": "res-9"}}
            }))
            .await;

        let replies = reply.replies.lock().unwrap();
        assert_eq!(replies[0], ("res-9".into(), json!({"response": true}).to_string()));
    }

    #[tokio::test]
    async fn delete_removes_entry_and_replies_even_when_unknown() {
        let reply = Arc::new(RecordingReply::default());
        let registry = registry(reply.clone(), None);

        registry
            .handle_message(&create_message("res-1", "stack-1", "overload"))
            .await;
        registry
            .handle_message(&json!({
                "heat": {"type": "heat_delete", "data": {"resource_id": "res-1"}}
            }))
            .await;

        assert!(registry.resource("overload", "stack-1").await.is_none());

        // Unknown id still gets a positive reply.
        registry
            .handle_message(&json!({
                "heat": {"type": "heat_delete", "data": {"resource_id": "ghost"}}
            }))
            .await;

        let replies = reply.replies.lock().unwrap();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[2], ("ghost".into(), json!({"response": true}).to_string()));
    }

    #[tokio::test]
    async fn query_lists_registered_resources() {
        let reply = Arc::new(RecordingReply::default());
        let registry = registry(reply.clone(), None);

        registry
            .handle_message(&create_message("res-1", "stack-1", "overload"))
            .await;
        registry
            .handle_message(&json!({
                "heat": {"type": "heat_query", "data": {"resource_id": "query-1"}}
            }))
            .await;

        let replies = reply.replies.lock().unwrap();
        let (id, body) = &replies[1];
        assert_eq!(id, "query-1");
        let parsed: Value = serde_json::from_str(body).unwrap();
        let resources = parsed["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0]["stack_id"], "stack-1");
        assert_eq!(resources[0]["event_name"], "overload");
        assert_eq!(resources[0]["embargo"], 30);
        assert_eq!(resources[0]["actions"][0]["type"], "MigrateAction");
    }

    struct StubInventory {
        fail_tenant: Option<String>,
    }

    #[async_trait]
    impl CloudInventory for StubInventory {
        async fn tenants(&self) -> Result<Vec<Tenant>, OpenStackError> {
            Ok(vec![
                Tenant {
                    id: "t1".into(),
                    name: "alpha".into(),
                },
                Tenant {
                    id: "t2".into(),
                    name: "beta".into(),
                },
            ])
        }

        async fn stacks(&self, tenant: &Tenant) -> Result<Vec<StackSummary>, OpenStackError> {
            if self.fail_tenant.as_deref() == Some(tenant.name.as_str()) {
                return Err(OpenStackError::Auth("no access".into()));
            }
            Ok(vec![StackSummary {
                id: format!("stack-{}", tenant.id),
                name: "app".into(),
            }])
        }

        async fn resources(
            &self,
            _tenant: &Tenant,
            stack_id: &str,
        ) -> Result<Vec<StackResource>, OpenStackError> {
            Ok(vec![
                StackResource {
                    resource_name: "adaptation_response".into(),
                    resource_type: ADAPTATION_RESPONSE_TYPE.into(),
                    physical_resource_id: format!("{stack_id}-response"),
                },
                StackResource {
                    resource_name: "web_server".into(),
                    resource_type: SERVER_TYPE.into(),
                    physical_resource_id: format!("{stack_id}-vm"),
                },
            ])
        }

        async fn stack_template(
            &self,
            _tenant: &Tenant,
            _stack_id: &str,
        ) -> Result<Value, OpenStackError> {
            Ok(json!({
                "resources": {
                    "adaptation_response": {
                        "type": ADAPTATION_RESPONSE_TYPE,
                        "properties": {
                            "name": "overload",
                            "allowed_actions": ["MigrateAction", "StopAction"],
                            "agreement_id": "agr-7",
                            "extend_embargo": 15,
                            "plugins": {"blacklist": ["slowpoke"]},
                        }
                    },
                    "web_server": {"type": SERVER_TYPE},
                }
            }))
        }
    }

    #[tokio::test]
    async fn recover_state_materialises_entries_from_templates() {
        let reply = Arc::new(RecordingReply::default());
        let registry = registry(reply, None);

        registry
            .recover_state(&StubInventory { fail_tenant: None })
            .await;

        let entry = registry.resource("overload", "stack-t1").await.unwrap();
        assert_eq!(entry.embargo_secs, 15);
        assert_eq!(entry.plugin_blacklist, vec!["slowpoke"]);
        assert_eq!(entry.actions.len(), 2);

        let map = registry.agreement_map().await;
        assert_eq!(map["agr-7"].event_name, "overload");
    }

    #[tokio::test]
    async fn recover_state_skips_failing_tenants() {
        let reply = Arc::new(RecordingReply::default());
        let registry = registry(reply, None);

        registry
            .recover_state(&StubInventory {
                fail_tenant: Some("alpha".into()),
            })
            .await;

        // beta still recovered.
        assert!(registry.resource("overload", "stack-t2").await.is_some());
        assert!(registry.resource("overload", "stack-t1").await.is_none());
    }
}
