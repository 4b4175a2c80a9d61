//! Event router.
//!
//! The engine's message callback: classifies inbound broker messages,
//! enforces per-stack mutual exclusion, and drives each accepted event
//! either through the passthrough shortcut or through a spawned
//! distributor whose results end in enactment.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::models::action::{Action, ActionKind};
use crate::domain::models::event::Event;
use crate::domain::models::journal::JournalType;
use crate::domain::models::resource::ResourceEntry;
use crate::domain::ports::Journal;
use crate::services::distributor::{Distributor, DistributorOutcome};
use crate::services::enactor::Enactor;
use crate::services::plugin_manager::PluginManager;
use crate::services::registry::ResourceRegistry;

/// Kinds handled without consulting plugins.
const PASSTHROUGH_KINDS: [ActionKind; 3] =
    [ActionKind::Developer, ActionKind::Start, ActionKind::Stop];

/// Routes broker messages into the pipeline.
pub struct EventRouter {
    registry: Arc<ResourceRegistry>,
    plugin_manager: Arc<PluginManager>,
    enactor: Arc<Enactor>,
    journal: Arc<dyn Journal>,
    /// Stacks currently under enactment.
    locked_stacks: Mutex<HashSet<String>>,
    grouping: Vec<Vec<String>>,
    plugin_timeout: Duration,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        plugin_manager: Arc<PluginManager>,
        enactor: Arc<Enactor>,
        journal: Arc<dyn Journal>,
        grouping: Vec<Vec<String>>,
        plugin_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            plugin_manager,
            enactor,
            journal,
            locked_stacks: Mutex::new(HashSet::new()),
            grouping,
            plugin_timeout,
        }
    }

    /// Callback executed for every inbound broker message.
    ///
    /// A single-field `heat` object goes to the registry; an object with
    /// an `id` and at least four top-level fields is an event; anything
    /// else is invalid and dropped.
    pub async fn on_message(self: &Arc<Self>, raw: &[u8]) {
        debug!(bytes = raw.len(), "message received");

        let parsed: Value = match serde_json::from_slice(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(error = %e, "message is not valid JSON, dropping");
                return;
            }
        };
        let Some(fields) = parsed.as_object() else {
            error!("message is not a JSON object, dropping");
            return;
        };

        if fields.len() == 1 && fields.contains_key("heat") {
            self.registry.handle_message(&parsed).await;
        } else if fields.len() >= 4 && fields.contains_key("id") {
            match Event::parse(raw) {
                Ok(event) => self.process_event(event).await,
                Err(e) => error!(error = %e, "event message rejected"),
            }
        } else {
            error!("message invalid, dropping");
        }
    }

    /// Number of stacks currently locked. Exposed for observability.
    pub async fn locked_count(&self) -> usize {
        self.locked_stacks.lock().await.len()
    }

    async fn process_event(self: &Arc<Self>, event: Event) {
        // The lock check comes before any journalling, so a duplicate
        // event for a busy stack leaves no trace beyond a log line.
        {
            let mut locked = self.locked_stacks.lock().await;
            if !locked.insert(event.stack_id.clone()) {
                info!(
                    stack_id = %event.stack_id,
                    "enactment invalid: stack_id already locked"
                );
                return;
            }
        }

        self.journal
            .append(
                JournalType::EventReceived,
                &event.stack_id,
                json!({
                    "name": event.name,
                    "value": event.value,
                    "user_id": event.user_id,
                    "tenant_id": event.tenant_id,
                    "source": event.source,
                    "severity": event.severity,
                    "context": event.context,
                }),
            )
            .await;

        let allowed = self
            .registry
            .initial_actions(&event.name, &event.stack_id)
            .await
            .unwrap_or_default();
        if allowed.is_empty() {
            info!(
                event = %event.name,
                stack_id = %event.stack_id,
                "enactment invalid: no valid initial actions found"
            );
            self.unlock(&event.stack_id).await;
            return;
        }

        let resource = self.registry.resource(&event.name, &event.stack_id).await;

        if is_passthrough(&allowed) {
            self.enact_passthrough(&event, resource.as_ref(), allowed)
                .await;
            self.unlock(&event.stack_id).await;
            return;
        }

        let distributor = Distributor::new(
            event.clone(),
            allowed,
            resource.as_ref(),
            self.registry.agreement_map().await,
            self.plugin_manager.clone(),
            self.journal.clone(),
            &self.grouping,
            self.plugin_timeout,
        );

        let router = self.clone();
        tokio::spawn(async move {
            // The distributor runs in its own task so that even a panic
            // still reaches the completion path (with empty results) and
            // the stack gets unlocked.
            let outcome = match tokio::spawn(distributor.run()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "distributor aborted");
                    DistributorOutcome::default()
                }
            };
            router
                .on_distributor_results(&event, resource.as_ref(), outcome)
                .await;
            router.unlock(&event.stack_id).await;
        });
    }

    /// Enact a passthrough action inline, targeting the event's first
    /// machine.
    async fn enact_passthrough(
        &self,
        event: &Event,
        resource: Option<&ResourceEntry>,
        allowed: Vec<Action>,
    ) {
        info!(actions = allowed.len(), "initial actions are all passthrough kinds");

        let Some(mut action) = allowed.into_iter().next() else {
            return;
        };
        match event.first_machine_id() {
            Some(machine_id) => action.target = machine_id,
            None => error!("no machines field in event to set target from"),
        }

        info!("enacting adaptation");
        if let Err(e) = self.enactor.enact(event, resource, &action, &[]).await {
            error!(error = %e, "error enacting adaptation");
        }
    }

    /// Completion callback for a distributor run: pick the winner, apply
    /// the fail-safe, and enact.
    async fn on_distributor_results(
        &self,
        event: &Event,
        resource: Option<&ResourceEntry>,
        outcome: DistributorOutcome,
    ) {
        let chosen = match outcome.results.first() {
            Some(action) if action.score >= 0 => action.clone(),
            Some(action) => {
                info!(
                    score = action.score,
                    "chosen action score is negative, switching to developer action"
                );
                Action::new(ActionKind::Developer)
            }
            None => {
                info!("no results returned, switching to developer action");
                Action::new(ActionKind::Developer)
            }
        };

        info!(chosen = %chosen, "chosen adaptation");
        if let Err(e) = self
            .enactor
            .enact(event, resource, &chosen, &outcome.round_log)
            .await
        {
            error!(error = %e, "error enacting adaptation");
        }
    }

    /// Release a stack for new adaptations.
    async fn unlock(&self, stack_id: &str) {
        info!(stack_id, "unlocking stack");
        if !self.locked_stacks.lock().await.remove(stack_id) {
            warn!(
                stack_id,
                "tried to remove a non-existent stack id from the locked set"
            );
        }
    }
}

/// True when every allowed kind is handled without plugins.
fn is_passthrough(actions: &[Action]) -> bool {
    actions
        .iter()
        .all(|action| PASSTHROUGH_KINDS.contains(&action.kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(kinds: &[ActionKind]) -> Vec<Action> {
        kinds.iter().map(|k| Action::new(*k)).collect()
    }

    #[test]
    fn passthrough_requires_every_kind_to_qualify() {
        assert!(is_passthrough(&actions(&[ActionKind::Stop])));
        assert!(is_passthrough(&actions(&[
            ActionKind::Developer,
            ActionKind::Start,
            ActionKind::Stop,
        ])));
        // One ranked kind disqualifies the whole list.
        assert!(!is_passthrough(&actions(&[
            ActionKind::Stop,
            ActionKind::Migrate,
        ])));
        assert!(!is_passthrough(&actions(&[ActionKind::Migrate])));
    }
}
