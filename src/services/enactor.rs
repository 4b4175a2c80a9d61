//! Action enactment.
//!
//! Drives the chosen action against the infrastructure APIs with a
//! bounded polling state machine per action kind, publishing start /
//! complete / failed notifications and journalling every transition.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::domain::error::BrokerError;
use crate::domain::models::action::{Action, ActionKind};
use crate::domain::models::config::BrokerTargetConfig;
use crate::domain::models::event::Event;
use crate::domain::models::journal::JournalType;
use crate::domain::models::resource::{ResourceEntry, ScaleOutTemplate};
use crate::domain::ports::{BrokerChannel, ComputeApi, Journal, OrchestrationApi, OutboundBroker};
use crate::infrastructure::broker::notifications;

/// Power state codes reported by the compute API.
const POWER_ON: &[i64] = &[1];
const POWER_OFF: &[i64] = &[0, 4];

/// Poll budgets for the enactment state machines.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub retries: u32,
    pub migrate_interval: Duration,
    pub stack_interval: Duration,
    pub start_interval: Duration,
    pub stop_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            retries: 20,
            migrate_interval: Duration::from_secs(10),
            stack_interval: Duration::from_secs(10),
            start_interval: Duration::from_secs(5),
            stop_interval: Duration::from_secs(10),
        }
    }
}

/// Enacts chosen actions against the infrastructure.
pub struct Enactor {
    compute: Arc<dyn ComputeApi>,
    orchestration: Arc<dyn OrchestrationApi>,
    broker: Arc<dyn OutboundBroker>,
    journal: Arc<dyn Journal>,
    /// Synthetic orchestration notifications.
    openstack_event: BrokerTargetConfig,
    /// Application feedback notifications.
    app_feedback: BrokerTargetConfig,
    /// Outbound adaptation requests (Developer / LowPower).
    adaptation_requests: BrokerTargetConfig,
    poll: PollSettings,
}

impl Enactor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        orchestration: Arc<dyn OrchestrationApi>,
        broker: Arc<dyn OutboundBroker>,
        journal: Arc<dyn Journal>,
        openstack_event: BrokerTargetConfig,
        app_feedback: BrokerTargetConfig,
        adaptation_requests: BrokerTargetConfig,
        poll: PollSettings,
    ) -> Self {
        Self {
            compute,
            orchestration,
            broker,
            journal,
            openstack_event,
            app_feedback,
            adaptation_requests,
            poll,
        }
    }

    /// Enact one action for one event.
    ///
    /// Returns the enactment status. An `Err` means the notification
    /// publishers could not even be connected; every later failure is
    /// reported through the `failed` notification and journal entry
    /// instead.
    pub async fn enact(
        &self,
        event: &Event,
        resource: Option<&ResourceEntry>,
        action: &Action,
        round_log: &[Vec<Action>],
    ) -> Result<bool, BrokerError> {
        let stack_id = &event.stack_id;
        info!(stack_id = %stack_id, action = %action, "enacting adaptation");

        let os_channel = self.broker.open(&self.openstack_event).await?;
        let fb_channel = self.broker.open(&self.app_feedback).await?;

        let details = json!({
            "type": action.kind.as_str(),
            "target": action.target,
            "destination": action.destination,
            "scale_value": action.scale_value,
            "score": action.score,
        });

        self.publish(
            &*os_channel,
            &self.openstack_event.key,
            notifications::openstack_event("start", stack_id, &event.name),
        )
        .await;
        self.publish(
            &*fb_channel,
            &self.app_feedback.key,
            notifications::app_feedback_event("start", stack_id, &event.name, &details),
        )
        .await;

        let logged_rounds: Vec<Vec<Value>> = round_log
            .iter()
            .map(|round| round.iter().map(Action::to_value).collect())
            .collect();
        self.journal
            .append(
                JournalType::AdaptationStarted,
                stack_id,
                json!({
                    "event_name": event.name,
                    "adaptation": action.to_value(),
                    "consolidated_results": logged_rounds,
                }),
            )
            .await;

        let status = self.dispatch(event, resource, action).await;

        // Cool-down: the stack stays locked for the embargo window.
        let embargo = resource.map_or(0, ResourceEntry::effective_embargo_secs);
        if status && embargo > 0 {
            info!(embargo, "stack adaptation embargo extended, sleeping");
            tokio::time::sleep(Duration::from_secs(embargo)).await;
        }

        self.publish(
            &*os_channel,
            &self.openstack_event.key,
            notifications::openstack_event("complete", stack_id, &event.name),
        )
        .await;

        let (phase, log_type) = if status {
            ("complete", JournalType::AdaptationCompleted)
        } else {
            ("failed", JournalType::AdaptationFailed)
        };
        self.publish(
            &*fb_channel,
            &self.app_feedback.key,
            notifications::app_feedback_event(phase, stack_id, &event.name, &details),
        )
        .await;
        self.journal
            .append(
                log_type,
                stack_id,
                json!({
                    "event_name": event.name,
                    "adaptation": action.to_value(),
                }),
            )
            .await;

        os_channel.close().await;
        fb_channel.close().await;

        Ok(status)
    }

    /// Publish a notification, swallowing failures.
    async fn publish(&self, channel: &dyn BrokerChannel, key: &str, payload: Vec<u8>) {
        if let Err(e) = channel.publish(key, payload).await {
            warn!(key, error = %e, "notification publish failed");
        }
    }

    async fn dispatch(
        &self,
        event: &Event,
        resource: Option<&ResourceEntry>,
        action: &Action,
    ) -> bool {
        match action.kind {
            ActionKind::Migrate => self.enact_migrate(action).await,
            ActionKind::VerticalScale => self.enact_vertical_scale(event, action).await,
            ActionKind::HorizontalScale => self.enact_horizontal_scale(event, resource).await,
            ActionKind::Developer => {
                info!(event = %event.name, "publishing developer adaptation request");
                self.publish_adaptation_request(action.adaptation_request(event, None, None))
                    .await
            }
            ActionKind::LowPower => {
                info!(target_app = %action.target_app, "publishing low-power request");
                self.publish_adaptation_request(action.adaptation_request(
                    event,
                    Some("lowpower"),
                    Some(&action.target_app),
                ))
                .await
            }
            ActionKind::NoAction => {
                info!(stack_id = %event.stack_id, "no action");
                true
            }
            ActionKind::Start => {
                if let Err(e) = self.compute.start_server(&action.target).await {
                    warn!(error = %e, "power state start change problem");
                }
                self.poll_power_state(&action.target, POWER_ON, self.poll.start_interval)
                    .await
            }
            ActionKind::Stop => {
                if let Err(e) = self.compute.stop_server(&action.target).await {
                    warn!(error = %e, "power state stop change problem");
                }
                self.poll_power_state(&action.target, POWER_OFF, self.poll.stop_interval)
                    .await
            }
            ActionKind::Combined => {
                warn!(kind = action.kind.as_str(), "unsupported action kind");
                false
            }
        }
    }

    async fn enact_migrate(&self, action: &Action) -> bool {
        if let Err(e) = self
            .compute
            .live_migrate(&action.target, &action.destination)
            .await
        {
            error!(error = %e, "live migration request failed");
            return false;
        }
        info!(
            target = %action.target,
            destination = %action.destination,
            "migration requested"
        );
        self.poll_migrate_complete(action).await
    }

    async fn enact_vertical_scale(&self, event: &Event, action: &Action) -> bool {
        let flavor_id = match self.compute.flavor_id_by_name(&action.scale_value).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                error!(flavor = %action.scale_value, "no flavor with that name");
                return false;
            }
            Err(e) => {
                error!(error = %e, "flavor lookup failed");
                return false;
            }
        };

        if let Err(e) = self.compute.resize(&action.target, &flavor_id).await {
            error!(error = %e, "resize request failed");
            return false;
        }
        info!(target = %action.target, scale_value = %action.scale_value, "resize requested");
        self.poll_stack_update_complete(&event.stack_id).await
    }

    async fn enact_horizontal_scale(
        &self,
        event: &Event,
        resource: Option<&ResourceEntry>,
    ) -> bool {
        let default_template = ScaleOutTemplate::default();
        let template_config = resource
            .and_then(|r| r.horizontal_scale_out.as_ref())
            .unwrap_or(&default_template);

        let mut template = match self.orchestration.stack_template(&event.stack_id).await {
            Ok(template) => template,
            Err(e) => {
                error!(error = %e, "could not fetch stack template");
                return false;
            }
        };

        let new_resource_name = format!(
            "{}-{}",
            template_config.name_prefix(),
            uuid::Uuid::new_v4().simple()
        );
        info!(resource = %new_resource_name, "adding scale-out instance to template");

        let new_resource = json!({
            "type": "OS::Nova::Server",
            "properties": {
                "key_name": template_config.key_name,
                "image": template_config.image,
                "flavor": template_config.flavor,
                "networks": [{"network": template_config.network_id}],
            }
        });

        let Some(resources) = template
            .get_mut("resources")
            .and_then(Value::as_object_mut)
        else {
            error!("stack template has no resources section");
            return false;
        };
        resources.insert(new_resource_name, new_resource);

        let template_yaml = match serde_yaml::to_string(&template) {
            Ok(yaml) => yaml,
            Err(e) => {
                error!(error = %e, "could not render updated template");
                return false;
            }
        };

        if let Err(e) = self
            .orchestration
            .update_stack_template(&event.stack_id, template_yaml)
            .await
        {
            error!(error = %e, "stack update request failed");
            return false;
        }
        self.poll_stack_update_complete(&event.stack_id).await
    }

    async fn publish_adaptation_request(&self, message: String) -> bool {
        let channel = match self.broker.open(&self.adaptation_requests).await {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "could not connect adaptation request publisher");
                return false;
            }
        };
        let result = channel
            .publish(&self.adaptation_requests.key, message.into_bytes())
            .await;
        channel.close().await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "adaptation request publish failed");
                false
            }
        }
    }

    /// Poll the hypervisor placement until the target VM shows up on the
    /// destination host, or the retry budget runs out.
    async fn poll_migrate_complete(&self, action: &Action) -> bool {
        for attempt in 0..self.poll.retries {
            match self.compute.hypervisor_servers(&action.destination).await {
                Ok(hosts) => {
                    let found = hosts
                        .iter()
                        .any(|host| host.server_ids.iter().any(|id| *id == action.target));
                    if found {
                        info!("instance is on correct host machine");
                        return true;
                    }
                }
                Err(e) => warn!(error = %e, "hypervisor lookup failed"),
            }
            info!(
                remaining = self.poll.retries - attempt - 1,
                "server not migrated yet, retrying"
            );
            tokio::time::sleep(self.poll.migrate_interval).await;
        }
        warn!("server did not seem to migrate");
        false
    }

    /// Poll the stack status until COMPLETE, or the retry budget runs
    /// out.
    async fn poll_stack_update_complete(&self, stack_id: &str) -> bool {
        for attempt in 0..self.poll.retries {
            match self.orchestration.stack_status(stack_id).await {
                Ok(status) if status == "COMPLETE" => {
                    info!("stack update complete");
                    return true;
                }
                Ok(status) => info!(
                    %status,
                    remaining = self.poll.retries - attempt - 1,
                    "stack update not complete yet"
                ),
                Err(e) => warn!(error = %e, "stack status lookup failed"),
            }
            tokio::time::sleep(self.poll.stack_interval).await;
        }
        info!("stack update seemed to fail");
        false
    }

    /// Poll the instance power state until it lands in `desired`. An
    /// unreadable power state fails immediately.
    async fn poll_power_state(
        &self,
        instance_id: &str,
        desired: &[i64],
        interval: Duration,
    ) -> bool {
        for attempt in 0..self.poll.retries {
            match self.compute.server_power_state(instance_id).await {
                Ok(state) if desired.contains(&state) => {
                    info!(instance_id, state, "power state is correct");
                    return true;
                }
                Ok(state) => info!(
                    instance_id,
                    state,
                    remaining = self.poll.retries - attempt - 1,
                    "power state unchanged"
                ),
                Err(e) => {
                    error!(instance_id, error = %e, "power state could not be retrieved");
                    return false;
                }
            }
            tokio::time::sleep(interval).await;
        }
        info!(instance_id, "power state did not seem to change");
        false
    }
}
