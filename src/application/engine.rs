//! Engine assembly and lifecycle.
//!
//! Builds every component from the merged configuration, recovers the
//! registry state, and runs the consume loop until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::domain::models::config::Config;
use crate::domain::ports::Journal;
use crate::infrastructure::broker::{BrokerConsumer, HeatResourceReply, LapinOutbound};
use crate::infrastructure::database::journal::SqliteJournal;
use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::openstack::compute::HypervisorLocator;
use crate::infrastructure::openstack::OpenStackClients;
use crate::infrastructure::plugins::{plugin_environment, ProcessPluginSpawner};
use crate::infrastructure::sla::SlaClient;
use crate::infrastructure::{broker, http};
use crate::services::{Enactor, EventRouter, PluginManager, PollSettings, ResourceRegistry};

/// The assembled engine.
pub struct AdaptationEngine {
    config: Arc<Config>,
    router: Arc<EventRouter>,
    registry: Arc<ResourceRegistry>,
    openstack: Arc<OpenStackClients>,
}

impl AdaptationEngine {
    /// Wire every component together. The only network access is a
    /// best-effort endpoint discovery for the plugin environment.
    pub async fn build(config: Config, database: &DatabaseConnection) -> Result<Self> {
        let config = Arc::new(config);

        let openstack = Arc::new(OpenStackClients::new(config.openstack_polling.clone()));

        let journal: Arc<dyn Journal> = Arc::new(
            SqliteJournal::new(database.pool().clone())
                .with_location_source(Arc::new(HypervisorLocator::new(openstack.clone()))),
        );

        let reply = Arc::new(HeatResourceReply::new(config.heat_resource.clone()));
        let sla = SlaClient::from_config(&config.sla_agreements)
            .map(|client| Arc::new(client) as Arc<dyn crate::domain::ports::SlaApi>);
        let registry = Arc::new(ResourceRegistry::new(reply, sla, journal.clone()));

        let endpoints = openstack.plugin_endpoints().await;
        let spawner = Arc::new(ProcessPluginSpawner::new(plugin_environment(
            &endpoints,
            &config.sla_agreements.endpoint,
        )));
        let plugin_manager = Arc::new(PluginManager::discover(&config.plugins, spawner));
        info!(plugins = ?plugin_manager.names(), "plugin manager started");

        let enactor = Arc::new(Enactor::new(
            openstack.clone(),
            openstack.clone(),
            Arc::new(LapinOutbound),
            journal.clone(),
            config.event.clone(),
            config.app_feedback.clone(),
            config.mq_broker.as_target(),
            PollSettings::default(),
        ));

        let router = Arc::new(EventRouter::new(
            registry.clone(),
            plugin_manager,
            enactor,
            journal,
            config.plugins.grouping.clone(),
            std::time::Duration::from_secs(config.plugins.timeout_secs),
        ));

        Ok(Self {
            config,
            router,
            registry,
            openstack,
        })
    }

    /// Recover registry state, then consume messages until `shutdown`
    /// flips.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.registry.recover_state(self.openstack.as_ref()).await;

        let http_task = tokio::spawn(http::serve(
            self.config.webbo.port,
            self.registry.clone(),
            shutdown.clone(),
        ));

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        let consumer = BrokerConsumer::new(self.config.mq_broker.clone());
        let consumer_shutdown = shutdown.clone();
        let consumer_task = tokio::spawn(async move {
            consumer.run(tx, consumer_shutdown).await;
        });

        info!("adaptation engine started");
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(raw) => self.router.on_message(&raw).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("stopping adaptation engine");
        consumer_task.await.context("consumer task panicked")?;
        http_task.await.context("introspection task panicked")?;
        Ok(())
    }

    /// Run the broker connection/quality self-test.
    pub async fn healthcheck(&self) -> Result<()> {
        broker::healthcheck(&self.config.mq_broker)
            .await
            .context("healthcheck failed")
    }
}
