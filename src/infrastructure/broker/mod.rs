//! AMQP broker plumbing.
//!
//! One long-running consumer feeds the engine's message loop; outbound
//! traffic goes through short-lived "quick" connections opened per
//! enactment or per reply, mirroring how briefly each target is needed.

pub mod notifications;

use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::error::BrokerError;
use crate::domain::models::config::{BrokerTargetConfig, MqBrokerConfig};
use crate::domain::ports::{BrokerChannel, HeatReplyPublisher, OutboundBroker};

fn amqp_uri(host: &str, port: u16, username: &str, password: &str) -> String {
    format!("amqp://{username}:{password}@{host}:{port}/%2f")
}

async fn connect_topic_exchange(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    exchange: &str,
) -> Result<(Connection, Channel), BrokerError> {
    let connection = Connection::connect(
        &amqp_uri(host, port, username, password),
        ConnectionProperties::default(),
    )
    .await?;
    let channel = connection.create_channel().await?;
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions::default(),
            FieldTable::default(),
        )
        .await?;
    Ok((connection, channel))
}

/// Factory for ephemeral publisher connections.
pub struct LapinOutbound;

struct LapinChannel {
    connection: Connection,
    channel: Channel,
    exchange: String,
}

#[async_trait]
impl OutboundBroker for LapinOutbound {
    async fn open(
        &self,
        target: &BrokerTargetConfig,
    ) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let (connection, channel) = connect_topic_exchange(
            &target.host,
            target.port,
            &target.username,
            &target.password,
            &target.exchange,
        )
        .await?;
        Ok(Box::new(LapinChannel {
            connection,
            channel,
            exchange: target.exchange.clone(),
        }))
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.channel
            .basic_publish(
                &self.exchange,
                key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?
            .await?;
        debug!(exchange = %self.exchange, key, bytes = payload.len(), "published");
        Ok(())
    }

    async fn close(&self) {
        let _ = self.channel.close(200, "done").await;
        let _ = self.connection.close(200, "done").await;
    }
}

/// Publishes replies to the orchestration-template resource.
///
/// The configured routing key is a template; each reply substitutes the
/// inbound resource id into its `{resource_id}` placeholder.
pub struct HeatResourceReply {
    target: BrokerTargetConfig,
}

impl HeatResourceReply {
    pub fn new(target: BrokerTargetConfig) -> Self {
        Self { target }
    }
}

#[async_trait]
impl HeatReplyPublisher for HeatResourceReply {
    async fn publish_to_heat_resource(
        &self,
        resource_id: &str,
        message: String,
    ) -> Result<(), BrokerError> {
        let key = self.target.key.replace("{resource_id}", resource_id);
        debug!(resource_id, key, "sending heat resource reply");

        let (connection, channel) = connect_topic_exchange(
            &self.target.host,
            self.target.port,
            &self.target.username,
            &self.target.password,
            &self.target.exchange,
        )
        .await?;

        let result = channel
            .basic_publish(
                &self.target.exchange,
                &key,
                BasicPublishOptions::default(),
                message.as_bytes(),
                BasicProperties::default(),
            )
            .await;

        let confirm = match result {
            Ok(confirm) => confirm.await.map(|_| ()),
            Err(e) => Err(e),
        };

        let _ = channel.close(200, "done").await;
        let _ = connection.close(200, "done").await;

        confirm.map_err(BrokerError::from)
    }
}

/// The long-running inbound consumer.
///
/// Binds an exclusive queue to the inbound routing key and forwards
/// every delivery into the engine's message channel. Reconnects with
/// exponential backoff until shutdown is signalled.
pub struct BrokerConsumer {
    config: MqBrokerConfig,
}

impl BrokerConsumer {
    pub fn new(config: MqBrokerConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, tx: mpsc::Sender<Vec<u8>>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: None,
            max_interval: Duration::from_secs(30),
            ..Default::default()
        };

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.consume_until_shutdown(&tx, &mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                    warn!(error = %e, wait_secs = wait.as_secs(), "consumer connection lost, reconnecting");
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        info!("broker consumer stopped");
    }

    async fn consume_until_shutdown(
        &self,
        tx: &mpsc::Sender<Vec<u8>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        let (_connection, channel) = connect_topic_exchange(
            &self.config.host,
            self.config.port,
            &self.config.username,
            &self.config.password,
            &self.config.exchange,
        )
        .await?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                queue.name().as_str(),
                &self.config.exchange,
                &self.config.routing_key.inbound,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut consumer = channel
            .basic_consume(
                queue.name().as_str(),
                "adaptation-engine",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            exchange = %self.config.exchange,
            key = %self.config.routing_key.inbound,
            "consuming inbound messages"
        );

        loop {
            tokio::select! {
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                warn!(error = %e, "message ack failed");
                            }
                            if tx.send(delivery.data).await.is_err() {
                                // Engine loop is gone; stop consuming.
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(BrokerError::StreamClosed),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Broker connection/quality self-test.
///
/// Publishes a probe message to a unique healthcheck key and waits to
/// consume it back through the configured exchange.
pub async fn healthcheck(config: &MqBrokerConfig) -> Result<(), BrokerError> {
    let key = format!("cw-healthcheck.{}", Uuid::new_v4());
    let probe = format!("healthcheck-{}", Uuid::new_v4().simple());

    let (connection, channel) = connect_topic_exchange(
        &config.host,
        config.port,
        &config.username,
        &config.password,
        &config.exchange,
    )
    .await?;

    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            queue.name().as_str(),
            &config.exchange,
            &key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut consumer = channel
        .basic_consume(
            queue.name().as_str(),
            "healthcheck",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .basic_publish(
            &config.exchange,
            &key,
            BasicPublishOptions::default(),
            probe.as_bytes(),
            BasicProperties::default(),
        )
        .await?
        .await?;

    let received = tokio::time::timeout(Duration::from_secs(10), consumer.next()).await;
    let _ = channel.close(200, "done").await;
    let _ = connection.close(200, "done").await;

    match received {
        Ok(Some(Ok(delivery))) if delivery.data == probe.as_bytes() => {
            info!("healthcheck loopback succeeded");
            Ok(())
        }
        Ok(Some(Err(e))) => Err(e.into()),
        _ => {
            error!("healthcheck loopback failed");
            Err(BrokerError::HealthcheckTimeout)
        }
    }
}
