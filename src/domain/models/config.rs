//! Engine configuration model.
//!
//! One immutable record passed to every component constructor. Seeded
//! from YAML on disk, merged with the stored config document, and
//! overridable through `ADAPTATION_ENGINE_*` environment variables.

use serde::{Deserialize, Serialize};

/// Top-level configuration record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub mq_broker: MqBrokerConfig,
    pub plugins: PluginsConfig,
    /// Broker target for replies to the orchestration-template resource.
    pub heat_resource: BrokerTargetConfig,
    pub openstack_polling: OpenStackConfig,
    /// Broker target for synthetic orchestration notifications.
    pub event: BrokerTargetConfig,
    /// Broker target for application feedback notifications.
    pub app_feedback: BrokerTargetConfig,
    pub sla_agreements: SlaConfig,
    /// Read-only introspection HTTP endpoint.
    pub webbo: WebConfig,
    pub logging: LoggingConfig,
}

/// Journal / config document store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "adaptation-engine.db".into(),
        }
    }
}

/// The main broker: inbound events and outbound adaptation requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqBrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub exchange: String,
    pub routing_key: RoutingKeys,
}

impl Default for MqBrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5672,
            username: "guest".into(),
            password: "guest".into(),
            exchange: "adaptation".into(),
            routing_key: RoutingKeys::default(),
        }
    }
}

impl MqBrokerConfig {
    /// The broker as a publish target for adaptation requests.
    pub fn as_target(&self) -> BrokerTargetConfig {
        BrokerTargetConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            exchange: self.exchange.clone(),
            key: self.routing_key.outbound.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingKeys {
    pub inbound: String,
    pub outbound: String,
}

impl Default for RoutingKeys {
    fn default() -> Self {
        Self {
            inbound: "mq.inbound".into(),
            outbound: "mq.outbound".into(),
        }
    }
}

/// A single exchange + routing key on some broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerTargetConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub exchange: String,
    /// Routing key; for the heat resource target this is a template
    /// containing a `{resource_id}` placeholder.
    pub key: String,
}

impl Default for BrokerTargetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5672,
            username: "guest".into(),
            password: "guest".into(),
            exchange: String::new(),
            key: String::new(),
        }
    }
}

/// Plugin discovery and round configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory scanned for `<name>/<name>.py` script plugins.
    pub python: String,
    /// Directory scanned for `<name>/<name>.jar` embedded-runtime
    /// plugins.
    pub java: String,
    /// Ordered plugin rounds; each round is a list of plugin names.
    pub grouping: Vec<Vec<String>>,
    pub default_weighting: i64,
    pub weightings: Vec<PluginWeight>,
    /// Per-plugin join timeout within a round.
    pub timeout_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            python: "/etc/adaptation-engine/plugins/python".into(),
            java: "/etc/adaptation-engine/plugins/java".into(),
            grouping: Vec::new(),
            default_weighting: 1,
            weightings: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl PluginsConfig {
    /// Configured weight for a plugin, falling back to the default.
    pub fn weight_for(&self, name: &str) -> i64 {
        self.weightings
            .iter()
            .find(|w| w.name == name)
            .map_or(self.default_weighting, |w| w.weight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginWeight {
    pub name: String,
    pub weight: i64,
}

/// Credentials for the infrastructure APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenStackConfig {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub tenant: String,
}

impl Default for OpenStackConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://localhost:5000/v2.0".into(),
            username: "admin".into(),
            password: String::new(),
            tenant: "admin".into(),
        }
    }
}

/// SLA enforcement API settings. An empty endpoint disables the calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 8888 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, or error.
    pub level: String,
    /// pretty or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = Config::default();
        assert_eq!(config.mq_broker.port, 5672);
        assert_eq!(config.plugins.timeout_secs, 30);
        assert_eq!(config.plugins.default_weighting, 1);
        assert_eq!(config.webbo.port, 8888);
    }

    #[test]
    fn weight_lookup_falls_back_to_default() {
        let config = PluginsConfig {
            default_weighting: 2,
            weightings: vec![PluginWeight {
                name: "planner".into(),
                weight: 5,
            }],
            ..Default::default()
        };

        assert_eq!(config.weight_for("planner"), 5);
        assert_eq!(config.weight_for("unknown"), 2);
    }

    #[test]
    fn broker_as_target_uses_outbound_key() {
        let broker = MqBrokerConfig::default();
        let target = broker.as_target();
        assert_eq!(target.key, "mq.outbound");
        assert_eq!(target.exchange, "adaptation");
    }
}
