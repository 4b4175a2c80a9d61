//! Compute API operations and the hypervisor location snapshot.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::error::OpenStackError;
use crate::domain::ports::{ComputeApi, HypervisorHost, LocationSource};

use super::OpenStackClients;

const COMPUTE_SERVICE: &str = "nova";

impl OpenStackClients {
    async fn compute_url(&self, path: &str) -> Result<String, OpenStackError> {
        Ok(format!("{}{path}", self.endpoint(COMPUTE_SERVICE).await?))
    }

    async fn server_action(&self, server_id: &str, body: Value) -> Result<(), OpenStackError> {
        let url = self
            .compute_url(&format!("/servers/{server_id}/action"))
            .await?;
        self.send_json(Method::POST, url, Some(body)).await?;
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for OpenStackClients {
    async fn live_migrate(&self, server_id: &str, host: &str) -> Result<(), OpenStackError> {
        self.server_action(
            server_id,
            json!({
                "os-migrateLive": {
                    "host": host,
                    "block_migration": false,
                    "disk_over_commit": false,
                }
            }),
        )
        .await
    }

    async fn resize(&self, server_id: &str, flavor_id: &str) -> Result<(), OpenStackError> {
        self.server_action(server_id, json!({"resize": {"flavorRef": flavor_id}}))
            .await
    }

    async fn start_server(&self, server_id: &str) -> Result<(), OpenStackError> {
        self.server_action(server_id, json!({"os-start": null})).await
    }

    async fn stop_server(&self, server_id: &str) -> Result<(), OpenStackError> {
        self.server_action(server_id, json!({"os-stop": null})).await
    }

    async fn server_power_state(&self, server_id: &str) -> Result<i64, OpenStackError> {
        let url = self.compute_url(&format!("/servers/{server_id}")).await?;
        let server = self.send_json(Method::GET, url, None).await?;
        server["server"]["OS-EXT-STS:power_state"]
            .as_i64()
            .ok_or_else(|| OpenStackError::Malformed("server has no power state".into()))
    }

    async fn flavor_id_by_name(&self, name: &str) -> Result<Option<String>, OpenStackError> {
        let url = self.compute_url("/flavors/detail").await?;
        let listing = self.send_json(Method::GET, url, None).await?;
        let flavors = listing["flavors"]
            .as_array()
            .ok_or_else(|| OpenStackError::Malformed("flavor listing has no flavors".into()))?;

        Ok(flavors
            .iter()
            .find(|f| f["name"].as_str() == Some(name))
            .and_then(|f| match &f["id"] {
                Value::String(id) => Some(id.clone()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            }))
    }

    async fn hypervisor_servers(
        &self,
        host_pattern: &str,
    ) -> Result<Vec<HypervisorHost>, OpenStackError> {
        let url = self
            .compute_url(&format!("/os-hypervisors/{host_pattern}/servers"))
            .await?;
        let listing = self.send_json(Method::GET, url, None).await?;

        let hosts = listing["hypervisors"]
            .as_array()
            .map(|hypervisors| {
                hypervisors
                    .iter()
                    .filter_map(|h| {
                        Some(HypervisorHost {
                            hostname: h["hypervisor_hostname"].as_str()?.to_owned(),
                            server_ids: h["servers"]
                                .as_array()
                                .map(|servers| {
                                    servers
                                        .iter()
                                        .filter_map(|s| s["uuid"].as_str().map(str::to_owned))
                                        .collect()
                                })
                                .unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hosts)
    }
}

/// Best-effort VM-to-hypervisor snapshots for journal decoration.
///
/// Walks the hypervisor listing and resolves each host's servers. The
/// result is cached briefly so bursts of journal writes do not hammer
/// the compute API.
pub struct HypervisorLocator {
    clients: std::sync::Arc<OpenStackClients>,
    cache: Mutex<Option<(Instant, Value)>>,
    ttl: Duration,
}

impl HypervisorLocator {
    pub fn new(clients: std::sync::Arc<OpenStackClients>) -> Self {
        Self {
            clients,
            cache: Mutex::new(None),
            ttl: Duration::from_secs(30),
        }
    }

    async fn snapshot(&self) -> Result<Value, OpenStackError> {
        let url = self.clients.compute_url("/os-hypervisors").await?;
        let listing = self.clients.send_json(Method::GET, url, None).await?;

        let mut mapping = serde_json::Map::new();
        for hypervisor in listing["hypervisors"].as_array().unwrap_or(&Vec::new()) {
            let Some(hostname) = hypervisor["hypervisor_hostname"].as_str() else {
                continue;
            };
            match self.clients.hypervisor_servers(hostname).await {
                Ok(hosts) => {
                    for host in hosts {
                        for server in host.server_ids {
                            mapping.insert(server, Value::String(host.hostname.clone()));
                        }
                    }
                }
                Err(e) => warn!(hostname, error = %e, "hypervisor server lookup failed"),
            }
        }
        Ok(Value::Object(mapping))
    }
}

#[async_trait]
impl LocationSource for HypervisorLocator {
    async fn stack_location(&self, _stack_id: &str) -> Option<Value> {
        let mut cache = self.cache.lock().await;
        if let Some((taken, snapshot)) = cache.as_ref() {
            if taken.elapsed() < self.ttl {
                return Some(snapshot.clone());
            }
        }
        match self.snapshot().await {
            Ok(snapshot) => {
                *cache = Some((Instant::now(), snapshot.clone()));
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "could not snapshot VM locations");
                None
            }
        }
    }
}
