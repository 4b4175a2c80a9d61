//! Infrastructure API clients.
//!
//! Identity, compute, orchestration, and metrics access over REST, with
//! password authentication against the identity service and endpoint
//! discovery from its service catalog. One client instance serves the
//! whole engine; sessions are cached per tenant and refreshed on auth
//! failure.

pub mod compute;
pub mod orchestration;

use std::collections::HashMap;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::error::OpenStackError;
use crate::domain::models::config::OpenStackConfig;
use crate::domain::ports::Tenant;

/// An authenticated identity session.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub token: String,
    /// Service name -> public endpoint URL.
    pub endpoints: HashMap<String, String>,
}

impl Session {
    pub fn endpoint(&self, service: &str) -> Result<&str, OpenStackError> {
        self.endpoints
            .get(service)
            .map(String::as_str)
            .ok_or_else(|| OpenStackError::MissingEndpoint(service.to_owned()))
    }
}

/// REST clients for the identity / compute / orchestration / metrics
/// APIs.
pub struct OpenStackClients {
    http: reqwest::Client,
    config: OpenStackConfig,
    /// Session cache keyed by tenant name.
    sessions: RwLock<HashMap<String, Session>>,
}

impl OpenStackClients {
    pub fn new(config: OpenStackConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Authenticate against the identity service for a tenant,
    /// returning the token and the discovered endpoint catalog.
    async fn authenticate(&self, tenant_name: &str) -> Result<Session, OpenStackError> {
        debug!(tenant = tenant_name, "authenticating against identity service");

        let body = json!({
            "auth": {
                "passwordCredentials": {
                    "username": self.config.username,
                    "password": self.config.password,
                },
                "tenantName": tenant_name,
            }
        });

        let response = self
            .http
            .post(format!("{}/tokens", self.config.auth_url))
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let access: Value = response.json().await?;

        let token = access["access"]["token"]["id"]
            .as_str()
            .ok_or_else(|| OpenStackError::Auth("no token in identity response".into()))?
            .to_owned();

        let mut endpoints = HashMap::new();
        if let Some(catalog) = access["access"]["serviceCatalog"].as_array() {
            for service in catalog {
                let url = service["endpoints"]
                    .get(0)
                    .and_then(|e| e["publicURL"].as_str());
                let Some(url) = url else { continue };
                let url = url.trim_end_matches('/').to_owned();
                if let Some(name) = service["name"].as_str() {
                    endpoints.insert(name.to_owned(), url.clone());
                }
                if let Some(kind) = service["type"].as_str() {
                    endpoints.entry(kind.to_owned()).or_insert(url);
                }
            }
        }

        Ok(Session { token, endpoints })
    }

    /// The cached session for a tenant, authenticating on first use.
    pub(crate) async fn session_for(&self, tenant_name: &str) -> Result<Session, OpenStackError> {
        if let Some(session) = self.sessions.read().await.get(tenant_name) {
            return Ok(session.clone());
        }
        let session = self.authenticate(tenant_name).await?;
        self.sessions
            .write()
            .await
            .insert(tenant_name.to_owned(), session.clone());
        Ok(session)
    }

    /// The session for the engine's configured admin tenant.
    pub(crate) async fn session(&self) -> Result<Session, OpenStackError> {
        self.session_for(&self.config.tenant).await
    }

    /// Drop a cached session after an auth failure.
    pub(crate) async fn invalidate(&self, tenant_name: &str) {
        self.sessions.write().await.remove(tenant_name);
    }

    /// GET a JSON document with the session token, retrying once with a
    /// fresh session on 401.
    pub(crate) async fn get_json(
        &self,
        tenant_name: &str,
        url: String,
    ) -> Result<Value, OpenStackError> {
        for attempt in 0..2 {
            let session = self.session_for(tenant_name).await?;
            let response = self
                .http
                .get(&url)
                .header("X-Auth-Token", &session.token)
                .send()
                .await?;
            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                warn!(tenant = tenant_name, "token rejected, re-authenticating");
                self.invalidate(tenant_name).await;
                continue;
            }
            let response = check_status(response).await?;
            return Ok(response.json().await?);
        }
        unreachable!("loop always returns by the second attempt")
    }

    /// Issue a JSON request with the admin session, retrying once with a
    /// fresh session on 401. Returns the response body when any.
    pub(crate) async fn send_json(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Value, OpenStackError> {
        let tenant = self.config.tenant.clone();
        for attempt in 0..2 {
            let session = self.session_for(&tenant).await?;
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("X-Auth-Token", &session.token);
            if let Some(body) = &body {
                request = request.json(body);
            }
            let response = request.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                warn!(tenant = %tenant, "token rejected, re-authenticating");
                self.invalidate(&tenant).await;
                continue;
            }
            let response = check_status(response).await?;
            return Ok(response.json().await.unwrap_or(Value::Null));
        }
        unreachable!("loop always returns by the second attempt")
    }

    /// The admin-session endpoint URL for a service.
    pub(crate) async fn endpoint(&self, service: &str) -> Result<String, OpenStackError> {
        let session = self.session().await?;
        Ok(session.endpoint(service)?.to_owned())
    }

    /// Tenants visible to the admin credentials.
    pub async fn tenants(&self) -> Result<Vec<Tenant>, OpenStackError> {
        let session = self.session().await?;
        let response = self
            .http
            .get(format!("{}/tenants", self.config.auth_url))
            .header("X-Auth-Token", &session.token)
            .send()
            .await?;
        let response = check_status(response).await?;
        let listing: Value = response.json().await?;

        let tenants = listing["tenants"]
            .as_array()
            .ok_or_else(|| OpenStackError::Malformed("tenant listing has no tenants".into()))?
            .iter()
            .filter_map(|t| {
                Some(Tenant {
                    id: t["id"].as_str()?.to_owned(),
                    name: t["name"].as_str()?.to_owned(),
                })
            })
            .collect();
        Ok(tenants)
    }

    /// Service endpoints handed to plugin processes, best-effort.
    pub async fn plugin_endpoints(&self) -> HashMap<String, String> {
        match self.session().await {
            Ok(session) => session.endpoints,
            Err(e) => {
                warn!(error = %e, "could not resolve endpoints for plugins");
                HashMap::new()
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, OpenStackError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(OpenStackError::UnexpectedStatus {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}
