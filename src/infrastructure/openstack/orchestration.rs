//! Orchestration API operations and the state-recovery inventory walk.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::domain::error::OpenStackError;
use crate::domain::ports::{CloudInventory, OrchestrationApi, StackResource, StackSummary, Tenant};

use super::OpenStackClients;

const ORCHESTRATION_SERVICE: &str = "heat";

impl OpenStackClients {
    async fn orchestration_url(&self, path: &str) -> Result<String, OpenStackError> {
        Ok(format!(
            "{}{path}",
            self.endpoint(ORCHESTRATION_SERVICE).await?
        ))
    }

    async fn tenant_orchestration_url(
        &self,
        tenant: &Tenant,
        path: &str,
    ) -> Result<String, OpenStackError> {
        let session = self.session_for(&tenant.name).await?;
        Ok(format!("{}{path}", session.endpoint(ORCHESTRATION_SERVICE)?))
    }
}

/// The short form of a stack status: the part after the operation
/// prefix, so `UPDATE_COMPLETE` and `CREATE_COMPLETE` both read as
/// `COMPLETE`.
fn short_status(stack_status: &str) -> String {
    stack_status
        .rsplit('_')
        .next()
        .unwrap_or(stack_status)
        .to_owned()
}

#[async_trait]
impl OrchestrationApi for OpenStackClients {
    async fn stack_status(&self, stack_id: &str) -> Result<String, OpenStackError> {
        let url = self.orchestration_url(&format!("/stacks/{stack_id}")).await?;
        let detail = self.send_json(Method::GET, url, None).await?;
        detail["stack"]["stack_status"]
            .as_str()
            .map(short_status)
            .ok_or_else(|| OpenStackError::Malformed("stack detail has no status".into()))
    }

    async fn stack_template(&self, stack_id: &str) -> Result<Value, OpenStackError> {
        let url = self
            .orchestration_url(&format!("/stacks/{stack_id}/template"))
            .await?;
        self.send_json(Method::GET, url, None).await
    }

    async fn update_stack_template(
        &self,
        stack_id: &str,
        template_yaml: String,
    ) -> Result<(), OpenStackError> {
        let url = self.orchestration_url(&format!("/stacks/{stack_id}")).await?;
        self.send_json(Method::PUT, url, Some(json!({"template": template_yaml})))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CloudInventory for OpenStackClients {
    async fn tenants(&self) -> Result<Vec<Tenant>, OpenStackError> {
        OpenStackClients::tenants(self).await
    }

    async fn stacks(&self, tenant: &Tenant) -> Result<Vec<StackSummary>, OpenStackError> {
        let url = self.tenant_orchestration_url(tenant, "/stacks").await?;
        let listing = self.get_json(&tenant.name, url).await?;

        Ok(listing["stacks"]
            .as_array()
            .map(|stacks| {
                stacks
                    .iter()
                    .filter_map(|s| {
                        Some(StackSummary {
                            id: s["id"].as_str()?.to_owned(),
                            name: s["stack_name"].as_str().unwrap_or_default().to_owned(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn resources(
        &self,
        tenant: &Tenant,
        stack_id: &str,
    ) -> Result<Vec<StackResource>, OpenStackError> {
        let url = self
            .tenant_orchestration_url(tenant, &format!("/stacks/{stack_id}/resources"))
            .await?;
        let listing = self.get_json(&tenant.name, url).await?;

        Ok(listing["resources"]
            .as_array()
            .map(|resources| {
                resources
                    .iter()
                    .filter_map(|r| {
                        Some(StackResource {
                            resource_name: r["resource_name"].as_str()?.to_owned(),
                            resource_type: r["resource_type"].as_str()?.to_owned(),
                            physical_resource_id: r["physical_resource_id"]
                                .as_str()
                                .unwrap_or_default()
                                .to_owned(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stack_template(
        &self,
        tenant: &Tenant,
        stack_id: &str,
    ) -> Result<Value, OpenStackError> {
        let url = self
            .tenant_orchestration_url(tenant, &format!("/stacks/{stack_id}/template"))
            .await?;
        self.get_json(&tenant.name, url).await
    }
}
