//! SLA enforcement API client.

use async_trait::async_trait;

use crate::domain::error::SlaError;
use crate::domain::models::config::SlaConfig;
use crate::domain::ports::SlaApi;

/// Client for the external SLA service. Every call is best-effort from
/// the pipeline's point of view; the caller logs and moves on.
pub struct SlaClient {
    http: reqwest::Client,
    config: SlaConfig,
}

impl SlaClient {
    /// Returns `None` when no endpoint is configured.
    pub fn from_config(config: &SlaConfig) -> Option<Self> {
        if config.endpoint.is_empty() {
            return None;
        }
        Some(Self {
            http: reqwest::Client::new(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl SlaApi for SlaClient {
    async fn start_enforcement(&self, agreement_id: &str) -> Result<(), SlaError> {
        let url = format!(
            "{}/enforcements/{agreement_id}/start",
            self.config.endpoint.trim_end_matches('/')
        );
        let response = self
            .http
            .put(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SlaError::UnexpectedStatus(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endpoint_disables_the_client() {
        assert!(SlaClient::from_config(&SlaConfig::default()).is_none());
    }

    #[tokio::test]
    async fn start_enforcement_puts_with_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/enforcements/agr-1/start")
            .match_header("Authorization", mockito::Matcher::Regex("Basic .+".into()))
            .with_status(200)
            .create_async()
            .await;

        let client = SlaClient::from_config(&SlaConfig {
            endpoint: server.url(),
            username: "sla-user".into(),
            password: "sla-pass".into(),
        })
        .unwrap();

        client.start_enforcement("agr-1").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", "/enforcements/agr-2/start")
            .with_status(503)
            .create_async()
            .await;

        let client = SlaClient::from_config(&SlaConfig {
            endpoint: server.url(),
            username: String::new(),
            password: String::new(),
        })
        .unwrap();

        assert!(matches!(
            client.start_enforcement("agr-2").await,
            Err(SlaError::UnexpectedStatus(503))
        ));
    }
}
