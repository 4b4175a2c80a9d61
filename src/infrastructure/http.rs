//! Read-only introspection endpoint.
//!
//! `GET /agreements` exposes the current agreement-to-stack map as
//! JSON; everything else gets a static brush-off. No mutation, no auth.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::watch;
use tracing::{error, info};

use crate::services::registry::ResourceRegistry;

async fn agreements(
    State(registry): State<Arc<ResourceRegistry>>,
) -> Json<std::collections::HashMap<String, crate::domain::models::resource::AgreementTarget>> {
    Json(registry.agreement_map().await)
}

async fn anything_else() -> &'static str {
    "No"
}

fn app(registry: Arc<ResourceRegistry>) -> Router {
    Router::new()
        .route("/agreements", get(agreements))
        .fallback(anything_else)
        .with_state(registry)
}

/// Serve the introspection endpoint until shutdown is signalled.
pub async fn serve(
    port: u16,
    registry: Arc<ResourceRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port, error = %e, "could not start introspection server");
            return;
        }
    };

    info!(port, "introspection server listening");
    let served = axum::serve(listener, app(registry)).with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    });
    if let Err(e) = served.await {
        error!(error = %e, "introspection server failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::BrokerError;
    use crate::domain::ports::{HeatReplyPublisher, Journal};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct NullReply;

    #[async_trait]
    impl HeatReplyPublisher for NullReply {
        async fn publish_to_heat_resource(
            &self,
            _resource_id: &str,
            _message: String,
        ) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    struct NullJournal;

    #[async_trait]
    impl Journal for NullJournal {
        async fn append(
            &self,
            _log_type: crate::domain::models::journal::JournalType,
            _stack_id: &str,
            _details: Value,
        ) {
        }
    }

    async fn serve_ephemeral(registry: Arc<ResourceRegistry>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(registry)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn agreements_endpoint_reflects_the_registry() {
        let registry = Arc::new(ResourceRegistry::new(
            Arc::new(NullReply),
            None,
            Arc::new(NullJournal),
        ));
        registry
            .handle_message(&json!({
                "heat": {
                    "type": "heat_create",
                    "data": {
                        "resource_id": "res-1",
                        "stack_id": "stack-1",
                        "name": "overload",
                        "actions": ["StopAction"],
                        "agreement_id": "agr-9",
                    }
                }
            }))
            .await;

        let base = serve_ephemeral(registry).await;
        let body: Value = reqwest::get(format!("{base}/agreements"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["agr-9"]["stack_id"], "stack-1");
        assert_eq!(body["agr-9"]["event_name"], "overload");
    }

    #[tokio::test]
    async fn other_paths_get_the_brush_off() {
        let registry = Arc::new(ResourceRegistry::new(
            Arc::new(NullReply),
            None,
            Arc::new(NullJournal),
        ));
        let base = serve_ephemeral(registry).await;

        let body = reqwest::get(format!("{base}/anything/at/all"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "No");
    }
}
