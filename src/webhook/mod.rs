//! Posts completed message records to the external notification endpoint.
//!
//! Fire-and-forget HTTP notification: log-and-continue on delivery
//! failure, nothing upstream ever awaits success, via a single
//! `reqwest::Client` POST.

use crate::error::AppResult;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Body posted to the webhook: `{caller_id, service, nom, societe, sujet}`.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub caller_id: String,
    pub service: String,
    pub nom: String,
    pub societe: String,
    pub sujet: String,
}

/// Implementations never surface delivery failures to the caller, they
/// are logged internally.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn notify(&self, payload: WebhookPayload) -> AppResult<()>;
}

pub struct HttpWebhookNotifier {
    http: Client,
    url: Option<String>,
}

impl HttpWebhookNotifier {
    pub fn new(url: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self { http, url }
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    async fn notify(&self, payload: WebhookPayload) -> AppResult<()> {
        let Some(url) = &self.url else {
            return Ok(());
        };

        match self.http.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                warn!(status = %response.status(), "webhook delivery rejected, call completes normally");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "webhook delivery failed, call completes normally");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_url_is_a_noop() {
        let notifier = HttpWebhookNotifier::new(None);
        let payload = WebhookPayload {
            caller_id: "+41000000".into(),
            service: "Non spécifié".into(),
            nom: "Marie".into(),
            societe: "Acme".into(),
            sujet: "devis".into(),
        };
        assert!(notifier.notify(payload).await.is_ok());
    }
}
