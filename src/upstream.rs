// src/upstream.rs

use crate::config::HttpConfig;
use crate::error::{EngineError, Result};
use crate::handlers::{Action, ResponseProcessor};
use crate::message::Message;
use crate::providers::ProviderAdapter;
use crate::utils::preview_key;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// HTTP transport to providers. Sends one request, classifies the answer and
/// extracts the reply; every failure leaves here as a classified
/// [`EngineError`].
#[derive(Clone)]
pub struct Upstream {
    client: Client,
    processor: ResponseProcessor,
}

impl Upstream {
    pub fn new(http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(client, ResponseProcessor::default()))
    }

    pub fn with_client(client: Client, processor: ResponseProcessor) -> Self {
        Self { client, processor }
    }

    /// One request to `provider`. The response body is fully read before the
    /// connection is released.
    pub async fn send(
        &self,
        provider: &str,
        adapter: &dyn ProviderAdapter,
        api_key: Option<&str>,
        model: &str,
        payload: &Value,
    ) -> Result<Message> {
        let url = adapter.resolve_endpoint(model);
        let mut request = self.client.post(&url).json(payload);
        if let Some(key) = api_key {
            request = adapter.authorize(request, key);
        }

        debug!(
            provider,
            model,
            api_key.preview = %api_key.map(preview_key).unwrap_or_else(|| "none".to_string()),
            "Sending request to provider"
        );

        let response = request
            .send()
            .await
            .map_err(|e| transport_failure(provider, e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_failure(provider, e))?;
        trace!(provider, status = status.as_u16(), bytes = body.len(), "Provider responded");

        match self.processor.classify(provider, status, &body) {
            Action::Accept => {}
            Action::Fail(error) => return Err(error),
        }

        let raw: Value = serde_json::from_slice(&body).map_err(|e| {
            warn!(provider, error = %e, "Provider returned a non-JSON success body");
            EngineError::ContentExtraction {
                provider: provider.to_string(),
            }
        })?;

        adapter
            .extract_reply(&raw)
            .ok_or_else(|| EngineError::ContentExtraction {
                provider: provider.to_string(),
            })
    }

    /// Lightweight probe: any successful answer counts as healthy.
    pub async fn health_check(
        &self,
        provider: &str,
        adapter: &dyn ProviderAdapter,
        api_key: Option<&str>,
        model: &str,
    ) -> bool {
        let payload = adapter.probe_payload(model);
        match self.send(provider, adapter, api_key, model, &payload).await {
            Ok(_) => true,
            Err(e) => {
                debug!(provider, error = %e, "Health probe failed");
                false
            }
        }
    }
}

/// The URL is stripped from the message so credentials in it never reach logs.
fn transport_failure(provider: &str, error: reqwest::Error) -> EngineError {
    let reason = if error.is_timeout() {
        "request timed out"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "transport error"
    };
    let error = error.without_url();
    EngineError::service_unavailable(provider, format!("{reason}: {error}"))
}
