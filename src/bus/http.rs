//! JSON-over-HTTP bridge to the platform service bus.
//!
//! Each call is a `POST {base_url}/{service}/{method}` with the payload as the
//! JSON body. A 2xx reply body is returned as-is. A non-2xx status with a JSON
//! object body is still a reply, so the service's `errorCode` reaches the
//! response hooks, but it always carries `returnValue: false`. Any other
//! non-2xx status is a call failure.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{BusError, BusRequest, Result, ServiceBus, RETURN_VALUE};
use crate::config::TransportConfig;

/// Header carrying the identity a request is sent on behalf of.
pub const SENDER_HEADER: &str = "x-sender";

/// Service bus reached through an HTTP bridge.
pub struct HttpServiceBus {
    client: reqwest::Client,
    base_url: String,
}

impl HttpServiceBus {
    /// Create a bus client for the bridge at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    fn url_for(&self, request: &BusRequest) -> String {
        format!("{}/{}/{}", self.base_url, request.service, request.method)
    }
}

#[async_trait]
impl ServiceBus for HttpServiceBus {
    #[tracing::instrument(name = "bus.call", skip_all, fields(service = %request.service, method = %request.method))]
    async fn call(&self, request: BusRequest) -> Result<Value> {
        let url = self.url_for(&request);
        let mut builder = self.client.post(&url).json(&request.payload);
        if let Some(sender) = &request.sender {
            builder = builder.header(SENDER_HEADER, sender);
        }

        let response = builder.send().await.map_err(|e| BusError::CallFailed {
            service: request.service.clone(),
            method: request.method.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        debug!(status = %status, "Bus reply received");

        let body = response
            .bytes()
            .await
            .map_err(|e| BusError::MalformedReply(format!("{} (HTTP {})", e, status)))?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|e| BusError::MalformedReply(format!("{} (HTTP {})", e, status)));
        }

        // An error status never reads as success, even if the body omits returnValue.
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(mut fields)) => {
                warn!(status = %status, "Bus call failed with a service reply");
                fields
                    .entry(RETURN_VALUE)
                    .or_insert(Value::Bool(false));
                Ok(Value::Object(fields))
            }
            _ => Err(BusError::CallFailed {
                service: request.service.clone(),
                method: request.method.clone(),
                message: format!("HTTP {}", status),
            }),
        }
    }
}
