//! Service bus for request/response exchanges with platform services.
//!
//! This module contains:
//! - `ServiceBus` trait: sends one request and resolves to its reply
//! - `BusRequest`: service address, method and JSON payload
//! - Implementations: HTTP bridge, Mock

use async_trait::async_trait;
use serde_json::Value;

pub mod http;
pub mod mock;

pub use http::HttpServiceBus;
pub use mock::MockServiceBus;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Call to {service}/{method} failed: {message}")]
    CallFailed {
        service: String,
        method: String,
        message: String,
    },

    #[error("Malformed reply: {0}")]
    MalformedReply(String),
}

/// Reply field carrying the service-level success flag.
pub const RETURN_VALUE: &str = "returnValue";
/// Reply field carrying a service-specific error code.
pub const ERROR_CODE: &str = "errorCode";
/// Reply field carrying a human-readable error description.
pub const ERROR_TEXT: &str = "errorText";

/// A single call to a platform service.
#[derive(Debug, Clone, PartialEq)]
pub struct BusRequest {
    /// Bus address of the target service (e.g. `com.palm.db`).
    pub service: String,
    /// Method to invoke on the service.
    pub method: String,
    /// JSON payload.
    pub payload: Value,
    /// Identity the request is sent on behalf of, if any.
    pub sender: Option<String>,
}

impl BusRequest {
    pub fn new(service: impl Into<String>, method: impl Into<String>, payload: Value) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            payload,
            sender: None,
        }
    }

    /// Send the request on behalf of another application or service.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

/// Interface for reaching platform services.
///
/// Implementations:
/// - `HttpServiceBus`: JSON over HTTP bridge
/// - `MockServiceBus`: In-memory mock for testing
#[async_trait]
pub trait ServiceBus: Send + Sync {
    /// Send a request and wait for its reply.
    ///
    /// A reply with `returnValue: false` is still `Ok`; only transport-level
    /// failures are errors.
    async fn call(&self, request: BusRequest) -> Result<Value>;
}

/// Success flag of a reply. Absent means success.
pub fn reply_succeeded(reply: &Value) -> bool {
    reply
        .get(RETURN_VALUE)
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// Service-specific error code of a reply, if present.
pub fn reply_error_code(reply: &Value) -> Option<i64> {
    reply.get(ERROR_CODE).and_then(Value::as_i64)
}

/// Rewrite a failed reply as a success, dropping its error fields.
pub fn clear_reply_error(reply: &mut Value) {
    if let Some(fields) = reply.as_object_mut() {
        fields.remove(ERROR_CODE);
        fields.remove(ERROR_TEXT);
        fields.insert(RETURN_VALUE.to_string(), Value::Bool(true));
    }
}
