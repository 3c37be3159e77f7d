//! Mock service bus implementation for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{BusError, BusRequest, Result, ServiceBus};

/// Mock service bus for testing.
///
/// Every call is recorded. Replies default to `{"returnValue": true}` and can
/// be scripted per method.
#[derive(Default)]
pub struct MockServiceBus {
    requests: RwLock<Vec<BusRequest>>,
    replies: RwLock<HashMap<String, Value>>,
    fail_on_call: RwLock<bool>,
}

impl MockServiceBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `reply` to every call of `method`.
    pub async fn set_reply(&self, method: impl Into<String>, reply: Value) {
        self.replies.write().await.insert(method.into(), reply);
    }

    pub async fn set_fail_on_call(&self, fail: bool) {
        *self.fail_on_call.write().await = fail;
    }

    pub async fn call_count(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn take_requests(&self) -> Vec<BusRequest> {
        std::mem::take(&mut *self.requests.write().await)
    }
}

#[async_trait]
impl ServiceBus for MockServiceBus {
    async fn call(&self, request: BusRequest) -> Result<Value> {
        let method = request.method.clone();
        self.requests.write().await.push(request);

        if *self.fail_on_call.read().await {
            return Err(BusError::Connection("Mock call failure".to_string()));
        }

        Ok(self
            .replies
            .read()
            .await
            .get(&method)
            .cloned()
            .unwrap_or_else(|| json!({ "returnValue": true })))
    }
}
