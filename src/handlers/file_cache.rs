//! File cache type registration.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use super::{accept_existing, required_str, ConfigHandler, Dispatch, DispatchContext};
use crate::bus::{BusRequest, ServiceBus, RETURN_VALUE};
use crate::correlator::{Exchange, ExchangeContext, ResponseHook};
use crate::error::{ConfigError, Result, Status};

pub const FILECACHE_SERVICE: &str = "com.palm.filecache";
pub const DEFINE_TYPE_METHOD: &str = "DefineType";
pub const DELETE_TYPE_METHOD: &str = "DeleteType";

/// File cache error codes reporting a type that is already defined.
pub const EXISTS_ERROR: i64 = -199;
pub const DEFINE_ERROR: i64 = -197;

const ALREADY_EXISTS_SUFFIX: &str = "' already exists.";

/// Defines file cache types with `DefineType` and deletes them with
/// `DeleteType`.
pub struct FileCacheHandler {
    bus: Arc<dyn ServiceBus>,
}

impl FileCacheHandler {
    pub fn new(bus: Arc<dyn ServiceBus>) -> Self {
        Self { bus }
    }

    fn send(&self, ctx: &DispatchContext<'_>, method: &str, payload: Value) -> Dispatch {
        let request = BusRequest::new(FILECACHE_SERVICE, method, payload);
        let hook = self.create_response_hook(ctx.artifact());
        Dispatch::Sent(Exchange::send(Arc::clone(&self.bus), ctx.artifact(), hook, request))
    }
}

impl ConfigHandler for FileCacheHandler {
    fn name(&self) -> &str {
        "FileCacheHandler"
    }

    fn apply(&self, ctx: &DispatchContext<'_>, payload: Value) -> Result<Dispatch> {
        Ok(self.send(ctx, DEFINE_TYPE_METHOD, payload))
    }

    fn remove(&self, ctx: &DispatchContext<'_>, payload: Value) -> Result<Dispatch> {
        let type_name = required_str(&payload, "typeName")?;
        Ok(self.send(ctx, DELETE_TYPE_METHOD, json!({ "typeName": type_name })))
    }

    fn create_response_hook(&self, _artifact: &Path) -> Box<dyn ResponseHook> {
        Box::new(FileCacheResponse)
    }
}

/// Accepts "type already exists" failures from `DefineType` as success.
///
/// The service reports several define failures under one code, so the error
/// text is checked as well.
struct FileCacheResponse;

impl ResponseHook for FileCacheResponse {
    fn on_response(
        &mut self,
        exchange: &mut ExchangeContext<'_>,
        response: &mut Value,
        error: Option<&ConfigError>,
    ) -> Status {
        // A reply without `returnValue` is not trusted as a success here.
        let success = response.get(RETURN_VALUE).and_then(Value::as_bool) == Some(true);
        accept_existing(
            exchange,
            response,
            error,
            error.is_some() || !success,
            &[EXISTS_ERROR, DEFINE_ERROR],
            Some(ALREADY_EXISTS_SUFFIX),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{PassOutcome, RunMode};
    use crate::bus::MockServiceBus;
    use crate::test_utils::{drive, Fixture, RecordingSink};
    use std::path::PathBuf;

    async fn define_with_reply(reply: Value) -> (Fixture, PathBuf, PassOutcome, bool) {
        let fixture = Fixture::new();
        let artifact = fixture.write("com.example.app/thumbs", r#"{"typeName": "thumbs"}"#);
        let bus = Arc::new(MockServiceBus::new());
        bus.set_reply(DEFINE_TYPE_METHOD, reply).await;
        let handler = Arc::new(FileCacheHandler::new(bus));
        let mut engine = fixture.engine("", RunMode::Apply, handler, Arc::new(RecordingSink::new()));

        engine.run();
        drive(&mut engine).await;

        let stamped = engine.is_already_applied(&artifact);
        (fixture, artifact, engine.outcome().clone(), stamped)
    }

    #[tokio::test]
    async fn test_define_success() {
        let (_fixture, artifact, outcome, stamped) =
            define_with_reply(json!({"returnValue": true})).await;
        assert_eq!(outcome.applied(), &[artifact]);
        assert!(stamped);
    }

    #[tokio::test]
    async fn test_already_exists_counts_as_applied() {
        let (_fixture, artifact, outcome, stamped) = define_with_reply(json!({
            "returnValue": false,
            "errorCode": DEFINE_ERROR,
            "errorText": "Type 'thumbs' already exists."
        }))
        .await;
        assert_eq!(outcome.applied(), &[artifact]);
        assert!(outcome.failed().is_empty());
        assert!(stamped);
    }

    #[tokio::test]
    async fn test_exists_code_with_other_text_fails() {
        let (_fixture, artifact, outcome, stamped) = define_with_reply(json!({
            "returnValue": false,
            "errorCode": EXISTS_ERROR,
            "errorText": "Type 'thumbs' has an invalid size."
        }))
        .await;
        assert_eq!(outcome.failed(), &[artifact]);
        assert!(!stamped);
    }

    #[tokio::test]
    async fn test_unrelated_code_fails() {
        let (_fixture, artifact, outcome, _) = define_with_reply(json!({
            "returnValue": false,
            "errorCode": -200,
            "errorText": "Type 'thumbs' already exists."
        }))
        .await;
        assert_eq!(outcome.failed(), &[artifact]);
    }

    #[tokio::test]
    async fn test_missing_return_value_still_checks_error_code() {
        let (_fixture, artifact, outcome, _) = define_with_reply(json!({
            "errorCode": EXISTS_ERROR,
            "errorText": "Type 'thumbs' already exists."
        }))
        .await;
        assert_eq!(outcome.applied(), &[artifact]);
    }

    #[tokio::test]
    async fn test_delete_type_sends_type_name() {
        let fixture = Fixture::new();
        fixture.write("thumbs", r#"{"typeName": "thumbs", "maxSize": 100}"#);
        let bus = Arc::new(MockServiceBus::new());
        let handler = Arc::new(FileCacheHandler::new(bus.clone()));
        let mut engine = fixture.engine("", RunMode::Remove, handler, Arc::new(RecordingSink::new()));

        engine.run();
        drive(&mut engine).await;

        let requests = bus.take_requests().await;
        assert_eq!(requests[0].service, FILECACHE_SERVICE);
        assert_eq!(requests[0].method, DELETE_TYPE_METHOD);
        assert_eq!(requests[0].payload, json!({"typeName": "thumbs"}));
    }
}
