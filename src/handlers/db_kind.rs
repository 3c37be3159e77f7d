//! Database kind registration.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error};

use super::{payload_object, required_str, ConfigHandler, Dispatch, DispatchContext};
use crate::bus::{BusRequest, ServiceBus};
use crate::correlator::Exchange;
use crate::error::{ConfigError, Result};

pub const PUT_KIND_METHOD: &str = "putKind";
pub const DEL_KIND_METHOD: &str = "delKind";

/// Database service a kind or permission artifact targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbService {
    Main,
    Media,
    Temp,
}

impl DbService {
    pub fn address(self) -> &'static str {
        match self {
            DbService::Main => "com.palm.db",
            DbService::Media => "com.webos.mediadb",
            DbService::Temp => "com.palm.tempdb",
        }
    }

    /// Temporary databases are wiped on reboot, so completion is never cached.
    pub fn can_cache(self) -> bool {
        !matches!(self, DbService::Temp)
    }
}

/// Registers kinds with `putKind` and deletes them with `delKind`.
pub struct DbKindHandler {
    bus: Arc<dyn ServiceBus>,
    service: DbService,
}

impl DbKindHandler {
    pub fn new(bus: Arc<dyn ServiceBus>, service: DbService) -> Self {
        Self { bus, service }
    }

    /// Owner of a kind: the artifact's parent id, which overrides any owner
    /// in the payload, else the payload's own `owner`.
    fn resolve_owner(ctx: &DispatchContext<'_>, payload: &mut Value) -> Result<String> {
        let parent = ctx.parent_id();
        if !parent.is_empty() {
            debug!(artifact = %ctx.artifact().display(), owner = %parent, "Setting kind owner");
            let owner = parent.to_string();
            payload_object(payload)?.insert("owner".to_string(), Value::String(owner.clone()));
            return Ok(owner);
        }

        match payload.get("owner").and_then(Value::as_str) {
            Some(owner) => Ok(owner.to_string()),
            None => {
                error!(artifact = %ctx.artifact().display(), "Cannot determine owner of db kind");
                Err(ConfigError::InvalidArgument(format!(
                    "cannot determine owner of db kind for {}",
                    ctx.artifact().display()
                )))
            }
        }
    }

    fn send(&self, ctx: &DispatchContext<'_>, method: &str, owner: String, payload: Value) -> Dispatch {
        let request = BusRequest::new(self.service.address(), method, payload).with_sender(owner);
        let hook = self.create_response_hook(ctx.artifact());
        Dispatch::Sent(Exchange::send(Arc::clone(&self.bus), ctx.artifact(), hook, request))
    }
}

impl ConfigHandler for DbKindHandler {
    fn name(&self) -> &str {
        "DbKindHandler"
    }

    fn apply(&self, ctx: &DispatchContext<'_>, mut payload: Value) -> Result<Dispatch> {
        let owner = Self::resolve_owner(ctx, &mut payload)?;
        Ok(self.send(ctx, PUT_KIND_METHOD, owner, payload))
    }

    fn remove(&self, ctx: &DispatchContext<'_>, mut payload: Value) -> Result<Dispatch> {
        let owner = Self::resolve_owner(ctx, &mut payload)?;
        let id = required_str(&payload, "id")?;
        Ok(self.send(ctx, DEL_KIND_METHOD, owner, json!({ "id": id })))
    }

    fn can_cache_status(&self, _artifact: &Path) -> bool {
        self.service.can_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::RunMode;
    use crate::bus::MockServiceBus;
    use crate::test_utils::{drive, Fixture, RecordingSink};

    async fn run_pass(
        fixture: &Fixture,
        id: &str,
        mode: RunMode,
        service: DbService,
    ) -> (Arc<MockServiceBus>, crate::artifact::PassOutcome) {
        let bus = Arc::new(MockServiceBus::new());
        let handler = Arc::new(DbKindHandler::new(bus.clone(), service));
        let mut engine = fixture.engine(id, mode, handler, Arc::new(RecordingSink::new()));
        engine.run();
        drive(&mut engine).await;
        (bus, engine.outcome().clone())
    }

    #[tokio::test]
    async fn test_put_kind_owner_from_parent_directory() {
        let fixture = Fixture::new();
        fixture.write(
            "com.example.app/kind.json",
            r#"{"id": "com.example.app.item:1", "owner": "someone.else"}"#,
        );

        let (bus, outcome) = run_pass(&fixture, "", RunMode::Apply, DbService::Main).await;

        let requests = bus.take_requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].service, "com.palm.db");
        assert_eq!(requests[0].method, PUT_KIND_METHOD);
        assert_eq!(requests[0].payload["owner"], "com.example.app");
        assert_eq!(requests[0].sender.as_deref(), Some("com.example.app"));
        assert_eq!(outcome.applied().len(), 1);
    }

    #[tokio::test]
    async fn test_put_kind_owner_from_payload() {
        let fixture = Fixture::new();
        fixture.write("kind.json", r#"{"id": "k:1", "owner": "com.example.svc"}"#);

        let (bus, _) = run_pass(&fixture, "", RunMode::Apply, DbService::Media).await;

        let requests = bus.take_requests().await;
        assert_eq!(requests[0].service, "com.webos.mediadb");
        assert_eq!(requests[0].sender.as_deref(), Some("com.example.svc"));
    }

    #[tokio::test]
    async fn test_put_kind_without_owner_fails() {
        let fixture = Fixture::new();
        fixture.write("kind.json", r#"{"id": "k:1"}"#);

        let (bus, outcome) = run_pass(&fixture, "", RunMode::Apply, DbService::Main).await;

        assert_eq!(bus.call_count().await, 0);
        assert_eq!(outcome.failed().len(), 1);
    }

    #[tokio::test]
    async fn test_del_kind_sends_id_only() {
        let fixture = Fixture::new();
        fixture.write("kind.json", r#"{"id": "k:1", "indexes": []}"#);

        let (bus, outcome) =
            run_pass(&fixture, "com.example.app", RunMode::Remove, DbService::Main).await;

        let requests = bus.take_requests().await;
        assert_eq!(requests[0].method, DEL_KIND_METHOD);
        assert_eq!(requests[0].payload, json!({"id": "k:1"}));
        assert_eq!(requests[0].sender.as_deref(), Some("com.example.app"));
        assert_eq!(outcome.applied().len(), 1);
    }

    #[tokio::test]
    async fn test_del_kind_without_id_fails() {
        let fixture = Fixture::new();
        fixture.write("com.example.app/kind.json", "{}");

        let (bus, outcome) = run_pass(&fixture, "", RunMode::Remove, DbService::Main).await;

        assert_eq!(bus.call_count().await, 0);
        assert_eq!(outcome.failed().len(), 1);
    }

    #[test]
    fn test_temp_db_is_not_cached() {
        let bus: Arc<dyn ServiceBus> = Arc::new(MockServiceBus::new());
        let handler = DbKindHandler::new(bus, DbService::Temp);
        assert!(!handler.can_cache_status(Path::new("/etc/palm/tempdb/kinds/k")));
        assert_eq!(DbService::Temp.address(), "com.palm.tempdb");
    }
}
