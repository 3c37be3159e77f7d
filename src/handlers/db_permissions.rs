//! Database permission registration.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use super::{ConfigHandler, DbService, Dispatch, DispatchContext};
use crate::bus::{BusRequest, ServiceBus};
use crate::correlator::Exchange;
use crate::error::Result;

pub const PUT_PERMISSIONS_METHOD: &str = "putPermissions";

/// Registers permissions with `putPermissions`.
///
/// Permissions are dropped by the database together with their kind, so
/// removal never contacts the service: it only erases the stamp.
pub struct DbPermissionsHandler {
    bus: Arc<dyn ServiceBus>,
    service: DbService,
}

impl DbPermissionsHandler {
    pub fn new(bus: Arc<dyn ServiceBus>, service: DbService) -> Self {
        Self { bus, service }
    }
}

impl ConfigHandler for DbPermissionsHandler {
    fn name(&self) -> &str {
        "DbPermissionsHandler"
    }

    fn apply(&self, ctx: &DispatchContext<'_>, payload: Value) -> Result<Dispatch> {
        let mut request = BusRequest::new(
            self.service.address(),
            PUT_PERMISSIONS_METHOD,
            json!({ "permissions": payload }),
        );

        // Package-scoped permissions are sent on behalf of their owner.
        let owner = ctx.parent_id();
        if !owner.is_empty() {
            request = request.with_sender(owner);
        }

        let hook = self.create_response_hook(ctx.artifact());
        Ok(Dispatch::Sent(Exchange::send(
            Arc::clone(&self.bus),
            ctx.artifact(),
            hook,
            request,
        )))
    }

    fn remove(&self, ctx: &DispatchContext<'_>, _payload: Value) -> Result<Dispatch> {
        debug!(artifact = %ctx.artifact().display(), "Permissions removed with their kind");
        ctx.unmark_applied();
        Ok(Dispatch::Deferred)
    }

    fn can_cache_status(&self, _artifact: &Path) -> bool {
        self.service.can_cache()
    }
}
