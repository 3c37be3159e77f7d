//! Activity registration with the activity manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error};

use super::{accept_existing, payload_object, required_str, ConfigHandler, Dispatch, DispatchContext};
use crate::artifact::ConfigKind;
use crate::bus::{reply_succeeded, BusRequest, ServiceBus};
use crate::correlator::{Exchange, ExchangeContext, ResponseHook};
use crate::error::{ConfigError, Result, Status};

pub const ACTIVITY_MANAGER_SERVICE: &str = "com.palm.activitymanager";
pub const CREATE_METHOD: &str = "create";
pub const CANCEL_METHOD: &str = "cancel";

/// Activity manager error code for an activity that already exists.
pub const EXISTS_ERROR: i64 = -1;

const ACTIVITY: &str = "activity";
const FIRST_USE_SAFE: &str = "firstUseSafe";

/// Creates activities with `create` and cancels them with `cancel`.
///
/// Until first use has completed only activities flagged `firstUseSafe` are
/// created; the rest are deferred to a later pass. Activities are owned by the
/// activity manager's own store, so their completion is never cached.
pub struct ActivityHandler {
    bus: Arc<dyn ServiceBus>,
    app_dir: PathBuf,
    first_use_only: bool,
}

impl ActivityHandler {
    /// `activities_dir` is the shared activities tree; artifacts of unknown
    /// kind below its `applications` subdirectory belong to applications.
    pub fn new(bus: Arc<dyn ServiceBus>, activities_dir: &Path, first_use_flag: &Path) -> Self {
        let first_use_only = !first_use_flag.exists();
        if !first_use_only {
            debug!("First use has completed, installing all activities");
        }
        Self {
            bus,
            app_dir: activities_dir.join("applications"),
            first_use_only,
        }
    }

    fn creator(ctx: &DispatchContext<'_>) -> Result<String> {
        let creator = ctx.parent_id();
        if creator.is_empty() {
            error!(
                artifact = %ctx.artifact().display(),
                "Creator id for activity is empty - needs to be in an appropriate subdirectory"
            );
            return Err(ConfigError::InvalidArgument(format!(
                "no creator for activity {}",
                ctx.artifact().display()
            )));
        }
        Ok(creator.to_string())
    }

    fn creator_kind(&self, ctx: &DispatchContext<'_>) -> ConfigKind {
        match ctx.kind() {
            ConfigKind::Unknown if ctx.artifact().starts_with(&self.app_dir) => {
                ConfigKind::Application
            }
            ConfigKind::Unknown => ConfigKind::Service,
            kind => kind,
        }
    }

    fn send(&self, ctx: &DispatchContext<'_>, method: &str, payload: Value) -> Dispatch {
        let request = BusRequest::new(ACTIVITY_MANAGER_SERVICE, method, payload);
        let hook = self.create_response_hook(ctx.artifact());
        Dispatch::Sent(Exchange::send(Arc::clone(&self.bus), ctx.artifact(), hook, request))
    }
}

impl ConfigHandler for ActivityHandler {
    fn name(&self) -> &str {
        "ActivityHandler"
    }

    fn apply(&self, ctx: &DispatchContext<'_>, mut payload: Value) -> Result<Dispatch> {
        let creator = Self::creator(ctx)?;

        if self.first_use_only {
            let safe = payload.get(FIRST_USE_SAFE).and_then(Value::as_bool) == Some(true);
            if !safe {
                debug!(
                    artifact = %ctx.artifact().display(),
                    "Running before first use and activity is not marked safe"
                );
                return Ok(Dispatch::Deferred);
            }
        }

        debug!(artifact = %ctx.artifact().display(), creator = %creator, "Activity creator");

        let creator = match self.creator_kind(ctx) {
            ConfigKind::Application => json!({ "appId": creator }),
            _ => json!({ "serviceId": creator }),
        };

        let params = payload_object(&mut payload)?;
        params
            .get_mut(ACTIVITY)
            .and_then(Value::as_object_mut)
            .ok_or(ConfigError::MissingField(ACTIVITY))?
            .insert("creator".to_string(), creator);
        params.remove(FIRST_USE_SAFE);

        Ok(self.send(ctx, CREATE_METHOD, payload))
    }

    fn remove(&self, ctx: &DispatchContext<'_>, payload: Value) -> Result<Dispatch> {
        let activity = payload.get(ACTIVITY).ok_or(ConfigError::MissingField(ACTIVITY))?;
        let name = required_str(activity, "name")?;
        let creator = Self::creator(ctx)?;

        Ok(self.send(
            ctx,
            CANCEL_METHOD,
            json!({ "activityName": name, "creator": creator }),
        ))
    }

    fn can_cache_status(&self, _artifact: &Path) -> bool {
        false
    }

    fn create_response_hook(&self, _artifact: &Path) -> Box<dyn ResponseHook> {
        Box::new(ActivityResponse)
    }
}

/// Accepts "activity already exists" failures as success.
struct ActivityResponse;

impl ResponseHook for ActivityResponse {
    fn on_response(
        &mut self,
        exchange: &mut ExchangeContext<'_>,
        response: &mut Value,
        error: Option<&ConfigError>,
    ) -> Status {
        let failed = error.is_some() || !reply_succeeded(response);
        accept_existing(exchange, response, error, failed, &[EXISTS_ERROR], None)
    }
}
