//! Configuration handlers.
//!
//! A [`ConfigHandler`] knows how to apply or remove one kind of artifact,
//! usually by sending a request to a platform service. The engine stays
//! agnostic of artifact content: it parses the payload, picks the method for
//! its run mode and interprets the returned [`Dispatch`].
//!
//! Handlers:
//! - `DbKindHandler`: database kinds (`putKind` / `delKind`)
//! - `DbPermissionsHandler`: database permissions (`putPermissions`)
//! - `FileCacheHandler`: file cache types (`DefineType` / `DeleteType`)
//! - `ActivityHandler`: activities (`create` / `cancel`)

use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::artifact::ConfigKind;
use crate::bus::{clear_reply_error, reply_error_code, ERROR_TEXT};
use crate::correlator::{
    CacheUpdate, DefaultResponseHook, Exchange, ExchangeContext, ResponseHook,
};
use crate::engine::ConfigEngine;
use crate::error::{ConfigError, Result, Status};

pub mod activity;
pub mod db_kind;
pub mod db_permissions;
pub mod file_cache;

pub use activity::ActivityHandler;
pub use db_kind::{DbKindHandler, DbService};
pub use db_permissions::DbPermissionsHandler;
pub use file_cache::FileCacheHandler;

/// What a handler did with an artifact.
pub enum Dispatch {
    /// A request is in flight; its reply decides the artifact's outcome.
    Sent(Exchange),
    /// Nothing was sent and nothing will follow. The artifact counts as
    /// applied for this pass, but no stamp is written.
    Deferred,
}

/// Artifact being dispatched, as seen by a handler.
pub struct DispatchContext<'a> {
    engine: &'a ConfigEngine,
    artifact: &'a Path,
}

impl<'a> DispatchContext<'a> {
    pub(crate) fn new(engine: &'a ConfigEngine, artifact: &'a Path) -> Self {
        Self { engine, artifact }
    }

    pub fn artifact(&self) -> &Path {
        self.artifact
    }

    /// Id of the package (or empty for boot scans) the engine runs for.
    pub fn engine_id(&self) -> &str {
        self.engine.id()
    }

    /// Name of the directory grouping this artifact, else the engine id.
    pub fn parent_id(&self) -> &str {
        self.engine.parent_id(self.artifact)
    }

    pub fn kind(&self) -> ConfigKind {
        self.engine.kind()
    }

    /// Drop this artifact's applied stamp right away.
    pub fn unmark_applied(&self) {
        self.engine.unmark_applied(self.artifact);
    }
}

/// Per-artifact processing logic for one kind of configuration.
pub trait ConfigHandler: Send + Sync {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Apply an artifact (Apply and Reapply run modes).
    fn apply(&self, ctx: &DispatchContext<'_>, payload: Value) -> Result<Dispatch>;

    /// Remove an artifact (Remove run mode).
    fn remove(&self, ctx: &DispatchContext<'_>, payload: Value) -> Result<Dispatch>;

    /// Whether completion of `artifact` may be cached across passes.
    fn can_cache_status(&self, _artifact: &Path) -> bool {
        true
    }

    /// Hook run when the exchange for `artifact` completes.
    fn create_response_hook(&self, _artifact: &Path) -> Box<dyn ResponseHook> {
        Box::new(DefaultResponseHook)
    }
}

/// Mutable access to a payload that must be a JSON object.
pub(crate) fn payload_object(payload: &mut Value) -> Result<&mut Map<String, Value>> {
    payload
        .as_object_mut()
        .ok_or_else(|| ConfigError::InvalidArgument("payload must be a JSON object".to_string()))
}

/// Required string field of a JSON object.
pub(crate) fn required_str<'v>(value: &'v Value, field: &'static str) -> Result<&'v str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ConfigError::MissingField(field))
}

/// Treat a failed reply with one of `codes` (and, when given, an error text
/// ending in `text_suffix`) as success: rewrite the reply, ask for the
/// artifact to be stamped and delegate without an error. Other failures are
/// delegated unchanged.
pub(crate) fn accept_existing(
    exchange: &mut ExchangeContext<'_>,
    response: &mut Value,
    error: Option<&ConfigError>,
    failed: bool,
    codes: &[i64],
    text_suffix: Option<&str>,
) -> Status {
    if !failed {
        debug!(artifact = %exchange.artifact().display(), "Response contained no problems");
        return exchange.delegate(response, error);
    }

    match reply_error_code(response) {
        Some(code) if codes.contains(&code) => {
            let text = response.get(ERROR_TEXT).and_then(Value::as_str).unwrap_or("");
            let matches = text_suffix.map_or(true, |suffix| text.ends_with(suffix));
            if matches {
                debug!(
                    artifact = %exchange.artifact().display(),
                    "Caching negative response - already exists"
                );
                clear_reply_error(response);
                exchange.request_cache_update(CacheUpdate::Mark)?;
                return exchange.delegate(response, None);
            }
            warn!(
                artifact = %exchange.artifact().display(),
                error_text = %text,
                "Service failure text does not indicate an existing entry"
            );
        }
        Some(code) => warn!(
            artifact = %exchange.artifact().display(),
            error_code = code,
            "Unrecognized errorCode"
        ),
        None => warn!(
            artifact = %exchange.artifact().display(),
            "errorCode not provided in request failure"
        ),
    }

    exchange.delegate(response, error)
}
