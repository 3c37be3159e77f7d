//! Response correlation for one outstanding exchange.
//!
//! A handler that sends a request for an artifact hands the engine an
//! [`Exchange`]: the pending reply plus a [`ResponseCorrelator`] that knows
//! which artifact the reply belongs to. When the reply arrives the owner calls
//! [`ResponseCorrelator::resolve`], which:
//!
//! 1. invalidates the [`CompletionToken`] so the exchange cannot resolve twice,
//! 2. runs the handler's [`ResponseHook`],
//! 3. delegates the outcome to the engine if the hook did not,
//! 4. applies any cache update the hook requested, unless the engine's
//!    default success path already updated the cache.
//!
//! Hooks report faults through their [`Status`] instead of unwinding; a hook
//! error becomes the error the engine records for the artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::bus::{self, BusRequest, ServiceBus, ERROR_TEXT, RETURN_VALUE};
use crate::engine::ConfigEngine;
use crate::error::{ConfigError, Status};

/// Cache change a response hook may request for its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    Mark,
    Unmark,
}

/// Per-artifact completion logic supplied by a handler.
pub trait ResponseHook: Send {
    /// Inspect (and possibly rewrite) the reply of an exchange.
    ///
    /// `error` is set when the exchange itself failed. The hook may call
    /// [`ExchangeContext::delegate`] itself; otherwise the correlator
    /// delegates with the hook's error, or with `error` if the hook succeeded.
    fn on_response(
        &mut self,
        exchange: &mut ExchangeContext<'_>,
        response: &mut Value,
        error: Option<&ConfigError>,
    ) -> Status;
}

/// Hook that leaves everything to the engine's default handling.
#[derive(Debug, Default)]
pub struct DefaultResponseHook;

impl ResponseHook for DefaultResponseHook {
    fn on_response(
        &mut self,
        _exchange: &mut ExchangeContext<'_>,
        _response: &mut Value,
        _error: Option<&ConfigError>,
    ) -> Status {
        Ok(())
    }
}

/// Single-shot capability to run a response hook.
///
/// Cancelling takes the hook out, so the token can never fire again.
pub struct CompletionToken {
    hook: Option<Box<dyn ResponseHook>>,
}

impl CompletionToken {
    pub fn new(hook: Box<dyn ResponseHook>) -> Self {
        Self { hook: Some(hook) }
    }

    /// Whether the token can still be resolved.
    pub fn is_armed(&self) -> bool {
        self.hook.is_some()
    }

    /// Invalidate the token, returning the hook if it was still armed.
    pub fn cancel(&mut self) -> Option<Box<dyn ResponseHook>> {
        self.hook.take()
    }
}

#[derive(Debug, Default)]
struct DelegationState {
    delegated: bool,
    default_cache_used: bool,
    cache_update: Option<CacheUpdate>,
}

impl DelegationState {
    fn delegate(
        &mut self,
        engine: &mut ConfigEngine,
        artifact: &Path,
        response: &Value,
        error: Option<&ConfigError>,
    ) -> Status {
        if self.delegated {
            warn!(artifact = %artifact.display(), "Response already delegated");
            return Err(ConfigError::AlreadyDelegated);
        }
        self.delegated = true;
        self.default_cache_used = engine.on_async_complete(artifact, response, error);
        Ok(())
    }

    fn request_cache_update(&mut self, artifact: &Path, update: CacheUpdate) -> Status {
        match self.cache_update {
            Some(existing) if existing != update => {
                error!(
                    artifact = %artifact.display(),
                    "Both mark and unmark requested for the same exchange"
                );
                Err(ConfigError::ConflictingCacheUpdate(artifact.to_path_buf()))
            }
            _ => {
                self.cache_update = Some(update);
                Ok(())
            }
        }
    }
}

/// View of an exchange handed to a [`ResponseHook`].
pub struct ExchangeContext<'a> {
    engine: &'a mut ConfigEngine,
    artifact: &'a Path,
    state: &'a mut DelegationState,
}

impl ExchangeContext<'_> {
    pub fn artifact(&self) -> &Path {
        self.artifact
    }

    /// Forward the outcome to the engine. Fails if already delegated.
    pub fn delegate(&mut self, response: &Value, error: Option<&ConfigError>) -> Status {
        self.state.delegate(self.engine, self.artifact, response, error)
    }

    /// Ask for the artifact to be marked or unmarked as applied once the
    /// exchange completes.
    pub fn request_cache_update(&mut self, update: CacheUpdate) -> Status {
        self.state.request_cache_update(self.artifact, update)
    }
}

/// Mediates one request/response exchange for one artifact.
pub struct ResponseCorrelator {
    artifact: PathBuf,
    token: CompletionToken,
    state: DelegationState,
}

impl ResponseCorrelator {
    pub fn new(artifact: impl Into<PathBuf>, hook: Box<dyn ResponseHook>) -> Self {
        Self {
            artifact: artifact.into(),
            token: CompletionToken::new(hook),
            state: DelegationState::default(),
        }
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Whether the exchange has already been resolved.
    pub fn is_resolved(&self) -> bool {
        !self.token.is_armed()
    }

    /// Whether the outcome has been delegated to the engine.
    pub fn is_delegated(&self) -> bool {
        self.state.delegated
    }

    /// Forward an outcome to the engine directly. Fails with
    /// [`ConfigError::AlreadyDelegated`] on the second call.
    pub fn delegate(
        &mut self,
        engine: &mut ConfigEngine,
        response: &Value,
        error: Option<&ConfigError>,
    ) -> Status {
        self.state.delegate(engine, &self.artifact, response, error)
    }

    /// Ask for a cache update once the exchange completes.
    pub fn request_cache_update(&mut self, update: CacheUpdate) -> Status {
        self.state.request_cache_update(&self.artifact, update)
    }

    /// Complete the exchange with the reply (or transport failure) it produced.
    pub fn resolve(&mut self, engine: &mut ConfigEngine, reply: bus::Result<Value>) -> Status {
        let Some(mut hook) = self.token.cancel() else {
            warn!(artifact = %self.artifact.display(), "Exchange resolved twice");
            return Err(ConfigError::AlreadyResolved);
        };

        let (mut response, exchange_error) = match reply {
            Ok(response) => (response, None),
            Err(e) => (transport_failure_reply(&e), Some(ConfigError::Transport(e))),
        };

        let mut context = ExchangeContext {
            engine: &mut *engine,
            artifact: &self.artifact,
            state: &mut self.state,
        };
        let mut result = hook.on_response(&mut context, &mut response, exchange_error.as_ref());

        if !context.state.delegated {
            let delegated = match &result {
                Err(hook_error) => context.delegate(&response, Some(hook_error)),
                Ok(()) => context.delegate(&response, exchange_error.as_ref()),
            };
            result = delegated;
        }

        if !self.state.default_cache_used {
            match self.state.cache_update {
                Some(CacheUpdate::Unmark) => {
                    debug!(artifact = %self.artifact.display(), "Unmarking as applied");
                    engine.unmark_applied(&self.artifact);
                }
                Some(CacheUpdate::Mark) => {
                    debug!(artifact = %self.artifact.display(), "Marking as applied");
                    engine.mark_applied(&self.artifact);
                }
                None => {}
            }
        }

        result
    }
}

/// Reply recorded for an exchange whose transport failed.
fn transport_failure_reply(error: &bus::BusError) -> Value {
    let mut reply = Map::new();
    reply.insert(RETURN_VALUE.to_string(), Value::Bool(false));
    reply.insert(ERROR_TEXT.to_string(), Value::String(error.to_string()));
    Value::Object(reply)
}

/// Pending reply for one artifact, paired with its correlator.
pub struct Exchange {
    correlator: ResponseCorrelator,
    reply: BoxFuture<'static, bus::Result<Value>>,
}

impl Exchange {
    pub fn new(
        artifact: impl Into<PathBuf>,
        hook: Box<dyn ResponseHook>,
        reply: BoxFuture<'static, bus::Result<Value>>,
    ) -> Self {
        Self {
            correlator: ResponseCorrelator::new(artifact, hook),
            reply,
        }
    }

    /// Send `request` over `bus` on behalf of `artifact`.
    pub fn send(
        bus: Arc<dyn ServiceBus>,
        artifact: &Path,
        hook: Box<dyn ResponseHook>,
        request: BusRequest,
    ) -> Self {
        debug!(
            artifact = %artifact.display(),
            service = %request.service,
            method = %request.method,
            "Sending request"
        );
        let reply = Box::pin(async move { bus.call(request).await });
        Self::new(artifact, hook, reply)
    }

    pub fn artifact(&self) -> &Path {
        self.correlator.artifact()
    }

    pub fn into_parts(self) -> (ResponseCorrelator, BoxFuture<'static, bus::Result<Value>>) {
        (self.correlator, self.reply)
    }
}
