//! Orchestration engine for one configuration directory.
//!
//! An engine walks its root once, then dispatches artifacts to its handler
//! one at a time. A dispatch either fails or defers synchronously, in which
//! case the engine moves straight on to the next artifact, or it sends a
//! request. A sent request parks the engine until the reply is fed back
//! through [`ConfigEngine::on_async_complete`] (via the exchange's
//! correlator), which records the outcome, updates the stamp cache and
//! resumes the drain.
//!
//! The engine never awaits anything itself. Exchanges it starts are queued
//! in an outbox that its owner drains with [`ConfigEngine::take_exchanges`].
//!
//! State machine: `NotScanned -> Scanning -> Draining -> Completed`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::artifact::{ConfigKind, PassOutcome, RunMode};
use crate::bus::reply_succeeded;
use crate::cache::StampCache;
use crate::correlator::Exchange;
use crate::error::{ConfigError, Result};
use crate::handlers::{ConfigHandler, Dispatch, DispatchContext};
use crate::scanner;

/// Receives a notice when an engine finishes its pass.
pub trait CompletionSink: Send + Sync {
    /// Called exactly once per engine, before it becomes terminal.
    fn on_engine_complete(&self, engine: &ConfigEngine);
}

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotScanned,
    Scanning,
    Draining,
    Completed,
}

/// Construction parameters of an engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Package id, or empty for the boot-time scan.
    pub id: String,
    pub kind: ConfigKind,
    pub mode: RunMode,
    /// Directory holding the artifacts.
    pub root: PathBuf,
}

/// Drives the artifacts below one root through one handler.
pub struct ConfigEngine {
    id: String,
    kind: ConfigKind,
    mode: RunMode,
    root: PathBuf,
    handler: Arc<dyn ConfigHandler>,
    cache: StampCache,
    sink: Arc<dyn CompletionSink>,
    state: EngineState,
    empty: bool,
    backlog: Vec<PathBuf>,
    pending: Vec<PathBuf>,
    parents: HashMap<PathBuf, String>,
    outcome: PassOutcome,
    outbox: Vec<Exchange>,
}

impl ConfigEngine {
    /// Create an engine. The cache directories are created here.
    pub fn new(
        options: EngineOptions,
        handler: Arc<dyn ConfigHandler>,
        cache: StampCache,
        sink: Arc<dyn CompletionSink>,
    ) -> Self {
        cache.init_dirs();
        Self {
            id: options.id,
            kind: options.kind,
            mode: options.mode,
            root: options.root,
            handler,
            cache,
            sink,
            state: EngineState::NotScanned,
            empty: false,
            backlog: Vec::new(),
            pending: Vec::new(),
            parents: HashMap::new(),
            outcome: PassOutcome::new(),
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the handler, for diagnostics.
    pub fn name(&self) -> &str {
        self.handler.name()
    }

    pub fn kind(&self) -> ConfigKind {
        self.kind
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == EngineState::Completed
    }

    /// Outcomes recorded by this engine so far.
    pub fn outcome(&self) -> &PassOutcome {
        &self.outcome
    }

    /// Whether the scan found no artifacts to process.
    pub fn found_nothing(&self) -> bool {
        self.empty
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Grouping id of an artifact: its directory name, else the engine id.
    pub fn parent_id(&self, artifact: &Path) -> &str {
        self.parents
            .get(artifact)
            .map(String::as_str)
            .unwrap_or(&self.id)
    }

    /// Exchanges started since the last call.
    pub fn take_exchanges(&mut self) -> Vec<Exchange> {
        std::mem::take(&mut self.outbox)
    }

    /// Whether the artifact is cacheable and stamped at least as new as itself.
    pub fn is_already_applied(&self, artifact: &Path) -> bool {
        self.handler.can_cache_status(artifact) && self.cache.is_fresh(artifact)
    }

    /// Stamp the artifact as applied, unless its handler opts out.
    pub fn mark_applied(&self, artifact: &Path) {
        if self.handler.can_cache_status(artifact) {
            self.cache.stamp(artifact);
        }
    }

    /// Erase the artifact's stamp, unless its handler opts out.
    pub fn unmark_applied(&self, artifact: &Path) {
        if self.handler.can_cache_status(artifact) {
            self.cache.erase(artifact);
        }
    }

    /// Advance the pass.
    ///
    /// Scans on the first call, then dispatches artifacts until one is left
    /// in flight or the backlog is exhausted. Completes the engine once
    /// nothing is left in the backlog or pending. Returns whether the
    /// backlog is empty.
    pub fn run(&mut self) -> bool {
        if self.state == EngineState::NotScanned {
            self.scan();
        }

        loop {
            let Some(artifact) = self.backlog.pop() else {
                if self.pending.is_empty() && !self.is_completed() {
                    self.complete();
                }
                return true;
            };

            self.pending.push(artifact.clone());

            match self.dispatch(&artifact) {
                Ok(Dispatch::Sent(exchange)) => {
                    self.outbox.push(exchange);
                    return self.backlog.is_empty();
                }
                Ok(Dispatch::Deferred) => {
                    debug!(
                        handler = self.handler.name(),
                        artifact = %artifact.display(),
                        "Artifact deferred"
                    );
                    self.remove_pending(&artifact);
                    self.outcome.record_applied(artifact);
                }
                Err(e) => {
                    error!(
                        handler = self.handler.name(),
                        artifact = %artifact.display(),
                        error = %e,
                        kind = e.kind(),
                        "Failed to process artifact"
                    );
                    self.remove_pending(&artifact);
                    self.outcome.record_failed(artifact);
                }
            }
        }
    }

    /// Record the reply of an exchange and resume the drain.
    ///
    /// Returns whether the default cache update was performed, i.e. the
    /// exchange succeeded and the artifact was stamped (or unstamped in
    /// Remove mode).
    pub fn on_async_complete(
        &mut self,
        artifact: &Path,
        response: &Value,
        error: Option<&ConfigError>,
    ) -> bool {
        if !self.remove_pending(artifact) {
            warn!(
                handler = self.handler.name(),
                artifact = %artifact.display(),
                "Reply for an artifact that is not pending"
            );
        }

        let mut default_cache_used = false;
        if error.is_some() || !reply_succeeded(response) {
            error!(
                handler = self.handler.name(),
                artifact = %artifact.display(),
                error = error.map(ToString::to_string).unwrap_or_default(),
                response = %response,
                "Failed to apply artifact"
            );
            self.outcome.record_failed(artifact);
        } else {
            debug!(
                handler = self.handler.name(),
                artifact = %artifact.display(),
                "Artifact applied"
            );
            self.outcome.record_applied(artifact);
            default_cache_used = true;
            match self.mode {
                RunMode::Remove => self.cache.erase(artifact),
                RunMode::Apply | RunMode::Reapply => self.mark_applied(artifact),
            }
        }

        self.run();
        default_cache_used
    }

    fn scan(&mut self) {
        self.state = EngineState::Scanning;

        let skip = |artifact: &Path| self.mode.skips_applied() && self.is_already_applied(artifact);
        let result = scanner::scan(&self.root, skip);

        self.backlog = result.backlog;
        self.parents = result.parents;
        self.empty = self.backlog.is_empty();
        if self.empty && result.found {
            debug!(
                handler = self.handler.name(),
                root = %self.root.display(),
                "No configurations found"
            );
        }

        self.state = EngineState::Draining;
    }

    fn dispatch(&self, artifact: &Path) -> Result<Dispatch> {
        let content = fs::read_to_string(artifact).map_err(|source| ConfigError::Read {
            path: artifact.to_path_buf(),
            source,
        })?;
        let payload: Value = serde_json::from_str(&content)?;

        debug!(
            handler = self.handler.name(),
            artifact = %artifact.display(),
            mode = %self.mode,
            "Dispatching artifact"
        );

        let ctx = DispatchContext::new(self, artifact);
        match self.mode {
            RunMode::Apply | RunMode::Reapply => self.handler.apply(&ctx, payload),
            RunMode::Remove => self.handler.remove(&ctx, payload),
        }
    }

    fn remove_pending(&mut self, artifact: &Path) -> bool {
        match self.pending.iter().position(|p| p == artifact) {
            Some(index) => {
                self.pending.swap_remove(index);
                true
            }
            None => false,
        }
    }

    fn complete(&mut self) {
        if !self.empty {
            info!(
                handler = self.handler.name(),
                id = %self.id,
                applied = self.outcome.applied().len(),
                failed = self.outcome.failed().len(),
                "Configuration pass complete"
            );
        }

        let sink = Arc::clone(&self.sink);
        sink.on_engine_complete(self);
        self.state = EngineState::Completed;
    }
}
