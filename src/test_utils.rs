//! Test utilities and mock implementations.
//!
//! Provides a scriptable handler, a recording completion sink and helpers to
//! build engines over temporary directories and drive them to completion
//! without a runner.

use std::collections::HashSet;
use std::fs::{self, FileTimes};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tempfile::TempDir;

use crate::artifact::{ConfigKind, PassOutcome, RunMode};
use crate::bus::{BusRequest, MockServiceBus, ServiceBus};
use crate::cache::StampCache;
use crate::correlator::{DefaultResponseHook, Exchange, ResponseHook};
use crate::engine::{CompletionSink, ConfigEngine, EngineOptions};
use crate::error::{ConfigError, Result};
use crate::handlers::{ConfigHandler, Dispatch, DispatchContext};

pub const TEST_SERVICE: &str = "com.example.test";

/// Handler that sends every artifact to [`TEST_SERVICE`] over a mock bus.
///
/// Artifacts whose file name is listed in `deferred` report
/// [`Dispatch::Deferred`]; those listed in `rejected` fail synchronously.
pub struct ScriptedHandler {
    bus: Arc<MockServiceBus>,
    can_cache: bool,
    deferred: HashSet<String>,
    rejected: HashSet<String>,
    dispatched: Mutex<Vec<PathBuf>>,
    hook: Mutex<Option<Box<dyn ResponseHook>>>,
}

impl ScriptedHandler {
    pub fn new(bus: Arc<MockServiceBus>) -> Self {
        Self {
            bus,
            can_cache: true,
            deferred: HashSet::new(),
            rejected: HashSet::new(),
            dispatched: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.can_cache = false;
        self
    }

    pub fn defer(mut self, file_name: &str) -> Self {
        self.deferred.insert(file_name.to_string());
        self
    }

    pub fn reject(mut self, file_name: &str) -> Self {
        self.rejected.insert(file_name.to_string());
        self
    }

    /// Use `hook` for the next exchange instead of the default hook.
    pub fn with_next_hook(self, hook: Box<dyn ResponseHook>) -> Self {
        *self.hook.lock().unwrap() = Some(hook);
        self
    }

    /// Artifacts handed to `apply` or `remove`, in dispatch order.
    pub fn dispatched(&self) -> Vec<PathBuf> {
        self.dispatched.lock().unwrap().clone()
    }

    fn handle(&self, ctx: &DispatchContext<'_>, method: &str, payload: Value) -> Result<Dispatch> {
        let artifact = ctx.artifact();
        self.dispatched.lock().unwrap().push(artifact.to_path_buf());

        let file_name = file_name(artifact);
        if self.rejected.contains(&file_name) {
            return Err(ConfigError::InvalidArgument(format!("{} rejected", file_name)));
        }
        if self.deferred.contains(&file_name) {
            return Ok(Dispatch::Deferred);
        }

        let bus: Arc<dyn ServiceBus> = self.bus.clone();
        let hook = self.create_response_hook(artifact);
        let request = BusRequest::new(TEST_SERVICE, method, payload);
        Ok(Dispatch::Sent(Exchange::send(bus, artifact, hook, request)))
    }
}

impl ConfigHandler for ScriptedHandler {
    fn name(&self) -> &str {
        "ScriptedHandler"
    }

    fn apply(&self, ctx: &DispatchContext<'_>, payload: Value) -> Result<Dispatch> {
        self.handle(ctx, "apply", payload)
    }

    fn remove(&self, ctx: &DispatchContext<'_>, payload: Value) -> Result<Dispatch> {
        self.handle(ctx, "remove", payload)
    }

    fn can_cache_status(&self, _artifact: &Path) -> bool {
        self.can_cache
    }

    fn create_response_hook(&self, _artifact: &Path) -> Box<dyn ResponseHook> {
        self.hook
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Box::new(DefaultResponseHook))
    }
}

/// Completion sink that records every notice.
#[derive(Default)]
pub struct RecordingSink {
    completed: Mutex<Vec<(String, PassOutcome)>>,
    found_nothing: Mutex<Vec<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completions(&self) -> Vec<(String, PassOutcome)> {
        self.completed.lock().unwrap().clone()
    }

    /// `found_nothing` of each engine at the time it completed.
    pub fn found_nothing(&self) -> Vec<bool> {
        self.found_nothing.lock().unwrap().clone()
    }
}

impl CompletionSink for RecordingSink {
    fn on_engine_complete(&self, engine: &ConfigEngine) {
        self.completed
            .lock()
            .unwrap()
            .push((engine.id().to_string(), engine.outcome().clone()));
        self.found_nothing
            .lock()
            .unwrap()
            .push(engine.found_nothing());
    }
}

/// Temporary artifact root and stamp cache.
pub struct Fixture {
    pub temp: TempDir,
    pub root: PathBuf,
    pub cache: StampCache,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let cache = StampCache::new(temp.path().join("cache"), temp.path().join("cache/_stamps"));
        Self { temp, root, cache }
    }

    /// Write an artifact below the root, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn engine(
        &self,
        id: &str,
        mode: RunMode,
        handler: Arc<dyn ConfigHandler>,
        sink: Arc<dyn CompletionSink>,
    ) -> ConfigEngine {
        let options = EngineOptions {
            id: id.to_string(),
            kind: ConfigKind::Unknown,
            mode,
            root: self.root.clone(),
        };
        ConfigEngine::new(options, handler, self.cache.clone(), sink)
    }
}

/// Resolve every exchange the engine starts until none are left.
pub async fn drive(engine: &mut ConfigEngine) {
    loop {
        let exchanges = engine.take_exchanges();
        if exchanges.is_empty() {
            return;
        }
        for exchange in exchanges {
            let (mut correlator, reply) = exchange.into_parts();
            let reply = reply.await;
            let _ = correlator.resolve(engine, reply);
        }
    }
}

pub fn set_mtime(path: &Path, mtime: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_times(FileTimes::new().set_modified(mtime))
        .unwrap();
}

pub fn base_time() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
