//! Drives the engines of one configuration pass to completion.
//!
//! Every engine is started with a single `run()` call. From then on an engine
//! only advances when the reply to its outstanding exchange is resolved, so
//! each engine keeps at most one request in flight while the runner awaits
//! the exchanges of all engines concurrently.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::artifact::PassOutcome;
use crate::bus;
use crate::correlator::{Exchange, ResponseCorrelator};
use crate::engine::{CompletionSink, ConfigEngine};

/// Reply text when the requested package is not installed.
pub const WRONG_APPLICATION_TEXT: &str = "Application or service doesn't exist";

/// Sent by an engine when it finishes its pass.
#[derive(Debug, Clone)]
pub struct CompletionNotice {
    pub engine_id: String,
    pub handler: String,
    pub root: PathBuf,
    pub outcome: PassOutcome,
}

/// Completion sink that forwards notices over a channel.
pub struct CompletionChannel {
    sender: mpsc::UnboundedSender<CompletionNotice>,
}

impl CompletionChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CompletionNotice>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl CompletionSink for CompletionChannel {
    fn on_engine_complete(&self, engine: &ConfigEngine) {
        debug!(
            handler = engine.name(),
            root = %engine.root().display(),
            "Engine complete"
        );
        let notice = CompletionNotice {
            engine_id: engine.id().to_string(),
            handler: engine.name().to_string(),
            root: engine.root().to_path_buf(),
            outcome: engine.outcome().clone(),
        };
        if self.sender.send(notice).is_err() {
            warn!(handler = engine.name(), "Completion receiver dropped");
        }
    }
}

/// Aggregate result of a pass.
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub outcome: PassOutcome,
    pub wrong_application: bool,
    pub engines: usize,
}

impl PassSummary {
    pub fn is_success(&self) -> bool {
        !self.wrong_application && self.outcome.failed().is_empty()
    }

    /// Reply for whoever requested the pass.
    pub fn reply(&self) -> Value {
        if self.wrong_application {
            return json!({ "returnValue": false, "errorText": WRONG_APPLICATION_TEXT });
        }

        let ok = self.outcome.applied().len();
        let failed = self.outcome.failed().len();
        if failed > 0 {
            json!({
                "returnValue": false,
                "errorText": format!("Partial configuration - {} ok, {} failed", ok, failed),
            })
        } else {
            json!({ "returnValue": true, "configured": ok })
        }
    }
}

type InFlight = BoxFuture<'static, (usize, ResponseCorrelator, bus::Result<Value>)>;

/// Owns the engines of one pass.
pub struct PassRunner {
    engines: Vec<ConfigEngine>,
    sink: Arc<CompletionChannel>,
    completions: mpsc::UnboundedReceiver<CompletionNotice>,
    wrong_application: bool,
}

impl PassRunner {
    pub fn new() -> Self {
        let (sink, completions) = CompletionChannel::new();
        Self {
            engines: Vec::new(),
            sink: Arc::new(sink),
            completions,
            wrong_application: false,
        }
    }

    /// Sink to hand to engines added to this runner.
    pub fn sink(&self) -> Arc<dyn CompletionSink> {
        self.sink.clone()
    }

    pub fn add_engine(&mut self, engine: ConfigEngine) {
        self.engines.push(engine);
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// Flag the pass as targeting a package that is not installed.
    pub fn set_wrong_application(&mut self) {
        self.wrong_application = true;
    }

    /// Run every engine until none has an exchange left.
    pub async fn run(mut self) -> PassSummary {
        let mut in_flight: FuturesUnordered<InFlight> = FuturesUnordered::new();

        for (index, engine) in self.engines.iter_mut().enumerate() {
            engine.run();
            queue(&mut in_flight, index, engine.take_exchanges());
        }

        while let Some((index, mut correlator, reply)) = in_flight.next().await {
            let engine = &mut self.engines[index];
            if let Err(e) = correlator.resolve(engine, reply) {
                warn!(
                    handler = engine.name(),
                    artifact = %correlator.artifact().display(),
                    error = %e,
                    "Response handling failed"
                );
            }
            queue(&mut in_flight, index, engine.take_exchanges());
        }

        for engine in self.engines.iter().filter(|e| !e.is_completed()) {
            warn!(
                handler = engine.name(),
                root = %engine.root().display(),
                pending = engine.pending_len(),
                "Engine stalled without outstanding exchanges"
            );
        }

        let mut summary = PassSummary {
            wrong_application: self.wrong_application,
            engines: self.engines.len(),
            ..PassSummary::default()
        };
        while let Ok(notice) = self.completions.try_recv() {
            summary.outcome.merge(&notice.outcome);
        }

        info!(
            configured = summary.outcome.applied().len(),
            failed = summary.outcome.failed().len(),
            "No more configurators left"
        );
        summary
    }
}

impl Default for PassRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn queue(in_flight: &mut FuturesUnordered<InFlight>, index: usize, exchanges: Vec<Exchange>) {
    for exchange in exchanges {
        let (correlator, reply) = exchange.into_parts();
        in_flight.push(Box::pin(async move { (index, correlator, reply.await) }));
    }
}
