//! Stage doubles for chain tests

use filterchain_rs::graph::{Graph, TapId};
use filterchain_rs::stage::{ElementStage, Stage};
use filterchain_rs::ControlMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A stage whose `apply` always fails.
pub struct FailingStage {
    name: String,
    pub attempts: AtomicUsize,
}

impl FailingStage {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            attempts: AtomicUsize::new(0),
        })
    }
}

impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, _graph: &dyn Graph, _tap: TapId) -> Option<TapId> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn revert(&self, _graph: &dyn Graph, _tap: TapId) -> Option<TapId> {
        None
    }
}

/// A real element stage that counts calls.
pub struct CountingStage {
    inner: ElementStage,
    pub applied: AtomicUsize,
    pub reverted: AtomicUsize,
}

impl CountingStage {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: ElementStage::new(name, "identity"),
            applied: AtomicUsize::new(0),
            reverted: AtomicUsize::new(0),
        })
    }

    pub fn applies(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn reverts(&self) -> usize {
        self.reverted.load(Ordering::SeqCst)
    }
}

impl Stage for CountingStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn apply(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        self.inner.apply(graph, tap)
    }

    fn revert(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        self.reverted.fetch_add(1, Ordering::SeqCst);
        self.inner.revert(graph, tap)
    }
}

/// Records every message it is offered, claiming those of `claims`.
pub struct RecordingStage {
    inner: ElementStage,
    claims: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingStage {
    pub fn new(name: &str, claims: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            inner: ElementStage::new(name, "identity"),
            claims: claims.to_string(),
            log,
        })
    }
}

impl Stage for RecordingStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn apply(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        self.inner.apply(graph, tap)
    }

    fn revert(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        self.inner.revert(graph, tap)
    }

    fn handle_message(&self, message: &ControlMessage) -> bool {
        self.log.lock().push(self.inner.name().to_string());
        message.kind == self.claims
    }
}

/// An element stage whose `revert` leaves its element linked in the graph.
pub struct StuckStage {
    inner: ElementStage,
    pub reverted: AtomicUsize,
}

impl StuckStage {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: ElementStage::new(name, "identity"),
            reverted: AtomicUsize::new(0),
        })
    }
}

impl Stage for StuckStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn apply(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        self.inner.apply(graph, tap)
    }

    fn revert(&self, _graph: &dyn Graph, _tap: TapId) -> Option<TapId> {
        self.reverted.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// An element stage that runs `hook` before every apply.
pub struct CallbackStage {
    inner: ElementStage,
    hook: Box<dyn Fn() + Send + Sync>,
}

impl CallbackStage {
    pub fn new(name: &str, hook: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            inner: ElementStage::new(name, "identity"),
            hook: Box::new(hook),
        })
    }
}

impl Stage for CallbackStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn apply(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        (self.hook)();
        self.inner.apply(graph, tap)
    }

    fn revert(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        self.inner.revert(graph, tap)
    }
}
