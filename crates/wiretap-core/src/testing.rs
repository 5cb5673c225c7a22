//! In-memory collaborator implementations for tests.
//!
//! These stand in for the shim's file-backed sink and runtime bridge so
//! the engine can be exercised and asserted against entirely in-process.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::TraceConfig;
use crate::context;
use crate::dispatch::Dispatcher;
use crate::sink::{DiagnosticSink, LineCapturer, RuntimeBridge, SinkHandle};

/// Sink that records every line in memory.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    flushes: AtomicUsize,
    closes: AtomicUsize,
    /// When set, every write clobbers errno, modeling a sink whose own
    /// I/O would otherwise leak into the traced call's error state.
    perturb_errno: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink that scribbles on errno during every write.
    pub fn perturbing() -> Arc<Self> {
        let sink = Self::new();
        sink.perturb_errno.store(true, Ordering::Relaxed);
        sink
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn flushed(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }
}

impl DiagnosticSink for Arc<MemorySink> {
    fn acquire(&self) -> Option<SinkHandle> {
        Some(1)
    }

    fn write_line(&self, _handle: SinkHandle, line: &str) {
        if self.perturb_errno.load(Ordering::Relaxed) {
            context::set_errno(libc::EIO);
        }
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn flush(&self, _handle: SinkHandle) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bridge that counts its release calls.
#[derive(Default)]
pub struct TestBridge {
    closes: AtomicUsize,
}

impl TestBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }
}

impl RuntimeBridge for Arc<TestBridge> {
    fn close_interface(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }
}

/// A dispatcher wired to in-memory collaborators, plus handles to all of
/// them for assertions.
pub fn dispatcher_full() -> (Dispatcher, Arc<MemorySink>, Arc<TestBridge>) {
    dispatcher_with_sink(MemorySink::new())
}

/// Shorthand when the bridge is irrelevant to the test.
pub fn dispatcher() -> (Dispatcher, Arc<MemorySink>) {
    let (d, sink, _bridge) = dispatcher_full();
    (d, sink)
}

/// Build a dispatcher around a specific memory sink (e.g. a perturbing
/// one).
pub fn dispatcher_with_sink(
    sink: Arc<MemorySink>,
) -> (Dispatcher, Arc<MemorySink>, Arc<TestBridge>) {
    let bridge = TestBridge::new();
    let d = Dispatcher::new(
        TraceConfig::default(),
        Box::new(Arc::clone(&sink)),
        Box::new(LineCapturer),
        Box::new(Arc::clone(&bridge)),
    );
    (d, sink, bridge)
}
