//! Narrow interfaces to the engine's external collaborators.
//!
//! Log-file management, backtrace capture, and managed-runtime bridging
//! are out of scope for the core; it drives them through these traits.
//! The shim provides the real implementations, [`crate::testing`] the
//! in-memory ones.

/// Opaque handle to the calling thread's diagnostic log.
pub type SinkHandle = usize;

/// Append-only per-thread diagnostic log, keyed by the implementation
/// (the shim keys on pid, tid, and program name).
pub trait DiagnosticSink: Send + Sync {
    /// Get or create the calling thread's log. `None` disables logging
    /// for this call.
    fn acquire(&self) -> Option<SinkHandle>;
    fn write_line(&self, handle: SinkHandle, line: &str);
    fn flush(&self, handle: SinkHandle);
    /// Close the calling thread's log. A later `acquire` reopens it.
    fn close(&self);
}

/// Captures a backtrace for one intercepted call and writes it to the
/// sink. The core wraps every invocation in a thread-local reentrancy
/// guard so the capturer's own library use cannot recurse into it.
pub trait BacktraceCapturer: Send + Sync {
    fn capture_and_log(&self, sink: &dyn DiagnosticSink, handle: SinkHandle, symbol: &str);
}

/// Companion managed-runtime tracker; released once at process exit,
/// before the logs close.
pub trait RuntimeBridge: Send + Sync {
    fn close_interface(&self);
}

/// Sink that drops everything. Used when diagnostics are disabled.
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn acquire(&self) -> Option<SinkHandle> {
        None
    }
    fn write_line(&self, _handle: SinkHandle, _line: &str) {}
    fn flush(&self, _handle: SinkHandle) {}
    fn close(&self) {}
}

/// Bridge for processes without a managed runtime.
pub struct NullBridge;

impl RuntimeBridge for NullBridge {
    fn close_interface(&self) {}
}

/// Capturer that records only the symbol line, no unwinding.
pub struct LineCapturer;

impl BacktraceCapturer for LineCapturer {
    fn capture_and_log(&self, sink: &dyn DiagnosticSink, handle: SinkHandle, symbol: &str) {
        let mut buf = [0u8; 64];
        let mut w = StackWriter::new(&mut buf);
        use std::fmt::Write as _;
        let _ = write!(w, "BT:{symbol}:");
        sink.write_line(handle, w.as_str());
    }
}

/// Formats into a caller-provided stack buffer, truncating on overflow.
/// Keeps the interception hot path free of heap allocation.
pub struct StackWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> StackWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.pos]).unwrap_or("")
    }
}

impl std::fmt::Write for StackWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len() - self.pos;
        let to_copy = bytes.len().min(remaining);
        self.buf[self.pos..self.pos + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.pos += to_copy;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    #[test]
    fn stack_writer_truncates() {
        let mut buf = [0u8; 8];
        let mut w = StackWriter::new(&mut buf);
        let _ = write!(w, "0123456789");
        assert_eq!(w.as_str(), "01234567");
    }

    #[test]
    fn null_sink_never_yields_a_handle() {
        assert!(NullSink.acquire().is_none());
    }
}
