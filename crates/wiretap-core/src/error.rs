//! Error taxonomy for the interception engine.
//!
//! Two tiers: recoverable conditions surface as [`TraceError`] and are
//! logged best-effort without ever changing what the traced application
//! observes; internal-consistency violations go through [`fault`], which
//! aborts the process with a diagnostic code. An instrumentation layer
//! that has corrupted its own bookkeeping must not keep running inside
//! someone else's address space.

use std::fmt::Write as _;

use crate::sink::StackWriter;

/// A real symbol expected to exist could not be resolved.
pub const FAULT_SYMBOL_MISSING: u32 = 0x23;
/// The per-thread return record was read before any handler wrote it.
pub const FAULT_RETURN_UNWRITTEN: u32 = 0x4311;

/// Recoverable faults. These degrade the diagnostics, never the traced call.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("log sink I/O: {0}")]
    Sink(#[from] std::io::Error),
    #[error("fd table growth failed for fd {0}")]
    TableGrowth(libc::c_int),
}

/// Abort with a diagnostic code.
///
/// Writes straight to stderr with `libc::write`: no allocation, no
/// locks, usable from any interception context.
pub fn fault(code: u32) -> ! {
    let mut buf = [0u8; 64];
    let mut w = StackWriter::new(&mut buf);
    let _ = write!(w, "wiretap: fatal fault 0x{code:x}\n");
    let line = w.as_str();
    unsafe {
        libc::write(2, line.as_ptr() as *const libc::c_void, line.len());
    }
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_error_messages() {
        let e = TraceError::TableGrowth(300);
        assert_eq!(e.to_string(), "fd table growth failed for fd 300");
    }
}
