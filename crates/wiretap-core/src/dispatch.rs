//! The dispatcher: one object owning the wrap cache, the fd table, the
//! signal table, and the external collaborators.
//!
//! Constructed once at attach time and installed as the process-wide
//! singleton (hooks and the signal trampoline reach it through
//! [`get`]); tests construct throwaway instances directly.

use std::fmt;
use std::fmt::Write as _;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering};

use libc::c_int;

use crate::cache::{wrap_hash, WrapCache, WrapCacheEntry};
use crate::config::TraceConfig;
use crate::context::{self, CallContext, CallShape, RetVal};
use crate::fd_table::FdTable;
use crate::handlers;
use crate::lifecycle;
use crate::signal::{self, SignalTable};
use crate::sink::{BacktraceCapturer, DiagnosticSink, RuntimeBridge, StackWriter};

pub struct Dispatcher {
    cache: WrapCache,
    pub fd_table: FdTable,
    pub signals: SignalTable,
    pub config: TraceConfig,
    sink: Box<dyn DiagnosticSink>,
    capturer: Box<dyn BacktraceCapturer>,
    bridge: Box<dyn RuntimeBridge>,
    /// Pid recorded by the fork-family handlers, -1 when not forking.
    forking: AtomicI32,
}

impl Dispatcher {
    pub fn new(
        config: TraceConfig,
        sink: Box<dyn DiagnosticSink>,
        capturer: Box<dyn BacktraceCapturer>,
        bridge: Box<dyn RuntimeBridge>,
    ) -> Self {
        let mut cache = WrapCache::new();
        register_interposed(&mut cache);
        tracing::debug!("wrap cache populated");
        Self {
            cache,
            fd_table: FdTable::new(),
            signals: SignalTable::new(),
            config,
            sink,
            capturer,
            bridge,
            forking: AtomicI32::new(-1),
        }
    }

    /// Start a call context for `symbol`, seeding the logging flag from
    /// the configuration.
    pub fn begin_call<'d>(&'d self, symbol: &'static str, shape: CallShape) -> CallContext<'d> {
        let mut ctx = CallContext::new(symbol, shape);
        ctx.should_log = self.config.logging;
        ctx
    }

    /// Resolve the context's cache entry, computing and caching the
    /// symbol hash and entry pointer for the duration of this call.
    fn resolve<'d>(&'d self, ctx: &mut CallContext<'d>) -> Option<&'d WrapCacheEntry> {
        if let Some(entry) = ctx.symcache {
            return Some(entry);
        }
        if ctx.symhash == crate::cache::EMPTY_HASH {
            ctx.symhash = wrap_hash(ctx.base_symbol());
        }
        let entry = self.cache.lookup(ctx.base_symbol(), ctx.symhash)?;
        ctx.symcache = Some(entry);
        Some(entry)
    }

    /// Full-emulation dispatch. Returns true when the handler performed
    /// the call itself; the caller must then fetch [`wrapped_return`]
    /// instead of invoking the real function.
    ///
    /// [`wrapped_return`]: Self::wrapped_return
    pub fn wrap_special<'d>(&'d self, ctx: &mut CallContext<'d>) -> bool {
        let Some(entry) = self.resolve(ctx) else {
            return false;
        };
        if !entry.wrapsym {
            return false;
        }
        ctx.should_handle = true;
        ctx.should_mod_sym = false;
        let handled = (entry.handler)(self, ctx);
        ctx.should_handle = false;
        handled
    }

    /// Rename-only dispatch: lets a mod-symbol handler rewrite the
    /// logical name used for logging. Never touches the call.
    pub fn wrap_symbol_mod<'d>(&'d self, ctx: &mut CallContext<'d>) {
        let Some(entry) = self.resolve(ctx) else {
            return;
        };
        if !entry.modsym {
            return;
        }
        ctx.should_mod_sym = true;
        ctx.should_handle = false;
        let _ = (entry.handler)(self, ctx);
        ctx.should_mod_sym = false;
    }

    /// Per-call trace step: apply any symbol rename, then capture one
    /// backtrace under the capture-reentrancy guard.
    pub fn trace_call<'d>(&'d self, ctx: &mut CallContext<'d>) {
        self.wrap_symbol_mod(ctx);
        if !ctx.should_log {
            return;
        }
        context::with_capture_guard(|| {
            if let Some(handle) = self.sink.acquire() {
                self.capturer
                    .capture_and_log(&*self.sink, handle, ctx.symbol());
            }
        });
    }

    /// Fetch the packaged result of a fully emulated call, restoring the
    /// errno the real call produced. Exactly one read per emulated call;
    /// reading without a preceding write aborts.
    pub fn wrapped_return(&self) -> RetVal {
        let (symbol, err, val) = context::with_thread(|t| t.ret.take());
        tracing::trace!(symbol, errno = err, "emulated return consumed");
        context::set_errno(err);
        val
    }

    pub(crate) fn store_return(&self, symbol: &'static str, errno: c_int, value: usize) {
        context::with_thread(|t| t.ret.store(symbol, errno, value));
    }

    pub(crate) fn bridge(&self) -> &dyn RuntimeBridge {
        &*self.bridge
    }

    pub(crate) fn note_forking(&self) {
        self.forking
            .store(unsafe { libc::getpid() }, Ordering::Relaxed);
    }

    /// Pid recorded as "currently forking", if a fork-family call is in
    /// flight on any thread.
    pub fn forking_pid(&self) -> Option<c_int> {
        match self.forking.load(Ordering::Relaxed) {
            -1 => None,
            pid => Some(pid),
        }
    }

    /// Format a line into a stack buffer and append it to the calling
    /// thread's log. Best-effort: no sink, no line.
    pub(crate) fn log_line(&self, args: fmt::Arguments<'_>) {
        if !self.config.logging {
            return;
        }
        let Some(handle) = self.sink.acquire() else {
            return;
        };
        let mut buf = [0u8; 512];
        let mut w = StackWriter::new(&mut buf);
        let _ = w.write_fmt(args);
        self.sink.write_line(handle, w.as_str());
    }

    pub(crate) fn flush_sink(&self) {
        if let Some(handle) = self.sink.acquire() {
            self.sink.flush(handle);
        }
    }

    pub(crate) fn close_sink(&self) {
        self.sink.close();
    }
}

/// Populate the cache with the fixed table of intercepted symbols:
/// process lifecycle, signal registration, fd producers/closers, and the
/// fd consumers that get name suffixing.
fn register_interposed(cache: &mut WrapCache) {
    // Process lifecycle.
    cache.add("fork", lifecycle::handle_fork, true, false);
    cache.add("vfork", lifecycle::handle_fork, true, false);
    cache.add("clone", lifecycle::handle_fork, true, false);
    cache.add("daemon", lifecycle::handle_fork, true, false);
    cache.add("system", lifecycle::handle_fork, true, false);
    cache.add("exit", lifecycle::handle_exit, true, false);
    cache.add("_exit", lifecycle::handle_exit, true, false);
    cache.add("pthread_exit", lifecycle::handle_thread_exit, true, false);
    cache.add("pthread_create", lifecycle::handle_pthread, true, false);
    cache.add("execl", lifecycle::handle_exec, true, false);
    cache.add("execle", lifecycle::handle_exec, true, false);
    cache.add("execlp", lifecycle::handle_exec, true, false);
    cache.add("execv", lifecycle::handle_exec, true, false);
    cache.add("execve", lifecycle::handle_exec, true, false);
    cache.add("execvp", lifecycle::handle_exec, true, false);

    // Signal registration.
    cache.add("signal", signal::handle_signal, true, false);
    cache.add("bsd_signal", signal::handle_signal, true, false);
    cache.add("sysv_signal", signal::handle_signal, true, false);
    cache.add("sigaction", signal::handle_sigaction, true, false);

    // Descriptor producers (full emulation) and closers.
    cache.add("open", handlers::handle_open, true, false);
    cache.add("open64", handlers::handle_open, true, false);
    cache.add("openat", handlers::handle_openat, true, false);
    cache.add("openat64", handlers::handle_openat, true, false);
    cache.add("fopen", handlers::handle_fopen, true, false);
    cache.add("fopen64", handlers::handle_fopen, true, false);
    cache.add("freopen", handlers::handle_fopen, true, false);
    cache.add("dup", handlers::handle_dup, true, false);
    cache.add("dup2", handlers::handle_dup, true, false);
    cache.add("dup3", handlers::handle_dup, true, false);
    cache.add("socket", handlers::handle_socket, true, false);
    cache.add("socketpair", handlers::handle_socket, true, false);
    cache.add("pipe", handlers::handle_pipe, true, false);
    cache.add("pipe2", handlers::handle_pipe, true, false);
    cache.add("popen", handlers::handle_pipe, true, false);
    cache.add("accept", handlers::handle_accept, true, false);
    cache.add("accept4", handlers::handle_accept, true, false);
    cache.add("close", handlers::handle_closefd, true, false);
    cache.add("fclose", handlers::handle_closefptr, true, false);
    cache.add("pclose", handlers::handle_closefptr, true, false);

    // Descriptor consumers: rename-only.
    cache.add("read", handlers::handle_rename_fd1, false, true);
    cache.add("readv", handlers::handle_rename_fd1, false, true);
    cache.add("pread", handlers::handle_rename_fd1, false, true);
    cache.add("pread64", handlers::handle_rename_fd1, false, true);
    cache.add("write", handlers::handle_rename_fd1, false, true);
    cache.add("writev", handlers::handle_rename_fd1, false, true);
    cache.add("pwrite", handlers::handle_rename_fd1, false, true);
    cache.add("pwrite64", handlers::handle_rename_fd1, false, true);
    cache.add("ioctl", handlers::handle_rename_fd1, false, true);
    cache.add("fcntl", handlers::handle_rename_fd1, false, true);
    cache.add("fcntl64", handlers::handle_rename_fd1, false, true);
}

static DISPATCHER: AtomicPtr<Dispatcher> = AtomicPtr::new(ptr::null_mut());
static INSTALLING: AtomicBool = AtomicBool::new(false);

/// Install the process-wide dispatcher, constructing it with `make` on
/// the first call. Idempotent: later calls (and calls racing the first)
/// leave the installed instance in place. Returns the singleton, or
/// `None` if another thread is mid-install.
///
/// The one-time registration is not synchronized against interception
/// already running on other threads; attach must complete before the
/// traced application's earliest interception-sensitive thread starts.
pub fn install(make: impl FnOnce() -> Dispatcher) -> Option<&'static Dispatcher> {
    let existing = DISPATCHER.load(Ordering::Acquire);
    if !existing.is_null() {
        return Some(unsafe { &*existing });
    }
    if INSTALLING.swap(true, Ordering::SeqCst) {
        return None;
    }
    let ptr = Box::into_raw(Box::new(make()));
    DISPATCHER.store(ptr, Ordering::Release);
    INSTALLING.store(false, Ordering::SeqCst);
    tracing::info!("dispatcher installed");
    Some(unsafe { &*ptr })
}

/// The installed dispatcher, if attach has completed.
pub fn get() -> Option<&'static Dispatcher> {
    let ptr = DISPATCHER.load(Ordering::Acquire);
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &*ptr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn unhandled_symbol_falls_through() {
        let (d, _sink) = testing::dispatcher();
        let mut ctx = d.begin_call("getline", CallShape::None);
        assert!(!d.wrap_special(&mut ctx));
        d.wrap_symbol_mod(&mut ctx);
        assert_eq!(ctx.symbol(), "getline");
    }

    #[test]
    fn wrapsym_and_modsym_dispatch_are_disjoint() {
        let (d, _sink) = testing::dispatcher();

        // read is modsym-only: wrap_special must not emulate it.
        let mut ctx = d.begin_call("read", CallShape::Fd { fd: 0 });
        assert!(!d.wrap_special(&mut ctx));
        d.wrap_symbol_mod(&mut ctx);
        assert_eq!(ctx.symbol(), "read_f", "stdin defaults to standard stream");

        // close is wrapsym-only: wrap_symbol_mod must leave it alone.
        let mut ctx = d.begin_call("close", CallShape::Fd { fd: 1000 });
        d.wrap_symbol_mod(&mut ctx);
        assert_eq!(ctx.symbol(), "close");
    }

    #[test]
    fn resolve_caches_entry_for_the_call() {
        let (d, _sink) = testing::dispatcher();
        let mut ctx = d.begin_call("close", CallShape::Fd { fd: -1 });
        assert!(!d.wrap_special(&mut ctx), "negative fd is a no-op");
        assert!(ctx.symcache.is_some(), "entry cached after first dispatch");
        assert_ne!(ctx.symhash, crate::cache::EMPTY_HASH);
    }

    #[test]
    fn dispatch_flags_are_cleared_after_handlers_run() {
        let (d, _sink) = testing::dispatcher();
        let mut ctx = d.begin_call("close", CallShape::Fd { fd: 5 });
        let _ = d.wrap_special(&mut ctx);
        assert!(!ctx.should_handle);
        let mut ctx = d.begin_call("read", CallShape::Fd { fd: 5 });
        d.wrap_symbol_mod(&mut ctx);
        assert!(!ctx.should_mod_sym);
    }

    #[test]
    fn every_registered_symbol_resolves() {
        let (d, _sink) = testing::dispatcher();
        for name in [
            "fork", "vfork", "clone", "daemon", "system", "exit", "_exit", "pthread_exit",
            "pthread_create", "execl", "execle", "execlp", "execv", "execve", "execvp", "signal",
            "bsd_signal", "sysv_signal", "sigaction", "open", "open64", "openat", "openat64",
            "fopen", "fopen64", "freopen", "dup", "dup2", "dup3", "socket", "socketpair", "pipe",
            "pipe2", "popen", "accept", "accept4", "close", "fclose", "pclose", "read", "readv",
            "pread", "pread64", "write", "writev", "pwrite", "pwrite64", "ioctl", "fcntl",
            "fcntl64",
        ] {
            assert!(
                d.cache.lookup(name, wrap_hash(name)).is_some(),
                "symbol {name} missing from the wrap cache"
            );
        }
    }

    #[test]
    fn install_is_idempotent() {
        let first = install(|| testing::dispatcher().0).unwrap() as *const Dispatcher;
        let second = install(|| testing::dispatcher().0).unwrap() as *const Dispatcher;
        assert_eq!(first, second);
        assert!(get().is_some());
    }
}
