//! Per-call and per-thread interception state.
//!
//! A [`CallContext`] is created on the calling thread's stack for every
//! intercepted call and threaded explicitly through the dispatch chain.
//! The thread additionally owns a reusable [`ReturnRecord`] plus the
//! interception-depth counter backing both the hook reentrancy guard and
//! the safe-call protocol.

use std::cell::{Cell, RefCell};
use std::ffi::CStr;

use libc::{c_char, c_int};

use crate::cache::{WrapCacheEntry, EMPTY_HASH};
use crate::error::{fault, FAULT_RETURN_UNWRITTEN};

/// Upper bound on a logical (possibly renamed) symbol name.
pub const MAX_SYMBOL_LEN: usize = 32;

// Typed real-function signatures carried by the call shapes. The shim
// resolves these via its dlsym table; tests pass stubs.
pub type OpenFn = unsafe extern "C" fn(*const c_char, c_int, libc::mode_t) -> c_int;
pub type OpenAtFn = unsafe extern "C" fn(c_int, *const c_char, c_int, libc::mode_t) -> c_int;
/// fopen and freopen share one shape; plain fopen adapters ignore the
/// stream argument.
pub type StreamOpenFn =
    unsafe extern "C" fn(*const c_char, *const c_char, *mut libc::FILE) -> *mut libc::FILE;
/// dup, dup2, and dup3 share one shape; adapters for the shorter-arity
/// variants ignore the trailing arguments.
pub type DupFn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;
/// socket and socketpair share one shape; socket adapters ignore the
/// pair pointer.
pub type SocketFn = unsafe extern "C" fn(c_int, c_int, c_int, *mut c_int) -> c_int;
/// pipe and pipe2 share one shape; plain pipe adapters ignore flags.
pub type PipeFn = unsafe extern "C" fn(*mut c_int, c_int) -> c_int;
pub type PopenFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut libc::FILE;
/// accept and accept4 share one shape; plain accept adapters ignore the
/// flags argument.
pub type AcceptFn =
    unsafe extern "C" fn(c_int, *mut libc::sockaddr, *mut libc::socklen_t, c_int) -> c_int;

/// The intercepted call's arguments as a tagged variant over the fixed
/// set of call shapes, each carrying its typed real function where the
/// handler performs the call itself.
#[derive(Clone, Copy)]
pub enum CallShape {
    /// open/open64: (path, flags, mode).
    Path {
        path: *const c_char,
        flags: c_int,
        mode: libc::mode_t,
        real: OpenFn,
    },
    /// openat/openat64: (dirfd, path, flags, mode).
    PathAt {
        dirfd: c_int,
        path: *const c_char,
        flags: c_int,
        mode: libc::mode_t,
        real: OpenAtFn,
    },
    /// fopen/fopen64/freopen: (path, mode, stream).
    StreamOpen {
        path: *const c_char,
        mode: *const c_char,
        stream: *mut libc::FILE,
        real: StreamOpenFn,
    },
    /// dup/dup2/dup3: (oldfd, newfd, flags).
    Dup {
        oldfd: c_int,
        newfd: c_int,
        flags: c_int,
        real: DupFn,
    },
    /// socket/socketpair: (domain, type, protocol, pair).
    Socket {
        domain: c_int,
        ty: c_int,
        protocol: c_int,
        pair: *mut c_int,
        real: SocketFn,
    },
    /// pipe/pipe2: (fds, flags).
    Pipe {
        fds: *mut c_int,
        flags: c_int,
        real: PipeFn,
    },
    /// popen: (command, mode). Forks internally.
    Popen {
        command: *const c_char,
        mode: *const c_char,
        real: PopenFn,
    },
    /// accept/accept4: (sockfd, addr, addrlen, flags).
    Accept {
        sockfd: c_int,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        flags: c_int,
        real: AcceptFn,
    },
    /// Calls whose first argument is a descriptor (close, read, write,
    /// ioctl, fcntl and friends).
    Fd { fd: c_int },
    /// Calls whose first argument is a stdio stream (fclose, pclose).
    Stream { stream: *mut libc::FILE },
    /// signal-style registration. The handler field is swapped to the
    /// trampoline on successful registration.
    SigHandler {
        signo: c_int,
        handler: libc::sighandler_t,
    },
    /// sigaction-style registration; the struct's sa_sigaction is
    /// swapped in place.
    SigAction {
        signo: c_int,
        action: *mut libc::sigaction,
    },
    /// exec-family. envp is null for the variants without an explicit
    /// environment; for execve the array (or a replacement) is rewritten
    /// through this field.
    Exec {
        path: *const c_char,
        envp: *mut *const c_char,
    },
    /// No arguments the engine cares about (fork, exit, ...).
    None,
}

/// Bounded buffer for a renamed logical symbol (`read` → `read_S`).
#[derive(Clone, Copy)]
pub(crate) struct SymBuf {
    buf: [u8; MAX_SYMBOL_LEN],
    len: u8,
}

impl SymBuf {
    const fn empty() -> Self {
        Self {
            buf: [0; MAX_SYMBOL_LEN],
            len: 0,
        }
    }

    fn set(&mut self, base: &str, class_ch: u8) {
        self.len = 0;
        for &b in base.as_bytes().iter().take(MAX_SYMBOL_LEN - 2) {
            self.buf[self.len as usize] = b;
            self.len += 1;
        }
        self.buf[self.len as usize] = b'_';
        self.buf[self.len as usize + 1] = class_ch;
        self.len += 2;
    }

    fn as_str(&self) -> &str {
        // Only ever filled from a &str plus two ASCII bytes.
        std::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or("")
    }
}

/// State of one intercepted call, exclusively owned by the executing
/// thread and refreshed per call.
pub struct CallContext<'d> {
    symbol: &'static str,
    pub shape: CallShape,
    pub should_handle: bool,
    pub should_mod_sym: bool,
    pub should_log: bool,
    /// One-byte symbol-hash cache, 0 = not yet computed.
    pub(crate) symhash: u8,
    /// Resolved cache entry, valid only for the current call.
    pub(crate) symcache: Option<&'d WrapCacheEntry>,
    renamed: SymBuf,
}

impl<'d> CallContext<'d> {
    pub fn new(symbol: &'static str, shape: CallShape) -> Self {
        Self {
            symbol,
            shape,
            should_handle: false,
            should_mod_sym: false,
            should_log: false,
            symhash: EMPTY_HASH,
            symcache: None,
            renamed: SymBuf::empty(),
        }
    }

    /// The symbol as registered, ignoring any rename.
    pub fn base_symbol(&self) -> &'static str {
        self.symbol
    }

    /// The logical symbol used for logging: the renamed form if a
    /// mod-symbol handler ran, the registered name otherwise.
    pub fn symbol(&self) -> &str {
        if self.renamed.len > 0 {
            self.renamed.as_str()
        } else {
            self.symbol
        }
    }

    /// Append a classification character to the logical name.
    pub(crate) fn rename_with_class(&mut self, class_ch: u8) {
        self.renamed.set(self.symbol, class_ch);
    }
}

/// Packaged result of a fully emulated call: the word-sized return slot
/// plus the errno the real call produced.
#[derive(Clone, Copy)]
pub struct RetVal(usize);

impl RetVal {
    pub fn int(self) -> c_int {
        self.0 as c_int
    }

    pub fn ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub fn word(self) -> usize {
        self.0
    }
}

/// Per-thread return channel, reused call-to-call. A full-emulation
/// handler writes it; exactly one subsequent read consumes it.
pub(crate) struct ReturnRecord {
    symbol: &'static str,
    errno: c_int,
    value: usize,
    written: bool,
}

impl ReturnRecord {
    const fn empty() -> Self {
        Self {
            symbol: "",
            errno: 0,
            value: 0,
            written: false,
        }
    }

    pub(crate) fn store(&mut self, symbol: &'static str, errno: c_int, value: usize) {
        self.symbol = symbol;
        self.errno = errno;
        self.value = value;
        self.written = true;
    }

    /// Consume the record. Reading before a write is an unrecoverable
    /// internal-consistency fault.
    pub(crate) fn take(&mut self) -> (&'static str, c_int, RetVal) {
        if !self.written {
            fault(FAULT_RETURN_UNWRITTEN);
        }
        self.written = false;
        (self.symbol, self.errno, RetVal(self.value))
    }
}

pub(crate) struct ThreadState {
    pub(crate) ret: ReturnRecord,
}

impl ThreadState {
    const fn new() -> Self {
        Self {
            ret: ReturnRecord::empty(),
        }
    }
}

thread_local! {
    static THREAD: RefCell<Option<ThreadState>> = const { RefCell::new(None) };
    static DEPTH: Cell<u32> = const { Cell::new(0) };
    static IN_CAPTURE: Cell<bool> = const { Cell::new(false) };
}

/// Run `f` against the calling thread's state, creating it lazily on the
/// first intercepted call.
pub(crate) fn with_thread<R>(f: impl FnOnce(&mut ThreadState) -> R) -> R {
    THREAD.with(|t| f(t.borrow_mut().get_or_insert_with(ThreadState::new)))
}

/// Tear down the calling thread's interception state. Invoked by the
/// exit and thread-exit lifecycle handlers.
pub fn clear_thread_state() {
    THREAD.with(|t| t.borrow_mut().take());
}

/// Hook-entry reentrancy guard. `enter` succeeds only when the thread is
/// not already inside the interposition layer; nested calls made by a
/// handler or the real implementation see a nonzero depth and pass
/// straight through to the real function.
pub struct ThreadGuard(());

impl ThreadGuard {
    pub fn enter() -> Option<Self> {
        DEPTH.with(|d| {
            if d.get() == 0 {
                d.set(1);
                Some(ThreadGuard(()))
            } else {
                None
            }
        })
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

struct DepthBump;

impl DepthBump {
    fn push() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        DepthBump
    }
}

impl Drop for DepthBump {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Reentrancy guard for the backtrace capturer: suppresses nested
/// capture triggered by the capturer's own library use.
pub(crate) fn with_capture_guard(f: impl FnOnce()) {
    let entered = IN_CAPTURE.with(|c| {
        if c.get() {
            false
        } else {
            c.set(true);
            true
        }
    });
    if !entered {
        return;
    }
    f();
    IN_CAPTURE.with(|c| c.set(false));
}

#[cfg(target_os = "linux")]
fn errno_ptr() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(target_os = "macos")]
fn errno_ptr() -> *mut c_int {
    unsafe { libc::__error() }
}

pub(crate) fn errno() -> c_int {
    unsafe { *errno_ptr() }
}

pub(crate) fn set_errno(e: c_int) {
    unsafe { *errno_ptr() = e }
}

/// Invoke a real function from inside a handler without being
/// re-intercepted and without losing its errno.
///
/// The sequence is fixed: disable interception for this thread, clear
/// the error state, perform the call, capture errno immediately, then
/// re-enable interception. Re-enabling is unconditional (drop guard),
/// even if the call failed.
pub fn safe_call<R>(f: impl FnOnce() -> R) -> (R, c_int) {
    let _disabled = DepthBump::push();
    set_errno(0);
    let r = f();
    let err = errno();
    (r, err)
}

/// Lossy view of a C path argument for log lines.
pub(crate) fn path_lossy<'a>(path: *const c_char) -> std::borrow::Cow<'a, str> {
    if path.is_null() {
        return std::borrow::Cow::Borrowed("(null)");
    }
    unsafe { CStr::from_ptr(path) }.to_string_lossy()
}

/// Optional CStr view of a possibly-null path argument.
pub(crate) fn cstr_opt<'a>(path: *const c_char) -> Option<&'a CStr> {
    if path.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(path) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_guard_blocks_reentry() {
        let g = ThreadGuard::enter().expect("first entry");
        assert!(ThreadGuard::enter().is_none(), "nested entry must fail");
        drop(g);
        assert!(ThreadGuard::enter().is_some(), "entry after drop succeeds");
    }

    #[test]
    fn safe_call_captures_errno_and_reenables() {
        let _g = ThreadGuard::enter().unwrap();
        let (v, err) = safe_call(|| {
            set_errno(libc::ENOENT);
            -1
        });
        assert_eq!(v, -1);
        assert_eq!(err, libc::ENOENT);
        // Depth restored: a nested safe_call still works and the guard
        // level is back to the hook's own entry.
        let (v, err) = safe_call(|| {
            set_errno(0);
            0
        });
        assert_eq!((v, err), (0, 0));
    }

    #[test]
    fn return_record_roundtrip() {
        with_thread(|t| t.ret.store("open", libc::EACCES, 7));
        let (sym, err, val) = with_thread(|t| t.ret.take());
        assert_eq!(sym, "open");
        assert_eq!(err, libc::EACCES);
        assert_eq!(val.int(), 7);
    }

    #[test]
    fn rename_is_bounded() {
        let mut ctx = CallContext::new("read", CallShape::Fd { fd: 0 });
        ctx.rename_with_class(b'S');
        assert_eq!(ctx.symbol(), "read_S");
        assert_eq!(ctx.base_symbol(), "read");

        let mut ctx = CallContext::new(
            "an_exceedingly_long_symbol_name_that_overflows",
            CallShape::None,
        );
        ctx.rename_with_class(b'?');
        assert!(ctx.symbol().len() <= MAX_SYMBOL_LEN);
        assert!(ctx.symbol().ends_with("_?"));
    }

    #[test]
    fn capture_guard_suppresses_nesting() {
        let mut outer = 0;
        let mut inner_ran = false;
        with_capture_guard(|| {
            outer += 1;
            with_capture_guard(|| {
                inner_ran = true;
            });
        });
        assert_eq!(outer, 1);
        assert!(!inner_ran);
    }
}
