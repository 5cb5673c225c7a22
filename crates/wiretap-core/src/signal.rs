//! Signal-handler substitution.
//!
//! Registration calls (`signal`, `sigaction` and their BSD/SysV aliases)
//! are rewritten so the kernel installs the shared [`signal_trampoline`]
//! instead of the application's handler; the application handler is
//! recorded in a fixed table the trampoline forwards through. One
//! reserved signal number acts as a flush-and-stop control: it drains
//! diagnostics and never reaches user code.
//!
//! The table is deliberately lock-free: signal-context code must not
//! block. Slots are single atomic words, so readers can race writers
//! without torn reads; registration racing delivery is inherited from
//! the semantics of signal(2) itself.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use libc::{c_int, c_void};

use crate::context::{CallContext, CallShape};
use crate::dispatch::{self, Dispatcher};

/// Bound of the original-handler table. Signals at or beyond it are
/// rejected at registration and absorbed at delivery.
pub const MAX_SIGNALS: usize = 32;

/// Shape every recorded original handler is forwarded through.
pub type ForwardFn = unsafe extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void);

pub struct SignalTable {
    slots: [AtomicUsize; MAX_SIGNALS],
    special: AtomicI32,
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalTable {
    pub fn new() -> Self {
        Self {
            slots: [const { AtomicUsize::new(0) }; MAX_SIGNALS],
            special: AtomicI32::new(-1),
        }
    }

    /// Record an original handler. Last write wins.
    pub(crate) fn record(&self, sig: c_int, handler: usize) {
        self.slots[sig as usize].store(handler, Ordering::Release);
    }

    /// The recorded original handler for `sig`, if any.
    pub fn original(&self, sig: c_int) -> Option<ForwardFn> {
        if sig < 0 || sig as usize >= MAX_SIGNALS {
            return None;
        }
        let raw = self.slots[sig as usize].load(Ordering::Acquire);
        if raw == 0 {
            None
        } else {
            Some(unsafe { mem::transmute::<usize, ForwardFn>(raw) })
        }
    }

    pub fn special(&self) -> Option<c_int> {
        match self.special.load(Ordering::Acquire) {
            -1 => None,
            sig => Some(sig),
        }
    }

    pub(crate) fn set_special(&self, sig: c_int) {
        self.special.store(sig, Ordering::Release);
    }
}

/// Human-readable signal name for log lines, via `strsignal`,
/// best-effort.
pub(crate) struct SigName(pub c_int);

impl fmt::Display for SigName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = unsafe { libc::strsignal(self.0) };
        if p.is_null() {
            return f.write_str("UNKNOWN");
        }
        let name = unsafe { std::ffi::CStr::from_ptr(p) }.to_string_lossy();
        f.write_str(&name)
    }
}

impl Dispatcher {
    /// Record `orig` as the application's handler for `sig`, logging the
    /// installation with a best-effort symbolic resolution of the
    /// handler address. Rejects out-of-bound signal numbers.
    pub fn register_signal_handler(&self, should_log: bool, sig: c_int, orig: usize) -> bool {
        if sig < 0 || sig as usize >= MAX_SIGNALS {
            return false;
        }
        if should_log {
            let mut dli: libc::Dl_info = unsafe { mem::zeroed() };
            if unsafe { libc::dladdr(orig as *const c_void, &mut dli) } != 0
                && !dli.dli_sname.is_null()
            {
                let sname = unsafe { std::ffi::CStr::from_ptr(dli.dli_sname) }.to_string_lossy();
                let fname = if dli.dli_fname.is_null() {
                    std::borrow::Cow::Borrowed("xx")
                } else {
                    unsafe { std::ffi::CStr::from_ptr(dli.dli_fname) }.to_string_lossy()
                };
                self.log_line(format_args!(
                    "SIG:HANDLE:{}[{:#x}]({}@{:p}):{}:{}:",
                    sname,
                    orig,
                    fname,
                    dli.dli_fbase,
                    sig,
                    SigName(sig)
                ));
            } else {
                self.log_line(format_args!(
                    "SIG:HANDLE:[{:#x}]:{}:{}:",
                    orig,
                    sig,
                    SigName(sig)
                ));
            }
            self.flush_sink();
        }
        self.signals.record(sig, orig);
        true
    }

    /// Install the trampoline directly for the reserved flush-and-stop
    /// signal. The flush signal has no original handler; it only drains
    /// diagnostics.
    pub fn install_flush_signal(&self, sig: c_int) {
        if sig < 0 || sig as usize >= MAX_SIGNALS {
            return;
        }
        unsafe {
            let mut sa: libc::sigaction = mem::zeroed();
            sa.sa_sigaction = signal_trampoline as usize;
            sa.sa_flags = libc::SA_SIGINFO;
            libc::sigemptyset(&mut sa.sa_mask);
            libc::sigaction(sig, &sa, std::ptr::null_mut());
        }
        self.signals.set_special(sig);
        if self.config.logging {
            self.log_line(format_args!("I:Installed flush handler for sig {sig}"));
        }
    }

    /// Trampoline body: log receipt, then either drain-and-stop (the
    /// reserved signal), forward to the recorded handler, or absorb.
    pub(crate) fn on_signal(&self, sig: c_int, info: *mut libc::siginfo_t, uctx: *mut c_void) {
        if self.config.logging {
            self.log_line(format_args!("SIG:RCV:{}:{}", sig, SigName(sig)));
        }
        if sig < 0 || sig as usize >= MAX_SIGNALS {
            return;
        }
        if self.signals.special() == Some(sig) {
            self.flush_sink();
            self.log_line(format_args!("SIG:LOG_FLUSH:{}:{}:", sig, SigName(sig)));
            // Flush the entire process' buffered output before stopping.
            unsafe { libc::fflush(std::ptr::null_mut()) };
            self.close_sink();
            return;
        }
        if let Some(orig) = self.signals.original(sig) {
            self.flush_sink();
            self.close_sink();
            unsafe { orig(sig, info, uctx) };
        }
        // No recorded handler: absorbed, matching the sentinel case.
    }
}

/// The substitute handler the kernel actually invokes. Looks up the
/// process dispatcher; delivery before attach completes is dropped.
pub extern "C" fn signal_trampoline(sig: c_int, info: *mut libc::siginfo_t, uctx: *mut c_void) {
    if let Some(d) = dispatch::get() {
        d.on_signal(sig, info, uctx);
    }
}

/// Pre-call handler for signal-style registration: records the real
/// handler and swaps the call's handler argument to the trampoline.
/// Sentinel handler values (default/ignore/error) are never wrapped.
pub(crate) fn handle_signal(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    let CallShape::SigHandler { signo, handler } = ctx.shape else {
        return false;
    };
    if handler == libc::SIG_DFL || handler == libc::SIG_IGN || handler == libc::SIG_ERR {
        return false;
    }
    if d.register_signal_handler(ctx.should_log, signo, handler) {
        if let CallShape::SigHandler { handler, .. } = &mut ctx.shape {
            *handler = signal_trampoline as usize;
        }
    }
    false
}

/// Pre-call handler for sigaction-style registration: same contract as
/// [`handle_signal`], but the swap happens inside the caller's
/// `sigaction` struct.
pub(crate) fn handle_sigaction(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    let CallShape::SigAction { signo, action } = ctx.shape else {
        return false;
    };
    if action.is_null() {
        return false;
    }
    let handler = unsafe { (*action).sa_sigaction };
    if handler == libc::SIG_DFL || handler == libc::SIG_IGN || handler == libc::SIG_ERR {
        return false;
    }
    if d.register_signal_handler(ctx.should_log, signo, handler) {
        unsafe { (*action).sa_sigaction = signal_trampoline as usize };
    }
    false
}
