//! Signal registration hooks: record the application handler and hand
//! the kernel the trampoline instead.

use libc::c_int;
use wiretap_core::{CallShape, ThreadGuard};

use crate::reals::{REAL_BSD_SIGNAL, REAL_SIGACTION, REAL_SIGNAL, REAL_SYSV_SIGNAL};

type SignalFn = unsafe extern "C" fn(c_int, libc::sighandler_t) -> libc::sighandler_t;
type SigactionFn =
    unsafe extern "C" fn(c_int, *const libc::sigaction, *mut libc::sigaction) -> c_int;

unsafe fn signal_style(
    symbol: &'static str,
    signo: c_int,
    handler: libc::sighandler_t,
    real: SignalFn,
) -> libc::sighandler_t {
    let Some(_guard) = ThreadGuard::enter() else {
        return real(signo, handler);
    };
    let Some(d) = crate::dispatcher() else {
        return real(signo, handler);
    };
    let mut ctx = d.begin_call(symbol, CallShape::SigHandler { signo, handler });
    d.trace_call(&mut ctx);
    let _ = d.wrap_special(&mut ctx);
    // On successful registration the handler argument now points at the
    // trampoline; sentinels come back unchanged.
    let CallShape::SigHandler {
        handler: install, ..
    } = ctx.shape
    else {
        return real(signo, handler);
    };
    real(signo, install)
}

#[no_mangle]
pub unsafe extern "C" fn signal(signo: c_int, handler: libc::sighandler_t) -> libc::sighandler_t {
    let real = real!(REAL_SIGNAL, SignalFn);
    signal_style("signal", signo, handler, real)
}

#[no_mangle]
pub unsafe extern "C" fn bsd_signal(
    signo: c_int,
    handler: libc::sighandler_t,
) -> libc::sighandler_t {
    let real = real!(REAL_BSD_SIGNAL, SignalFn);
    signal_style("bsd_signal", signo, handler, real)
}

#[no_mangle]
pub unsafe extern "C" fn sysv_signal(
    signo: c_int,
    handler: libc::sighandler_t,
) -> libc::sighandler_t {
    let real = real!(REAL_SYSV_SIGNAL, SignalFn);
    signal_style("sysv_signal", signo, handler, real)
}

#[no_mangle]
pub unsafe extern "C" fn sigaction(
    signum: c_int,
    act: *const libc::sigaction,
    oldact: *mut libc::sigaction,
) -> c_int {
    let real = real!(REAL_SIGACTION, SigactionFn);
    let Some(_guard) = ThreadGuard::enter() else {
        return real(signum, act, oldact);
    };
    let Some(d) = crate::dispatcher() else {
        return real(signum, act, oldact);
    };
    let mut ctx = d.begin_call(
        "sigaction",
        CallShape::SigAction {
            signo: signum,
            // The registration handler swaps sa_sigaction in place, so
            // the kernel installs the trampoline.
            action: act as *mut libc::sigaction,
        },
    );
    d.trace_call(&mut ctx);
    let _ = d.wrap_special(&mut ctx);
    real(signum, act, oldact)
}
