//! Process and thread lifecycle hooks: pre-call flush, then the real
//! call proceeds.

use libc::{c_char, c_int, c_void, pid_t};
use wiretap_core::{CallShape, ThreadGuard};

use crate::reals::{
    REAL_DAEMON, REAL_EXECV, REAL_EXECVE, REAL_EXECVP, REAL_EXIT, REAL_FORK, REAL_PTHREAD_CREATE,
    REAL_PTHREAD_EXIT, REAL_SYSTEM, REAL_UEXIT,
};

type ForkFn = unsafe extern "C" fn() -> pid_t;
type DaemonFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
type SystemFn = unsafe extern "C" fn(*const c_char) -> c_int;
type ExitFn = unsafe extern "C" fn(c_int) -> !;
type PthreadExitFn = unsafe extern "C" fn(*mut c_void) -> !;
type ThreadStartFn = extern "C" fn(*mut c_void) -> *mut c_void;
type PthreadCreateFn = unsafe extern "C" fn(
    *mut libc::pthread_t,
    *const libc::pthread_attr_t,
    ThreadStartFn,
    *mut c_void,
) -> c_int;
type ExecvFn = unsafe extern "C" fn(*const c_char, *const *const c_char) -> c_int;
type ExecveFn =
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int;

/// Run a lifecycle symbol through trace + wrap_special; all of them fall
/// through, so there is no emulated-return path.
unsafe fn pre_call(symbol: &'static str, shape: CallShape) {
    let Some(_guard) = ThreadGuard::enter() else {
        return;
    };
    let Some(d) = crate::dispatcher() else {
        return;
    };
    let mut ctx = d.begin_call(symbol, shape);
    d.trace_call(&mut ctx);
    let _ = d.wrap_special(&mut ctx);
}

#[no_mangle]
pub unsafe extern "C" fn fork() -> pid_t {
    let real = real!(REAL_FORK, ForkFn);
    pre_call("fork", CallShape::None);
    real()
}

#[no_mangle]
pub unsafe extern "C" fn daemon(nochdir: c_int, noclose: c_int) -> c_int {
    let real = real!(REAL_DAEMON, DaemonFn);
    pre_call("daemon", CallShape::None);
    real(nochdir, noclose)
}

#[no_mangle]
pub unsafe extern "C" fn system(command: *const c_char) -> c_int {
    let real = real!(REAL_SYSTEM, SystemFn);
    pre_call("system", CallShape::None);
    real(command)
}

#[no_mangle]
pub unsafe extern "C" fn exit(status: c_int) -> ! {
    let real = real!(REAL_EXIT, ExitFn);
    pre_call("exit", CallShape::None);
    real(status)
}

#[no_mangle]
pub unsafe extern "C" fn _exit(status: c_int) -> ! {
    let real = real!(REAL_UEXIT, ExitFn);
    pre_call("_exit", CallShape::None);
    real(status)
}

#[no_mangle]
pub unsafe extern "C" fn pthread_exit(retval: *mut c_void) -> ! {
    let real = real!(REAL_PTHREAD_EXIT, PthreadExitFn);
    pre_call("pthread_exit", CallShape::None);
    real(retval)
}

#[no_mangle]
pub unsafe extern "C" fn pthread_create(
    thread: *mut libc::pthread_t,
    attr: *const libc::pthread_attr_t,
    start_routine: ThreadStartFn,
    arg: *mut c_void,
) -> c_int {
    let real = real!(REAL_PTHREAD_CREATE, PthreadCreateFn);
    pre_call("pthread_create", CallShape::None);
    real(thread, attr, start_routine, arg)
}

#[no_mangle]
pub unsafe extern "C" fn execv(path: *const c_char, argv: *const *const c_char) -> c_int {
    let real = real!(REAL_EXECV, ExecvFn);
    pre_call(
        "execv",
        CallShape::Exec {
            path,
            envp: std::ptr::null_mut(),
        },
    );
    real(path, argv)
}

#[no_mangle]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int {
    let real = real!(REAL_EXECVP, ExecvFn);
    pre_call(
        "execvp",
        CallShape::Exec {
            path: file,
            envp: std::ptr::null_mut(),
        },
    );
    real(file, argv)
}

#[no_mangle]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let real = real!(REAL_EXECVE, ExecveFn);
    let Some(_guard) = ThreadGuard::enter() else {
        return real(path, argv, envp);
    };
    let Some(d) = crate::dispatcher() else {
        return real(path, argv, envp);
    };
    let mut ctx = d.begin_call(
        "execve",
        CallShape::Exec {
            path,
            envp: envp as *mut *const c_char,
        },
    );
    d.trace_call(&mut ctx);
    let _ = d.wrap_special(&mut ctx);
    // The handler may have spliced the preload entry in place or swapped
    // in a freshly allocated environment.
    let CallShape::Exec { envp: rewritten, .. } = ctx.shape else {
        return real(path, argv, envp);
    };
    real(path, argv, rewritten as *const *const c_char)
}
