//! open-family hooks: full emulation with path classification.

use libc::{c_char, c_int};
use wiretap_core::context::{OpenAtFn, OpenFn};
use wiretap_core::{CallShape, ThreadGuard};

use crate::reals::{REAL_OPEN, REAL_OPEN64, REAL_OPENAT, REAL_OPENAT64};

#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: libc::mode_t) -> c_int {
    let real = real!(REAL_OPEN, OpenFn);
    let Some(_guard) = ThreadGuard::enter() else {
        return real(path, flags, mode);
    };
    let Some(d) = crate::dispatcher() else {
        return real(path, flags, mode);
    };
    let mut ctx = d.begin_call(
        "open",
        CallShape::Path {
            path,
            flags,
            mode,
            real,
        },
    );
    d.trace_call(&mut ctx);
    if d.wrap_special(&mut ctx) {
        return d.wrapped_return().int();
    }
    real(path, flags, mode)
}

#[no_mangle]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: libc::mode_t) -> c_int {
    let real = real!(REAL_OPEN64, OpenFn);
    let Some(_guard) = ThreadGuard::enter() else {
        return real(path, flags, mode);
    };
    let Some(d) = crate::dispatcher() else {
        return real(path, flags, mode);
    };
    let mut ctx = d.begin_call(
        "open64",
        CallShape::Path {
            path,
            flags,
            mode,
            real,
        },
    );
    d.trace_call(&mut ctx);
    if d.wrap_special(&mut ctx) {
        return d.wrapped_return().int();
    }
    real(path, flags, mode)
}

#[no_mangle]
pub unsafe extern "C" fn openat(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: libc::mode_t,
) -> c_int {
    let real = real!(REAL_OPENAT, OpenAtFn);
    let Some(_guard) = ThreadGuard::enter() else {
        return real(dirfd, path, flags, mode);
    };
    let Some(d) = crate::dispatcher() else {
        return real(dirfd, path, flags, mode);
    };
    let mut ctx = d.begin_call(
        "openat",
        CallShape::PathAt {
            dirfd,
            path,
            flags,
            mode,
            real,
        },
    );
    d.trace_call(&mut ctx);
    if d.wrap_special(&mut ctx) {
        return d.wrapped_return().int();
    }
    real(dirfd, path, flags, mode)
}

#[no_mangle]
pub unsafe extern "C" fn openat64(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: libc::mode_t,
) -> c_int {
    let real = real!(REAL_OPENAT64, OpenAtFn);
    let Some(_guard) = ThreadGuard::enter() else {
        return real(dirfd, path, flags, mode);
    };
    let Some(d) = crate::dispatcher() else {
        return real(dirfd, path, flags, mode);
    };
    let mut ctx = d.begin_call(
        "openat64",
        CallShape::PathAt {
            dirfd,
            path,
            flags,
            mode,
            real,
        },
    );
    d.trace_call(&mut ctx);
    if d.wrap_special(&mut ctx) {
        return d.wrapped_return().int();
    }
    real(dirfd, path, flags, mode)
}
