//! Descriptor-consuming hooks.
//!
//! close runs its pre-call table cleanup; the read/write/ioctl/fcntl
//! families are rename-only: tracing logs them under `<symbol>_<class>`
//! and the call itself goes through untouched.

use libc::{c_int, c_long, c_ulong, c_void, iovec, off_t, size_t, ssize_t};
use wiretap_core::{CallShape, ThreadGuard};

use crate::reals::{
    REAL_CLOSE, REAL_FCNTL, REAL_IOCTL, REAL_PREAD, REAL_PREAD64, REAL_PWRITE, REAL_PWRITE64,
    REAL_READ, REAL_READV, REAL_WRITE, REAL_WRITEV,
};

type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
type RwFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
type RwvFn = unsafe extern "C" fn(c_int, *const iovec, c_int) -> ssize_t;
type PrwFn = unsafe extern "C" fn(c_int, *mut c_void, size_t, off_t) -> ssize_t;
type IoctlFn = unsafe extern "C" fn(c_int, c_ulong, *mut c_void) -> c_int;
type FcntlFn = unsafe extern "C" fn(c_int, c_int, c_long) -> c_int;

/// Trace a descriptor-consuming call (applying the rename) without
/// touching it.
unsafe fn trace_fd(symbol: &'static str, fd: c_int) -> Option<ThreadGuard> {
    let guard = ThreadGuard::enter()?;
    let d = crate::dispatcher()?;
    let mut ctx = d.begin_call(symbol, CallShape::Fd { fd });
    d.trace_call(&mut ctx);
    Some(guard)
}

#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    let real = real!(REAL_CLOSE, CloseFn);
    let Some(_guard) = ThreadGuard::enter() else {
        return real(fd);
    };
    let Some(d) = crate::dispatcher() else {
        return real(fd);
    };
    let mut ctx = d.begin_call("close", CallShape::Fd { fd });
    d.trace_call(&mut ctx);
    // Clears the fd's class; the real close always runs.
    let _ = d.wrap_special(&mut ctx);
    real(fd)
}

#[no_mangle]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    let real = real!(REAL_READ, RwFn);
    let _guard = trace_fd("read", fd);
    real(fd, buf, count)
}

#[no_mangle]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    let real = real!(REAL_WRITE, RwFn);
    let _guard = trace_fd("write", fd);
    real(fd, buf as *mut c_void, count)
}

#[no_mangle]
pub unsafe extern "C" fn readv(fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t {
    let real = real!(REAL_READV, RwvFn);
    let _guard = trace_fd("readv", fd);
    real(fd, iov, iovcnt)
}

#[no_mangle]
pub unsafe extern "C" fn writev(fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t {
    let real = real!(REAL_WRITEV, RwvFn);
    let _guard = trace_fd("writev", fd);
    real(fd, iov, iovcnt)
}

#[no_mangle]
pub unsafe extern "C" fn pread(fd: c_int, buf: *mut c_void, count: size_t, offset: off_t) -> ssize_t {
    let real = real!(REAL_PREAD, PrwFn);
    let _guard = trace_fd("pread", fd);
    real(fd, buf, count, offset)
}

#[no_mangle]
pub unsafe extern "C" fn pread64(
    fd: c_int,
    buf: *mut c_void,
    count: size_t,
    offset: off_t,
) -> ssize_t {
    let real = real!(REAL_PREAD64, PrwFn);
    let _guard = trace_fd("pread64", fd);
    real(fd, buf, count, offset)
}

#[no_mangle]
pub unsafe extern "C" fn pwrite(
    fd: c_int,
    buf: *const c_void,
    count: size_t,
    offset: off_t,
) -> ssize_t {
    let real = real!(REAL_PWRITE, PrwFn);
    let _guard = trace_fd("pwrite", fd);
    real(fd, buf as *mut c_void, count, offset)
}

#[no_mangle]
pub unsafe extern "C" fn pwrite64(
    fd: c_int,
    buf: *const c_void,
    count: size_t,
    offset: off_t,
) -> ssize_t {
    let real = real!(REAL_PWRITE64, PrwFn);
    let _guard = trace_fd("pwrite64", fd);
    real(fd, buf as *mut c_void, count, offset)
}

#[no_mangle]
pub unsafe extern "C" fn ioctl(fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int {
    let real = real!(REAL_IOCTL, IoctlFn);
    let _guard = trace_fd("ioctl", fd);
    real(fd, request, arg)
}

#[no_mangle]
pub unsafe extern "C" fn fcntl(fd: c_int, cmd: c_int, arg: c_long) -> c_int {
    let real = real!(REAL_FCNTL, FcntlFn);
    let _guard = trace_fd("fcntl", fd);
    real(fd, cmd, arg)
}
