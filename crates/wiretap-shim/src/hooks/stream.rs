//! stdio stream hooks: fopen family (full emulation via fileno) and the
//! stream closers.

use libc::{c_char, c_int, FILE};
use wiretap_core::context::StreamOpenFn;
use wiretap_core::{CallShape, ThreadGuard};

use crate::reals::{REAL_FCLOSE, REAL_FOPEN, REAL_FOPEN64, REAL_FREOPEN, REAL_PCLOSE};

type Fopen2Fn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut FILE;
type CloseStreamFn = unsafe extern "C" fn(*mut FILE) -> c_int;

unsafe extern "C" fn fopen_thunk(
    path: *const c_char,
    mode: *const c_char,
    _stream: *mut FILE,
) -> *mut FILE {
    let real = real!(REAL_FOPEN, Fopen2Fn);
    real(path, mode)
}

unsafe extern "C" fn fopen64_thunk(
    path: *const c_char,
    mode: *const c_char,
    _stream: *mut FILE,
) -> *mut FILE {
    let real = real!(REAL_FOPEN64, Fopen2Fn);
    real(path, mode)
}

unsafe fn stream_open(
    symbol: &'static str,
    path: *const c_char,
    mode: *const c_char,
    stream: *mut FILE,
    real: StreamOpenFn,
) -> *mut FILE {
    let Some(_guard) = ThreadGuard::enter() else {
        return real(path, mode, stream);
    };
    let Some(d) = crate::dispatcher() else {
        return real(path, mode, stream);
    };
    let mut ctx = d.begin_call(
        symbol,
        CallShape::StreamOpen {
            path,
            mode,
            stream,
            real,
        },
    );
    d.trace_call(&mut ctx);
    if d.wrap_special(&mut ctx) {
        return d.wrapped_return().ptr();
    }
    real(path, mode, stream)
}

#[no_mangle]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE {
    stream_open("fopen", path, mode, std::ptr::null_mut(), fopen_thunk)
}

#[no_mangle]
pub unsafe extern "C" fn fopen64(path: *const c_char, mode: *const c_char) -> *mut FILE {
    stream_open("fopen64", path, mode, std::ptr::null_mut(), fopen64_thunk)
}

#[no_mangle]
pub unsafe extern "C" fn freopen(
    path: *const c_char,
    mode: *const c_char,
    stream: *mut FILE,
) -> *mut FILE {
    let real = real!(REAL_FREOPEN, StreamOpenFn);
    stream_open("freopen", path, mode, stream, real)
}

unsafe fn stream_close(symbol: &'static str, stream: *mut FILE, real: CloseStreamFn) -> c_int {
    let Some(_guard) = ThreadGuard::enter() else {
        return real(stream);
    };
    let Some(d) = crate::dispatcher() else {
        return real(stream);
    };
    let mut ctx = d.begin_call(symbol, CallShape::Stream { stream });
    d.trace_call(&mut ctx);
    // Pre-call side effect only; the real close always runs.
    let _ = d.wrap_special(&mut ctx);
    real(stream)
}

#[no_mangle]
pub unsafe extern "C" fn fclose(stream: *mut FILE) -> c_int {
    let real = real!(REAL_FCLOSE, CloseStreamFn);
    stream_close("fclose", stream, real)
}

#[no_mangle]
pub unsafe extern "C" fn pclose(stream: *mut FILE) -> c_int {
    let real = real!(REAL_PCLOSE, CloseStreamFn);
    stream_close("pclose", stream, real)
}
