//! Socket, pipe, and dup hooks: full-emulation producers.

use libc::{c_char, c_int, sockaddr, socklen_t, FILE};
use wiretap_core::context::{AcceptFn, DupFn, PipeFn, PopenFn, SocketFn};
use wiretap_core::{CallShape, ThreadGuard};

use crate::reals::{
    REAL_ACCEPT, REAL_ACCEPT4, REAL_DUP, REAL_DUP2, REAL_DUP3, REAL_PIPE, REAL_PIPE2, REAL_POPEN,
    REAL_SOCKET, REAL_SOCKETPAIR,
};

type Socket3Fn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;
type Pipe1Fn = unsafe extern "C" fn(*mut c_int) -> c_int;
type Dup1Fn = unsafe extern "C" fn(c_int) -> c_int;
type Dup2Fn = unsafe extern "C" fn(c_int, c_int) -> c_int;
type Accept3Fn = unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int;

// Shorter-arity real functions adapted to the engine's shared shapes.

unsafe extern "C" fn socket_thunk(domain: c_int, ty: c_int, protocol: c_int, _pair: *mut c_int) -> c_int {
    let real = real!(REAL_SOCKET, Socket3Fn);
    real(domain, ty, protocol)
}

unsafe extern "C" fn pipe_thunk(fds: *mut c_int, _flags: c_int) -> c_int {
    let real = real!(REAL_PIPE, Pipe1Fn);
    real(fds)
}

unsafe extern "C" fn dup_thunk(oldfd: c_int, _newfd: c_int, _flags: c_int) -> c_int {
    let real = real!(REAL_DUP, Dup1Fn);
    real(oldfd)
}

unsafe extern "C" fn dup2_thunk(oldfd: c_int, newfd: c_int, _flags: c_int) -> c_int {
    let real = real!(REAL_DUP2, Dup2Fn);
    real(oldfd, newfd)
}

unsafe extern "C" fn accept_thunk(
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
    _flags: c_int,
) -> c_int {
    let real = real!(REAL_ACCEPT, Accept3Fn);
    real(sockfd, addr, addrlen)
}

/// Emulate one int-returning producer through the dispatcher, with the
/// passthrough fallback when the layer must stay out of the way.
unsafe fn emulate_fd(
    symbol: &'static str,
    shape: CallShape,
    passthrough: impl FnOnce() -> c_int,
) -> c_int {
    let Some(_guard) = ThreadGuard::enter() else {
        return passthrough();
    };
    let Some(d) = crate::dispatcher() else {
        return passthrough();
    };
    let mut ctx = d.begin_call(symbol, shape);
    d.trace_call(&mut ctx);
    if d.wrap_special(&mut ctx) {
        return d.wrapped_return().int();
    }
    passthrough()
}

#[no_mangle]
pub unsafe extern "C" fn socket(domain: c_int, ty: c_int, protocol: c_int) -> c_int {
    emulate_fd(
        "socket",
        CallShape::Socket {
            domain,
            ty,
            protocol,
            pair: std::ptr::null_mut(),
            real: socket_thunk,
        },
        || socket_thunk(domain, ty, protocol, std::ptr::null_mut()),
    )
}

#[no_mangle]
pub unsafe extern "C" fn socketpair(
    domain: c_int,
    ty: c_int,
    protocol: c_int,
    pair: *mut c_int,
) -> c_int {
    let real = real!(REAL_SOCKETPAIR, SocketFn);
    emulate_fd(
        "socketpair",
        CallShape::Socket {
            domain,
            ty,
            protocol,
            pair,
            real,
        },
        || real(domain, ty, protocol, pair),
    )
}

#[no_mangle]
pub unsafe extern "C" fn pipe(fds: *mut c_int) -> c_int {
    emulate_fd(
        "pipe",
        CallShape::Pipe {
            fds,
            flags: 0,
            real: pipe_thunk,
        },
        || pipe_thunk(fds, 0),
    )
}

#[no_mangle]
pub unsafe extern "C" fn pipe2(fds: *mut c_int, flags: c_int) -> c_int {
    let real = real!(REAL_PIPE2, PipeFn);
    emulate_fd(
        "pipe2",
        CallShape::Pipe { fds, flags, real },
        || real(fds, flags),
    )
}

#[no_mangle]
pub unsafe extern "C" fn dup(oldfd: c_int) -> c_int {
    emulate_fd(
        "dup",
        CallShape::Dup {
            oldfd,
            newfd: -1,
            flags: 0,
            real: dup_thunk,
        },
        || dup_thunk(oldfd, -1, 0),
    )
}

#[no_mangle]
pub unsafe extern "C" fn dup2(oldfd: c_int, newfd: c_int) -> c_int {
    emulate_fd(
        "dup2",
        CallShape::Dup {
            oldfd,
            newfd,
            flags: 0,
            real: dup2_thunk,
        },
        || dup2_thunk(oldfd, newfd, 0),
    )
}

#[no_mangle]
pub unsafe extern "C" fn dup3(oldfd: c_int, newfd: c_int, flags: c_int) -> c_int {
    let real = real!(REAL_DUP3, DupFn);
    emulate_fd(
        "dup3",
        CallShape::Dup {
            oldfd,
            newfd,
            flags,
            real,
        },
        || real(oldfd, newfd, flags),
    )
}

#[no_mangle]
pub unsafe extern "C" fn accept(
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) -> c_int {
    emulate_fd(
        "accept",
        CallShape::Accept {
            sockfd,
            addr,
            addrlen,
            flags: 0,
            real: accept_thunk,
        },
        || accept_thunk(sockfd, addr, addrlen, 0),
    )
}

#[no_mangle]
pub unsafe extern "C" fn accept4(
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
    flags: c_int,
) -> c_int {
    let real = real!(REAL_ACCEPT4, AcceptFn);
    emulate_fd(
        "accept4",
        CallShape::Accept {
            sockfd,
            addr,
            addrlen,
            flags,
            real,
        },
        || real(sockfd, addr, addrlen, flags),
    )
}

#[no_mangle]
pub unsafe extern "C" fn popen(command: *const c_char, mode: *const c_char) -> *mut FILE {
    let real = real!(REAL_POPEN, PopenFn);
    let Some(_guard) = ThreadGuard::enter() else {
        return real(command, mode);
    };
    let Some(d) = crate::dispatcher() else {
        return real(command, mode);
    };
    let mut ctx = d.begin_call("popen", CallShape::Popen { command, mode, real });
    d.trace_call(&mut ctx);
    if d.wrap_special(&mut ctx) {
        return d.wrapped_return().ptr();
    }
    real(command, mode)
}
