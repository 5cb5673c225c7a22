//! Handlers for descriptor-producing and descriptor-consuming calls.
//!
//! Producers are full-emulation handlers: they perform the real call
//! under the safe-call protocol, classify the resulting descriptor, and
//! package the result in the thread's return channel. Closers are
//! pre-call side effects. Consumers (read/write/ioctl/fcntl families)
//! only rename the logical symbol used for logging.

use crate::context::{cstr_opt, path_lossy, safe_call, CallContext, CallShape};
use crate::dispatch::Dispatcher;
use crate::fd_table::{class, classify_path};
use crate::lifecycle;

/// open/open64: classify by path prefix.
pub(crate) fn handle_open(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    let CallShape::Path {
        path,
        flags,
        mode,
        real,
    } = ctx.shape
    else {
        return false;
    };
    let (rval, err) = safe_call(|| unsafe { real(path, flags, mode) });
    if rval >= 0 {
        let ty = classify_path(cstr_opt(path));
        d.fd_table.set(rval, ty);
        if ctx.should_log {
            d.log_line(format_args!(
                "LOG:I:fd({},{})='{}':",
                rval,
                path_lossy(path),
                ty as char
            ));
        }
    }
    d.store_return(ctx.base_symbol(), err, rval as usize);
    true
}

/// openat/openat64: same classification, path is the second argument.
pub(crate) fn handle_openat(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    let CallShape::PathAt {
        dirfd,
        path,
        flags,
        mode,
        real,
    } = ctx.shape
    else {
        return false;
    };
    let (rval, err) = safe_call(|| unsafe { real(dirfd, path, flags, mode) });
    if rval >= 0 {
        let ty = classify_path(cstr_opt(path));
        d.fd_table.set(rval, ty);
        if ctx.should_log {
            d.log_line(format_args!(
                "LOG:I:fd({},{})='{}':",
                rval,
                path_lossy(path),
                ty as char
            ));
        }
    }
    d.store_return(ctx.base_symbol(), err, rval as usize);
    true
}

/// fopen/fopen64/freopen: classify the stream's descriptor by path.
pub(crate) fn handle_fopen(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    let CallShape::StreamOpen {
        path,
        mode,
        stream,
        real,
    } = ctx.shape
    else {
        return false;
    };
    let (rval, err) = safe_call(|| unsafe { real(path, mode, stream) });
    if !rval.is_null() {
        let ty = classify_path(cstr_opt(path));
        let fd = unsafe { libc::fileno(rval) };
        d.fd_table.set(fd, ty);
        if ctx.should_log {
            d.log_line(format_args!(
                "LOG:I:fd({},{})='{}':",
                fd,
                path_lossy(path),
                ty as char
            ));
        }
    }
    d.store_return(ctx.base_symbol(), err, rval as usize);
    true
}

/// dup/dup2/dup3: the duplicate inherits the source descriptor's class.
/// An invalid source fd falls through untouched.
pub(crate) fn handle_dup(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    let CallShape::Dup {
        oldfd,
        newfd,
        flags,
        real,
    } = ctx.shape
    else {
        return false;
    };
    if oldfd < 0 {
        return false;
    }
    let ty = d.fd_table.get(oldfd);
    let (rval, err) = safe_call(|| unsafe { real(oldfd, newfd, flags) });
    if rval >= 0 {
        d.fd_table.set(rval, ty);
        if ctx.should_log {
            let shown = if ty == class::UNSET { b'?' } else { ty };
            d.log_line(format_args!("LOG:I:fd({})='{}':", rval, shown as char));
        }
    }
    d.store_return(ctx.base_symbol(), err, rval as usize);
    true
}

/// socket/socketpair: fixed socket class. For socketpair both ends of
/// the pair are classified.
pub(crate) fn handle_socket(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    let CallShape::Socket {
        domain,
        ty,
        protocol,
        pair,
        real,
    } = ctx.shape
    else {
        return false;
    };
    let (rval, err) = safe_call(|| unsafe { real(domain, ty, protocol, pair) });
    if rval >= 0 {
        if pair.is_null() {
            d.fd_table.set(rval, class::SOCKET);
            if ctx.should_log {
                d.log_line(format_args!("LOG:I:fd({rval})='S':"));
            }
        } else {
            let (a, b) = unsafe { (*pair, *pair.add(1)) };
            d.fd_table.set(a, class::SOCKET);
            d.fd_table.set(b, class::SOCKET);
            if ctx.should_log {
                d.log_line(format_args!("LOG:I:fd({a})='S':LOG:I:fd({b})='S':"));
            }
        }
    }
    d.store_return(ctx.base_symbol(), err, rval as usize);
    true
}

/// pipe/pipe2 and popen. popen forks internally, so it performs the
/// fork-lifecycle bookkeeping before calling through, and its stream's
/// descriptor gets the distinct popen-pipe class.
pub(crate) fn handle_pipe(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    match ctx.shape {
        CallShape::Pipe { fds, flags, real } => {
            let (rval, err) = safe_call(|| unsafe { real(fds, flags) });
            if rval == 0 && !fds.is_null() {
                let (a, b) = unsafe { (*fds, *fds.add(1)) };
                d.fd_table.set(a, class::PIPE);
                d.fd_table.set(b, class::PIPE);
                if ctx.should_log {
                    d.log_line(format_args!("LOG:I:fd({a})='P':LOG:I:fd({b})='P':"));
                }
            }
            d.store_return(ctx.base_symbol(), err, rval as usize);
            true
        }
        CallShape::Popen {
            command,
            mode,
            real,
        } => {
            lifecycle::flush_and_close(d, ctx);
            d.note_forking();
            let (rval, err) = safe_call(|| unsafe { real(command, mode) });
            if !rval.is_null() {
                let fd = unsafe { libc::fileno(rval) };
                d.fd_table.set(fd, class::POPEN);
                if ctx.should_log {
                    d.log_line(format_args!(
                        "LOG:I:fd({},{})='p':",
                        fd,
                        path_lossy(command)
                    ));
                }
            }
            d.store_return(ctx.base_symbol(), err, rval as usize);
            true
        }
        _ => false,
    }
}

/// accept/accept4: the accepted connection is a socket.
pub(crate) fn handle_accept(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    let CallShape::Accept {
        sockfd,
        addr,
        addrlen,
        flags,
        real,
    } = ctx.shape
    else {
        return false;
    };
    let (rval, err) = safe_call(|| unsafe { real(sockfd, addr, addrlen, flags) });
    if rval >= 0 {
        d.fd_table.set(rval, class::SOCKET);
        if ctx.should_log {
            d.log_line(format_args!("LOG:I:fd({rval})='S':"));
        }
    }
    d.store_return(ctx.base_symbol(), err, rval as usize);
    true
}

/// close: pure side effect, the real call still runs.
pub(crate) fn handle_closefd(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    if let CallShape::Fd { fd } = ctx.shape {
        d.fd_table.clear(fd);
    }
    false
}

/// fclose/pclose: clear the stream's descriptor entry.
pub(crate) fn handle_closefptr(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    if let CallShape::Stream { stream } = ctx.shape {
        if !stream.is_null() {
            let fd = unsafe { libc::fileno(stream) };
            d.fd_table.clear(fd);
        }
    }
    false
}

/// read/write/ioctl/fcntl families: append the descriptor's tracked
/// class to the logical symbol name (`read` on a socket logs as
/// `read_S`). The call itself is untouched.
pub(crate) fn handle_rename_fd1(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_mod_sym {
        return false;
    }
    let CallShape::Fd { fd } = ctx.shape else {
        return false;
    };
    let ty = d.fd_table.get(fd);
    let shown = if ty == class::UNSET { b'?' } else { ty };
    ctx.rename_with_class(shown);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use libc::{c_char, c_int};

    // Stub "real" functions with deterministic behavior.
    unsafe extern "C" fn stub_open_enoent(
        _path: *const c_char,
        _flags: c_int,
        _mode: libc::mode_t,
    ) -> c_int {
        crate::context::set_errno(libc::ENOENT);
        -1
    }

    unsafe extern "C" fn stub_dup(oldfd: c_int, _newfd: c_int, _flags: c_int) -> c_int {
        libc::dup(oldfd)
    }

    #[test]
    fn failed_open_stores_errno_without_classifying() {
        let (d, sink) = testing::dispatcher();
        let mut ctx = d.begin_call(
            "open",
            CallShape::Path {
                path: c"/nonexistent/x".as_ptr(),
                flags: libc::O_RDONLY,
                mode: 0,
                real: stub_open_enoent,
            },
        );
        ctx.should_handle = true;
        ctx.should_log = true;
        assert!(handle_open(&d, &mut ctx), "full emulation even on failure");
        let val = d.wrapped_return();
        assert_eq!(val.int(), -1);
        assert_eq!(crate::context::errno(), libc::ENOENT);
        assert!(sink.lines().iter().all(|l| !l.starts_with("LOG:I:fd(")));
    }

    #[test]
    fn dup_inherits_source_class() {
        let (d, _sink) = testing::dispatcher();
        // Use a real descriptor so the stub's dup succeeds.
        let src = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDONLY) };
        assert!(src >= 0);
        d.fd_table.set(src, class::DEVICE);

        let mut ctx = d.begin_call(
            "dup",
            CallShape::Dup {
                oldfd: src,
                newfd: -1,
                flags: 0,
                real: stub_dup,
            },
        );
        ctx.should_handle = true;
        assert!(handle_dup(&d, &mut ctx));
        let new = d.wrapped_return().int();
        assert!(new >= 0);
        assert_eq!(d.fd_table.get(new), class::DEVICE);

        unsafe {
            libc::close(src);
            libc::close(new);
        }
    }

    #[test]
    fn dup_with_invalid_source_falls_through() {
        let (d, _sink) = testing::dispatcher();
        let mut ctx = d.begin_call(
            "dup",
            CallShape::Dup {
                oldfd: -3,
                newfd: -1,
                flags: 0,
                real: stub_dup,
            },
        );
        ctx.should_handle = true;
        assert!(!handle_dup(&d, &mut ctx));
    }

    #[test]
    fn close_clears_tracked_class() {
        let (d, _sink) = testing::dispatcher();
        d.fd_table.set(42, class::SOCKET);
        let mut ctx = d.begin_call("close", CallShape::Fd { fd: 42 });
        ctx.should_handle = true;
        assert!(!handle_closefd(&d, &mut ctx), "real close still runs");
        assert_eq!(d.fd_table.get(42), class::UNSET);
    }

    #[test]
    fn rename_appends_tracked_class() {
        let (d, _sink) = testing::dispatcher();
        d.fd_table.set(17, class::SOCKET);
        let mut ctx = d.begin_call("read", CallShape::Fd { fd: 17 });
        ctx.should_mod_sym = true;
        assert!(!handle_rename_fd1(&d, &mut ctx));
        assert_eq!(ctx.symbol(), "read_S");
    }

    #[test]
    fn rename_uses_question_mark_for_unset() {
        let (d, _sink) = testing::dispatcher();
        let mut ctx = d.begin_call("write", CallShape::Fd { fd: 99 });
        ctx.should_mod_sym = true;
        assert!(!handle_rename_fd1(&d, &mut ctx));
        assert_eq!(ctx.symbol(), "write_?");
    }

    #[test]
    fn rename_requires_mod_sym_mode() {
        let (d, _sink) = testing::dispatcher();
        d.fd_table.set(17, class::SOCKET);
        let mut ctx = d.begin_call("read", CallShape::Fd { fd: 17 });
        assert!(!handle_rename_fd1(&d, &mut ctx));
        assert_eq!(ctx.symbol(), "read");
    }
}
