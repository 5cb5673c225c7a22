//! End-to-end scenarios driving real libc calls through the dispatcher,
//! the way the preload hooks do: begin a call, trace it, let
//! wrap_special emulate it, fetch the packaged return.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use libc::{c_char, c_int, c_void};
use wiretap_core::dispatch;
use wiretap_core::fd_table::class;
use wiretap_core::testing::{self, MemorySink};
use wiretap_core::{CallShape, Dispatcher};

// Real-function adapters with the engine's typed shapes. The variadic
// and shorter-arity libc entry points are wrapped exactly the way the
// shim wraps them.

unsafe extern "C" fn real_open(path: *const c_char, flags: c_int, mode: libc::mode_t) -> c_int {
    libc::open(path, flags, mode as c_int)
}

unsafe extern "C" fn real_socket(
    domain: c_int,
    ty: c_int,
    protocol: c_int,
    _pair: *mut c_int,
) -> c_int {
    libc::socket(domain, ty, protocol)
}

unsafe extern "C" fn real_pipe(fds: *mut c_int, _flags: c_int) -> c_int {
    libc::pipe(fds)
}

unsafe extern "C" fn real_fopen(
    path: *const c_char,
    mode: *const c_char,
    _stream: *mut libc::FILE,
) -> *mut libc::FILE {
    libc::fopen(path, mode)
}

unsafe extern "C" fn failing_open(
    _path: *const c_char,
    _flags: c_int,
    _mode: libc::mode_t,
) -> c_int {
    // Simulate the real call reporting a missing file.
    libc::open(c"/wiretap/definitely/missing".as_ptr(), libc::O_RDONLY)
}

fn last_errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Dispatch one producer call through the full hook sequence.
fn emulate(d: &Dispatcher, symbol: &'static str, shape: CallShape) -> c_int {
    let mut ctx = d.begin_call(symbol, shape);
    d.trace_call(&mut ctx);
    assert!(d.wrap_special(&mut ctx), "{symbol} must be fully emulated");
    d.wrapped_return().int()
}

/// Dispatch a close through the pre-call path plus the real close.
fn close_traced(d: &Dispatcher, fd: c_int) {
    let mut ctx = d.begin_call("close", CallShape::Fd { fd });
    d.trace_call(&mut ctx);
    assert!(!d.wrap_special(&mut ctx), "close falls through");
    unsafe { libc::close(fd) };
}

#[test]
fn open_dev_null_classifies_as_device() {
    init_tracing();
    let (d, sink) = testing::dispatcher();
    let fd = emulate(
        &d,
        "open",
        CallShape::Path {
            path: c"/dev/null".as_ptr(),
            flags: libc::O_RDONLY,
            mode: 0,
            real: real_open,
        },
    );
    assert!(fd >= 0);
    assert_eq!(d.fd_table.get(fd), class::DEVICE);
    assert!(sink
        .lines()
        .iter()
        .any(|l| l.contains("/dev/null") && l.contains("='D'")));

    close_traced(&d, fd);
    assert_eq!(d.fd_table.get(fd), class::UNSET);
}

#[test]
fn tcp_socket_classifies_and_renames_read() {
    let (d, sink) = testing::dispatcher();
    let fd = emulate(
        &d,
        "socket",
        CallShape::Socket {
            domain: libc::AF_INET,
            ty: libc::SOCK_STREAM,
            protocol: 0,
            pair: std::ptr::null_mut(),
            real: real_socket,
        },
    );
    assert!(fd >= 0);
    assert_eq!(d.fd_table.get(fd), class::SOCKET);

    // A read on that descriptor is logged under the renamed symbol.
    let mut ctx = d.begin_call("read", CallShape::Fd { fd });
    d.trace_call(&mut ctx);
    assert_eq!(ctx.symbol(), "read_S");
    assert!(sink.lines().iter().any(|l| l == "BT:read_S:"));

    close_traced(&d, fd);
}

#[test]
fn regular_file_classifies_as_file() {
    let (d, _sink) = testing::dispatcher();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scratch.txt");
    let cpath = std::ffi::CString::new(path.to_str().unwrap()).unwrap();

    let fd = emulate(
        &d,
        "open",
        CallShape::Path {
            path: cpath.as_ptr(),
            flags: libc::O_WRONLY | libc::O_CREAT,
            mode: 0o644,
            real: real_open,
        },
    );
    assert!(fd >= 0);
    assert_eq!(d.fd_table.get(fd), class::FILE);
    close_traced(&d, fd);
}

#[test]
fn socketpair_classifies_both_ends() {
    let (d, _sink) = testing::dispatcher();
    let mut pair = [-1 as c_int; 2];
    let rc = emulate(
        &d,
        "socketpair",
        CallShape::Socket {
            domain: libc::AF_UNIX,
            ty: libc::SOCK_STREAM,
            protocol: 0,
            pair: pair.as_mut_ptr(),
            real: libc::socketpair,
        },
    );
    assert_eq!(rc, 0);
    assert_eq!(d.fd_table.get(pair[0]), class::SOCKET);
    assert_eq!(d.fd_table.get(pair[1]), class::SOCKET);
    close_traced(&d, pair[0]);
    close_traced(&d, pair[1]);
}

#[test]
fn pipe_classifies_both_descriptors() {
    let (d, _sink) = testing::dispatcher();
    let mut fds = [-1 as c_int; 2];
    let rc = emulate(
        &d,
        "pipe",
        CallShape::Pipe {
            fds: fds.as_mut_ptr(),
            flags: 0,
            real: real_pipe,
        },
    );
    assert_eq!(rc, 0);
    assert_eq!(d.fd_table.get(fds[0]), class::PIPE);
    assert_eq!(d.fd_table.get(fds[1]), class::PIPE);

    close_traced(&d, fds[0]);
    assert_eq!(d.fd_table.get(fds[0]), class::UNSET);
    close_traced(&d, fds[1]);
}

#[test]
fn fopen_classifies_through_fileno() {
    let (d, _sink) = testing::dispatcher();
    let mut ctx = d.begin_call(
        "fopen",
        CallShape::StreamOpen {
            path: c"/proc/self/status".as_ptr(),
            mode: c"r".as_ptr(),
            stream: std::ptr::null_mut(),
            real: real_fopen,
        },
    );
    d.trace_call(&mut ctx);
    assert!(d.wrap_special(&mut ctx));
    let stream: *mut libc::FILE = d.wrapped_return().ptr();
    assert!(!stream.is_null());
    let fd = unsafe { libc::fileno(stream) };
    assert_eq!(d.fd_table.get(fd), class::PROC);

    // fclose-style cleanup clears the stream's descriptor entry.
    let mut ctx = d.begin_call("fclose", CallShape::Stream { stream });
    assert!(!d.wrap_special(&mut ctx));
    assert_eq!(d.fd_table.get(fd), class::UNSET);
    unsafe { libc::fclose(stream) };
}

#[test]
fn errno_survives_diagnostic_logging() {
    // The sink scribbles EIO on errno during every write; the errno the
    // caller sees must still be the one the real call produced.
    let (d, sink, _bridge) = testing::dispatcher_with_sink(MemorySink::perturbing());

    // Failure path: the emulated open reports ENOENT.
    let mut ctx = d.begin_call(
        "open",
        CallShape::Path {
            path: c"/wiretap/definitely/missing".as_ptr(),
            flags: libc::O_RDONLY,
            mode: 0,
            real: failing_open,
        },
    );
    d.trace_call(&mut ctx);
    assert!(d.wrap_special(&mut ctx));
    let rc = d.wrapped_return().int();
    assert_eq!(rc, -1);
    assert_eq!(last_errno(), libc::ENOENT);
    assert!(!sink.lines().is_empty(), "logging did run");

    // Success path: errno comes back clean even though the fd log line
    // perturbed it after the call.
    let fd = emulate(
        &d,
        "open",
        CallShape::Path {
            path: c"/dev/null".as_ptr(),
            flags: libc::O_RDONLY,
            mode: 0,
            real: real_open,
        },
    );
    assert!(fd >= 0);
    assert_eq!(last_errno(), 0);
    close_traced(&d, fd);
}

#[test]
fn fd_table_growth_preserves_below_capacity_entries() {
    let (d, _sink) = testing::dispatcher();
    d.fd_table.set(3, class::PIPE);
    d.fd_table.set(100, class::SOCKET);
    d.fd_table.set(300, class::FILE);
    assert_eq!(d.fd_table.get(3), class::PIPE);
    assert_eq!(d.fd_table.get(100), class::SOCKET);
    assert_eq!(d.fd_table.get(300), class::FILE);
}

// Live signal delivery needs the process-wide dispatcher the trampoline
// resolves through, so forward and flush are exercised in one test
// against the installed singleton.

static FORWARDED: AtomicBool = AtomicBool::new(false);

extern "C" fn forward_target(sig: c_int, _info: *mut libc::siginfo_t, _ctx: *mut c_void) {
    if sig == libc::SIGUSR1 {
        FORWARDED.store(true, Ordering::SeqCst);
    }
}

fn installed() -> (&'static Dispatcher, Arc<MemorySink>) {
    static SINK: OnceLock<Arc<MemorySink>> = OnceLock::new();
    let sink = Arc::clone(SINK.get_or_init(MemorySink::new));
    loop {
        if let Some(d) = dispatch::install(|| {
            let (d, _, _) = testing::dispatcher_with_sink(Arc::clone(
                SINK.get().expect("sink initialized above"),
            ));
            d
        }) {
            return (d, sink);
        }
        std::thread::yield_now();
    }
}

#[test]
fn signal_delivery_forwards_and_flush_signal_stops() {
    init_tracing();
    let (d, sink) = installed();

    // Registration through the dispatch path swaps the argument.
    let mut ctx = d.begin_call(
        "signal",
        CallShape::SigHandler {
            signo: libc::SIGUSR1,
            handler: forward_target as usize,
        },
    );
    assert!(!d.wrap_special(&mut ctx));
    let CallShape::SigHandler { handler, .. } = ctx.shape else {
        panic!("shape changed");
    };
    assert_eq!(handler, wiretap_core::signal_trampoline as usize);

    // Install the swapped handler for real, as the intercepted
    // registration call would.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler;
        sa.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut sa.sa_mask);
        assert_eq!(libc::sigaction(libc::SIGUSR1, &sa, std::ptr::null_mut()), 0);
        libc::raise(libc::SIGUSR1);
    }
    assert!(
        FORWARDED.load(Ordering::SeqCst),
        "delivery must reach the registered handler"
    );
    assert!(sink.lines().iter().any(|l| l.starts_with("SIG:RCV:")));

    // The reserved flush signal drains diagnostics and forwards nothing.
    FORWARDED.store(false, Ordering::SeqCst);
    d.install_flush_signal(libc::SIGUSR2);
    let closes_before = sink.closed();
    unsafe { libc::raise(libc::SIGUSR2) };
    assert!(sink.closed() > closes_before, "flush signal closes the log");
    assert!(!FORWARDED.load(Ordering::SeqCst), "nothing is forwarded");
    assert!(sink.lines().iter().any(|l| l.starts_with("SIG:LOG_FLUSH:")));
}
