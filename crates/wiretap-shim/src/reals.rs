//! Resolved-function table: symbol name → real in-process address.
//!
//! Each intercepted symbol has one lazily resolved, atomically cached
//! `dlsym(RTLD_NEXT)` lookup. A miss is an internal bug (the symbol set
//! is fixed at build time), not a runtime condition: it aborts.

use std::sync::atomic::{AtomicPtr, Ordering};

use libc::{c_char, c_void};
use wiretap_core::error::{fault, FAULT_SYMBOL_MISSING};

pub struct RealSymbol {
    ptr: AtomicPtr<c_void>,
    /// NUL-terminated so it can go straight to dlsym.
    name: &'static str,
}

impl RealSymbol {
    pub const fn new(name: &'static str) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            name,
        }
    }

    pub unsafe fn get(&self) -> *mut c_void {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        let f = libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr() as *const c_char);
        if f.is_null() {
            fault(FAULT_SYMBOL_MISSING);
        }
        self.ptr.store(f, Ordering::Release);
        f
    }
}

/// Transmute a cached real-symbol address to its typed signature.
#[macro_export]
macro_rules! real {
    ($storage:expr, $t:ty) => {
        std::mem::transmute::<*mut libc::c_void, $t>($storage.get())
    };
}

pub static REAL_OPEN: RealSymbol = RealSymbol::new("open\0");
pub static REAL_OPEN64: RealSymbol = RealSymbol::new("open64\0");
pub static REAL_OPENAT: RealSymbol = RealSymbol::new("openat\0");
pub static REAL_OPENAT64: RealSymbol = RealSymbol::new("openat64\0");
pub static REAL_FOPEN: RealSymbol = RealSymbol::new("fopen\0");
pub static REAL_FOPEN64: RealSymbol = RealSymbol::new("fopen64\0");
pub static REAL_FREOPEN: RealSymbol = RealSymbol::new("freopen\0");
pub static REAL_FCLOSE: RealSymbol = RealSymbol::new("fclose\0");
pub static REAL_PCLOSE: RealSymbol = RealSymbol::new("pclose\0");
pub static REAL_CLOSE: RealSymbol = RealSymbol::new("close\0");
pub static REAL_DUP: RealSymbol = RealSymbol::new("dup\0");
pub static REAL_DUP2: RealSymbol = RealSymbol::new("dup2\0");
pub static REAL_DUP3: RealSymbol = RealSymbol::new("dup3\0");
pub static REAL_SOCKET: RealSymbol = RealSymbol::new("socket\0");
pub static REAL_SOCKETPAIR: RealSymbol = RealSymbol::new("socketpair\0");
pub static REAL_PIPE: RealSymbol = RealSymbol::new("pipe\0");
pub static REAL_PIPE2: RealSymbol = RealSymbol::new("pipe2\0");
pub static REAL_POPEN: RealSymbol = RealSymbol::new("popen\0");
pub static REAL_ACCEPT: RealSymbol = RealSymbol::new("accept\0");
pub static REAL_ACCEPT4: RealSymbol = RealSymbol::new("accept4\0");
pub static REAL_READ: RealSymbol = RealSymbol::new("read\0");
pub static REAL_READV: RealSymbol = RealSymbol::new("readv\0");
pub static REAL_PREAD: RealSymbol = RealSymbol::new("pread\0");
pub static REAL_PREAD64: RealSymbol = RealSymbol::new("pread64\0");
pub static REAL_WRITE: RealSymbol = RealSymbol::new("write\0");
pub static REAL_WRITEV: RealSymbol = RealSymbol::new("writev\0");
pub static REAL_PWRITE: RealSymbol = RealSymbol::new("pwrite\0");
pub static REAL_PWRITE64: RealSymbol = RealSymbol::new("pwrite64\0");
pub static REAL_IOCTL: RealSymbol = RealSymbol::new("ioctl\0");
pub static REAL_FCNTL: RealSymbol = RealSymbol::new("fcntl\0");
pub static REAL_FORK: RealSymbol = RealSymbol::new("fork\0");
pub static REAL_DAEMON: RealSymbol = RealSymbol::new("daemon\0");
pub static REAL_SYSTEM: RealSymbol = RealSymbol::new("system\0");
pub static REAL_EXIT: RealSymbol = RealSymbol::new("exit\0");
pub static REAL_UEXIT: RealSymbol = RealSymbol::new("_exit\0");
pub static REAL_PTHREAD_CREATE: RealSymbol = RealSymbol::new("pthread_create\0");
pub static REAL_PTHREAD_EXIT: RealSymbol = RealSymbol::new("pthread_exit\0");
pub static REAL_EXECV: RealSymbol = RealSymbol::new("execv\0");
pub static REAL_EXECVP: RealSymbol = RealSymbol::new("execvp\0");
pub static REAL_EXECVE: RealSymbol = RealSymbol::new("execve\0");
pub static REAL_SIGNAL: RealSymbol = RealSymbol::new("signal\0");
pub static REAL_BSD_SIGNAL: RealSymbol = RealSymbol::new("bsd_signal\0");
pub static REAL_SYSV_SIGNAL: RealSymbol = RealSymbol::new("sysv_signal\0");
pub static REAL_SIGACTION: RealSymbol = RealSymbol::new("sigaction\0");
