//! File-backed diagnostic sink.
//!
//! One append-only log per thread, keyed by pid, thread id, and program
//! name, created lazily on first use. The sink object itself is
//! stateless across threads; each thread owns its open file.

use std::cell::RefCell;
use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use libc::{c_char, c_void};
use once_cell::sync::Lazy;
use wiretap_core::config::TraceConfig;
use wiretap_core::sink::{DiagnosticSink, SinkHandle};

static PROGNAME: Lazy<String> = Lazy::new(|| {
    extern "C" {
        static program_invocation_short_name: *const c_char;
    }
    unsafe {
        if program_invocation_short_name.is_null() {
            "unknown".to_string()
        } else {
            CStr::from_ptr(program_invocation_short_name)
                .to_string_lossy()
                .into_owned()
        }
    }
});

thread_local! {
    static LOG: RefCell<Option<File>> = const { RefCell::new(None) };
}

pub struct FileSink {
    dir: PathBuf,
    debug: bool,
}

impl FileSink {
    pub fn new(config: &TraceConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.log_dir),
            debug: config.debug,
        }
    }

    fn open_log(&self) -> Option<File> {
        if std::fs::create_dir_all(&self.dir).is_err() {
            tracing::warn!(dir = %self.dir.display(), "cannot create log directory");
            return None;
        }
        let pid = unsafe { libc::getpid() };
        let tid = unsafe { libc::syscall(libc::SYS_gettid) };
        let path = self.dir.join(format!("{}.{}.{}.log", pid, tid, &*PROGNAME));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        let _ = writeln!(file, "STARTED LOG");
        Some(file)
    }
}

impl DiagnosticSink for FileSink {
    fn acquire(&self) -> Option<SinkHandle> {
        LOG.with(|slot| {
            let mut slot = slot.try_borrow_mut().ok()?;
            if slot.is_none() {
                *slot = self.open_log();
            }
            slot.as_ref().map(|_| 1)
        })
    }

    fn write_line(&self, _handle: SinkHandle, line: &str) {
        LOG.with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                if let Some(file) = slot.as_mut() {
                    let _ = writeln!(file, "{line}");
                }
            }
        });
        if self.debug {
            // Raw write so the mirror cannot recurse through stdio.
            unsafe {
                libc::write(2, line.as_ptr() as *const c_void, line.len());
                libc::write(2, b"\n".as_ptr() as *const c_void, 1);
            }
        }
    }

    fn flush(&self, _handle: SinkHandle) {
        LOG.with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                if let Some(file) = slot.as_mut() {
                    let _ = file.flush();
                }
            }
        });
    }

    fn close(&self) {
        LOG.with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                slot.take();
            }
        });
    }
}
