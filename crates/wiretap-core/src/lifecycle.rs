//! Process and thread lifecycle hooks.
//!
//! Everything here is a pre-call handler: diagnostics are flushed and
//! closed before the terminal (or forking) action runs, then control
//! falls through to the real call. The exec handlers additionally
//! rewrite the child environment so the interposition library follows
//! the process across exec.

use std::ffi::{CStr, CString};

use libc::c_char;

use crate::config::PRELOAD_VAR;
use crate::context::{clear_thread_state, path_lossy, CallContext, CallShape};
use crate::dispatch::Dispatcher;

/// Flush and close the calling thread's diagnostics, logging the
/// terminal line first when logging is enabled.
pub(crate) fn flush_and_close(d: &Dispatcher, ctx: &CallContext<'_>) {
    if ctx.should_log {
        d.log_line(format_args!("LOG:I:CLOSE:{}:", ctx.symbol()));
        d.flush_sink();
    }
    d.close_sink();
}

/// exit/_exit: terminal for the process. Releases the managed-runtime
/// bridge, drains diagnostics, then tears down the thread's state.
pub(crate) fn handle_exit(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    d.bridge().close_interface();
    flush_and_close(d, ctx);
    clear_thread_state();
    false
}

/// pthread_exit: terminal for the thread only.
pub(crate) fn handle_thread_exit(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    flush_and_close(d, ctx);
    clear_thread_state();
    false
}

/// fork/vfork/clone/system/daemon: drain diagnostics before the real
/// fork so the child does not inherit a partially written buffer, and
/// record the forking pid for downstream diagnostics.
pub(crate) fn handle_fork(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    flush_and_close(d, ctx);
    d.note_forking();
    false
}

/// pthread_create: drain diagnostics around thread creation; the
/// creating thread's own state survives.
pub(crate) fn handle_pthread(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    flush_and_close(d, ctx);
    false
}

/// Build the replacement `LD_PRELOAD=` entry: append our path to an
/// existing entry, or create one from scratch.
///
/// `old` is the full `LD_PRELOAD=...` environment string. The returned
/// string is leaked deliberately; exec is about to replace the process
/// image.
fn preload_entry(preload_path: &str, old: Option<&CStr>) -> *const c_char {
    let value = match old {
        Some(old) => {
            let old = old.to_string_lossy();
            format!("{old}:{preload_path}")
        }
        None => format!("{PRELOAD_VAR}={preload_path}"),
    };
    match CString::new(value) {
        Ok(s) => CString::into_raw(s) as *const c_char,
        Err(_) => std::ptr::null(),
    }
}

/// Rewrite an explicit environment array so the child is preloaded.
///
/// If an `LD_PRELOAD` entry exists, its pointer is replaced in place and
/// the original array is reused. Otherwise a fresh null-terminated array
/// is allocated (and leaked, see [`preload_entry`]) with the preload
/// entry first and the old pointers copied behind it.
pub(crate) fn rewrite_environ(
    preload_path: &str,
    old_env: *mut *const c_char,
) -> *mut *const c_char {
    unsafe {
        if !old_env.is_null() {
            let mut p = old_env;
            while !(*p).is_null() {
                let entry = CStr::from_ptr(*p);
                if entry.to_bytes().starts_with(PRELOAD_VAR.as_bytes()) {
                    let spliced = preload_entry(preload_path, Some(entry));
                    if !spliced.is_null() {
                        *p = spliced;
                    }
                    return old_env;
                }
                p = p.add(1);
            }
        }

        // No matching variable: allocate a new array.
        let mut entries: Vec<*const c_char> = Vec::new();
        let fresh = preload_entry(preload_path, None);
        if fresh.is_null() {
            return old_env;
        }
        entries.push(fresh);
        if !old_env.is_null() {
            let mut p = old_env;
            while !(*p).is_null() {
                entries.push(*p);
                p = p.add(1);
            }
        }
        entries.push(std::ptr::null());
        Box::leak(entries.into_boxed_slice()).as_mut_ptr()
    }
}

/// Set the process-wide preload variable for exec variants that carry no
/// explicit environment, with the same append-or-create semantics.
fn export_preload_var(preload_path: &str) {
    unsafe {
        let existing = libc::getenv(c"LD_PRELOAD".as_ptr());
        let value = if existing.is_null() {
            preload_path.to_string()
        } else {
            let old = CStr::from_ptr(existing).to_string_lossy();
            format!("{old}:{preload_path}")
        };
        if let Ok(value) = CString::new(value) {
            libc::setenv(c"LD_PRELOAD".as_ptr(), value.as_ptr(), 1);
        }
    }
}

/// exec-family: inject the preload variable, log the destination, drain
/// diagnostics, fall through to the real exec.
pub(crate) fn handle_exec(d: &Dispatcher, ctx: &mut CallContext<'_>) -> bool {
    if !ctx.should_handle {
        return false;
    }
    let sym = ctx.base_symbol();
    if sym == "execle" {
        // Known gap: the trailing envp of execle is not rewritten.
        d.log_line(format_args!("E:No support for execle!"));
    }
    if sym == "execve" {
        if let CallShape::Exec { envp, .. } = &mut ctx.shape {
            *envp = rewrite_environ(&d.config.preload_path, *envp);
        }
    } else {
        export_preload_var(&d.config.preload_path);
    }
    if ctx.should_log {
        if let CallShape::Exec { path, .. } = ctx.shape {
            d.log_line(format_args!("LOG:I:{}:{}:", sym, path_lossy(path)));
        }
    }
    flush_and_close(d, ctx);
    false
}
