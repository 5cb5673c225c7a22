//! # wiretap-shim
//!
//! LD_PRELOAD surface for the wiretap tracer. Every exported
//! `extern "C"` symbol shadows its libc counterpart, builds a typed call
//! context, and drives it through the `wiretap-core` dispatcher; the
//! real implementation is resolved through [`reals`] with
//! `dlsym(RTLD_NEXT)`.
//!
//! Hooks are reentrancy-safe: once a thread is inside the layer (or a
//! handler is mid-safe-call), nested libc calls pass straight through to
//! the real functions.

// Unsafe FFI without per-function safety docs: these are C ABI entry
// points whose contracts are the libc man pages.
#![allow(clippy::missing_safety_doc)]

#[macro_use]
pub mod reals;

pub mod hooks;
pub mod logfile;

use wiretap_core::config::TraceConfig;
use wiretap_core::dispatch;
use wiretap_core::sink::{DiagnosticSink, LineCapturer, NullBridge, NullSink};
use wiretap_core::Dispatcher;

use crate::logfile::FileSink;

/// Get the process dispatcher, attaching lazily if the constructor has
/// not run yet. `None` only while another thread is mid-install; the
/// hook then passes through.
pub(crate) fn dispatcher() -> Option<&'static Dispatcher> {
    if let Some(d) = dispatch::get() {
        return Some(d);
    }
    attach()
}

fn attach() -> Option<&'static Dispatcher> {
    let d = dispatch::install(|| {
        let config = TraceConfig::from_env();
        if config.debug {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_writer(std::io::stderr)
                .try_init();
        }
        let sink: Box<dyn DiagnosticSink> = if config.logging {
            Box::new(FileSink::new(&config))
        } else {
            Box::new(NullSink)
        };
        Dispatcher::new(config, sink, Box::new(LineCapturer), Box::new(NullBridge))
    })?;
    if let Some(sig) = d.config.flush_signal {
        if d.signals.special().is_none() {
            d.install_flush_signal(sig);
        }
    }
    Some(d)
}

/// Static constructor: attach as soon as the dynamic loader maps the
/// library, before the target's `main` runs.
#[link_section = ".init_array"]
#[used]
pub static WIRETAP_ATTACH: unsafe extern "C" fn() = {
    unsafe extern "C" fn attach_ctor() {
        let _ = attach();
    }
    attach_ctor
};
