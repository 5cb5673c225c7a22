//! # wiretap-core
//!
//! Interception dispatch and stateful tracking engine for the wiretap
//! LD_PRELOAD tracer.
//!
//! This crate is the library half of the tracer: the symbol-to-handler
//! wrap cache, the file-descriptor classification table, the errno-safe
//! call protocol, the process/thread lifecycle hooks, and the signal
//! trampoline. It performs no symbol resolution of its own: every
//! intercepted call arrives with its real function already resolved (the
//! `wiretap-shim` cdylib owns `dlsym`), so the whole engine is testable
//! in-process without being preloaded.
//!
//! Backtrace capture, log-file management, and managed-runtime bridging
//! are external collaborators behind the narrow traits in [`sink`].

pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod fd_table;
pub mod handlers;
pub mod lifecycle;
pub mod signal;
pub mod sink;
pub mod sync;
pub mod testing;

pub use cache::{wrap_hash, WrapCache, WrapCacheEntry};
pub use config::TraceConfig;
pub use context::{safe_call, CallContext, CallShape, RetVal, ThreadGuard};
pub use dispatch::Dispatcher;
pub use error::TraceError;
pub use fd_table::{classify_path, FdTable};
pub use signal::{signal_trampoline, SignalTable, MAX_SIGNALS};
