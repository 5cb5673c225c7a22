//! Environment-driven configuration.
//!
//! The tracer has to be configurable before `main()` runs, so there is
//! no config file: everything comes from the environment, read with raw
//! `libc::getenv` (safe during early attach, when the Rust side of the
//! process may not be fully set up).

use std::ffi::CStr;

use libc::c_int;

/// Log directory for the per-thread trace files.
pub const ENV_LOG_DIR: &str = "WIRETAP_LOG_DIR";
/// Path value injected into `LD_PRELOAD` for exec-family calls.
pub const ENV_PRELOAD: &str = "WIRETAP_PRELOAD";
/// Signal number reserved as the flush-and-stop control signal.
pub const ENV_FLUSH_SIGNAL: &str = "WIRETAP_FLUSH_SIGNAL";
/// Mirror sink lines to stderr and enable the tracing subscriber.
pub const ENV_DEBUG: &str = "WIRETAP_DEBUG";
/// Disable diagnostic logging (interception still classifies fds).
pub const ENV_DISABLE: &str = "WIRETAP_DISABLE";

/// The environment variable rewritten on exec so children stay traced.
pub const PRELOAD_VAR: &str = "LD_PRELOAD";

pub const DEFAULT_LOG_DIR: &str = "/tmp/wiretap";
pub const DEFAULT_PRELOAD_PATH: &str = "/usr/lib/libwiretap_shim.so";

#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub log_dir: String,
    pub preload_path: String,
    pub flush_signal: Option<c_int>,
    pub debug: bool,
    pub logging: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            log_dir: DEFAULT_LOG_DIR.to_string(),
            preload_path: DEFAULT_PRELOAD_PATH.to_string(),
            flush_signal: None,
            debug: false,
            logging: true,
        }
    }
}

unsafe fn env_str(name: &CStr) -> Option<String> {
    let p = libc::getenv(name.as_ptr());
    if p.is_null() {
        return None;
    }
    Some(CStr::from_ptr(p).to_string_lossy().into_owned())
}

impl TraceConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        unsafe {
            if let Some(dir) = env_str(c"WIRETAP_LOG_DIR") {
                cfg.log_dir = dir;
            }
            if let Some(path) = env_str(c"WIRETAP_PRELOAD") {
                cfg.preload_path = path;
            }
            if let Some(sig) = env_str(c"WIRETAP_FLUSH_SIGNAL") {
                cfg.flush_signal = sig.trim().parse::<c_int>().ok();
            }
            cfg.debug = !libc::getenv(c"WIRETAP_DEBUG".as_ptr()).is_null();
            cfg.logging = libc::getenv(c"WIRETAP_DISABLE".as_ptr()).is_null();
        }
        tracing::debug!(
            log_dir = %cfg.log_dir,
            logging = cfg.logging,
            flush_signal = ?cfg.flush_signal,
            "trace config loaded"
        );
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TraceConfig::default();
        assert_eq!(cfg.log_dir, DEFAULT_LOG_DIR);
        assert!(cfg.logging);
        assert!(cfg.flush_signal.is_none());
    }

    #[test]
    fn from_env_overrides() {
        std::env::set_var(ENV_LOG_DIR, "/tmp/wiretap-test");
        std::env::set_var(ENV_FLUSH_SIGNAL, "10");
        let cfg = TraceConfig::from_env();
        assert_eq!(cfg.log_dir, "/tmp/wiretap-test");
        assert_eq!(cfg.flush_signal, Some(10));
        std::env::remove_var(ENV_LOG_DIR);
        std::env::remove_var(ENV_FLUSH_SIGNAL);
    }
}
