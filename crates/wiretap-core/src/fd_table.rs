//! File-descriptor classification table.
//!
//! One byte of class per descriptor number, grown on demand and guarded
//! by a re-entrant lock. The table only ever grows; closing a descriptor
//! clears its entry back to unset.

use std::ffi::CStr;

use libc::c_int;

use crate::sync::RecursiveMutex;

/// Baseline capacity of the table.
pub const MIN_FDTABLE_SZ: usize = 128;

/// One-character resource classes a descriptor can carry.
pub mod class {
    pub const UNSET: u8 = 0;
    /// Device file (`/dev`).
    pub const DEVICE: u8 = b'D';
    /// Epoll descriptor.
    pub const EPOLL: u8 = b'E';
    /// Regular file or directory.
    pub const FILE: u8 = b'F';
    /// stdin/stdout/stderr.
    pub const STDIO: u8 = b'f';
    /// Process-info tree (`/proc`).
    pub const PROC: u8 = b'K';
    /// Kernel-parameter tree (`/sys`).
    pub const SYSFS: u8 = b'k';
    /// Anonymous pipe.
    pub const PIPE: u8 = b'P';
    /// popen pipe.
    pub const POPEN: u8 = b'p';
    /// Network socket.
    pub const SOCKET: u8 = b'S';
}

/// Classify a path by prefix against the known virtual filesystem roots.
///
/// Best-effort: file-system-backed network mounts are not specially
/// detected. A null/absent path classifies as unset.
pub fn classify_path(path: Option<&CStr>) -> u8 {
    let Some(path) = path else {
        return class::UNSET;
    };
    let bytes = path.to_bytes();
    if bytes.starts_with(b"/dev/") {
        class::DEVICE
    } else if bytes.starts_with(b"/proc/") {
        class::PROC
    } else if bytes.starts_with(b"/sys/") {
        class::SYSFS
    } else {
        class::FILE
    }
}

pub struct FdTable {
    slots: RecursiveMutex<Vec<u8>>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: RecursiveMutex::new(vec![class::UNSET; MIN_FDTABLE_SZ]),
        }
    }

    /// Grow so `fd` is indexable. Returns false if the allocation failed,
    /// in which case the table is untouched and the caller abandons the
    /// operation.
    fn maybe_grow(slots: &mut Vec<u8>, fd: usize) -> bool {
        if fd < slots.len() {
            return true;
        }
        let newsz = if fd < MIN_FDTABLE_SZ * 2 {
            MIN_FDTABLE_SZ * 2
        } else {
            fd * 2
        };
        if slots.try_reserve_exact(newsz - slots.len()).is_err() {
            tracing::warn!(fd, newsz, "fd table growth failed, entry stays unset");
            return false;
        }
        slots.resize(newsz, class::UNSET);
        true
    }

    /// Current class of `fd`, or unset. The three standard streams
    /// default to the standard-stream class on first query.
    pub fn get(&self, fd: c_int) -> u8 {
        if fd < 0 {
            return class::UNSET;
        }
        let idx = fd as usize;
        let mut slots = self.slots.lock();
        if !Self::maybe_grow(&mut slots, idx) {
            return class::UNSET;
        }
        let mut c = slots[idx];
        if c == class::UNSET && idx <= libc::STDERR_FILENO as usize {
            c = class::STDIO;
            slots[idx] = c;
        }
        c
    }

    /// Record the class of `fd`. Negative descriptors are a no-op, as is
    /// a failed growth.
    pub fn set(&self, fd: c_int, ty: u8) {
        if fd < 0 {
            return;
        }
        let idx = fd as usize;
        let mut slots = self.slots.lock();
        if !Self::maybe_grow(&mut slots, idx) {
            return;
        }
        slots[idx] = ty;
    }

    /// Clear the entry for a closed descriptor. Never grows the table.
    pub fn clear(&self, fd: c_int) {
        if fd < 0 {
            return;
        }
        let idx = fd as usize;
        let mut slots = self.slots.lock();
        if idx < slots.len() {
            slots[idx] = class::UNSET;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrip() {
        let t = FdTable::new();
        t.set(7, class::SOCKET);
        assert_eq!(t.get(7), class::SOCKET);
    }

    #[test]
    fn negative_fd_is_noop() {
        let t = FdTable::new();
        t.set(-1, class::SOCKET);
        assert_eq!(t.get(-1), class::UNSET);
        t.clear(-1);
    }

    #[test]
    fn std_streams_default_lazily() {
        let t = FdTable::new();
        assert_eq!(t.get(0), class::STDIO);
        assert_eq!(t.get(1), class::STDIO);
        assert_eq!(t.get(2), class::STDIO);
        // Only on first query if unset; an explicit class wins.
        let t = FdTable::new();
        t.set(1, class::PIPE);
        assert_eq!(t.get(1), class::PIPE);
    }

    #[test]
    fn growth_preserves_existing_entries() {
        let t = FdTable::new();
        t.set(5, class::DEVICE);
        t.set(100, class::FILE);
        // First access past the 128-entry baseline forces a grow.
        t.set(300, class::SOCKET);
        assert_eq!(t.get(5), class::DEVICE);
        assert_eq!(t.get(100), class::FILE);
        assert_eq!(t.get(300), class::SOCKET);
    }

    #[test]
    fn clear_resets_to_unset() {
        let t = FdTable::new();
        t.set(9, class::PIPE);
        t.clear(9);
        assert_eq!(t.get(9), class::UNSET);
        // Clearing past the table end must not grow it.
        t.clear(10_000);
        assert_eq!(t.get(9), class::UNSET);
    }

    #[test]
    fn path_classifier_prefixes() {
        assert_eq!(classify_path(Some(c"/dev/null")), class::DEVICE);
        assert_eq!(classify_path(Some(c"/proc/self/maps")), class::PROC);
        assert_eq!(classify_path(Some(c"/sys/kernel/ostype")), class::SYSFS);
        assert_eq!(classify_path(Some(c"/home/user/file.txt")), class::FILE);
        assert_eq!(classify_path(Some(c"/device")), class::FILE);
        assert_eq!(classify_path(None), class::UNSET);
    }
}
