//! Symbol wrap cache: name → (handler, flags).
//!
//! A fixed 256-slot array indexed by a one-byte hash of the symbol name,
//! with collisions chained off the slot. Built once when the dispatcher
//! is constructed and read-only for the rest of the process, so lookups
//! take no lock.

use crate::context::CallContext;
use crate::dispatch::Dispatcher;

pub const WRAP_CACHE_SZ: usize = 256;

/// Hash value reserved to mean "not yet computed" in a call context.
/// [`wrap_hash`] never produces it, and slot 0 stays permanently empty.
pub const EMPTY_HASH: u8 = 0;

/// Iterative left-shift-then-XOR fold over the name bytes, with the
/// all-zero result remapped to 1.
pub fn wrap_hash(name: &str) -> u8 {
    let mut v: u8 = 0;
    for &b in name.as_bytes() {
        v = (v << 1) ^ b;
    }
    if v == EMPTY_HASH {
        0x1
    } else {
        v
    }
}

/// A handler invoked through the dispatcher. Returns true when the call
/// was fully emulated (the caller must fetch the packaged return value
/// instead of performing the real call).
pub type Handler = fn(&Dispatcher, &mut CallContext<'_>) -> bool;

pub struct WrapCacheEntry {
    pub name: &'static str,
    pub handler: Handler,
    /// Invoked from the full-emulation dispatch path.
    pub wrapsym: bool,
    /// Invoked only to rewrite the logical symbol name used for logging.
    pub modsym: bool,
    /// Overflow chain for hash collisions, owned by the slot.
    next: Option<Box<WrapCacheEntry>>,
}

pub struct WrapCache {
    slots: Vec<Option<Box<WrapCacheEntry>>>,
}

impl Default for WrapCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WrapCache {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(WRAP_CACHE_SZ);
        slots.resize_with(WRAP_CACHE_SZ, || None);
        Self { slots }
    }

    /// Register a symbol. Collisions append to the slot's overflow chain;
    /// duplicate names are not checked for (first match wins on lookup).
    pub fn add(&mut self, name: &'static str, handler: Handler, wrapsym: bool, modsym: bool) {
        let mut slot = &mut self.slots[wrap_hash(name) as usize];
        while let Some(entry) = slot {
            slot = &mut entry.next;
        }
        *slot = Some(Box::new(WrapCacheEntry {
            name,
            handler,
            wrapsym,
            modsym,
            next: None,
        }));
    }

    /// Walk the slot's chain for an exact name match.
    pub fn lookup(&self, name: &str, hash: u8) -> Option<&WrapCacheEntry> {
        let mut entry = self.slots[hash as usize].as_deref()?;
        loop {
            if entry.name == name {
                return Some(entry);
            }
            entry = entry.next.as_deref()?;
        }
    }
}
