//! The exported interception surface, one module per symbol family.
//!
//! Not every registered symbol can be exported from a Rust cdylib: the
//! variadic exec variants (`execl`, `execle`, `execlp`), `vfork`, and
//! `clone` keep their wrap-cache registrations for trampoline-based
//! embedders but have no hook here.

pub mod io;
pub mod net;
pub mod open;
pub mod process;
pub mod signal;
pub mod stream;
