//! Pure, deterministic logic (no I/O, no sleeping).
//!
//! Anything that depends on time takes the current instant as an argument.

pub mod backoff;
pub mod contract;
pub mod limits;
pub mod monitor;
pub mod policy;
pub mod types;
pub mod window;
