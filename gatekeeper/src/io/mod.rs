//! I/O helpers: configuration files and recorded event streams.

pub mod config;
pub mod event_stream;
