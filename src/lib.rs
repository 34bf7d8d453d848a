//! Purpose: Library crate behind the `lnkstream` CLI and its tests.
//! Exports: `api` (cache, talker, catalog), `config` (tuning), `core` (channels, pipe, errors).
//! Role: Blocking streaming primitives; the binary adds the CLI and HTTP front.
//! Invariants: The library never installs a tracing subscriber.
pub mod api;
pub mod config;
pub mod core;
