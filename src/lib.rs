// lib.rs

//! The elements that drive the `vnotify` watcher/supervisor binary.

#![warn(
    explicit_outlives_requirements,
    macro_use_extern_crate,
    meta_variable_misuse,
    missing_crate_level_docs,
    missing_docs,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_lifetimes,
    variant_size_differences,
    clippy::cargo,
    clippy::pedantic
)]

pub mod consumer;
pub mod control;
pub mod event;
pub mod ignore;
#[cfg(test)]
pub mod test;
pub mod transport;
pub mod watcher;

/// Rendezvous path the Supervisor binds and the Watcher connects to, unless
/// overridden (spec.md §6, "Rendezvous address").
pub const DEFAULT_SOCKET_PATH: &str = ".sock";
