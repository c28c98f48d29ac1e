//! `sdgen-cli` library crate.
//!
//! Re-exports the driver modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod driver;
pub mod output;
