//! Job-lifecycle client for a remote image-generation service.
//!
//! [`client::JobClient`] drives one job through submit -> poll -> fetch
//! against any [`service::RemoteService`]. Two services ship with the
//! crate: the HTTP gateway binding in [`api`] and the scripted in-process
//! [`memory::InMemoryService`] used by tests and offline runs.

pub mod api;
pub mod client;
pub mod memory;
pub mod retry;
pub mod service;
