//! Controller for long-running generation jobs on a remote server.
//!
//! A [`SessionRegistry`](registry::SessionRegistry) runs at most one
//! generation session at a time. Each session submits its request through
//! an abortable [`Transfer`](transport::Transfer), relays upload progress,
//! polls the server for progress on a fixed cadence, and finishes with
//! exactly one terminal status update. Connectivity is probed by a
//! debounced [`HealthMonitor`](health::HealthMonitor).
//!
//! The server itself is abstracted behind [`RemoteBackend`](backend::RemoteBackend)
//! and [`HealthProbe`](backend::HealthProbe); [`HttpBackend`](http::HttpBackend)
//! implements both over HTTP.

pub mod backend;
pub mod config;
pub mod health;
pub mod http;
pub mod poll;
pub mod registry;
pub mod session;
pub mod sink;
pub mod transport;
