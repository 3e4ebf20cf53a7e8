//! Domain types and pure rules for remote image generation jobs.
//!
//! Nothing in this crate performs I/O. The controller that drives
//! sessions against a server lives in `genctl-remote`.

pub mod artifact;
pub mod error;
pub mod request;
pub mod sampling;
pub mod status;
pub mod timing;
pub mod types;
