#![deny(missing_docs)]
//! DNAnexus backend for dias.
//!
//! [`DxClient`] speaks the platform's JSON-over-HTTP API with a blocking
//! agent and implements both [`dias_core::ObjectStore`] and
//! [`dias_core::ExecutionPlatform`].

pub mod client;
pub mod env;
mod platform;
mod store;
pub mod wire;

pub use client::DxClient;
pub use env::DxSettings;
