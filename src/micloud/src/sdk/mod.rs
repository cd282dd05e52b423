//! High-level client over the login handshake and encrypted RPC envelopes.
//!
//! `MiCloudClient` is constructed once and shared by `Arc`; it owns the auth
//! state and exposes the device, property and action calls.
pub mod client;

pub use client::{ClientError, MiCloudClient};
