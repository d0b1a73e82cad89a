//! Remote bucket adapter (cAdapter)
//!
//! Submodules:
//! - `client`: the `ObjectBackend` contract and its wire types
//! - `http`: `reqwest` implementation against the Shadow Drive API
//! - `memory`: in-memory backend with call counters and fault injection
//! - `signer`: request signing for the multipart endpoints
//!
pub mod client;
pub mod http;
pub mod memory;
pub mod signer;

pub use client::ObjectBackend;
