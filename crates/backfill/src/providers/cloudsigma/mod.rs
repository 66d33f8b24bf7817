//! CloudSigma resource client.
//!
//! Implements the [`ResourceClient`](crate::providers::ResourceClient) trait
//! over the CloudSigma 2.0 REST API.
//!
//! Backfill ("grey") servers are created through the `bservers` collection;
//! once created they are addressed through `servers` like any other server.
//!
//! ## Example
//!
//! ```ignore
//! use backfill::providers::cloudsigma::CloudSigma;
//! use backfill::providers::ResourceClient;
//!
//! let client = CloudSigma::new(username, password)?;
//! let caps = client.capabilities().await?;
//! ```

mod client;
mod models;

pub use client::{CloudSigma, DEFAULT_API_URL};
pub use models::*;
