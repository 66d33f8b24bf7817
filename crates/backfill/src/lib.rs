//! Opportunistic GPU server provisioning.
//!
//! This crate fills idle ("backfill") GPU capacity of a cloud provider with
//! servers, and tears those servers down again on demand.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Controller                           │
//! │   plan ──► for each instance:                                │
//! │              cleanup(stopped only) ► build spec ► create     │
//! │                                        │           start     │
//! │                                        │           poll      │
//! ├────────────────┬───────────────┬───────┴──────┬──────────────┤
//! │ Provisioning   │ Capacity      │ Naming       │ Cleanup      │
//! │ Planner        │ Oracle        │ Allocator    │ Reconciler   │
//! ├────────────────┴───────────────┴──────────────┴──────────────┤
//! │               wait_for_status / wait_for_deleted             │
//! ├──────────────────────────────────────────────────────────────┤
//! │                 ResourceClient (CloudSigma)                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The provider pushes no events, so every transition is observed by
//! polling, and the provider's state is the only source of truth. Servers
//! the controller owns are recognised by name (`grey-<n>-<suffix>` on the
//! backfill tier, `white-<n>-<suffix>` on the standard tier).
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use backfill::{BackfillConfig, CloudSigma, Controller};
//!
//! let client = CloudSigma::new(username, password)?;
//! let controller = Controller::new(Arc::new(client));
//!
//! let config = BackfillConfig::load("backfill.toml".as_ref())?;
//! let report = controller.run_cycle(&config).await?;
//!
//! // Release everything again
//! controller.cleanup_all().await?;
//! ```

pub mod capacity;
pub mod cleanup;
pub mod config;
pub mod controller;
pub mod lifecycle;
pub mod naming;
pub mod planner;
pub mod providers;
pub mod wait;

pub use capacity::{CapacityOracle, CapacitySnapshot};
pub use cleanup::{CleanupReconciler, CleanupReport, CleanupScope};
pub use config::{BackfillConfig, ConfigError, ServerParams, Settings};
pub use controller::{Controller, CycleReport};
pub use lifecycle::{LaunchOutcome, ResourceLifecycleManager};
pub use naming::NamingAllocator;
pub use planner::{Plan, PlanMode, ProvisioningPlanner};
pub use providers::cloudsigma::CloudSigma;
pub use providers::traits::{
    ManagedDrive, ManagedServer, ProviderError, ResourceClient, ServerSpec, ServerTier,
};
pub use wait::WaitPolicy;
