//! Resource client implementations.
//!
//! This module contains the [`ResourceClient`] trait and the CloudSigma
//! implementation used by the binary.

pub mod cloudsigma;
pub mod traits;

pub use traits::{
    Bounds, Capabilities, CloneDriveRequest, DriveAttachment, DriveStatus, FreeResources,
    GpuCapability, GpuSpec, HostCapability, IpV4Conf, ManagedDrive, ManagedServer, NicSpec,
    ProviderError, ResourceClient, ResourceTotals, ServerSpec, ServerStatus, ServerTier,
};
