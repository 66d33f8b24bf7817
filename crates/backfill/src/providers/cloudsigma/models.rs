//! CloudSigma API models.
//!
//! Collections and create calls wrap their payload in an `objects` list.

use serde::{Deserialize, Serialize};

use crate::providers::traits::{DriveStatus, ServerStatus};

/// Collection response wrapper.
#[derive(Debug, Deserialize)]
pub struct ObjectsResponse<T> {
    /// Returned objects.
    pub objects: Vec<T>,
}

/// Create request wrapper.
#[derive(Debug, Serialize)]
pub struct ObjectsBody<'a, T> {
    /// Objects to create.
    pub objects: Vec<&'a T>,
}

/// Action responses either wrap the result in `objects` or return it bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ActionResponse<T> {
    /// Wrapped in an `objects` list.
    Objects {
        /// Returned objects.
        objects: Vec<T>,
    },
    /// Bare object.
    Single(T),
}

impl<T> ActionResponse<T> {
    /// First returned object, if any.
    pub fn into_first(self) -> Option<T> {
        match self {
            Self::Objects { objects } => objects.into_iter().next(),
            Self::Single(object) => Some(object),
        }
    }
}

/// Server resource from the API.
#[derive(Debug, Deserialize)]
pub struct ServerResource {
    /// Server uuid.
    pub uuid: String,
    /// Server name.
    pub name: String,
    /// Server status.
    pub status: ServerStatus,
}

/// Drive resource from the API.
#[derive(Debug, Deserialize)]
pub struct DriveResource {
    /// Drive uuid.
    pub uuid: String,
    /// Drive name.
    pub name: String,
    /// Drive status.
    pub status: DriveStatus,
}

/// One entry of an API error response.
#[derive(Debug, Deserialize)]
pub struct ApiErrorEntry {
    /// Human readable message.
    pub error_message: String,
    /// Error classification (e.g. `permission`, `validation`).
    #[serde(default)]
    pub error_type: Option<String>,
    /// Offending field or resource.
    #[serde(default)]
    pub error_point: Option<String>,
}
