//! CloudSigma API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::models::{
    ActionResponse, ApiErrorEntry, DriveResource, ObjectsBody, ObjectsResponse, ServerResource,
};
use crate::providers::traits::{
    Capabilities, CloneDriveRequest, ManagedDrive, ManagedServer, ProviderError, ResourceClient,
    ServerSpec, ServerTier,
};

/// Default API endpoint.
pub const DEFAULT_API_URL: &str = "https://zrh.cloudsigma.com/api/2.0";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// CloudSigma resource client.
#[derive(Clone)]
pub struct CloudSigma {
    /// HTTP client.
    client: Client,
    /// API base URL, without trailing slash.
    base_url: String,
    /// Account email.
    username: String,
    /// Account password.
    password: String,
}

impl CloudSigma {
    /// Create a new client against the default endpoint.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_API_URL, username, password)
    }

    /// Create a new client against a specific API endpoint.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn with_base_url(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = self.url(path);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let url = self.url(path);
        debug!(url = %url, "POST request");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated POST request whose response body is ignored.
    async fn post_action(&self, path: &str) -> Result<(), ProviderError> {
        let url = self.url(path);
        debug!(url = %url, "POST request (action)");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Self::error_for(status, &text))
        }
    }

    /// Make an authenticated DELETE request.
    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let url = self.url(path);
        debug!(url = %url, "DELETE request");

        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Self::error_for(status, &text))
        }
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                ProviderError::Serialization(e)
            })
        } else {
            Err(Self::error_for(status, &text))
        }
    }

    /// Map a failed response to an error, preferring the API's own message.
    fn error_for(status: StatusCode, body: &str) -> ProviderError {
        let message = serde_json::from_str::<Vec<ApiErrorEntry>>(body)
            .ok()
            .and_then(|entries| entries.into_iter().next())
            .map_or_else(|| body.to_string(), |entry| entry.error_message);

        if status == StatusCode::NOT_FOUND {
            ProviderError::NotFound(message)
        } else {
            ProviderError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }

    fn to_server(resource: ServerResource) -> ManagedServer {
        ManagedServer {
            uuid: resource.uuid,
            name: resource.name,
            status: resource.status,
        }
    }

    fn to_drive(resource: DriveResource) -> ManagedDrive {
        ManagedDrive {
            uuid: resource.uuid,
            name: resource.name,
            status: resource.status,
        }
    }

    fn collection_path(tier: ServerTier) -> &'static str {
        match tier {
            ServerTier::Backfill => "/bservers/",
            ServerTier::Standard => "/servers/",
        }
    }
}

#[async_trait]
impl ResourceClient for CloudSigma {
    async fn list_servers(&self) -> Result<Vec<ManagedServer>, ProviderError> {
        let response: ObjectsResponse<ServerResource> = self.get("/servers/?limit=0").await?;
        Ok(response.objects.into_iter().map(Self::to_server).collect())
    }

    async fn list_servers_detail(&self) -> Result<Vec<ManagedServer>, ProviderError> {
        let response: ObjectsResponse<ServerResource> =
            self.get("/servers/detail/?limit=0").await?;
        Ok(response.objects.into_iter().map(Self::to_server).collect())
    }

    async fn get_server(&self, uuid: &str) -> Result<ManagedServer, ProviderError> {
        let resource: ServerResource = self.get(&format!("/servers/{uuid}/")).await?;
        Ok(Self::to_server(resource))
    }

    async fn create_server(
        &self,
        tier: ServerTier,
        spec: &ServerSpec,
    ) -> Result<ManagedServer, ProviderError> {
        info!(name = %spec.name, tier = %tier, gpus = spec.gpus.len(), "Creating server");

        let body = ObjectsBody {
            objects: vec![spec],
        };
        let response: ObjectsResponse<ServerResource> =
            self.post(Self::collection_path(tier), &body).await?;
        let server = response
            .objects
            .into_iter()
            .next()
            .map(Self::to_server)
            .ok_or_else(|| ProviderError::Api {
                status: StatusCode::OK.as_u16(),
                message: "create returned no server".to_string(),
            })?;

        info!(server_id = %server.uuid, status = %server.status, "Server created");
        Ok(server)
    }

    async fn start_server(&self, uuid: &str) -> Result<(), ProviderError> {
        info!(server_id = %uuid, "Starting server");
        self.post_action(&format!("/servers/{uuid}/action/?do=start"))
            .await
    }

    async fn stop_server(&self, uuid: &str) -> Result<(), ProviderError> {
        info!(server_id = %uuid, "Stopping server");
        self.post_action(&format!("/servers/{uuid}/action/?do=stop"))
            .await
    }

    async fn delete_server(&self, uuid: &str) -> Result<(), ProviderError> {
        info!(server_id = %uuid, "Deleting server");
        self.delete(&format!("/servers/{uuid}/")).await
    }

    async fn list_drives_detail(&self) -> Result<Vec<ManagedDrive>, ProviderError> {
        let response: ObjectsResponse<DriveResource> =
            self.get("/drives/detail/?limit=0").await?;
        Ok(response.objects.into_iter().map(Self::to_drive).collect())
    }

    async fn get_drive(&self, uuid: &str) -> Result<ManagedDrive, ProviderError> {
        let resource: DriveResource = self.get(&format!("/drives/{uuid}/")).await?;
        Ok(Self::to_drive(resource))
    }

    async fn clone_drive(
        &self,
        uuid: &str,
        req: &CloneDriveRequest,
    ) -> Result<ManagedDrive, ProviderError> {
        info!(drive_id = %uuid, name = %req.name, "Cloning drive");

        let response: ActionResponse<DriveResource> = self
            .post(&format!("/drives/{uuid}/action/?do=clone"), req)
            .await?;
        let drive = response
            .into_first()
            .map(Self::to_drive)
            .ok_or_else(|| ProviderError::Api {
                status: StatusCode::OK.as_u16(),
                message: "clone returned no drive".to_string(),
            })?;

        info!(drive_id = %drive.uuid, status = %drive.status, "Drive clone requested");
        Ok(drive)
    }

    async fn delete_drive(&self, uuid: &str) -> Result<(), ProviderError> {
        info!(drive_id = %uuid, "Deleting drive");
        self.delete(&format!("/drives/{uuid}/")).await
    }

    async fn capabilities(&self) -> Result<Capabilities, ProviderError> {
        self.get("/capabilities/").await
    }
}
