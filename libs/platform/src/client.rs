//! Platform interface and HTTP client.
//!
//! The HTTP client speaks the platform's JSON API:
//! - `GET    /v1/pools/{pool}/instances`   list pool instances
//! - `POST   /v1/pools/{pool}/instances`   create from a source tarball
//! - `GET    /v1/instances/{id}`           fetch one instance
//! - `PATCH  /v1/instances/{id}/formation` scale
//! - `DELETE /v1/instances/{id}`           delete

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use warmpool_reconcile::TemplateVersion;

use crate::bundle::TemplateBundle;
use crate::error::PlatformError;
use crate::instance::{Instance, InstanceId};

/// Operations the pool needs from the hosting platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// List every instance carrying the given pool label.
    async fn list_instances(&self, pool: &str) -> Result<Vec<Instance>, PlatformError>;

    /// Fetch one instance.
    async fn get_instance(&self, id: &InstanceId) -> Result<Instance, PlatformError>;

    /// Create a new instance in `pool` built from `bundle`.
    async fn create_instance(
        &self,
        pool: &str,
        bundle: &TemplateBundle,
    ) -> Result<Instance, PlatformError>;

    /// Set the number of serving processes for an instance.
    async fn scale_instance(&self, id: &InstanceId, size: u32) -> Result<(), PlatformError>;

    /// Delete an instance.
    async fn delete_instance(&self, id: &InstanceId) -> Result<(), PlatformError>;
}

/// Platform client over the JSON HTTP API.
#[derive(Clone)]
pub struct HttpPlatform {
    client: reqwest::Client,
    base_url: Url,
}

impl std::fmt::Debug for HttpPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPlatform")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpPlatform {
    /// Create a client authenticating with a bearer token.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, PlatformError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PlatformError::Internal(format!("invalid base URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(PlatformError::Internal(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| PlatformError::Internal("invalid API key format".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Build a URL for an endpoint from path segments.
    ///
    /// Each segment is percent-encoded, so a pool name or instance id can
    /// never change which endpoint is hit.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Map a non-success response to an error.
    async fn error_from(response: reqwest::Response) -> PlatformError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Unauthorized {
                status: status.as_u16(),
            },
            _ => PlatformError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn list_instances(&self, pool: &str) -> Result<Vec<Instance>, PlatformError> {
        let url = self.url(&["v1", "pools", pool, "instances"]);
        debug!(url = %url, "Listing pool instances");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body: ListInstancesResponse = response.json().await?;
        debug!(count = body.instances.len(), "Listed pool instances");
        Ok(body.instances)
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<Instance, PlatformError> {
        let url = self.url(&["v1", "instances", id.as_str()]);

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(response.json().await?)
    }

    async fn create_instance(
        &self,
        pool: &str,
        bundle: &TemplateBundle,
    ) -> Result<Instance, PlatformError> {
        let archive = {
            let bundle = bundle.clone();
            tokio::task::spawn_blocking(move || bundle.archive())
                .await
                .map_err(|e| PlatformError::Internal(format!("bundle task failed: {e}")))??
        };

        let url = self.url(&["v1", "pools", pool, "instances"]);
        debug!(
            url = %url,
            template_version = %bundle.version(),
            archive_bytes = archive.len(),
            "Creating pool instance"
        );

        let request = CreateInstanceRequest {
            template_version: bundle.version(),
            source_tgz_base64: base64::engine::general_purpose::STANDARD.encode(&archive),
        };

        let response = self.client.post(url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(response.json().await?)
    }

    async fn scale_instance(&self, id: &InstanceId, size: u32) -> Result<(), PlatformError> {
        let url = self.url(&["v1", "instances", id.as_str(), "formation"]);
        debug!(instance_id = %id, size, "Scaling instance");

        let response = self
            .client
            .patch(url)
            .json(&ScaleRequest { quantity: size })
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(())
    }

    async fn delete_instance(&self, id: &InstanceId) -> Result<(), PlatformError> {
        let url = self.url(&["v1", "instances", id.as_str()]);

        let response = self.client.delete(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!(instance_id = %id, "Instance already gone");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(())
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ListInstancesResponse {
    instances: Vec<Instance>,
}

#[derive(Debug, Serialize)]
struct CreateInstanceRequest<'a> {
    template_version: &'a TemplateVersion,
    source_tgz_base64: String,
}

#[derive(Debug, Serialize)]
struct ScaleRequest {
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = HttpPlatform::new("https://api.example.test/", "secret").unwrap();
        assert_eq!(
            client.url(&["v1", "instances", "inst-1"]).as_str(),
            "https://api.example.test/v1/instances/inst-1"
        );
    }

    #[test]
    fn test_url_keeps_base_path() {
        let client = HttpPlatform::new("https://api.example.test/platform/", "secret").unwrap();
        assert_eq!(
            client.url(&["v1", "pools", "editor", "instances"]).as_str(),
            "https://api.example.test/platform/v1/pools/editor/instances"
        );
    }

    #[test]
    fn test_url_encodes_segments() {
        let client = HttpPlatform::new("https://api.example.test", "secret").unwrap();
        assert_eq!(
            client.url(&["v1", "pools", "a/b?c#d", "instances"]).as_str(),
            "https://api.example.test/v1/pools/a%2Fb%3Fc%23d/instances"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = HttpPlatform::new("not a url", "secret").unwrap_err();
        assert!(matches!(err, PlatformError::Internal(_)));
        let err = HttpPlatform::new("mailto:ops@example.test", "secret").unwrap_err();
        assert!(matches!(err, PlatformError::Internal(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = HttpPlatform::new("https://api.example.test", "super-secret-key").unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("api.example.test"));
        assert!(!debug.contains("super-secret-key"));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let err = HttpPlatform::new("https://api.example.test", "bad\nkey").unwrap_err();
        assert!(matches!(err, PlatformError::Internal(_)));
    }
}
