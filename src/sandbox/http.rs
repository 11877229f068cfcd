//! Sandboxes provisioned by a remote REST service.
//!
//! Endpoints, relative to the configured base URL:
//! - `POST /sandboxes` creates a sandbox
//! - `GET /sandboxes/{id}` reconnects to a running sandbox
//! - `DELETE /sandboxes/{id}` kills it
//! - `POST /sandboxes/{id}/commands` runs a command
//! - `GET /sandboxes/{id}/files?path=...` lists a directory

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    CommandOutput, CreateOptions, FileInfo, Provisioner, Sandbox, SandboxError, SandboxRef,
};
use crate::config::HttpConfig;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxRequest<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    metadata: &'a HashMap<String, String>,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct SandboxResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
}

#[derive(Serialize)]
struct RunCommandRequest<'a> {
    cmd: &'a str,
}

/// Provisions sandboxes through an HTTP API.
pub struct HttpProvisioner {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpProvisioner {
    /// Builds a client for the configured service.
    pub fn new(config: &HttpConfig) -> Result<Self, SandboxError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SandboxError::unavailable(format!("Failed to build HTTP client: {e}")))?;
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            SandboxError::unavailable(format!("Invalid base URL {}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SandboxError::unavailable(format!(
                "Invalid base URL {}: cannot hold a path",
                config.base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            timeout: config.request_timeout(),
        })
    }

    fn handle(&self, sandbox_id: String) -> SandboxRef {
        Arc::new(HttpSandbox {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            timeout: self.timeout,
            id: sandbox_id,
        })
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create(
        &self,
        template_id: &str,
        options: &CreateOptions,
    ) -> Result<SandboxRef, SandboxError> {
        let body = CreateSandboxRequest {
            template_id,
            metadata: &options.metadata,
            timeout_ms: u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
        };

        debug!(template = %template_id, "Requesting sandbox");
        let response = self
            .client
            .post(endpoint(&self.base_url, &["sandboxes"]))
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        let response = expect_success(response, template_id)
            .await
            .map_err(|e| SandboxError::create_failed(template_id, e.to_string()))?;
        let created: SandboxResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::create_failed(template_id, e.to_string()))?;

        Ok(self.handle(created.sandbox_id))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxRef, SandboxError> {
        let response = self
            .client
            .get(endpoint(&self.base_url, &["sandboxes", sandbox_id]))
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        let response = expect_success(response, sandbox_id).await?;
        let found: SandboxResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::connect_failed(sandbox_id, e.to_string()))?;

        Ok(self.handle(found.sandbox_id))
    }
}

/// A sandbox owned by the remote service.
pub struct HttpSandbox {
    client: Client,
    base_url: Url,
    timeout: Duration,
    id: String,
}

impl HttpSandbox {
    fn url(&self, suffix: Option<&str>) -> Url {
        let mut segments = vec!["sandboxes", self.id.as_str()];
        segments.extend(suffix);
        endpoint(&self.base_url, &segments)
    }
}

#[async_trait]
impl Sandbox for HttpSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn kill(&self) -> Result<(), SandboxError> {
        let response = self
            .client
            .delete(self.url(None))
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;
        expect_success(response, &self.id).await?;
        Ok(())
    }

    async fn run_command(&self, cmd: &str) -> Result<CommandOutput, SandboxError> {
        let response = self
            .client
            .post(self.url(Some("commands")))
            .json(&RunCommandRequest { cmd })
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        expect_success(response, &self.id)
            .await?
            .json()
            .await
            .map_err(|e| SandboxError::command_failed(e.to_string()))
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>, SandboxError> {
        let response = self
            .client
            .get(self.url(Some("files")))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        expect_success(response, &self.id)
            .await?
            .json()
            .await
            .map_err(|e| SandboxError::command_failed(e.to_string()))
    }
}

/// Appends percent-encoded path segments to the service base URL.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    // Bases that cannot hold a path are rejected in `HttpProvisioner::new`
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> SandboxError {
    if err.is_timeout() {
        SandboxError::timeout(timeout)
    } else if err.is_connect() {
        SandboxError::unavailable(err.to_string())
    } else {
        SandboxError::request(err.to_string())
    }
}

/// Turns non-2xx responses into errors, keeping the body for diagnostics.
async fn expect_success(response: Response, subject: &str) -> Result<Response, SandboxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(SandboxError::not_found(subject));
    }

    let body = response.text().await.unwrap_or_default();
    Err(SandboxError::request(format!("{status}: {}", body.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_shape() {
        let options = CreateOptions::with_timeout(Duration::from_secs(600)).meta("pooled", "true");
        let body = CreateSandboxRequest {
            template_id: "nextjs-developer",
            metadata: &options.metadata,
            timeout_ms: 600_000,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["templateID"], "nextjs-developer");
        assert_eq!(json["timeoutMs"], 600_000);
        assert_eq!(json["metadata"]["pooled"], "true");
    }

    fn sandbox(base_url: &str, id: &str) -> HttpSandbox {
        let provisioner = HttpProvisioner::new(&HttpConfig {
            base_url: base_url.to_string(),
            request_timeout_secs: 5,
        })
        .unwrap();
        HttpSandbox {
            client: provisioner.client.clone(),
            base_url: provisioner.base_url.clone(),
            timeout: provisioner.timeout,
            id: id.to_string(),
        }
    }

    #[test]
    fn test_urls_with_and_without_trailing_slash() {
        for base in ["http://localhost:8080", "http://localhost:8080/"] {
            let sandbox = sandbox(base, "sbx-1");
            assert_eq!(
                sandbox.url(Some("files")).as_str(),
                "http://localhost:8080/sandboxes/sbx-1/files"
            );
            assert_eq!(sandbox.url(None).as_str(), "http://localhost:8080/sandboxes/sbx-1");
        }
    }

    #[test]
    fn test_base_url_path_prefix_is_kept() {
        let sandbox = sandbox("http://gateway.internal/api/v1/", "sbx-1");
        assert_eq!(
            sandbox.url(Some("commands")).as_str(),
            "http://gateway.internal/api/v1/sandboxes/sbx-1/commands"
        );
    }

    #[test]
    fn test_sandbox_id_is_one_encoded_segment() {
        let sandbox = sandbox("http://localhost:8080", "team/sbx?1#a");
        assert_eq!(
            sandbox.url(Some("files")).as_str(),
            "http://localhost:8080/sandboxes/team%2Fsbx%3F1%23a/files"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        for base in ["not a url", "mailto:ops@example.com"] {
            let result = HttpProvisioner::new(&HttpConfig {
                base_url: base.to_string(),
                request_timeout_secs: 5,
            });
            assert!(result.err().unwrap().to_string().contains("Invalid base URL"));
        }
    }
}
