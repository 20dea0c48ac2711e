//! Core coordinator client implementation.

use crate::error::{ClientError, Result};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A client for the HA coordinator's REST status surface.
///
/// # Example
///
/// ```no_run
/// use keel_client::Client;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new("http://10.0.0.4:8008")?
///     .with_basic_auth("patroni", "secret")
///     .with_timeout(Duration::from_secs(5))?;
///
/// let view = client.cluster_status().await?;
/// println!("leader: {:?}", view.leader());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    /// Base URL of the coordinator's REST API.
    base_url: String,
    /// HTTP client.
    http: HttpClient,
    /// Optional basic-auth credentials.
    credentials: Option<(String, String)>,
}

impl Client {
    /// Create a new coordinator client.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let http = HttpClient::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            base_url,
            http,
            credentials: None,
        })
    }

    /// Authenticate every request with HTTP basic auth.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set a custom timeout for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = HttpClient::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Build a full URL from a path.
    fn url(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    /// Execute a GET request.
    pub(crate) async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        tracing::trace!(%url, "querying coordinator");
        let request = self.with_auth(self.http.get(&url));

        request.send().await.map_err(ClientError::Http)
    }

    /// Handle a response and deserialize JSON.
    pub(crate) async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            return Ok(serde_json::from_str(&body)?);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|json| {
                json["error"]
                    .as_str()
                    .or_else(|| json["message"].as_str())
                    .map(str::to_string)
            })
            .unwrap_or(body);

        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
