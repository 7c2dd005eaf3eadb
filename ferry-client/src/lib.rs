//! Ferry Coordination Client
//!
//! HTTP client for the Drone RPC protocol spoken by the coordination server.
//! Only the calls a scheduling runner needs are implemented: requesting the
//! next pending stage and accepting it.
//!
//! # Example
//!
//! ```no_run
//! use ferry_client::CoordinatorClient;
//! use ferry_core::dto::stage::Filter;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ferry_client::ClientError> {
//!     let client = CoordinatorClient::new("http://localhost:8080", "secret");
//!
//!     if let Some(mut stage) = client.request(&Filter::docker_pipeline()).await? {
//!         stage.machine = "runner-1".to_string();
//!         client.accept(&mut stage).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod stages;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::trace;

/// Header carrying the shared RPC secret
pub const TOKEN_HEADER: &str = "X-Drone-Token";

/// HTTP client for the coordination server
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    /// Base URL of the server (e.g., "http://localhost:8080")
    base_url: String,
    /// Shared secret sent with every request
    secret: String,
    /// HTTP client instance
    client: Client,
    /// Request/response dumping
    dump: Dump,
}

/// Controls tracing of raw HTTP exchanges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dump {
    #[default]
    Off,
    Headers,
    Bodies,
}

impl CoordinatorClient {
    /// Create a new coordination client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the server (e.g., "http://localhost:8080")
    /// * `secret` - The shared RPC secret
    ///
    /// # Example
    /// ```
    /// use ferry_client::CoordinatorClient;
    ///
    /// let client = CoordinatorClient::new("http://localhost:8080", "secret");
    /// ```
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::with_client(base_url, secret, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        secret: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.into(),
            client,
            dump: Dump::Off,
        }
    }

    /// Create a client that optionally skips TLS certificate verification
    pub fn with_skip_verify(
        base_url: impl Into<String>,
        secret: impl Into<String>,
        skip_verify: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(skip_verify)
            .build()?;
        Ok(Self::with_client(base_url, secret, client))
    }

    /// Enable tracing of raw HTTP exchanges
    pub fn with_dump(mut self, dump: Dump) -> Self {
        self.dump = dump;
        self
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Read the body of a response, failing on a non-success status
    async fn read_body(&self, response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let url = response.url().to_string();
        let text = response.text().await?;

        match self.dump {
            Dump::Off => {}
            Dump::Headers => trace!(%url, status = status.as_u16(), "http response"),
            Dump::Bodies => trace!(%url, status = status.as_u16(), body = %text, "http response"),
        }

        if !status.is_success() {
            let message = if text.is_empty() {
                "Unknown error".to_string()
            } else {
                text
            };
            return Err(ClientError::api_error(status.as_u16(), message));
        }

        Ok(text)
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let text = self.read_body(response).await?;
        serde_json::from_str(&text)
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    fn dump_request(&self, method: &str, url: &str, body: Option<&str>) {
        match (self.dump, body) {
            (Dump::Off, _) => {}
            (Dump::Bodies, Some(body)) => trace!(%method, %url, %body, "http request"),
            _ => trace!(%method, %url, "http request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = CoordinatorClient::new("http://localhost:8080", "secret");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.dump, Dump::Off);
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = CoordinatorClient::new("http://localhost:8080/", "secret");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_skip_verify() {
        let client =
            CoordinatorClient::with_skip_verify("https://drone.example.com", "secret", true)
                .unwrap()
                .with_dump(Dump::Bodies);
        assert_eq!(client.base_url(), "https://drone.example.com");
        assert_eq!(client.dump, Dump::Bodies);
    }
}
