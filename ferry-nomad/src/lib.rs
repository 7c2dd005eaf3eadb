//! Ferry Nomad Client
//!
//! A small HTTP client for the Nomad job API. Configuration follows the
//! standard `NOMAD_*` environment variables so the runner picks up the same
//! agent address and ACL token as the `nomad` CLI.
//!
//! # Example
//!
//! ```no_run
//! use ferry_nomad::{NomadClient, NomadConfig};
//! use ferry_core::domain::job::Job;
//!
//! # async fn example(job: Job) -> ferry_nomad::Result<()> {
//! let client = NomadClient::new(NomadConfig::from_env())?;
//! let registration = client.register_job(&job).await?;
//! println!("evaluation {}", registration.eval_id);
//! # Ok(())
//! # }
//! ```

pub mod error;
mod jobs;

// Re-export commonly used types
pub use error::{NomadError, Result};
pub use ferry_core::dto::job::JobRegistration;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// Agent address used when `NOMAD_ADDR` is unset
pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:4646";

/// Header carrying the ACL token
pub const TOKEN_HEADER: &str = "X-Nomad-Token";

/// Connection settings for the Nomad API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NomadConfig {
    /// Agent address (e.g., "http://127.0.0.1:4646")
    pub address: String,
    /// ACL token
    pub token: Option<String>,
    /// Default region for requests
    pub region: Option<String>,
    /// Default namespace for requests
    pub namespace: Option<String>,
    /// Skip TLS certificate verification
    pub skip_verify: bool,
}

impl Default for NomadConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            token: None,
            region: None,
            namespace: None,
            skip_verify: false,
        }
    }
}

impl NomadConfig {
    /// Creates configuration from environment variables
    ///
    /// Recognised variables:
    /// - NOMAD_ADDR (default: http://127.0.0.1:4646)
    /// - NOMAD_TOKEN
    /// - NOMAD_REGION
    /// - NOMAD_NAMESPACE
    /// - NOMAD_SKIP_VERIFY
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self {
            address: non_empty("NOMAD_ADDR").unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            token: non_empty("NOMAD_TOKEN"),
            region: non_empty("NOMAD_REGION"),
            namespace: non_empty("NOMAD_NAMESPACE"),
            skip_verify: non_empty("NOMAD_SKIP_VERIFY")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true"))
                .unwrap_or(false),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.address.starts_with("http://") && !self.address.starts_with("https://") {
            return Err(NomadError::InvalidConfig(format!(
                "address must start with http:// or https://, got {:?}",
                self.address
            )));
        }
        Ok(())
    }
}

/// HTTP client for the Nomad API
#[derive(Debug, Clone)]
pub struct NomadClient {
    config: NomadConfig,
    client: Client,
}

impl NomadClient {
    /// Create a new Nomad client
    ///
    /// Fails when the address is malformed or the HTTP client cannot be built.
    pub fn new(mut config: NomadConfig) -> Result<Self> {
        config.validate()?;
        config.address = config.address.trim_end_matches('/').to_string();

        let client = Client::builder()
            .danger_accept_invalid_certs(config.skip_verify)
            .build()?;

        Ok(Self { config, client })
    }

    /// Get the agent address
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Attach the token header and default query parameters
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request;
        if let Some(token) = &self.config.token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(region) = &self.config.region {
            request = request.query(&[("region", region)]);
        }
        if let Some(namespace) = &self.config.namespace {
            request = request.query(&[("namespace", namespace)]);
        }
        request
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NomadError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| NomadError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
