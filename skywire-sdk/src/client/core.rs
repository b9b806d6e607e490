use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use skywire_common::constants::{DEFAULT_PLC_DIRECTORY, DEFAULT_SERVICE};
use url::Url;

use crate::errors::BuildError;

const DEFAULT_USER_AGENT: &str = concat!("skywire", "@", env!("CARGO_PKG_VERSION"),);

#[derive(Debug, Clone)]
#[must_use]
/// Configures an [`HttpClient`] before construction.
///
/// Customize timeouts, user-agent, and the services used for identity
/// resolution and unauthenticated calls. Most code obtains this via
/// [`HttpClient::builder()`].
///
/// # Defaults
/// - Service: [`DEFAULT_SERVICE`]
/// - DID directory: [`DEFAULT_PLC_DIRECTORY`]
/// - HTTPS well-known handle fallback: enabled
/// - HTTP request timeout: reqwest default (none) unless set via [`Self::request_timeout`]
/// - User-agent: `skywire@<crate-version>` plus any [`Self::user_agent_extra`]
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// # use skywire::HttpClient;
/// let client = HttpClient::builder()
///     .request_timeout(Duration::from_secs(10))
///     .user_agent_extra("mybot/0.1")
///     .build()?;
/// # Ok::<_, skywire::BuildError>(())
/// ```
pub struct HttpClientBuilder {
    http_request_timeout: Option<Duration>,

    /// Optional user-agent segment appended to the default UA.
    user_agent_extra: Option<String>,

    service: Option<Url>,
    plc_directory: Option<Url>,
    well_known_fallback: bool,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            http_request_timeout: None,
            user_agent_extra: None,
            service: None,
            plc_directory: None,
            well_known_fallback: true,
        }
    }
}

impl HttpClientBuilder {
    /// Set HTTP requests timeout.
    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.http_request_timeout = Some(timeout);

        self
    }

    /// Append an extra user-agent segment after the default `skywire@<version>`.
    pub fn user_agent_extra<S: Into<String>>(&mut self, extra: S) -> &mut Self {
        self.user_agent_extra = Some(extra.into());
        self
    }

    /// Primary service: first handle-resolution strategy and default XRPC host.
    pub fn service(&mut self, service: Url) -> &mut Self {
        self.service = Some(service);
        self
    }

    /// Directory queried for `did:plc` documents.
    pub fn plc_directory(&mut self, directory: Url) -> &mut Self {
        self.plc_directory = Some(directory);
        self
    }

    /// Enable or disable the `https://<handle>/.well-known/atproto-did` fallback.
    pub fn well_known_fallback(&mut self, enabled: bool) -> &mut Self {
        self.well_known_fallback = enabled;
        self
    }

    /// Build [`HttpClient`].
    pub fn build(&self) -> Result<HttpClient, BuildError> {
        let user_agent = match &self.user_agent_extra {
            Some(extra) if !extra.trim().is_empty() => {
                format!("{DEFAULT_USER_AGENT} {}", extra.trim())
            }
            _ => DEFAULT_USER_AGENT.to_string(),
        };

        let mut http_builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(timeout) = self.http_request_timeout {
            http_builder = http_builder.timeout(timeout);
        }

        let config = ClientConfig {
            service: self.service.clone().unwrap_or_else(default_service),
            plc_directory: self
                .plc_directory
                .clone()
                .unwrap_or_else(default_plc_directory),
            well_known_fallback: self.well_known_fallback,
        };

        Ok(HttpClient {
            http: http_builder.build()?,
            config: Arc::new(config),
        })
    }
}

/// Resolved configuration shared by every clone of an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Primary service URL.
    pub service: Url,
    /// `did:plc` directory URL.
    pub plc_directory: Url,
    /// Whether the HTTPS well-known handle fallback runs.
    pub well_known_fallback: bool,
}

/// Transport shared by the resolver, session manager and XRPC clients.
///
/// `HttpClient` is the low-level, stateless engine the higher-level actors are
/// built on. It owns a pooled reqwest client and the endpoint configuration.
/// It is **not** session aware: no authorization headers are attached here;
/// authenticated calls go through [`crate::SessionManager`].
///
/// Cloning is cheap; clones share the connection pool.
///
/// ```no_run
/// # use skywire::HttpClient;
/// let client = HttpClient::new()?;
/// # Ok::<_, skywire::BuildError>(())
/// ```
#[derive(Clone, Debug)]
pub struct HttpClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: Arc<ClientConfig>,
}

impl HttpClient {
    /// Creates a client with default endpoints.
    pub fn new() -> Result<HttpClient, BuildError> {
        Self::builder().build()
    }

    /// Returns a builder to edit settings before creating [`HttpClient`].
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    // === Getters ===

    /// Endpoint configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Primary service URL.
    pub fn service(&self) -> &Url {
        &self.config.service
    }
}

fn default_service() -> Url {
    Url::parse(DEFAULT_SERVICE).expect("default service URL is valid")
}

fn default_plc_directory() -> Url {
    Url::parse(DEFAULT_PLC_DIRECTORY).expect("default directory URL is valid")
}
