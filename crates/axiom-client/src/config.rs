//! Client configuration: resolution from builder options and environment.
//!
//! Options are applied in call order, so a later `with_*` call overrides an
//! earlier one. Explicit options always win over the environment.
//!
//! Environment variables:
//! - `AXIOM_URL` overrides the base URL (default [`CLOUD_URL`])
//! - `AXIOM_TOKEN` supplies the token
//! - `AXIOM_ORG_ID` supplies the organization ID
//! - `AXIOM_EDGE_URL` sets an explicit edge endpoint
//! - `AXIOM_EDGE` sets an edge region, resolved to `https://<region>`

use crate::client::{Client, Inner};
use crate::error::Error;
use crate::http::RetryPolicy;
use reqwest::header::HeaderValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Production API endpoint.
pub const CLOUD_URL: &str = "https://api.axiom.co";

pub(crate) const ENV_URL: &str = "AXIOM_URL";
pub(crate) const ENV_TOKEN: &str = "AXIOM_TOKEN";
pub(crate) const ENV_ORG_ID: &str = "AXIOM_ORG_ID";
pub(crate) const ENV_EDGE_URL: &str = "AXIOM_EDGE_URL";
pub(crate) const ENV_EDGE: &str = "AXIOM_EDGE";

/// Dataset variable read by adapters such as the `axiom-ingest` binary.
pub const ENV_DATASET: &str = "AXIOM_DATASET";

const PERSONAL_TOKEN_PREFIX: &str = "xapt-";
const API_TOKEN_PREFIX: &str = "xaat-";

/// Token class, derived from the token prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A personal token (`xapt-`). Needs an organization ID on the cloud
    /// endpoint and may call every endpoint.
    Personal,
    /// An API token (`xaat-`), restricted to ingest and query. Tokens with an
    /// unknown prefix are treated as API tokens.
    Api,
}

impl TokenKind {
    pub fn of(token: &str) -> Self {
        if token.starts_with(PERSONAL_TOKEN_PREFIX) {
            Self::Personal
        } else {
            // Includes API_TOKEN_PREFIX and anything unrecognised.
            Self::Api
        }
    }
}

/// Returns `true` if `token` is a personal token.
pub fn is_personal_token(token: &str) -> bool {
    TokenKind::of(token) == TokenKind::Personal
}

/// Returns `true` if `token` is an API token.
pub fn is_api_token(token: &str) -> bool {
    token.starts_with(API_TOKEN_PREFIX)
}

/// Read-only configuration snapshot of a [`Client`].
#[derive(Clone)]
pub struct Config {
    base_url: Url,
    token: String,
    org_id: Option<String>,
    edge_url: Option<Url>,
    user_agent: String,
}

impl Config {
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_kind(&self) -> TokenKind {
        TokenKind::of(&self.token)
    }

    pub fn org_id(&self) -> Option<&str> {
        self.org_id.as_deref()
    }

    /// Edge endpoint used for ingest and tabular queries, if configured.
    pub fn edge_url(&self) -> Option<&Url> {
        self.edge_url.as_ref()
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Returns `true` if the base URL targets the production endpoint.
    pub fn is_cloud(&self) -> bool {
        is_cloud_url(&self.base_url)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"[REDACTED]")
            .field("org_id", &self.org_id)
            .field("edge_url", &self.edge_url.as_ref().map(Url::as_str))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

fn is_cloud_url(url: &Url) -> bool {
    url.host_str() == Url::parse(CLOUD_URL).ok().as_ref().and_then(Url::host_str)
}

fn edge_region_url(region: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("https://{region}"))
}

/// Edge endpoint choice. URL and region options overwrite each other, so the
/// last one set wins.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Edge {
    Url(String),
    Region(String),
}

impl Edge {
    fn resolve(&self) -> Result<Url, url::ParseError> {
        match self {
            Self::Url(url) => Url::parse(url),
            Self::Region(region) => edge_region_url(region),
        }
    }
}

/// Builder for a [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    url: Option<String>,
    token: Option<String>,
    org_id: Option<String>,
    edge: Option<Edge>,
    http_client: Option<reqwest::Client>,
    user_agent: Option<String>,
    no_env: bool,
    retry: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL of the API.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the personal or API token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the organization ID. Only relevant for personal tokens.
    #[must_use]
    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Use a preconfigured HTTP client instead of a default one.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Override the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Route ingest and tabular queries to an explicit edge endpoint.
    ///
    /// A URL with a path is used verbatim for ingest; a URL with only a host
    /// gets the canonical edge ingest path appended. Replaces an earlier
    /// [`ClientBuilder::with_edge_region`].
    #[must_use]
    pub fn with_edge_url(mut self, url: impl Into<String>) -> Self {
        self.edge = Some(Edge::Url(url.into()));
        self
    }

    /// Route ingest and tabular queries to the edge endpoint of a region,
    /// e.g. `eu-central-1.aws.edge.axiom.co`. Replaces an earlier
    /// [`ClientBuilder::with_edge_url`].
    #[must_use]
    pub fn with_edge_region(mut self, region: impl Into<String>) -> Self {
        self.edge = Some(Edge::Region(region.into()));
        self
    }

    /// Do not read configuration from the environment.
    #[must_use]
    pub fn no_env(mut self) -> Self {
        self.no_env = true;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound every call, including its retries, by `timeout`.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Resolves and validates the configuration and builds the client.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingToken` or `Error::MissingOrganizationId` if the
    /// credentials are incomplete, and `Error::InvalidUrl` if a URL does not
    /// parse.
    pub fn build(self) -> Result<Client, Error> {
        if self.no_env {
            self.build_with_env(|_| None)
        } else {
            self.build_with_env(|key| std::env::var(key).ok())
        }
    }

    pub(crate) fn build_with_env(
        self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Client, Error> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let base_url = self
            .url
            .or_else(|| env(ENV_URL))
            .unwrap_or_else(|| CLOUD_URL.to_string());
        let base_url = Url::parse(&base_url)?;

        let token = self
            .token
            .or_else(|| env(ENV_TOKEN))
            .ok_or(Error::MissingToken)?;
        if token.is_empty() {
            return Err(Error::MissingToken);
        }
        HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::InvalidHeader("authorization"))?;

        let org_id = self.org_id.or_else(|| env(ENV_ORG_ID)).filter(|o| !o.is_empty());
        if is_personal_token(&token) && org_id.is_none() && is_cloud_url(&base_url) {
            return Err(Error::MissingOrganizationId);
        }
        if let Some(org_id) = &org_id {
            HeaderValue::from_str(org_id).map_err(|_| Error::InvalidHeader("x-axiom-org-id"))?;
        }

        // In the environment an edge URL beats a region.
        let edge = self
            .edge
            .or_else(|| env(ENV_EDGE_URL).map(Edge::Url))
            .or_else(|| env(ENV_EDGE).map(Edge::Region));
        let edge_url = edge.as_ref().map(Edge::resolve).transpose()?;

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("axiom-rs/{}", env!("CARGO_PKG_VERSION")));
        HeaderValue::from_str(&user_agent).map_err(|_| Error::InvalidHeader("user-agent"))?;

        let http = match self.http_client {
            Some(http) => http,
            None => reqwest::Client::builder().build()?,
        };

        let config = Config {
            base_url,
            token,
            org_id,
            edge_url,
            user_agent,
        };
        tracing::debug!(?config, "resolved client configuration");

        Ok(Client {
            inner: Arc::new(Inner {
                config,
                http,
                retry: self.retry,
                request_timeout: self.request_timeout,
            }),
        })
    }
}
