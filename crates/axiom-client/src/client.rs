//! The client handle shared by every service.

use crate::config::{ClientBuilder, Config, TokenKind};
use crate::datasets::Datasets;
use crate::error::Error;
use crate::http::RetryPolicy;
use crate::users::Users;
use std::sync::Arc;
use std::time::Duration;

/// A client for the Axiom API.
///
/// Cloning is cheap and clones share the connection pool and configuration;
/// a `Client` is safe to use from many tasks at once.
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) inner: Arc<Inner>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) config: Config,
    pub(crate) http: reqwest::Client,
    pub(crate) retry: RetryPolicy,
    pub(crate) request_timeout: Option<Duration>,
}

impl Client {
    /// Creates a client configured from the environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no token is available, or if a
    /// personal token targets the cloud endpoint without an organization ID.
    pub fn new() -> Result<Self, Error> {
        ClientBuilder::new().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The configuration snapshot this client was built with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn datasets(&self) -> Datasets<'_> {
        Datasets::new(self)
    }

    pub fn users(&self) -> Users<'_> {
        Users::new(self)
    }

    /// Checks that the configured credentials are accepted by the server.
    ///
    /// API tokens cannot read the user endpoint, so for them this only
    /// confirms the client was configured.
    pub async fn validate_credentials(&self) -> Result<(), Error> {
        match self.config().token_kind() {
            TokenKind::Personal => self.users().current().await.map(|_| ()),
            TokenKind::Api => Ok(()),
        }
    }
}
