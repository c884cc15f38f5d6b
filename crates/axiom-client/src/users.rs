use crate::client::Client;
use crate::error::Error;
use crate::http::Body;
use crate::trace::traced;
use axiom_types::User;
use reqwest::Method;

/// User operations, borrowed from a [`Client`]. Requires a personal token.
#[derive(Debug, Clone, Copy)]
pub struct Users<'a> {
    client: &'a Client,
}

impl<'a> Users<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// The user the token belongs to.
    pub async fn current(&self) -> Result<User, Error> {
        traced(
            tracing::info_span!("users.current"),
            self.client.fetch(Method::GET, "/v2/user", Body::Empty),
        )
        .await
    }
}
