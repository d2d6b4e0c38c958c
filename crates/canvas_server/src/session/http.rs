//! Session resolver backed by an HTTP session endpoint.

use super::{ConnectionMetadata, SessionResolver};
use crate::error::ResolveError;
use crate::types::Identity;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Headers that describe the client's WebSocket hop and must not be replayed.
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
    "transfer-encoding",
    "content-length",
    "proxy-authorization",
    "proxy-connection",
];

fn forwardable(name: &str) -> bool {
    !SKIPPED_HEADERS.contains(&name) && !name.starts_with("sec-websocket-")
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default)]
    user: Option<SessionUser>,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    email: Option<String>,
    name: Option<String>,
    image: Option<String>,
}

impl SessionUser {
    fn into_identity(self) -> Option<Identity> {
        Some(Identity {
            email: self.email?,
            name: self.name?,
            image: self.image?,
        })
    }
}

/// Forwards the client's handshake headers (cookies included) to a session
/// endpoint and reads `{"user": {"email", "name", "image"}}` back.
///
/// A `null` body, a missing `user` or any missing field means no session.
#[derive(Debug, Clone)]
pub struct HttpSessionResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSessionResolver {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SessionResolver for HttpSessionResolver {
    async fn resolve(&self, metadata: &ConnectionMetadata) -> Result<Option<Identity>, ResolveError> {
        let mut request = self.client.get(&self.endpoint);
        for (name, value) in metadata
            .headers
            .iter()
            .filter(|(name, _)| forwardable(name))
        {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status.as_u16()));
        }

        let body: Option<SessionBody> = response.json().await?;
        let identity = body
            .and_then(|body| body.user)
            .and_then(SessionUser::into_identity);
        debug!(
            "Session for {} resolved to {:?}",
            metadata.remote_addr,
            identity.as_ref().map(|identity| identity.email.as_str())
        );
        Ok(identity)
    }

    async fn probe(&self) -> Result<(), ResolveError> {
        let status = self.client.get(&self.endpoint).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ResolveError::Status(status.as_u16()))
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
