//! Identity resolution for new connections.
//!
//! A [`SessionResolver`] maps the handshake metadata of a connection to an
//! [`Identity`]. The resolver is usually backed by an external service that
//! may come up after the canvas server has started accepting connections, so
//! it is published through a [`ResolverSlot`]: connections wait on the slot
//! under a bounded [`ReadinessPolicy`] and fall back to anonymous viewing when
//! the resolver never shows up.

mod http;
mod static_tokens;

pub use http::HttpSessionResolver;
pub use static_tokens::StaticSessionResolver;

use crate::error::ResolveError;
use crate::types::Identity;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Handshake data captured when a WebSocket connection is accepted.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    pub remote_addr: SocketAddr,
    /// Request headers as sent by the client, names lowercased.
    pub headers: Vec<(String, String)>,
}

impl ConnectionMetadata {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            headers: Vec::new(),
        }
    }

    /// Adds a header; the name is stored lowercased.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
        self
    }

    /// First value of the header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Token of an `Authorization: Bearer <token>` header.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        scheme
            .eq_ignore_ascii_case("bearer")
            .then(|| token.trim())
            .filter(|token| !token.is_empty())
    }
}

/// Maps connection metadata to an identity.
#[async_trait]
pub trait SessionResolver: Send + Sync + 'static {
    /// `Ok(None)` means the client has no session and stays anonymous.
    async fn resolve(&self, metadata: &ConnectionMetadata) -> Result<Option<Identity>, ResolveError>;

    /// Checks that the resolver can serve requests.
    async fn probe(&self) -> Result<(), ResolveError> {
        Ok(())
    }

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Bounded wait for a resolver that is not installed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_attempts: 100,
        }
    }
}

type SharedResolver = Arc<dyn SessionResolver>;

/// Readiness cell through which the resolver becomes available.
///
/// Cloning the slot shares it; installing a resolver wakes every waiter.
#[derive(Clone)]
pub struct ResolverSlot {
    tx: Arc<watch::Sender<Option<SharedResolver>>>,
}

impl ResolverSlot {
    /// An empty slot; connections wait until something is installed.
    pub fn empty() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(None)),
        }
    }

    /// A slot that is ready from the start.
    pub fn ready(resolver: SharedResolver) -> Self {
        let slot = Self::empty();
        slot.install(resolver);
        slot
    }

    /// Publishes `resolver`, replacing any previous one.
    pub fn install(&self, resolver: SharedResolver) {
        info!("Session resolver '{}' installed", resolver.name());
        self.tx.send_replace(Some(resolver));
    }

    /// The installed resolver, if any.
    pub fn current(&self) -> Option<SharedResolver> {
        self.tx.borrow().clone()
    }

    /// Waits for a resolver under `policy`.
    ///
    /// Returns `None` once `max_attempts` polls went by without one.
    pub async fn wait_ready(&self, policy: &ReadinessPolicy) -> Option<SharedResolver> {
        let mut rx = self.tx.subscribe();
        let mut attempt = 0;
        loop {
            if let Some(resolver) = rx.borrow_and_update().clone() {
                return Some(resolver);
            }
            if attempt >= policy.max_attempts {
                warn!(
                    "Session resolver still unavailable after {} attempts, continuing anonymously",
                    attempt
                );
                return None;
            }
            if attempt == 0 {
                info!("Waiting for session resolver to become ready");
            }
            attempt += 1;
            debug!("Session resolver not ready (attempt {}/{})", attempt, policy.max_attempts);
            // Wakes early when a resolver is installed mid-wait.
            let _ = timeout(policy.poll_interval, rx.changed()).await;
        }
    }
}

impl Default for ResolverSlot {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResolverSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverSlot")
            .field("ready", &self.tx.borrow().is_some())
            .finish()
    }
}

/// Resolves the identity behind `metadata`, waiting for the resolver if needed.
///
/// Every failure degrades to anonymous (`None`).
pub async fn resolve_identity(
    slot: &ResolverSlot,
    policy: &ReadinessPolicy,
    metadata: &ConnectionMetadata,
) -> Option<Identity> {
    let resolver = slot.wait_ready(policy).await?;
    match resolver.resolve(metadata).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(
                "Session resolver '{}' failed for {}: {}",
                resolver.name(),
                metadata.remote_addr,
                e
            );
            None
        }
    }
}
