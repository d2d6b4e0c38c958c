use super::{ConnectionMetadata, SessionResolver};
use crate::error::ResolveError;
use crate::types::Identity;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves `Authorization: Bearer <token>` against a fixed token table.
///
/// Meant for development setups and tests where no session service runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionResolver {
    tokens: HashMap<String, Identity>,
}

impl StaticSessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

impl FromIterator<(String, Identity)> for StaticSessionResolver {
    fn from_iter<I: IntoIterator<Item = (String, Identity)>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SessionResolver for StaticSessionResolver {
    async fn resolve(&self, metadata: &ConnectionMetadata) -> Result<Option<Identity>, ResolveError> {
        Ok(metadata
            .bearer_token()
            .and_then(|token| self.tokens.get(token))
            .cloned())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn test_token_lookup() {
        let ada = Identity {
            email: "ada@example.com".to_string(),
            name: "ada".to_string(),
            image: String::new(),
        };
        let resolver: StaticSessionResolver =
            vec![("tok-ada".to_string(), ada.clone())].into_iter().collect();
        let base = ConnectionMetadata::new(SocketAddr::from(([127, 0, 0, 1], 1)));

        let known = base.clone().with_header("Authorization", "Bearer tok-ada");
        let unknown = base.clone().with_header("Authorization", "Bearer nope");

        assert_eq!(resolver.resolve(&known).await.unwrap(), Some(ada));
        assert_eq!(resolver.resolve(&unknown).await.unwrap(), None);
        assert_eq!(resolver.resolve(&base).await.unwrap(), None);
    }
}
