//! Connection authentication.

use std::collections::HashMap;

use kingside_wire::Identity;

use crate::config::TokenEntry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,
}

/// Resolves a bearer credential to an identity.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Static token table loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl TokenAuthenticator {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|e| {
                (
                    e.token.clone(),
                    Identity::new(e.user_id.as_str(), e.display_name.as_str()),
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(token: &str, user_id: &str, name: &str) -> TokenEntry {
        TokenEntry {
            token: token.to_string(),
            user_id: user_id.to_string(),
            display_name: name.to_string(),
        }
    }

    #[test]
    fn test_known_token() {
        let auth = TokenAuthenticator::new(&[
            entry("t-1", "u-alice", "alice"),
            entry("t-2", "u-bob", "bob"),
        ]);
        assert_eq!(auth.len(), 2);
        assert_eq!(
            auth.authenticate("t-2").unwrap(),
            Identity::new("u-bob", "bob")
        );
    }

    #[test]
    fn test_unknown_or_empty_token() {
        let auth = TokenAuthenticator::new(&[entry("t-1", "u-alice", "alice")]);
        assert_eq!(auth.authenticate("nope"), Err(AuthError::Unauthenticated));
        assert_eq!(auth.authenticate(""), Err(AuthError::Unauthenticated));
    }
}
