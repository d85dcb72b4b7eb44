use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who is calling, as resolved from a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("the token is invalid or not found in your request")]
    InvalidToken,
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// External identity collaborator. The engine only stamps ownership with
/// what this returns and never checks credentials itself.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Identity, IdentityError>;

    async fn lookup_by_email(&self, email: &str) -> Result<Option<Identity>, IdentityError>;

    async fn profile(&self, user_id: &str) -> Result<UserProfile, IdentityError>;
}

/// A user entry for [`StaticIdentityProvider`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticUser {
    pub token: String,
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// Fixed token table, for development setups and tests.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    by_token: HashMap<String, usize>,
    users: Vec<StaticUser>,
}

impl StaticIdentityProvider {
    pub fn new(users: Vec<StaticUser>) -> Self {
        let by_token = users
            .iter()
            .enumerate()
            .map(|(i, u)| (u.token.clone(), i))
            .collect();
        Self { by_token, users }
    }

    fn identity(user: &StaticUser) -> Identity {
        Identity {
            user_id: user.user_id.clone(),
            email: user.email.to_lowercase(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<Identity, IdentityError> {
        self.by_token
            .get(token)
            .map(|&i| Self::identity(&self.users[i]))
            .ok_or(IdentityError::InvalidToken)
    }

    async fn lookup_by_email(&self, email: &str) -> Result<Option<Identity>, IdentityError> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(Self::identity))
    }

    async fn profile(&self, user_id: &str) -> Result<UserProfile, IdentityError> {
        self.users
            .iter()
            .find(|u| u.user_id == user_id)
            .map(|u| UserProfile {
                first_name: u.first_name.clone(),
                last_name: u.last_name.clone(),
                email: u.email.clone(),
            })
            .ok_or_else(|| IdentityError::UnknownUser(user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticIdentityProvider {
        StaticIdentityProvider::new(vec![StaticUser {
            token: "t-1".into(),
            user_id: "u1".into(),
            email: "Alice@Example.org".into(),
            first_name: "Alice".into(),
            last_name: "Smith".into(),
        }])
    }

    #[tokio::test]
    async fn resolves_known_token() {
        let id = provider().resolve("t-1").await.unwrap();
        assert_eq!(id.user_id, "u1");
        assert_eq!(id.email, "alice@example.org");
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let err = provider().resolve("nope").await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken));
    }

    #[tokio::test]
    async fn lookup_by_email_ignores_case() {
        let found = provider().lookup_by_email("alice@example.org").await.unwrap();
        assert_eq!(found.map(|i| i.user_id), Some("u1".to_string()));
        assert!(provider().lookup_by_email("bob@example.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profile_of_unknown_user_fails() {
        let err = provider().profile("ghost").await.unwrap_err();
        assert!(matches!(err, IdentityError::UnknownUser(_)));
    }
}
