//! Access token verification for voice connections.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::{AuthConfig, TokenGrant};
use crate::form::RegistrationForm;

/// Identity claims carried by a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Stable identifier; sessions are keyed by it.
    pub subject: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl AuthUser {
    /// Registration form pre-filled from the name and email claims.
    pub fn seeded_form(&self) -> RegistrationForm {
        RegistrationForm::seeded(self.name.as_deref(), self.email.as_deref())
    }
}

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    #[error("missing token")]
    Missing,
    #[error("invalid token")]
    Invalid,
}

/// Verifies the token presented when a connection opens.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: Option<&str>) -> Result<AuthUser, AuthRejection>;
}

/// Verifier over a fixed token list from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    grants: HashMap<String, AuthUser>,
}

impl StaticTokenVerifier {
    pub fn new(grants: impl IntoIterator<Item = TokenGrant>) -> Self {
        let grants = grants
            .into_iter()
            .map(|g| {
                (
                    g.token,
                    AuthUser {
                        subject: g.subject,
                        name: g.name,
                        email: g.email,
                    },
                )
            })
            .collect();
        Self { grants }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.tokens.iter().cloned())
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: Option<&str>) -> Result<AuthUser, AuthRejection> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthRejection::Missing)?;
        self.grants.get(token).cloned().ok_or(AuthRejection::Invalid)
    }
}
