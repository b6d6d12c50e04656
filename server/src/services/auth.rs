//! Identity verification against the external auth collaborator.
//!
//! DESIGN
//! ======
//! The hub never owns authentication. At connect time it hands the opaque
//! identity token to a `TokenVerifier` and receives a resolved identity
//! (user + workspace scope) or a rejection. Production uses the HTTP
//! verifier against the suite's auth service; without `AUTH_URL` the hub
//! accepts development tokens of the form `<user-uuid>:<workspace>`.
//!
//! ERROR HANDLING
//! ==============
//! A rejected token and an unreachable auth service are distinct failures:
//! the first maps to `E_UNAUTHORIZED` (client must re-authenticate), the
//! second to an opaque `E_INTERNAL` that leaks no backend detail.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use wire::ErrorCode;

/// Identity resolved from a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    /// Workspace scope covering the rooms this connection may join.
    pub workspace: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("identity token rejected")]
    Rejected,
    #[error("identity service unavailable")]
    Unreachable(#[source] reqwest::Error),
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Rejected => wire::codes::UNAUTHORIZED,
            Self::Unreachable(_) => wire::codes::INTERNAL,
        }
    }
}

/// Validates identity tokens presented at connect time.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve a token to an identity.
    ///
    /// # Errors
    ///
    /// [`AuthError::Rejected`] for invalid/expired tokens or tokens whose
    /// workspace scope cannot be resolved; [`AuthError::Unreachable`] when
    /// the auth collaborator cannot be consulted.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

// =============================================================================
// HTTP VERIFIER
// =============================================================================

/// Verifier backed by the suite's identity service.
pub struct HttpTokenVerifier {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct VerifyResponse {
    user_id: Uuid,
    workspace: String,
}

impl HttpTokenVerifier {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self { http: reqwest::Client::new(), base_url }
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let response = self
            .http
            .post(format!("{}/verify", self.base_url))
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(AuthError::Unreachable)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::Rejected);
        }

        let body: VerifyResponse = response
            .error_for_status()
            .map_err(AuthError::Unreachable)?
            .json()
            .await
            .map_err(AuthError::Unreachable)?;

        if body.workspace.is_empty() {
            // A token without a resolvable workspace scope cannot join
            // anything; treat it as unauthorized rather than admitting a
            // connection that can never pass a scope check.
            return Err(AuthError::Rejected);
        }

        Ok(Identity { user_id: body.user_id, workspace: body.workspace })
    }
}

// =============================================================================
// DEV VERIFIER
// =============================================================================

/// Development/test verifier: tokens are `<user-uuid>:<workspace>`.
pub struct DevTokenVerifier;

#[async_trait]
impl TokenVerifier for DevTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let Some((user, workspace)) = token.split_once(':') else {
            return Err(AuthError::Rejected);
        };
        let user_id = user.parse().map_err(|_| AuthError::Rejected)?;
        if workspace.is_empty() {
            return Err(AuthError::Rejected);
        }
        Ok(Identity { user_id, workspace: workspace.to_owned() })
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
