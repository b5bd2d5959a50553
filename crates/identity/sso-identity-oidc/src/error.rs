//! OIDC login error types.

use crate::client::ClientError;
use sso_identity_core::IdentityError;
use thiserror::Error;

pub type OidcResult<T> = Result<T, OidcError>;

/// Everything that can stop a login attempt.
///
/// `Display` carries full diagnostic detail and is meant for server logs only.
/// Use [`OidcError::public_message`] for anything shown to the end user.
#[derive(Debug, Error)]
pub enum OidcError {
    #[error("OIDC is not configured: {0}")]
    NotConfigured(String),

    #[error("Identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Callback is missing the state parameter")]
    MissingState,

    #[error("State is unknown, already used or expired")]
    InvalidOrExpiredState,

    #[error("Identity provider rejected the login: {error}: {}", .description.as_deref().unwrap_or("No description"))]
    ProviderRejected {
        error: String,
        description: Option<String>,
    },

    #[error("No email, preferred_username or sub claim in the identity provider response")]
    NoIdentityClaim,

    #[error("State already exists")]
    DuplicateState,

    #[error("State not found or expired")]
    StateNotFound,

    #[error("No local account for {0} and automatic user creation is disabled")]
    UserNotProvisioned(String),

    #[error("User provisioning failed: {0}")]
    Provisioning(#[source] IdentityError),

    #[error("Session could not be established: {0}")]
    Session(#[source] IdentityError),
}

impl OidcError {
    /// Stable machine readable code, safe to return to clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            OidcError::NotConfigured(_) => "not_configured",
            OidcError::ProviderUnreachable(_) => "provider_unreachable",
            OidcError::MissingState
            | OidcError::InvalidOrExpiredState
            | OidcError::StateNotFound => "invalid_state",
            OidcError::ProviderRejected { .. } => "provider_rejected",
            OidcError::NoIdentityClaim => "no_identity_claim",
            OidcError::UserNotProvisioned(_) => "user_not_provisioned",
            OidcError::DuplicateState | OidcError::Provisioning(_) | OidcError::Session(_) => {
                "login_failed"
            }
        }
    }

    /// Message that is safe to show to the end user. Never includes IdP details.
    pub fn public_message(&self) -> &'static str {
        match self {
            OidcError::NotConfigured(_) => "Single sign-on is not configured",
            OidcError::ProviderUnreachable(_) => {
                "Identity provider is unreachable, please try again"
            }
            OidcError::MissingState
            | OidcError::InvalidOrExpiredState
            | OidcError::StateNotFound => {
                "Login request is invalid or has expired, please start again"
            }
            OidcError::ProviderRejected { .. } => "Identity provider rejected the login",
            OidcError::NoIdentityClaim => "Identity provider did not return a usable identity",
            OidcError::UserNotProvisioned(_) => "No local account exists for this identity",
            OidcError::DuplicateState | OidcError::Provisioning(_) | OidcError::Session(_) => {
                "Login failed"
            }
        }
    }

    /// Whether restarting the flow from the beginning may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OidcError::ProviderUnreachable(_) | OidcError::DuplicateState
        )
    }
}

impl From<ClientError> for OidcError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Unreachable(reason) => OidcError::ProviderUnreachable(reason),
            ClientError::Rejected { error, description } => {
                OidcError::ProviderRejected { error, description }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_provider_details() {
        let error = OidcError::ProviderRejected {
            error: "invalid_grant".to_string(),
            description: Some("code expired at internal-node-7".to_string()),
        };

        assert!(error.to_string().contains("internal-node-7"));
        assert!(!error.public_message().contains("internal-node-7"));
        assert_eq!(error.error_code(), "provider_rejected");
    }

    #[test]
    fn test_rejected_display_without_description() {
        let error = OidcError::ProviderRejected {
            error: "access_denied".to_string(),
            description: None,
        };
        assert_eq!(
            error.to_string(),
            "Identity provider rejected the login: access_denied: No description"
        );
    }

    #[test]
    fn test_state_errors_share_public_code() {
        assert_eq!(OidcError::MissingState.error_code(), "invalid_state");
        assert_eq!(OidcError::InvalidOrExpiredState.error_code(), "invalid_state");
        assert!(!OidcError::InvalidOrExpiredState.is_retryable());
        assert!(OidcError::ProviderUnreachable("timeout".into()).is_retryable());
    }
}
