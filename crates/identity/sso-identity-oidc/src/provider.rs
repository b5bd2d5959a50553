//! OIDC as an identity provider for the host's authentication registry.

use crate::error::OidcError;
use crate::service::OidcLoginService;
use crate::types::RequestOrigin;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sso_identity_core::{
    IdentityError, IdentityProvider, IdentityResult, LocalUser, VerifiedIdentity,
};
use tracing::error;

/// Payload accepted by [`OidcIdentityProvider::verify`]
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OidcAuthPayload {
    /// Complete the flow with the raw callback query
    Callback { query: String, origin: String },
    /// Direct username/password login, which this provider refuses
    Password { username: Option<String> },
}

/// Accounts created by the OIDC flow have no local password.
#[derive(Clone)]
pub struct OidcIdentityProvider {
    service: OidcLoginService,
}

impl OidcIdentityProvider {
    pub fn new(service: OidcLoginService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl IdentityProvider for OidcIdentityProvider {
    fn provider_id(&self) -> &str {
        "oidc"
    }

    async fn verify(&self, auth_payload: serde_json::Value) -> IdentityResult<VerifiedIdentity> {
        let payload: OidcAuthPayload =
            serde_json::from_value(auth_payload).map_err(|_| IdentityError::InvalidPayload)?;

        let (query, origin) = match payload {
            OidcAuthPayload::Callback { query, origin } => (query, origin),
            OidcAuthPayload::Password { username } => {
                error!(
                    "Password login attempted for {} on an OIDC account, use /begin instead",
                    username.as_deref().unwrap_or("unknown user")
                );
                return Err(IdentityError::UnsupportedMethod(
                    "OIDC accounts sign in through the identity provider".to_string(),
                ));
            }
        };

        let origin = RequestOrigin::parse(&origin).ok_or(IdentityError::InvalidPayload)?;

        let login = self
            .service
            .handle_callback(&query, &origin)
            .await
            .map_err(|e| match e {
                OidcError::Provisioning(inner) | OidcError::Session(inner) => inner,
                OidcError::UserNotProvisioned(key) => IdentityError::UserNotFound(key),
                other => IdentityError::ProviderError(other.to_string()),
            })?;

        let identity = login.identity;
        Ok(VerifiedIdentity {
            provider_id: self.provider_id().to_string(),
            subject: identity
                .subject_id
                .clone()
                .unwrap_or_else(|| identity.login_key.clone()),
            email: identity.email.clone(),
            display_name: Some(identity.display_name.clone()),
            metadata: Some(serde_json::json!({
                "login_key": identity.login_key,
                "roles": identity.roles,
                "is_admin": identity.is_admin,
                "is_elevated": identity.is_elevated,
                "user_id": login.user.id,
                "session_id": login.session.session_id,
            })),
        })
    }

    async fn change_password(&self, user: &LocalUser, _new_password: &str) -> IdentityResult<()> {
        error!(
            "Password change attempted for OIDC account {}",
            user.username
        );
        Err(IdentityError::UnsupportedMethod(
            "OIDC accounts have no local password".to_string(),
        ))
    }

    fn has_password(&self, _user: &LocalUser) -> bool {
        false
    }
}
