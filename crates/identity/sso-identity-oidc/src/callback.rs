//! Validates the IdP callback and exchanges the code for claims.

use crate::client::OidcClient;
use crate::config::OidcProviderConfig;
use crate::error::{OidcError, OidcResult};
use crate::state::StateStore;
use crate::types::{AuthenticationOutcome, RequestOrigin};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Parameters the IdP appends to the callback URL (or posts as a form).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a urlencoded query string or form body. A leading `?` is ignored
    /// and empty values count as absent.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_start_matches('?');
        let mut params = Self::default();

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "state" => &mut params.state,
                "code" => &mut params.code,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }

        params
    }
}

pub struct CallbackProcessor {
    client: Arc<dyn OidcClient>,
    states: Arc<dyn StateStore>,
    http_timeout: Duration,
}

impl CallbackProcessor {
    pub fn new(
        client: Arc<dyn OidcClient>,
        states: Arc<dyn StateStore>,
        http_timeout: Duration,
    ) -> Self {
        Self {
            client,
            states,
            http_timeout,
        }
    }

    /// Consume the callback's state and turn the code into an [`AuthenticationOutcome`].
    ///
    /// The state is consumed before anything else can fail, so each state
    /// value is usable for exactly one callback.
    pub async fn process(
        &self,
        config: &OidcProviderConfig,
        raw: &str,
        origin: &RequestOrigin,
    ) -> OidcResult<AuthenticationOutcome> {
        let params = CallbackParams::parse(raw);
        let state = params.state.as_deref().ok_or_else(|| {
            warn!("OIDC callback without state parameter");
            OidcError::MissingState
        })?;

        let pending = self.states.take_and_remove(state).await.map_err(|e| {
            warn!("OIDC callback with unknown or expired state: {}", e);
            match e {
                OidcError::StateNotFound => OidcError::InvalidOrExpiredState,
                other => other,
            }
        })?;

        let config = config.normalized();
        let callback_url = config.callback_url(origin);
        if callback_url != pending.material.redirect_uri {
            error!(
                "Callback URL mismatch: login started with {}, callback resolved to {}",
                pending.material.redirect_uri, callback_url
            );
            return Err(OidcError::NotConfigured(format!(
                "callback url {} does not match {}",
                callback_url, pending.material.redirect_uri
            )));
        }

        let claims = tokio::time::timeout(
            self.http_timeout,
            self.client.exchange_code(&config, &pending.material, &params),
        )
        .await
        .map_err(|_| OidcError::ProviderUnreachable("timed out exchanging the code".into()))?
        .map_err(|e| {
            let error = OidcError::from(e);
            if let OidcError::ProviderRejected { error: code, description } = &error {
                error!(
                    "Identity provider rejected the login: {} ({})",
                    code,
                    description.as_deref().unwrap_or("No description")
                );
            }
            error
        })?;

        AuthenticationOutcome::from_claims(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string() {
        let params = CallbackParams::parse("?state=abc&code=xyz%2B1&session_state=ignored");
        assert_eq!(params.state.as_deref(), Some("abc"));
        assert_eq!(params.code.as_deref(), Some("xyz+1"));
        assert!(params.error.is_none());
    }

    #[test]
    fn test_parse_error_response() {
        let params =
            CallbackParams::parse("error=access_denied&error_description=User+cancelled&state=s1");
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("User cancelled"));
        assert_eq!(params.state.as_deref(), Some("s1"));
    }

    #[test]
    fn test_parse_empty_values_are_absent() {
        let params = CallbackParams::parse("state=&code=abc");
        assert!(params.state.is_none());

        let params = CallbackParams::parse("");
        assert_eq!(params, CallbackParams::default());
    }

    #[test]
    fn test_parse_keeps_first_occurrence() {
        let params = CallbackParams::parse("state=first&state=second");
        assert_eq!(params.state.as_deref(), Some("first"));
    }
}
