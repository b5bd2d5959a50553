//! Starts a login: state generation, authorization URL, pending login record.

use crate::client::{OidcClient, random_token};
use crate::config::OidcProviderConfig;
use crate::error::{OidcError, OidcResult};
use crate::state::{PendingLogin, StateStore};
use crate::types::{RedirectTarget, RequestOrigin};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bytes of OS randomness behind each state value
pub const STATE_BYTES: usize = 32;

pub struct FlowInitiator {
    client: Arc<dyn OidcClient>,
    states: Arc<dyn StateStore>,
    http_timeout: Duration,
}

impl FlowInitiator {
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

    /// Build the IdP redirect for a browser that reached us via `origin`.
    ///
    /// The pending login is stored only after the authorization URL was built,
    /// so a failed attempt leaves nothing behind.
    pub async fn begin(
        &self,
        config: &OidcProviderConfig,
        origin: &RequestOrigin,
    ) -> OidcResult<RedirectTarget> {
        let config = config.normalized();
        config.validate()?;

        let callback_url = config.callback_url(origin);
        let state = random_token(STATE_BYTES);

        let request = tokio::time::timeout(
            self.http_timeout,
            self.client.build_authorization_request(&config, &callback_url, &state),
        )
        .await
        .map_err(|_| {
            OidcError::ProviderUnreachable("timed out building the authorization request".into())
        })?
        .map_err(|e| {
            warn!("Failed to build authorization request: {}", e);
            OidcError::ProviderUnreachable(e.to_string())
        })?;

        self.states
            .put(PendingLogin::new(state.clone(), request.material))
            .await?;

        debug!("Stored pending login, callback url {}", callback_url);

        Ok(RedirectTarget {
            url: request.url,
            state,
        })
    }
}
