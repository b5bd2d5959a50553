//! Login orchestration: begin, callback, provisioning and session hand-off.

use crate::callback::CallbackProcessor;
use crate::client::OidcClient;
use crate::config::{ConfigSource, OidcConfig, OidcProviderConfig};
use crate::error::{OidcError, OidcResult};
use crate::initiator::FlowInitiator;
use crate::resolver::resolve;
use crate::state::StateStore;
use crate::types::{LoginOutcome, RedirectTarget, RequestOrigin, ResolvedIdentity};
use sso_identity_core::{IdentityError, LocalUser, SessionIssuer, UserStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Value stored in `LocalUser::authentication_provider_id` for accounts using this flow
pub const AUTHENTICATION_PROVIDER_ID: &str = "OIDC";

/// The two public login operations, wired to their collaborators.
#[derive(Clone)]
pub struct OidcLoginService {
    config: Arc<dyn ConfigSource>,
    initiator: Arc<FlowInitiator>,
    callback: Arc<CallbackProcessor>,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionIssuer>,
}

impl OidcLoginService {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        settings: &OidcConfig,
        client: Arc<dyn OidcClient>,
        states: Arc<dyn StateStore>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionIssuer>,
    ) -> Self {
        let initiator = FlowInitiator::new(client.clone(), states.clone(), settings.http_timeout());
        let callback = CallbackProcessor::new(client, states, settings.http_timeout());

        Self {
            config,
            initiator: Arc::new(initiator),
            callback: Arc::new(callback),
            users,
            sessions,
        }
    }

    async fn snapshot(&self) -> OidcProviderConfig {
        self.config.snapshot().await.normalized()
    }

    pub async fn begin_login(&self, origin: &RequestOrigin) -> OidcResult<RedirectTarget> {
        let config = self.snapshot().await;
        let target = self.initiator.begin(&config, origin).await?;
        info!("Started OIDC login against {}", config.authority);
        Ok(target)
    }

    /// Complete a login from the raw callback query (or `form_post` body).
    ///
    /// Nothing reaches the user store unless the callback was fully validated.
    pub async fn handle_callback(
        &self,
        raw: &str,
        origin: &RequestOrigin,
    ) -> OidcResult<LoginOutcome> {
        let config = self.snapshot().await;
        let outcome = self.callback.process(&config, raw, origin).await?;
        let identity = resolve(&outcome, &config.role_claim);

        let user = self.provision(&identity, config.auto_create_user).await?;
        let session = self
            .sessions
            .establish(&user)
            .await
            .map_err(OidcError::Session)?;

        info!(
            "OIDC login succeeded for {} (admin: {}, elevated: {})",
            identity.login_key, identity.is_admin, identity.is_elevated
        );

        Ok(LoginOutcome {
            user,
            identity,
            session,
            redirect_to: config.post_login_redirect,
        })
    }

    /// Find or create the local account and overwrite its elevation flags.
    async fn provision(
        &self,
        identity: &ResolvedIdentity,
        auto_create: bool,
    ) -> OidcResult<LocalUser> {
        let existing = self
            .users
            .find_by_key(&identity.login_key)
            .await
            .map_err(OidcError::Provisioning)?;

        let mut user = match existing {
            Some(user) => user,
            None if auto_create => {
                info!("Creating local user {} from OIDC login", identity.login_key);
                match self.users.create(&identity.login_key).await {
                    Ok(user) => user,
                    // A concurrent login created the account first
                    Err(IdentityError::UserAlreadyExists(_)) => {
                        debug!("User {} created concurrently", identity.login_key);
                        self.users
                            .find_by_key(&identity.login_key)
                            .await
                            .map_err(OidcError::Provisioning)?
                            .ok_or_else(|| {
                                OidcError::Provisioning(IdentityError::UserNotFound(
                                    identity.login_key.clone(),
                                ))
                            })?
                    }
                    Err(e) => return Err(OidcError::Provisioning(e)),
                }
            }
            None => {
                warn!(
                    "No local user {} and automatic creation is disabled",
                    identity.login_key
                );
                return Err(OidcError::UserNotProvisioned(identity.login_key.clone()));
            }
        };

        user.authentication_provider_id = Some(AUTHENTICATION_PROVIDER_ID.to_string());
        user.set_elevation(identity.is_admin, identity.is_elevated);
        user.touch();

        self.users
            .update(&user)
            .await
            .map_err(OidcError::Provisioning)?;

        Ok(user)
    }

    /// Post-logout target configured for the provider, if any
    pub async fn logout_uri(&self) -> Option<String> {
        self.snapshot().await.logout_uri
    }
}
