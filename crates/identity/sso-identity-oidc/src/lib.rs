//! OpenID Connect login with CSRF state, PKCE and nonce validation.
//!
//! The flow is split into a state store, a flow initiator, a callback processor
//! and an identity resolver, composed by [`OidcLoginService`]. Talking to the
//! identity provider goes through the [`OidcClient`] trait; [`HttpOidcClient`]
//! is the reqwest based implementation. The local account store and session
//! layer belong to the host and are reached through the
//! `sso-identity-core` traits.

mod callback;
mod client;
mod config;
mod error;
mod initiator;
mod provider;
mod resolver;
mod routes;
mod service;
mod state;
mod types;


pub use callback::{CallbackParams, CallbackProcessor};
pub use client::{
    AuthorizationMaterial, AuthorizationRequest, ClientError, HttpOidcClient, OidcClient,
    PkceChallenge, random_token,
};
pub use config::{
    ConfigSource, DEFAULT_CALLBACK_PATH, DEFAULT_ROLE_CLAIM, OidcConfig, OidcProviderConfig,
    SharedConfig, StaticConfig,
};
pub use error::{OidcError, OidcResult};
pub use initiator::FlowInitiator;
pub use provider::{OidcAuthPayload, OidcIdentityProvider};
pub use resolver::{ADMIN_ROLE, ELEVATED_ROLE, RoleSet, resolve};
pub use routes::oidc_router;
pub use service::{AUTHENTICATION_PROVIDER_ID, OidcLoginService};
pub use state::{InMemoryStateStore, PendingLogin, StateStore};
pub use types::{
    AuthenticationOutcome, Claims, LoginOutcome, OAuthErrorResponse, ProviderMetadata,
    RedirectTarget, RequestOrigin, ResolvedIdentity, TokenResponse,
};

// Re-export common types for convenience
pub use sso_identity_core::{IdentityProvider, LocalUser, SessionHandle, VerifiedIdentity};
