//! OIDC login types and protocol DTOs.

use crate::error::{OidcError, OidcResult};
use crate::resolver::RoleSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sso_identity_core::{LocalUser, SessionHandle};
use std::fmt;
use url::Url;

pub const CLAIM_SUBJECT: &str = "sub";
pub const CLAIM_EMAIL: &str = "email";
pub const CLAIM_PREFERRED_USERNAME: &str = "preferred_username";
pub const CLAIM_NAME: &str = "name";

/// Scheme and host (with optional port) of the request that reached us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOrigin {
    pub scheme: String,
    pub host: String,
}

impl RequestOrigin {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into(),
        }
    }

    /// Parse an origin such as `https://media.example.com:8096`.
    pub fn parse(origin: &str) -> Option<Self> {
        let url = Url::parse(origin.trim()).ok()?;
        let host = url.host_str()?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Some(Self::new(url.scheme(), host))
    }
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)
    }
}

/// Claims asserted by the identity provider, keyed by claim name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// First non-empty string value of a claim. Arrays yield their first non-empty string.
    pub fn first_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()),
            Value::Array(values) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .find(|s| !s.is_empty()),
            _ => None,
        }
    }

    /// Every string value of a claim, whether it was sent as a string or an array.
    pub fn strings(&self, name: &str) -> Vec<&str> {
        match self.0.get(name) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Add claims from `other` that are not already present.
    pub fn merge_missing(&mut self, other: Claims) {
        for (name, value) in other.0 {
            self.0.entry(name).or_insert(value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Claims {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Verified claims from one successful callback.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationOutcome {
    pub subject_id: Option<String>,
    pub claims: Claims,
}

impl AuthenticationOutcome {
    /// Fails with `NoIdentityClaim` unless the claims carry an email,
    /// preferred username or subject.
    pub fn from_claims(claims: Claims) -> OidcResult<Self> {
        let has_identity = [CLAIM_EMAIL, CLAIM_PREFERRED_USERNAME, CLAIM_SUBJECT]
            .iter()
            .any(|name| claims.first_str(name).is_some());
        if !has_identity {
            return Err(OidcError::NoIdentityClaim);
        }

        let subject_id = claims.first_str(CLAIM_SUBJECT).map(String::from);
        Ok(Self { subject_id, claims })
    }
}

/// Local identity derived from an [`AuthenticationOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub login_key: String,
    pub display_name: String,
    pub subject_id: Option<String>,
    pub email: Option<String>,
    pub roles: RoleSet,
    pub is_admin: bool,
    pub is_elevated: bool,
}

/// Where to send the browser to start the login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub url: String,
    pub state: String,
}

/// Result of a completed login, handed back to the host.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: LocalUser,
    pub identity: ResolvedIdentity,
    pub session: SessionHandle,
    pub redirect_to: String,
}

/// OpenID provider metadata from the discovery document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub end_session_endpoint: Option<String>,
    pub scopes_supported: Option<Vec<String>>,
    pub response_types_supported: Option<Vec<String>>,
    pub code_challenge_methods_supported: Option<Vec<String>>,
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,
}

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// OAuth2 error body (RFC 6749 section 5.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}
