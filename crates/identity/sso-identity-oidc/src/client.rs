//! OIDC client: discovery, authorization URLs, code exchange and ID token validation.

use crate::callback::CallbackParams;
use crate::config::OidcProviderConfig;
use crate::types::{Claims, OAuthErrorResponse, ProviderMetadata, TokenResponse, CLAIM_SUBJECT};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use rand::{RngCore, rngs::OsRng};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
const METADATA_MAX_AGE: Duration = Duration::from_secs(3600);

/// Failure reported by an [`OidcClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The provider could not be reached or answered with a server error
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The provider, or validation of its response, refused the login
    #[error("{error}: {}", .description.as_deref().unwrap_or("No description"))]
    Rejected {
        error: String,
        description: Option<String>,
    },
}

impl ClientError {
    pub fn rejected(error: impl Into<String>, description: impl Into<String>) -> Self {
        ClientError::Rejected {
            error: error.into(),
            description: Some(description.into()),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        ClientError::Unreachable(error.to_string())
    }
}

/// Material that has to survive the browser round trip to validate the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationMaterial {
    pub nonce: String,
    pub code_verifier: Option<String>,
    /// Callback URL sent in the authorization request
    pub redirect_uri: String,
}

/// A ready-to-use authorization request
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub material: AuthorizationMaterial,
}

/// The wire protocol side of the login: everything that talks to the identity provider.
#[async_trait]
pub trait OidcClient: Send + Sync {
    async fn build_authorization_request(
        &self,
        config: &OidcProviderConfig,
        callback_url: &str,
        state: &str,
    ) -> Result<AuthorizationRequest, ClientError>;

    /// Exchange the authorization code and return the verified claims.
    async fn exchange_code(
        &self,
        config: &OidcProviderConfig,
        material: &AuthorizationMaterial,
        callback: &CallbackParams,
    ) -> Result<Claims, ClientError>;
}

/// URL-safe random token from the operating system RNG
pub fn random_token(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE code challenge and verifier
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceChallenge {
    /// Generate a new PKCE challenge
    pub fn new() -> Self {
        let code_verifier = random_token(64);
        let code_challenge = Self::generate_code_challenge(&code_verifier);

        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: "S256".to_string(),
        }
    }

    fn generate_code_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let result = hasher.finalize();
        URL_SAFE_NO_PAD.encode(result)
    }
}

struct CachedMetadata {
    metadata: ProviderMetadata,
    fetched_at: Instant,
}

/// [`OidcClient`] speaking to a real provider over HTTP
pub struct HttpOidcClient {
    http_client: Client,
    metadata: RwLock<HashMap<String, CachedMetadata>>,
    jwks: RwLock<HashMap<String, JwkSet>>,
}

impl HttpOidcClient {
    pub fn new(http_timeout: Duration) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| ClientError::Unreachable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            metadata: RwLock::new(HashMap::new()),
            jwks: RwLock::new(HashMap::new()),
        })
    }

    /// Fetch (or reuse) the provider's discovery document
    pub async fn discover(&self, authority: &str) -> Result<ProviderMetadata, ClientError> {
        let authority = authority.trim_end_matches('/');

        {
            let cache = self.metadata.read().await;
            if let Some(cached) = cache.get(authority) {
                if cached.fetched_at.elapsed() < METADATA_MAX_AGE {
                    return Ok(cached.metadata.clone());
                }
            }
        }

        let discovery_url = format!("{}{}", authority, DISCOVERY_PATH);
        debug!("Fetching OIDC discovery document from {}", discovery_url);

        let response = self.http_client.get(&discovery_url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Unreachable(format!(
                "discovery document returned HTTP {}",
                response.status()
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| ClientError::Unreachable(format!("invalid discovery document: {}", e)))?;

        let mut cache = self.metadata.write().await;
        cache.insert(
            authority.to_string(),
            CachedMetadata {
                metadata: metadata.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(metadata)
    }

    async fn key_set(&self, jwks_uri: &str, refresh: bool) -> Result<JwkSet, ClientError> {
        if !refresh {
            let cache = self.jwks.read().await;
            if let Some(keys) = cache.get(jwks_uri) {
                return Ok(keys.clone());
            }
        }

        debug!("Fetching JWKS from {}", jwks_uri);
        let response = self.http_client.get(jwks_uri).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Unreachable(format!(
                "JWKS endpoint returned HTTP {}",
                response.status()
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| ClientError::Unreachable(format!("invalid JWKS document: {}", e)))?;

        let mut cache = self.jwks.write().await;
        cache.insert(jwks_uri.to_string(), keys.clone());
        Ok(keys)
    }

    async fn decoding_key(
        &self,
        config: &OidcProviderConfig,
        metadata: &ProviderMetadata,
        algorithm: Algorithm,
        kid: Option<&str>,
    ) -> Result<DecodingKey, ClientError> {
        if matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Ok(DecodingKey::from_secret(config.client_secret.as_bytes()));
        }

        let jwks_uri = metadata.jwks_uri.as_deref().ok_or_else(|| {
            ClientError::rejected("invalid_id_token", "provider does not publish a jwks_uri")
        })?;

        for refresh in [false, true] {
            let keys = self.key_set(jwks_uri, refresh).await?;
            let jwk = match kid {
                Some(kid) => keys.find(kid).cloned(),
                None if keys.keys.len() == 1 => keys.keys.first().cloned(),
                None => None,
            };
            if let Some(jwk) = jwk {
                return DecodingKey::from_jwk(&jwk).map_err(|e| {
                    ClientError::rejected("invalid_id_token", format!("invalid jwk: {}", e))
                });
            }
        }

        Err(ClientError::rejected(
            "invalid_id_token",
            "no matching key found for token kid",
        ))
    }

    async fn validate_id_token(
        &self,
        config: &OidcProviderConfig,
        metadata: &ProviderMetadata,
        id_token: &str,
        expected_nonce: &str,
    ) -> Result<Claims, ClientError> {
        let header = decode_header(id_token)
            .map_err(|e| ClientError::rejected("invalid_id_token", e.to_string()))?;

        let key = self
            .decoding_key(config, metadata, header.alg, header.kid.as_deref())
            .await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[metadata.issuer.as_str()]);
        validation.set_audience(&[config.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let token = decode::<Claims>(id_token, &key, &validation)
            .map_err(|e| ClientError::rejected("invalid_id_token", e.to_string()))?;
        let claims = token.claims;

        match claims.first_str("nonce") {
            Some(nonce) if nonce == expected_nonce => {}
            Some(_) => return Err(ClientError::rejected("invalid_id_token", "nonce mismatch")),
            None => return Err(ClientError::rejected("invalid_id_token", "nonce claim missing")),
        }

        Ok(claims)
    }

    async fn user_info(&self, endpoint: &str, access_token: &str) -> Result<Claims, ClientError> {
        let response = self
            .http_client
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ClientError::Unreachable(format!(
                "userinfo endpoint returned HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::rejected(
                "userinfo_failed",
                format!("HTTP {}: {}", status, body),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::rejected("invalid_userinfo", e.to_string()))
    }
}

#[async_trait]
impl OidcClient for HttpOidcClient {
    async fn build_authorization_request(
        &self,
        config: &OidcProviderConfig,
        callback_url: &str,
        state: &str,
    ) -> Result<AuthorizationRequest, ClientError> {
        let metadata = self.discover(&config.authority).await?;
        let mut url = Url::parse(&metadata.authorization_endpoint).map_err(|e| {
            ClientError::Unreachable(format!("invalid authorization endpoint: {}", e))
        })?;

        let nonce = random_token(32);
        let pkce = if config.use_pkce {
            Some(PkceChallenge::new())
        } else {
            None
        };

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &config.client_id);
            params.append_pair("redirect_uri", callback_url);
            params.append_pair("scope", &config.scope());
            params.append_pair("state", state);
            params.append_pair("nonce", &nonce);

            if let Some(pkce) = &pkce {
                params.append_pair("code_challenge", &pkce.code_challenge);
                params.append_pair("code_challenge_method", &pkce.code_challenge_method);
            }
        }

        Ok(AuthorizationRequest {
            url: url.to_string(),
            material: AuthorizationMaterial {
                nonce,
                code_verifier: pkce.map(|p| p.code_verifier),
                redirect_uri: callback_url.to_string(),
            },
        })
    }

    async fn exchange_code(
        &self,
        config: &OidcProviderConfig,
        material: &AuthorizationMaterial,
        callback: &CallbackParams,
    ) -> Result<Claims, ClientError> {
        if let Some(error) = &callback.error {
            return Err(ClientError::Rejected {
                error: error.clone(),
                description: callback.error_description.clone(),
            });
        }

        let code = callback
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ClientError::rejected(
                    "invalid_request",
                    "callback is missing the authorization code",
                )
            })?;

        let metadata = self.discover(&config.authority).await?;

        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("client_id", config.client_id.as_str());
        params.insert("client_secret", config.client_secret.as_str());
        params.insert("redirect_uri", material.redirect_uri.as_str());

        if let Some(verifier) = &material.code_verifier {
            params.insert("code_verifier", verifier.as_str());
        }

        let response = self
            .http_client
            .post(&metadata.token_endpoint)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(ClientError::Unreachable(format!(
                    "token endpoint returned HTTP {}",
                    status
                )));
            }
            return Err(match serde_json::from_str::<OAuthErrorResponse>(&body) {
                Ok(oauth_error) => ClientError::Rejected {
                    error: oauth_error.error,
                    description: oauth_error.error_description,
                },
                Err(_) => ClientError::rejected(
                    "token_exchange_failed",
                    format!("HTTP {}: {}", status, body),
                ),
            });
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::rejected("invalid_token_response", e.to_string()))?;

        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            ClientError::rejected("invalid_token_response", "token response has no id_token")
        })?;

        let mut claims = self
            .validate_id_token(config, &metadata, id_token, &material.nonce)
            .await?;

        if config.load_user_info {
            if let Some(endpoint) = &metadata.userinfo_endpoint {
                let user_info = self.user_info(endpoint, &tokens.access_token).await?;
                let token_subject = claims.first_str(CLAIM_SUBJECT);
                let info_subject = user_info.first_str(CLAIM_SUBJECT);
                if info_subject.is_some() && info_subject != token_subject {
                    warn!("Userinfo subject does not match the ID token subject");
                    return Err(ClientError::rejected(
                        "invalid_userinfo",
                        "userinfo subject does not match the ID token",
                    ));
                }
                claims.merge_missing(user_info);
            }
        }

        debug!("Exchanged authorization code, {} claims", claims.len());
        Ok(claims)
    }
}
