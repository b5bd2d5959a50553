//! Maps verified claims to a local identity and its role flags.

use crate::types::{
    AuthenticationOutcome, CLAIM_EMAIL, CLAIM_NAME, CLAIM_PREFERRED_USERNAME, CLAIM_SUBJECT,
    Claims, ResolvedIdentity,
};
use serde::{Deserialize, Serialize};

pub const ADMIN_ROLE: &str = "admin";
pub const ELEVATED_ROLE: &str = "power user";

/// Ordered set of role names, unique ignoring case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(Vec<String>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roles carried by `claim_name`. Missing or non-string claims give an empty set.
    pub fn from_claim(claims: &Claims, claim_name: &str) -> Self {
        let mut roles = Self::new();
        for value in claims.strings(claim_name) {
            roles.extend_from_value(value);
        }
        roles
    }

    /// Split a raw claim value on commas. Multi-word segments are kept whole
    /// and also contribute each of their words.
    pub fn extend_from_value(&mut self, value: &str) {
        for segment in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            self.insert(segment);
            if segment.contains(char::is_whitespace) {
                for word in segment.split_whitespace() {
                    self.insert(word);
                }
            }
        }
    }

    /// Returns false if the role was already present.
    pub fn insert(&mut self, role: &str) -> bool {
        if self.contains(role) {
            return false;
        }
        self.0.push(role.to_string());
        true
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Derive the local identity for a login. Pure, so it may be called any number of times.
pub fn resolve(outcome: &AuthenticationOutcome, role_claim: &str) -> ResolvedIdentity {
    let claims = &outcome.claims;

    let login_key = [CLAIM_EMAIL, CLAIM_PREFERRED_USERNAME, CLAIM_SUBJECT]
        .iter()
        .find_map(|name| claims.first_str(name))
        .or(outcome.subject_id.as_deref())
        .unwrap_or_default()
        .to_string();

    let display_name = claims
        .first_str(CLAIM_NAME)
        .map(String::from)
        .unwrap_or_else(|| login_key.clone());

    let roles = RoleSet::from_claim(claims, role_claim);
    let is_admin = roles.contains(ADMIN_ROLE);
    let is_elevated = roles.contains(ELEVATED_ROLE) && !is_admin;

    ResolvedIdentity {
        login_key,
        display_name,
        subject_id: outcome.subject_id.clone(),
        email: claims.first_str(CLAIM_EMAIL).map(String::from),
        roles,
        is_admin,
        is_elevated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn outcome(value: Value) -> AuthenticationOutcome {
        AuthenticationOutcome::from_claims(serde_json::from_value(value).unwrap()).unwrap()
    }

    #[test]
    fn test_admin_takes_precedence_over_power_user() {
        let identity = resolve(
            &outcome(json!({ "sub": "1", "groups": "admin, Power User" })),
            "groups",
        );
        assert!(identity.is_admin);
        assert!(!identity.is_elevated);
    }

    #[test]
    fn test_power_user_is_elevated() {
        let claims = json!({ "sub": "1", "groups": "Power User" });
        let identity = resolve(&outcome(claims), "groups");
        assert!(!identity.is_admin);
        assert!(identity.is_elevated);
    }

    #[test]
    fn test_missing_role_claim_grants_nothing() {
        let identity = resolve(&outcome(json!({ "sub": "1" })), "groups");
        assert!(identity.roles.is_empty());
        assert!(!identity.is_admin);
        assert!(!identity.is_elevated);
    }

    #[test]
    fn test_space_separated_roles() {
        let identity = resolve(
            &outcome(json!({ "sub": "1", "roles": "viewer ADMIN" })),
            "roles",
        );
        assert!(identity.is_admin);
        assert!(identity.roles.contains("viewer"));
    }

    #[test]
    fn test_array_claim_and_dedup() {
        let identity = resolve(
            &outcome(json!({ "sub": "1", "groups": ["dev", "Dev, ops", 7, "power user"] })),
            "groups",
        );
        let roles: Vec<&str> = identity.roles.iter().collect();
        assert_eq!(roles, vec!["dev", "ops", "power user", "power", "user"]);
        assert!(identity.is_elevated);
    }

    #[test]
    fn test_role_claim_is_configurable() {
        let claims = json!({ "sub": "1", "groups": "admin", "app_roles": "reader" });
        let identity = resolve(&outcome(claims), "app_roles");
        assert!(!identity.is_admin);
        assert_eq!(identity.roles.len(), 1);
    }

    #[test]
    fn test_login_key_preference() {
        let identity = resolve(
            &outcome(json!({ "email": "a@x.com", "preferred_username": "a", "sub": "123" })),
            "groups",
        );
        assert_eq!(identity.login_key, "a@x.com");
        assert_eq!(identity.email.as_deref(), Some("a@x.com"));

        let claims = json!({ "preferred_username": "jdoe", "sub": "123" });
        let identity = resolve(&outcome(claims), "groups");
        assert_eq!(identity.login_key, "jdoe");

        let identity = resolve(&outcome(json!({ "sub": "123" })), "groups");
        assert_eq!(identity.login_key, "123");
        assert_eq!(identity.subject_id.as_deref(), Some("123"));
    }

    #[test]
    fn test_display_name_falls_back_to_login_key() {
        let identity = resolve(&outcome(json!({ "sub": "1", "name": "Jane Doe" })), "groups");
        assert_eq!(identity.display_name, "Jane Doe");

        let identity = resolve(&outcome(json!({ "email": "a@x.com" })), "groups");
        assert_eq!(identity.display_name, "a@x.com");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let outcome = outcome(json!({ "email": "a@x.com", "groups": "admin" }));
        assert_eq!(resolve(&outcome, "groups"), resolve(&outcome, "groups"));
    }
}
