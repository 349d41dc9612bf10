//! Token issuing and verification.
//!
//! Tokens are HS256 JWTs. Verification is stateless: the server keeps no
//! record of issued tokens and there is no refresh.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use shellgate_core::{Permission, permission};
use shellgate_session::Identity;
use thiserror::Error;

/// Shortest accepted shared-secret credential.
pub const MIN_CREDENTIAL_LEN: usize = 32;

/// Subject used when the client does not name itself.
pub const DEFAULT_SUBJECT: &str = "remote";

/// Authentication error.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Credential must be at least {MIN_CREDENTIAL_LEN} characters")]
    CredentialTooShort,
    #[error("Invalid credential")]
    InvalidCredential,
    #[error("Permission cannot be granted: {0}")]
    PermissionNotGrantable(Permission),
    #[error("Missing token")]
    MissingToken,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Client name.
    pub sub: String,
    pub permissions: Vec<Permission>,
    /// Issued at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn allows(&self, required: Permission) -> bool {
        permission::allows(&self.permissions, required)
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Session identity derived from these claims.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            subject: self.sub.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// A freshly issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub permissions: Vec<Permission>,
}

/// Exchanges the shared credential for signed tokens and verifies them.
pub struct TokenAuthority {
    credential: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    grantable: Vec<Permission>,
}

impl TokenAuthority {
    /// Create an authority that accepts `credential` and signs with `signing_key`.
    ///
    /// # Errors
    /// Returns [`AuthError::CredentialTooShort`] if the configured credential
    /// is shorter than [`MIN_CREDENTIAL_LEN`].
    pub fn new(credential: impl Into<String>, signing_key: &[u8], ttl: Duration) -> Result<Self, AuthError> {
        let credential = credential.into();
        if credential.chars().count() < MIN_CREDENTIAL_LEN {
            return Err(AuthError::CredentialTooShort);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            credential,
            encoding: EncodingKey::from_secret(signing_key),
            decoding: DecodingKey::from_secret(signing_key),
            validation,
            ttl,
            grantable: vec![Permission::All],
        })
    }

    /// Restrict the permissions tokens may carry.
    #[must_use]
    pub fn with_grantable(mut self, grantable: Vec<Permission>) -> Self {
        self.grantable = grantable;
        self
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for a presented credential.
    ///
    /// Without an explicit request the token carries every grantable permission.
    ///
    /// # Errors
    /// Fails if the credential is too short or wrong, or a requested
    /// permission exceeds what this authority may grant.
    pub fn issue(
        &self,
        credential: &str,
        subject: Option<&str>,
        requested: Option<Vec<Permission>>,
    ) -> Result<IssuedToken, AuthError> {
        if credential.chars().count() < MIN_CREDENTIAL_LEN {
            return Err(AuthError::CredentialTooShort);
        }
        if !constant_time_eq(credential.as_bytes(), self.credential.as_bytes()) {
            return Err(AuthError::InvalidCredential);
        }

        let permissions = match requested {
            Some(requested) => {
                if let Some(denied) = requested
                    .iter()
                    .find(|p| !self.can_grant(**p))
                {
                    return Err(AuthError::PermissionNotGrantable(*denied));
                }
                requested
            }
            None => self.grantable.clone(),
        };

        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: subject.unwrap_or(DEFAULT_SUBJECT).to_string(),
            permissions: permissions.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = self.sign(&claims)?;

        tracing::info!(subject = %claims.sub, ?permissions, %expires_at, "Issued token");
        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
            permissions,
        })
    }

    /// Sign arbitrary claims.
    ///
    /// # Errors
    /// Returns [`AuthError::Signing`] if encoding fails.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Check signature and expiry.
    ///
    /// # Errors
    /// Returns [`AuthError::Expired`] or [`AuthError::InvalidToken`].
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }

    fn can_grant(&self, permission: Permission) -> bool {
        if permission == Permission::All {
            self.grantable.contains(&Permission::All)
        } else {
            permission::allows(&self.grantable, permission)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn authority() -> TokenAuthority {
        TokenAuthority::new(SECRET, b"signing-key", Duration::hours(1)).unwrap()
    }

    #[test]
    fn test_short_configured_credential_rejected() {
        assert!(matches!(
            TokenAuthority::new("short", b"k", Duration::hours(1)),
            Err(AuthError::CredentialTooShort)
        ));
    }

    #[test]
    fn test_issue_and_verify() {
        let authority = authority();
        let issued = authority.issue(SECRET, Some("laptop"), None).unwrap();

        let claims = authority.verify(&issued.token).unwrap();
        assert_eq!(claims.sub, "laptop");
        assert_eq!(claims.permissions, vec![Permission::All]);
        assert!(issued.expires_at > Utc::now());
    }

    #[test]
    fn test_wrong_or_short_credential() {
        let authority = authority();
        assert!(matches!(
            authority.issue("too-short", None, None),
            Err(AuthError::CredentialTooShort)
        ));
        assert!(matches!(
            authority.issue(&"x".repeat(40), None, None),
            Err(AuthError::InvalidCredential)
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let authority = authority();
        let now = Utc::now().timestamp();
        let token = authority
            .sign(&Claims {
                sub: "old".to_string(),
                permissions: vec![Permission::All],
                iat: now - 120,
                exp: now - 60,
            })
            .unwrap();

        assert!(matches!(authority.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let other = TokenAuthority::new(SECRET, b"other-key", Duration::hours(1)).unwrap();
        let token = other.issue(SECRET, None, None).unwrap().token;
        assert!(matches!(authority().verify(&token), Err(AuthError::InvalidToken(_))));
        assert!(matches!(authority().verify("garbage"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_requested_permissions_are_bounded() {
        let authority = authority().with_grantable(vec![Permission::Execute, Permission::History]);

        let issued = authority
            .issue(SECRET, None, Some(vec![Permission::History]))
            .unwrap();
        assert_eq!(issued.permissions, vec![Permission::History]);

        assert!(matches!(
            authority.issue(SECRET, None, Some(vec![Permission::Ai])),
            Err(AuthError::PermissionNotGrantable(Permission::Ai))
        ));
        assert!(matches!(
            authority.issue(SECRET, None, Some(vec![Permission::All])),
            Err(AuthError::PermissionNotGrantable(Permission::All))
        ));
    }
}
