//! JWT Token Codec
//!
//! Issues and verifies HS256-signed tokens. Access tokens carry the subject's
//! roles; refresh tokens carry a random secret whose hash is persisted
//! alongside the refresh record.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};

use crate::auth::errors::{InvalidTokenError, SigningError};
use crate::clock::Clock;

/// HS256 needs a key of at least 256 bits.
pub const MIN_SECRET_LEN: usize = 32;

const TOKEN_ID_BYTES: usize = 16;
const REFRESH_SECRET_BYTES: usize = 32;

/// Process-wide signing key, built once at startup.
#[derive(Clone)]
pub struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    pub fn from_secret(secret: &str) -> Result<Self, SigningError> {
        if secret.is_empty() {
            return Err(SigningError::KeyUnavailable);
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(SigningError::KeyTooShort {
                min: MIN_SECRET_LEN,
                actual: secret.len(),
            });
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Wire claims of both token kinds.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    /// Seconds with microsecond fraction, so user-wide revocation cutoffs
    /// can tell apart tokens issued within the same second.
    pub iat: f64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenKind,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Decoded, verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub roles: BTreeSet<String>,
    pub token_id: String,
}

impl Token {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// A token together with its compact serialization.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: Token,
    pub encoded: String,
}

#[derive(Clone)]
pub struct TokenCodec {
    key: Arc<SigningKey>,
    issuer: String,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(key: Arc<SigningKey>, issuer: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.validate_aud = false;
        // Expiry is checked against our own clock with zero leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            key,
            issuer,
            validation,
            clock,
        }
    }

    /// Issue an access token for `subject` carrying `roles`.
    pub fn issue(
        &self,
        subject: &str,
        roles: &BTreeSet<String>,
        ttl: Duration,
    ) -> Result<IssuedToken, SigningError> {
        self.sign(subject, roles.clone(), ttl, TokenKind::Access, None)
    }

    /// Verify an access token.
    pub fn verify(&self, serialized: &str) -> Result<Token, InvalidTokenError> {
        let claims = self.verify_kind(serialized, TokenKind::Access)?;
        Ok(to_token(claims))
    }

    /// Issue a refresh token. Returns the token and the raw secret embedded in it.
    pub fn issue_refresh(
        &self,
        subject: &str,
        ttl: Duration,
    ) -> Result<(IssuedToken, String), SigningError> {
        let secret = random_b64(REFRESH_SECRET_BYTES);
        let issued = self.sign(
            subject,
            BTreeSet::new(),
            ttl,
            TokenKind::Refresh,
            Some(secret.clone()),
        )?;
        Ok((issued, secret))
    }

    /// Verify a refresh token and hand back its embedded secret.
    pub fn verify_refresh(&self, serialized: &str) -> Result<(Token, String), InvalidTokenError> {
        let mut claims = self.verify_kind(serialized, TokenKind::Refresh)?;
        let secret = claims.secret.take().ok_or(InvalidTokenError::Malformed)?;
        Ok((to_token(claims), secret))
    }

    fn sign(
        &self,
        subject: &str,
        roles: BTreeSet<String>,
        ttl: Duration,
        kind: TokenKind,
        secret: Option<String>,
    ) -> Result<IssuedToken, SigningError> {
        let now = self.clock.now();
        let claims = Claims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp_micros() as f64 / 1e6,
            exp: (now + ttl).timestamp(),
            jti: random_b64(TOKEN_ID_BYTES),
            typ: kind,
            roles,
            secret,
        };

        let encoded = encode(&Header::new(Algorithm::HS256), &claims, &self.key.encoding)
            .map_err(SigningError::Encode)?;

        tracing::debug!(sub = %claims.sub, jti = %claims.jti, kind = ?kind, "issued token");

        Ok(IssuedToken {
            token: to_token(claims),
            encoded,
        })
    }

    fn verify_kind(&self, serialized: &str, kind: TokenKind) -> Result<Claims, InvalidTokenError> {
        let data = decode::<Claims>(serialized.trim(), &self.key.decoding, &self.validation)
            .map_err(|e| classify(e.kind()))?;
        let claims = data.claims;

        if claims.typ != kind {
            return Err(InvalidTokenError::Untrusted);
        }
        if self.clock.now().timestamp() >= claims.exp {
            return Err(InvalidTokenError::Expired);
        }
        Ok(claims)
    }
}

fn classify(kind: &ErrorKind) -> InvalidTokenError {
    match kind {
        ErrorKind::InvalidSignature => InvalidTokenError::BadSignature,
        ErrorKind::ExpiredSignature => InvalidTokenError::Expired,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAlgorithm => InvalidTokenError::Untrusted,
        _ => InvalidTokenError::Malformed,
    }
}

fn to_token(claims: Claims) -> Token {
    Token {
        subject: claims.sub,
        issued_at: DateTime::from_timestamp_micros((claims.iat * 1e6).round() as i64)
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
        expires_at: timestamp(claims.exp),
        roles: claims.roles,
        token_id: claims.jti,
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `len` bytes from the OS CSPRNG, base64url without padding.
pub fn random_b64(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    const SECRET: &str = "test-secret-key-that-is-long-enough-0123456789";

    fn codec_with(clock: Arc<dyn Clock>) -> TokenCodec {
        let key = Arc::new(SigningKey::from_secret(SECRET).unwrap());
        TokenCodec::new(key, "authgate-test", clock)
    }

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_jwt_roundtrip() {
        let codec = codec_with(Arc::new(SystemClock));
        let issued = codec
            .issue("u1", &roles(&["user", "moderator"]), Duration::hours(1))
            .unwrap();

        let token = codec.verify(&issued.encoded).unwrap();

        assert_eq!(token.subject, "u1");
        assert_eq!(token.roles, roles(&["user", "moderator"]));
        assert_eq!(token, issued.token);
        assert_eq!(issued.encoded.split('.').count(), 3);
    }

    #[test]
    fn test_issued_at_keeps_sub_second_precision() {
        let clock = Arc::new(ManualClock::new());
        clock.advance(Duration::microseconds(250_123));
        let codec = codec_with(clock.clone());

        let issued = codec.issue("u1", &roles(&["user"]), Duration::hours(1)).unwrap();
        let token = codec.verify(&issued.encoded).unwrap();
        assert_eq!(token.issued_at, clock.now());
    }

    #[test]
    fn test_token_ids_are_unique_and_wide() {
        let codec = codec_with(Arc::new(SystemClock));
        let a = codec.issue("u1", &roles(&["user"]), Duration::minutes(5)).unwrap();
        let b = codec.issue("u1", &roles(&["user"]), Duration::minutes(5)).unwrap();

        assert_ne!(a.token.token_id, b.token.token_id);
        let raw = URL_SAFE_NO_PAD.decode(&a.token.token_id).unwrap();
        assert_eq!(raw.len() * 8, 128);
    }

    #[test]
    fn test_expired_token_rejected() {
        let clock = Arc::new(ManualClock::new());
        let codec = codec_with(clock.clone());
        let issued = codec.issue("u1", &roles(&["user"]), Duration::seconds(60)).unwrap();

        clock.advance(Duration::seconds(59));
        assert!(codec.verify(&issued.encoded).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(codec.verify(&issued.encoded), Err(InvalidTokenError::Expired));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let codec = codec_with(Arc::new(SystemClock));
        let issued = codec.issue("u1", &roles(&["user"]), Duration::hours(1)).unwrap();
        let sig_start = issued.encoded.rfind('.').unwrap() + 1;

        for pos in sig_start..issued.encoded.len() {
            let mut bytes = issued.encoded.clone().into_bytes();
            bytes[pos] = if bytes[pos] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            assert!(codec.verify(&tampered).is_err(), "tampering at {pos} was accepted");
        }
    }

    #[test]
    fn test_different_secrets_reject() {
        let codec = codec_with(Arc::new(SystemClock));
        let other_key = Arc::new(SigningKey::from_secret("another-secret-key-that-is-long-enough!!").unwrap());
        let other = TokenCodec::new(other_key, "authgate-test", Arc::new(SystemClock));

        let issued = other.issue("u1", &roles(&["user"]), Duration::hours(1)).unwrap();
        assert_eq!(codec.verify(&issued.encoded), Err(InvalidTokenError::BadSignature));
    }

    #[test]
    fn test_malformed_and_foreign_issuer() {
        let codec = codec_with(Arc::new(SystemClock));
        assert_eq!(codec.verify("invalid.token.here"), Err(InvalidTokenError::Malformed));
        assert_eq!(codec.verify(""), Err(InvalidTokenError::Malformed));

        let key = Arc::new(SigningKey::from_secret(SECRET).unwrap());
        let foreign = TokenCodec::new(key, "someone-else", Arc::new(SystemClock));
        let issued = foreign.issue("u1", &roles(&["user"]), Duration::hours(1)).unwrap();
        assert_eq!(codec.verify(&issued.encoded), Err(InvalidTokenError::Untrusted));
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let codec = codec_with(Arc::new(SystemClock));
        let (refresh, secret) = codec.issue_refresh("u1", Duration::days(1)).unwrap();
        let access = codec.issue("u1", &roles(&["user"]), Duration::hours(1)).unwrap();

        assert_eq!(codec.verify(&refresh.encoded), Err(InvalidTokenError::Untrusted));
        assert!(matches!(
            codec.verify_refresh(&access.encoded),
            Err(InvalidTokenError::Untrusted)
        ));

        let (token, recovered) = codec.verify_refresh(&refresh.encoded).unwrap();
        assert_eq!(token.subject, "u1");
        assert_eq!(recovered, secret);
    }

    #[test]
    fn test_signing_key_requirements() {
        assert!(matches!(SigningKey::from_secret(""), Err(SigningError::KeyUnavailable)));
        assert!(matches!(
            SigningKey::from_secret("short"),
            Err(SigningError::KeyTooShort { min: 32, actual: 5 })
        ));
    }
}
