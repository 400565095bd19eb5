use argon2::password_hash::rand_core::{OsRng, RngCore};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use subtle::ConstantTimeEq;
use usergate_common::models::auth::Claims;

const SALT_BYTES: usize = 16;
const HASH_BYTES: usize = 32;
// Argon2 rejects salts shorter than this
const MIN_SALT_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("stored credential is malformed: {0}")]
    Malformed(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Output of [`hash_password`]: the hex-encoded Argon2id digest and the salt used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedPassword {
    pub hashed_secret: String,
    pub salt: String,
}

/// Generate a fresh 128-bit salt, hex-encoded
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn derive(password: &str, salt: &str) -> Result<[u8; HASH_BYTES], CredentialError> {
    let mut out = [0u8; HASH_BYTES];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| CredentialError::Hashing(e.to_string()))?;
    Ok(out)
}

/// Hash a password using argon2id. A fresh salt is generated unless one is given.
pub fn hash_password(password: &str, salt: Option<&str>) -> Result<HashedPassword, CredentialError> {
    let salt = match salt {
        Some(s) => s.to_string(),
        None => generate_salt(),
    };
    let digest = derive(password, &salt)?;
    Ok(HashedPassword {
        hashed_secret: hex::encode(digest),
        salt,
    })
}

/// Verify a password against a stored hash and salt.
///
/// Returns `Ok(false)` on a mismatch. Stored data that could never have been
/// produced by [`hash_password`] is reported as [`CredentialError::Malformed`].
pub fn verify_password(
    password: &str,
    hashed_secret: &str,
    salt: Option<&str>,
) -> Result<bool, CredentialError> {
    let salt = salt.ok_or_else(|| CredentialError::Malformed("missing salt".to_string()))?;
    if salt.len() < MIN_SALT_LEN {
        return Err(CredentialError::Malformed("salt too short".to_string()));
    }
    let expected = hex::decode(hashed_secret)
        .map_err(|e| CredentialError::Malformed(format!("hash is not hex: {}", e)))?;
    if expected.len() != HASH_BYTES {
        return Err(CredentialError::Malformed(format!(
            "hash has {} bytes, expected {}",
            expected.len(),
            HASH_BYTES
        )));
    }
    let actual = derive(password, salt)?;
    Ok(actual[..].ct_eq(&expected[..]).into())
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Issues and validates HS256 access tokens. Built once at startup and shared
/// read-only between requests.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    default_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &str, default_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            default_ttl,
        }
    }

    /// Create an access token for `email`, valid for `ttl` or the default TTL
    pub fn issue(
        &self,
        email: &str,
        user_id: i64,
        ttl: Option<Duration>,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let claims = Claims {
            sub: email.to_string(),
            uid: user_id,
            iat: now,
            exp: now + ttl.num_seconds(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Validate an access token and return its claims. Does not check that
    /// the user still exists.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let token_data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })?;
        // Still valid at exactly exp; rejected from the next second on
        if Utc::now().timestamp() > token_data.claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify_correct() {
        let password = "my-secure-password";
        let hashed = hash_password(password, None).unwrap();
        assert!(verify_password(password, &hashed.hashed_secret, Some(&hashed.salt)).unwrap());
    }

    #[test]
    fn test_password_verify_wrong() {
        let hashed = hash_password("correct-password", None).unwrap();
        assert!(
            !verify_password("wrong-password", &hashed.hashed_secret, Some(&hashed.salt)).unwrap()
        );
    }

    #[test]
    fn test_password_different_salts() {
        let password = "same-password";
        let hash1 = hash_password(password, None).unwrap();
        let hash2 = hash_password(password, None).unwrap();
        assert_ne!(hash1.salt, hash2.salt);
        assert_ne!(hash1.hashed_secret, hash2.hashed_secret);
        // Both still verify
        assert!(verify_password(password, &hash1.hashed_secret, Some(&hash1.salt)).unwrap());
        assert!(verify_password(password, &hash2.hashed_secret, Some(&hash2.salt)).unwrap());
    }

    #[test]
    fn test_hash_with_given_salt_is_deterministic() {
        let salt = generate_salt();
        let hash1 = hash_password("password-123", Some(&salt)).unwrap();
        let hash2 = hash_password("password-123", Some(&salt)).unwrap();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.salt, salt);
    }

    #[test]
    fn test_salt_format() {
        let salt = generate_salt();
        assert_eq!(salt.len(), 32, "16 bytes hex-encoded");
        assert!(salt.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify_malformed_hash_is_error() {
        let salt = generate_salt();
        let result = verify_password("pw", "not-hex!", Some(&salt));
        assert!(matches!(result, Err(CredentialError::Malformed(_))));

        let result = verify_password("pw", "abcd", Some(&salt));
        assert!(matches!(result, Err(CredentialError::Malformed(_))));
    }

    #[test]
    fn test_verify_missing_or_short_salt_is_error() {
        let hashed = hash_password("pw-pw-pw-pw", None).unwrap();
        assert!(matches!(
            verify_password("pw-pw-pw-pw", &hashed.hashed_secret, None),
            Err(CredentialError::Malformed(_))
        ));
        assert!(matches!(
            verify_password("pw-pw-pw-pw", &hashed.hashed_secret, Some("abc")),
            Err(CredentialError::Malformed(_))
        ));
    }

    #[test]
    fn test_verify_with_other_salt_fails() {
        let hashed = hash_password("password-123", None).unwrap();
        let other = generate_salt();
        assert!(!verify_password("password-123", &hashed.hashed_secret, Some(&other)).unwrap());
    }

    #[test]
    fn test_jwt_create_and_validate() {
        let tokens = TokenService::new("test-jwt-secret", Duration::minutes(15));
        let token = tokens.issue("test@example.com", 42, None).unwrap();
        let claims = tokens.validate(&token).unwrap();
        assert_eq!(claims.sub, "test@example.com");
        assert_eq!(claims.uid, 42);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn test_jwt_custom_ttl() {
        let tokens = TokenService::new("test-jwt-secret", Duration::minutes(15));
        let token = tokens
            .issue("test@example.com", 1, Some(Duration::hours(2)))
            .unwrap();
        let claims = tokens.validate(&token).unwrap();
        assert_eq!(claims.exp - claims.iat, 2 * 3600);
    }

    #[test]
    fn test_jwt_wrong_secret_fails() {
        let issuer = TokenService::new("secret-1", Duration::minutes(15));
        let verifier = TokenService::new("secret-2", Duration::minutes(15));
        let token = issuer.issue("test@example.com", 1, None).unwrap();
        assert!(matches!(
            verifier.validate(&token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_jwt_expired_fails() {
        let tokens = TokenService::new("test-jwt-secret", Duration::minutes(15));
        let token = tokens
            .issue("test@example.com", 1, Some(Duration::seconds(-5)))
            .unwrap();
        assert!(matches!(tokens.validate(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_jwt_garbage_fails() {
        let tokens = TokenService::new("test-jwt-secret", Duration::minutes(15));
        assert!(matches!(
            tokens.validate("not.a.token"),
            Err(TokenError::Invalid(_))
        ));
        assert!(tokens.validate("").is_err());
    }

    #[test]
    fn test_jwt_tampered_payload_fails() {
        let tokens = TokenService::new("test-jwt-secret", Duration::minutes(15));
        let token = tokens.issue("user@example.com", 1, None).unwrap();
        let other = tokens.issue("admin@example.com", 2, None).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);
        assert!(tokens.validate(&forged).is_err());
    }
}
