// JWT access tokens and opaque refresh / single-use secrets

use crate::auth::error::AuthError;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Only algorithm accepted for access tokens
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Length of generated refresh secrets and single-use tokens
const SECRET_LENGTH: usize = 48;

/// JWT claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,       // account id
    pub email: String,
    pub username: String,
    pub iat: i64,        // issued at timestamp
    pub exp: i64,        // expiration timestamp
}

/// Refresh secret as handed to the client, plus the hash that gets stored
#[derive(Debug, Clone)]
pub struct RefreshSecret {
    pub bearer: String,
    pub hash: String,
}

/// Token service for JWT operations
///
/// The signing secret is injected at construction and never changes.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub", "iat"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issue a signed access token valid for `ttl`
    pub fn issue_access_token(
        &self,
        account_id: Uuid,
        email: &str,
        username: &str,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();

        let claims = Claims {
            sub: account_id,
            email: email.to_string(),
            username: username.to_string(),
            iat: now,
            exp: now + ttl.num_seconds(),
        };

        encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenGenerationError(e.to_string()))
    }

    /// Parse and verify an access token
    ///
    /// Every failure, including expiry and algorithm mismatch, is reported as
    /// `InvalidToken`.
    pub fn parse_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Access token rejected: {:?}", e.kind());
                AuthError::InvalidToken
            })?;

        // jsonwebtoken treats exp == now as still valid
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }

    /// Generate a refresh secret and the hash under which it is stored
    pub fn issue_refresh_secret(&self) -> RefreshSecret {
        let bearer = generate_secret();
        let hash = hash_secret(&bearer);
        RefreshSecret { bearer, hash }
    }
}

/// Generate a high-entropy opaque token (~285 bits)
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// Hash a secret using SHA-256
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
