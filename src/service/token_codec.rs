use crate::config::TokenConfig;
use crate::error::app_error::AppError;
use crate::models::token::AccessClaims;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

const REFRESH_TOKEN_BYTES: usize = 32;

/// Signs and parses access tokens. Pure: never touches the session store.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl TokenCodec {
    pub fn new(config: &TokenConfig) -> Self {
        let secret = config.signing_secret.as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: config.issuer.clone(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn issue(&self, claims: &AccessClaims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|source| AppError::TokenEncoding { source })
    }

    /// Fails with `TokenMalformed`, `InvalidSignature` or `TokenExpired`.
    pub fn parse(&self, token: &str) -> Result<AccessClaims, AppError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Opaque refresh secret: 32 random bytes, hex encoded.
    pub fn generate_refresh_token() -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// One-way hash stored in place of a raw token.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}
