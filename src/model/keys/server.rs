use std::path::Path;

use chrono::{serde::ts_seconds, DateTime, Duration, Utc};
use ed25519_dalek::{
    pkcs8::{EncodePrivateKey, KeypairBytes},
    SigningKey, SECRET_KEY_LENGTH,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use rand::rngs::OsRng;
use rocket::{http::Status, tokio::fs};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::api::auth::AuthToken;

use super::store::write_private;

/// File holding the server's private signing key, inside the data directory.
pub const PRIVATE_KEY_FILE: &str = "key";
/// File holding the server's public verification key, inside the data directory.
pub const PUBLIC_KEY_FILE: &str = "key.pub";

/// Token claims: who the bearer is and until when.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(with = "ts_seconds")]
    exp: DateTime<Utc>,
}

/// The node's own Ed25519 keypair, used to mint and verify auth tokens.
///
/// Every node in a cluster holds the same keypair, so tokens minted by one
/// primary stay valid after a failover.
pub struct ServerKeys {
    signing: SigningKey,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl ServerKeys {
    /// Generate a fresh keypair.
    pub fn generate() -> Result<Self> {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(signing: SigningKey) -> Result<Self> {
        let der = KeypairBytes {
            secret_key: signing.to_bytes(),
            public_key: None,
        }
        .to_pkcs8_der()
        .map_err(|e| key_error(format!("Cannot encode signing key: {e}")))?;
        let encoding = EncodingKey::from_ed_der(der.as_bytes());
        // For EdDSA this takes the raw 32 byte public key, not a DER document.
        let decoding = DecodingKey::from_ed_der(signing.verifying_key().as_bytes());
        Ok(Self {
            signing,
            encoding,
            decoding,
        })
    }

    /// Rebuild a keypair from its raw halves, checking they belong together.
    pub fn from_bytes(public: &[u8], private: &[u8]) -> Result<Self> {
        let secret: [u8; SECRET_KEY_LENGTH] = private
            .try_into()
            .map_err(|_| key_error("Server private key has the wrong length"))?;
        let signing = SigningKey::from_bytes(&secret);
        if signing.verifying_key().as_bytes().as_slice() != public {
            return Err(key_error("Server public key does not match private key"));
        }
        Self::from_signing_key(signing)
    }

    /// Load the keypair from `dir`, or generate and save one if either half is missing.
    pub async fn load_or_generate(dir: &Path) -> Result<Self> {
        let private = fs::read(dir.join(PRIVATE_KEY_FILE)).await;
        let public = fs::read(dir.join(PUBLIC_KEY_FILE)).await;
        match (public, private) {
            (Ok(public), Ok(private)) => Self::from_bytes(&public, &private),
            _ => {
                info!("No server keypair found, generating a new one");
                let keys = Self::generate()?;
                keys.save(dir).await?;
                Ok(keys)
            }
        }
    }

    /// Persist both halves into `dir`.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        write_private(&dir.join(PRIVATE_KEY_FILE), &self.private_bytes()).await?;
        write_private(&dir.join(PUBLIC_KEY_FILE), &self.public_bytes()).await?;
        Ok(())
    }

    pub fn public_bytes(&self) -> Vec<u8> {
        self.signing.verifying_key().to_bytes().to_vec()
    }

    pub fn private_bytes(&self) -> Vec<u8> {
        self.signing.to_bytes().to_vec()
    }

    /// Mint a token for `subject`, valid for `ttl` from now.
    pub fn issue_token(&self, subject: &str, ttl: Duration) -> Result<AuthToken> {
        self.sign_claims(&Claims {
            sub: subject.to_string(),
            exp: Utc::now() + ttl,
        })
    }

    fn sign_claims(&self, claims: &Claims) -> Result<AuthToken> {
        let value = jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), claims, &self.encoding)?;
        Ok(AuthToken { value })
    }

    /// Check the token's signature and expiry, returning the subject.
    pub fn verify_token(&self, token: &AuthToken) -> Result<String> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        let claims = jsonwebtoken::decode(&token.value, &self.decoding, &validation)
            .map(|data: TokenData<Claims>| data.claims)?;
        if Utc::now() < claims.exp {
            Ok(claims.sub)
        } else {
            Err(Error::unauthenticated("token expired"))
        }
    }
}

fn key_error(msg: impl Into<String>) -> Error {
    Error::Status(Status::InternalServerError, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let keys = ServerKeys::generate().unwrap();
        let token = keys.issue_token("alice", Duration::hours(1)).unwrap();
        assert_eq!(keys.verify_token(&token).unwrap(), "alice");
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let keys = ServerKeys::generate().unwrap();
        let token = keys
            .sign_claims(&Claims {
                sub: "alice".to_string(),
                exp: Utc::now() - Duration::seconds(1),
            })
            .unwrap();
        assert!(keys.verify_token(&token).is_err());
    }

    #[test]
    fn foreign_tokens_are_rejected() {
        let ours = ServerKeys::generate().unwrap();
        let theirs = ServerKeys::generate().unwrap();
        let token = theirs.issue_token("mallory", Duration::hours(1)).unwrap();
        assert!(ours.verify_token(&token).is_err());

        let garbage = AuthToken {
            value: "not.a.token".to_string(),
        };
        assert!(ours.verify_token(&garbage).is_err());
    }

    #[test]
    fn keypair_survives_byte_round_trip() {
        let keys = ServerKeys::generate().unwrap();
        let copy = ServerKeys::from_bytes(&keys.public_bytes(), &keys.private_bytes()).unwrap();
        let token = keys.issue_token("alice", Duration::hours(1)).unwrap();
        assert_eq!(copy.verify_token(&token).unwrap(), "alice");

        let other = ServerKeys::generate().unwrap();
        assert!(ServerKeys::from_bytes(&other.public_bytes(), &keys.private_bytes()).is_err());
        assert!(ServerKeys::from_bytes(&keys.public_bytes(), &[0; 3]).is_err());
    }

    #[rocket::async_test]
    async fn load_or_generate_persists() {
        let random: u32 = rand::random();
        let dir = std::env::temp_dir().join(format!("evoting-server-keys-{random}"));
        fs::create_dir_all(&dir).await.unwrap();

        let first = ServerKeys::load_or_generate(&dir).await.unwrap();
        let second = ServerKeys::load_or_generate(&dir).await.unwrap();
        assert_eq!(first.public_bytes(), second.public_bytes());

        fs::remove_dir_all(&dir).await.unwrap();
    }
}
