use serde::{Deserialize, Serialize};

/// Names the voter asking for a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreAuthRequest {
    pub name: String,
}

/// A one-time nonce the voter must sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Hex string; the voter signs these ASCII bytes.
    pub value: String,
}

/// A voter's answer to one of their pending challenges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub name: String,
    /// Detached Ed25519 signature over a challenge value.
    #[serde(with = "super::hex")]
    pub response: Vec<u8>,
}

/// A self-verifying bearer token, issued by [`crate::model::keys::ServerKeys`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub value: String,
}
