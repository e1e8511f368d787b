// src/core/auth/token.rs

//! Signed session tokens.
//!
//! A token is an opaque byte blob: a bincode-encoded claims body followed by
//! an HMAC-SHA256 tag over the body. The front end treats it as bytes-in,
//! claims-out and only ever inspects database name, kind and expiry. The
//! SHA-256 digest of the raw bytes is the registry's session lookup key.

use crate::core::ZirconDBError;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Length of the trailing HMAC-SHA256 tag.
const TAG_LEN: usize = 32;

/// What a token was minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
#[derive(strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DatabaseKind {
    /// Server-level token issued by the `connect` handshake.
    Server,
    Document,
    Graph,
}

/// The claims carried inside a token body.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct TokenClaims {
    pub database: String,
    pub kind: DatabaseKind,
    /// Expiry as milliseconds since the Unix epoch.
    pub expires_at_ms: i64,
    /// Random salt so two tokens for the same claims never share bytes.
    pub nonce: [u8; 8],
}

/// A token that parsed and carried a valid signature. Expiry is checked
/// separately so the sweep can distinguish "rotted" from "malformed".
#[derive(Debug, Clone)]
pub struct ParsedToken {
    pub claims: TokenClaims,
}

impl ParsedToken {
    pub fn is_expired(&self) -> bool {
        self.claims.expires_at_ms <= Utc::now().timestamp_millis()
    }
}

/// The SHA-256 digest of raw token bytes, used purely as the session lookup
/// key in the connection registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    pub fn of(token_bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(token_bytes);
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({})", hex::encode(&self.0[..8]))
    }
}

/// Mints, parses and validates signed tokens with a server-lifetime secret.
pub struct SignedTokenHandler {
    secret: [u8; 32],
    ttl_ms: i64,
}

impl SignedTokenHandler {
    /// Creates a handler with an explicit secret, e.g. from configuration,
    /// so tokens survive a server restart.
    pub fn new(secret: [u8; 32], ttl_ms: i64) -> Self {
        Self { secret, ttl_ms }
    }

    /// Creates a handler with a random per-process secret. All outstanding
    /// tokens rot on restart, which is the safe default.
    pub fn with_random_secret(ttl_ms: i64) -> Result<Self, ZirconDBError> {
        let mut secret = [0u8; 32];
        getrandom::fill(&mut secret).map_err(|e| ZirconDBError::Internal(e.to_string()))?;
        Ok(Self { secret, ttl_ms })
    }

    /// Mints a signed token for the given database and kind.
    pub fn mint(&self, database: &str, kind: DatabaseKind) -> Result<Bytes, ZirconDBError> {
        let mut nonce = [0u8; 8];
        getrandom::fill(&mut nonce).map_err(|e| ZirconDBError::Internal(e.to_string()))?;
        let claims = TokenClaims {
            database: database.to_string(),
            kind,
            expires_at_ms: Utc::now().timestamp_millis() + self.ttl_ms,
            nonce,
        };
        let mut body = bincode::encode_to_vec(&claims, bincode::config::standard())?;
        let tag = self.sign(&body);
        body.extend_from_slice(&tag);
        Ok(Bytes::from(body))
    }

    /// Parses a token blob, verifying the signature. Expiry is NOT checked
    /// here; call [`validate`](Self::validate) for the full check.
    pub fn parse(&self, token_bytes: &[u8]) -> Result<ParsedToken, ZirconDBError> {
        if token_bytes.len() <= TAG_LEN {
            return Err(ZirconDBError::TokenInvalid(
                "token is too short to carry a signature".to_string(),
            ));
        }
        let (body, tag) = token_bytes.split_at(token_bytes.len() - TAG_LEN);
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ZirconDBError::Internal(e.to_string()))?;
        mac.update(body);
        mac.verify_slice(tag)
            .map_err(|_| ZirconDBError::TokenInvalid("token signature mismatch".to_string()))?;
        let (claims, _) = bincode::decode_from_slice(body, bincode::config::standard())
            .map_err(|e| ZirconDBError::TokenInvalid(format!("token body unreadable: {e}")))?;
        Ok(ParsedToken { claims })
    }

    /// Full validation: signature plus expiry.
    pub fn validate(&self, parsed: &ParsedToken) -> bool {
        !parsed.is_expired()
    }

    /// Parses and validates in one call, mapping expiry to its own error so
    /// clients can re-authenticate instead of treating the token as garbage.
    pub fn parse_and_validate(&self, token_bytes: &[u8]) -> Result<ParsedToken, ZirconDBError> {
        let parsed = self.parse(token_bytes)?;
        if parsed.is_expired() {
            return Err(ZirconDBError::TokenExpired);
        }
        Ok(parsed)
    }

    fn sign(&self, body: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(body);
        mac.finalize().into_bytes().into()
    }
}
