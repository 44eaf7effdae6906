//! Authentication tokens: generation, hashing and plaintext validation.

use std::fmt;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Random bytes behind every plaintext token.
const TOKEN_BYTES: usize = 16;

/// Length of the base64url (unpadded) encoding of [`TOKEN_BYTES`].
pub const PLAINTEXT_LEN: usize = 22;

/// What a token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Authentication,
    Activation,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Authentication => "authentication",
            Scope::Activation => "activation",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SHA-256 of a plaintext token. Only the hash is ever stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    pub fn of(plaintext: &str) -> Self {
        Self(Sha256::digest(plaintext.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash(")?;
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

/// A stored token. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub hash: TokenHash,
    pub user_id: i64,
    pub expiry: SystemTime,
    pub scope: Scope,
}

impl AuthToken {
    /// A token whose expiry is at or before `now` is no longer valid.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expiry <= now
    }
}

/// A freshly issued token together with its plaintext.
///
/// The plaintext exists only here; it is handed to the client once.
#[derive(Clone)]
pub struct IssuedToken {
    pub plaintext: String,
    pub token: AuthToken,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("plaintext", &"<redacted>")
            .field("token", &self.token)
            .finish()
    }
}

/// Generate a new token for `user_id` expiring `ttl` from now.
pub fn generate(user_id: i64, ttl: Duration, scope: Scope) -> IssuedToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let plaintext = URL_SAFE_NO_PAD.encode(bytes);

    let token = AuthToken {
        hash: TokenHash::of(&plaintext),
        user_id,
        expiry: SystemTime::now() + ttl,
        scope,
    };
    IssuedToken { plaintext, token }
}

/// Whether `plaintext` has the shape of a token this service issues.
pub fn is_valid_plaintext(plaintext: &str) -> bool {
    plaintext.len() == PLAINTEXT_LEN
        && plaintext
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
