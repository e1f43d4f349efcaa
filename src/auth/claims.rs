use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which half of the token pair a JWT is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by every token we issue. Timestamps are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

impl Claims {
    /// A token is dead from the second its lifetime runs out, `exp` included.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }
}
