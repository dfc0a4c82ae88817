//! Signed bearer tokens for the realtime transport.
//!
//! Two kinds share one construction: `rt` (short-lived token minted for
//! an authenticated user via `GET /socket/token`) and `guest` (signed
//! guest identity produced at guest provisioning). The wire form is
//! `<kind>.<base64url claims JSON>.<base64url HMAC-SHA256>`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::error::IdentityError;

type HmacSha256 = Hmac<Sha256>;

/// Token kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Realtime,
    Guest,
}

impl TokenKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "rt",
            Self::Guest => "guest",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "rt" => Some(Self::Realtime),
            "guest" => Some(Self::Guest),
            _ => None,
        }
    }
}

/// Claims carried inside both token kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Principal id (user id, or `guest-` prefixed guest id).
    pub sub: String,
    /// Display name at mint time.
    pub name: String,
    /// Expiry as unix seconds.
    pub exp: i64,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.exp, 0)
    }
}

/// HMAC signer/verifier bound to the deployment's signing secret.
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, kind: TokenKind, claims_b64: &str) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(kind.as_str().as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Mint a token for the given claims.
    pub fn sign(&self, kind: TokenKind, claims: &TokenClaims) -> String {
        let claims_json = serde_json::to_vec(claims).expect("claims serialize");
        let claims_b64 = URL_SAFE_NO_PAD.encode(claims_json);
        let sig = URL_SAFE_NO_PAD.encode(self.mac(kind, &claims_b64));
        format!("{}.{claims_b64}.{sig}", kind.as_str())
    }

    /// Mint a token expiring `ttl` from now.
    pub fn sign_with_ttl(
        &self,
        kind: TokenKind,
        sub: impl Into<String>,
        name: impl Into<String>,
        ttl: Duration,
    ) -> String {
        let claims = TokenClaims {
            sub: sub.into(),
            name: name.into(),
            exp: (Utc::now() + ttl).timestamp(),
        };
        self.sign(kind, &claims)
    }

    /// Verify signature and expiry; returns the kind and claims.
    pub fn verify(&self, token: &str) -> Result<(TokenKind, TokenClaims), IdentityError> {
        let mut parts = token.splitn(3, '.');
        let (Some(kind_raw), Some(claims_b64), Some(sig_b64)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(IdentityError::Invalid("malformed token".to_string()));
        };
        let kind = TokenKind::parse(kind_raw)
            .ok_or_else(|| IdentityError::Invalid(format!("unknown token kind `{kind_raw}`")))?;

        let presented_sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| IdentityError::Invalid("bad signature encoding".to_string()))?;
        let expected_sig = self.mac(kind, claims_b64);
        if expected_sig.ct_eq(&presented_sig).unwrap_u8() != 1 {
            return Err(IdentityError::Invalid("signature mismatch".to_string()));
        }

        let claims_json = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| IdentityError::Invalid("bad claims encoding".to_string()))?;
        let claims: TokenClaims = serde_json::from_slice(&claims_json)
            .map_err(|_| IdentityError::Invalid("bad claims payload".to_string()))?;

        if claims.exp < Utc::now().timestamp() {
            return Err(IdentityError::Expired);
        }
        Ok((kind, claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret")
    }

    #[test]
    fn sign_verify_round_trip() {
        let token = signer().sign_with_ttl(
            TokenKind::Realtime,
            "user-1",
            "Denys",
            Duration::seconds(60),
        );
        let (kind, claims) = signer().verify(&token).unwrap();
        assert_eq!(kind, TokenKind::Realtime);
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.name, "Denys");
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let token = signer().sign_with_ttl(
            TokenKind::Guest,
            "guest-abc",
            "Visitor",
            Duration::seconds(60),
        );
        let mut tampered = token.clone();
        tampered.replace_range(6..10, "AAAA");
        assert!(matches!(
            signer().verify(&tampered),
            Err(IdentityError::Invalid(_))
        ));

        let other_signer = TokenSigner::new("different-secret");
        assert!(matches!(
            other_signer.verify(&token),
            Err(IdentityError::Invalid(_))
        ));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = signer().sign_with_ttl(
            TokenKind::Realtime,
            "user-1",
            "Denys",
            Duration::seconds(-5),
        );
        assert_eq!(signer().verify(&token), Err(IdentityError::Expired));
    }

    #[test]
    fn kind_is_bound_into_signature() {
        let token = signer().sign_with_ttl(
            TokenKind::Guest,
            "guest-abc",
            "Visitor",
            Duration::seconds(60),
        );
        // Swapping the kind prefix must invalidate the signature.
        let swapped = token.replacen("guest.", "rt.", 1);
        assert!(signer().verify(&swapped).is_err());
    }
}
