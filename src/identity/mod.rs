//! Identity resolution for the realtime transport.
//!
//! Turns an opaque bearer credential into a stable [`Principal`]:
//! a server-issued short-lived realtime token (authenticated user), a
//! signed guest token, or a session cookie via a pluggable resolver.
//! Unknown guests are provisioned on first sight; guests idle for more
//! than the configured window are garbage-collected.

pub mod error;
pub mod token;

pub use error::IdentityError;
pub use token::{TokenClaims, TokenKind, TokenSigner};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::protocol::{Principal, GUEST_ID_PREFIX};
use crate::storage::{Store, UserRecord};

/// Hook for the session-cookie fallback of the authenticated case. The
/// default resolver rejects; deployments wire their session layer here.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve_session(&self, cookie: &str) -> Option<Principal>;
}

/// Default TTL of minted realtime tokens.
pub const REALTIME_TOKEN_TTL_SECONDS: i64 = 60;

/// Guests idle longer than this are collected.
pub const GUEST_IDLE_HOURS: i64 = 24;

pub struct IdentityResolver {
    signer: TokenSigner,
    store: Arc<dyn Store>,
    session_resolver: Option<Arc<dyn SessionResolver>>,
    guest_idle: Duration,
}

impl IdentityResolver {
    pub fn new(signing_secret: impl AsRef<[u8]>, store: Arc<dyn Store>) -> Self {
        Self {
            signer: TokenSigner::new(signing_secret),
            store,
            session_resolver: None,
            guest_idle: Duration::hours(GUEST_IDLE_HOURS),
        }
    }

    pub fn with_session_resolver(mut self, resolver: Arc<dyn SessionResolver>) -> Self {
        self.session_resolver = Some(resolver);
        self
    }

    /// Mint the short-lived token handed out by `GET /socket/token`.
    pub fn issue_realtime_token(&self, user_id: &str, display_name: &str) -> String {
        self.signer.sign_with_ttl(
            TokenKind::Realtime,
            user_id,
            display_name,
            Duration::seconds(REALTIME_TOKEN_TTL_SECONDS),
        )
    }

    /// Mint a signed guest token (normally produced by the guest signup
    /// flow upstream of this core).
    pub fn issue_guest_token(&self, guest_id: &str, guest_name: &str, ttl: Duration) -> String {
        self.signer
            .sign_with_ttl(TokenKind::Guest, guest_id, guest_name, ttl)
    }

    /// Resolve a bearer credential to a principal.
    pub async fn resolve(&self, token: &str) -> Result<Principal, IdentityError> {
        if token.trim().is_empty() {
            return Err(IdentityError::Required);
        }
        let (kind, claims) = self.signer.verify(token)?;
        match kind {
            TokenKind::Realtime => {
                if claims.sub.starts_with(GUEST_ID_PREFIX) {
                    return Err(IdentityError::Invalid(
                        "guest ids cannot use realtime tokens".to_string(),
                    ));
                }
                if let Err(err) = self.store.touch_user_activity(&claims.sub).await {
                    tracing::warn!(%err, user_id = %claims.sub, "Failed to touch user activity");
                }
                Ok(Principal::user(claims.sub, claims.name))
            }
            TokenKind::Guest => {
                if !claims.sub.starts_with(GUEST_ID_PREFIX) {
                    return Err(IdentityError::Invalid(
                        "guest token subject must carry the guest prefix".to_string(),
                    ));
                }
                self.provision_guest(&claims.sub, &claims.name).await?;
                Ok(Principal::guest(claims.sub, claims.name))
            }
        }
    }

    /// Cookie fallback for the authenticated case.
    pub async fn resolve_session_cookie(&self, cookie: &str) -> Result<Principal, IdentityError> {
        match &self.session_resolver {
            Some(resolver) => resolver
                .resolve_session(cookie)
                .await
                .ok_or_else(|| IdentityError::Invalid("session not recognized".to_string())),
            None => Err(IdentityError::Invalid(
                "session cookies are not enabled".to_string(),
            )),
        }
    }

    /// Create the guest user record on first sight; refresh
    /// `last_active_at` on every handshake afterwards.
    async fn provision_guest(&self, guest_id: &str, name: &str) -> Result<(), IdentityError> {
        let existing = self
            .store
            .get_user(guest_id)
            .await
            .map_err(|err| IdentityError::Invalid(err.to_string()))?;
        match existing {
            Some(_) => {
                let _ = self.store.touch_user_activity(guest_id).await;
            }
            None => {
                self.store
                    .upsert_user(UserRecord {
                        id: guest_id.to_string(),
                        username: name.to_string(),
                        is_guest: true,
                        last_active_at: Utc::now(),
                    })
                    .await
                    .map_err(|err| IdentityError::Invalid(err.to_string()))?;
                tracing::info!(guest_id, name, "Provisioned guest principal");
            }
        }
        Ok(())
    }

    /// Remove guests idle past the configured window. Returns how many
    /// records were collected.
    pub async fn collect_idle_guests(&self) -> usize {
        let cutoff = Utc::now() - self.guest_idle;
        match self.store.delete_idle_guests(cutoff).await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count, "Collected idle guest principals");
                }
                count
            }
            Err(err) => {
                tracing::warn!(%err, "Guest collection failed");
                0
            }
        }
    }
}

/// Deterministic 6-char tag derived from a principal id, appended to a
/// display name on per-lobby collision (`Name#ab12cd`). Deterministic so
/// retries and reconnects produce the same name.
pub fn display_name_suffix(principal_id: &str) -> String {
    let digest = Sha256::digest(principal_id.as_bytes());
    digest[..3].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    fn resolver() -> (IdentityResolver, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (
            IdentityResolver::new("secret", store.clone() as Arc<dyn Store>),
            store,
        )
    }

    #[tokio::test]
    async fn resolves_realtime_token_to_user_principal() {
        let (resolver, _store) = resolver();
        let token = resolver.issue_realtime_token("user-7", "Denys");
        let principal = resolver.resolve(&token).await.unwrap();
        assert_eq!(principal.id, "user-7");
        assert!(!principal.is_guest);
        assert!(!principal.is_bot);
    }

    #[tokio::test]
    async fn guest_token_provisions_guest_once() {
        let (resolver, store) = resolver();
        let token = resolver.issue_guest_token("guest-xyz", "Visitor", Duration::hours(1));

        let principal = resolver.resolve(&token).await.unwrap();
        assert!(principal.is_guest);
        let record = store.get_user("guest-xyz").await.unwrap().unwrap();
        assert!(record.is_guest);
        assert_eq!(record.username, "Visitor");

        // Second resolve reuses the record.
        let principal = resolver.resolve(&token).await.unwrap();
        assert_eq!(principal.id, "guest-xyz");
    }

    #[tokio::test]
    async fn empty_credential_is_auth_required() {
        let (resolver, _) = resolver();
        assert_eq!(
            resolver.resolve("").await.unwrap_err(),
            IdentityError::Required
        );
        assert_eq!(
            resolver.resolve("  ").await.unwrap_err(),
            IdentityError::Required
        );
    }

    #[tokio::test]
    async fn kind_and_prefix_must_agree() {
        let (resolver, _) = resolver();
        let wrong_guest = resolver.issue_guest_token("user-1", "NotAGuest", Duration::hours(1));
        assert!(resolver.resolve(&wrong_guest).await.is_err());

        let wrong_user = resolver.issue_realtime_token("guest-1", "NotAUser");
        assert!(resolver.resolve(&wrong_user).await.is_err());
    }

    #[tokio::test]
    async fn cookie_fallback_rejects_without_resolver() {
        let (resolver, _) = resolver();
        assert!(resolver.resolve_session_cookie("sid=abc").await.is_err());
    }

    #[test]
    fn suffix_is_deterministic_and_six_chars() {
        let a = display_name_suffix("guest-abc");
        let b = display_name_suffix("guest-abc");
        let c = display_name_suffix("guest-def");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 6);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
