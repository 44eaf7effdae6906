//! Bearer credential resolution and token lifecycle.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use super::store::{StoreError, TokenStore, User, UserStore};
use super::token::{self, IssuedToken, Scope, TokenHash};
use crate::observability::metrics;

/// Who is making the request. Lives in request extensions only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated { user_id: i64, activated: bool },
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Header present but not `Bearer <token>`, or the token has the wrong shape.
    #[error("invalid or missing authentication token")]
    InvalidCredentialFormat,

    #[error("invalid or expired authentication token")]
    InvalidOrExpiredCredential,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Verifies credentials against hashed tokens held by a [`TokenStore`].
#[derive(Clone)]
pub struct TokenAuthenticator {
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserStore>,
}

impl TokenAuthenticator {
    pub fn new(tokens: Arc<dyn TokenStore>, users: Arc<dyn UserStore>) -> Self {
        Self { tokens, users }
    }

    /// Resolve the value of an `Authorization` header to an [`Identity`].
    pub async fn resolve(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let outcome = self.resolve_inner(credential).await;
        metrics::record_auth(match &outcome {
            Ok(Identity::Anonymous) => "anonymous",
            Ok(Identity::Authenticated { .. }) => "authenticated",
            Err(AuthError::InvalidCredentialFormat) => "invalid_format",
            Err(AuthError::InvalidOrExpiredCredential) => "invalid_token",
            Err(AuthError::Store(_)) => "store_error",
        });
        outcome
    }

    async fn resolve_inner(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let header = match credential {
            None | Some("") => return Ok(Identity::Anonymous),
            Some(header) => header,
        };

        let plaintext = match header.split(' ').collect::<Vec<_>>()[..] {
            ["Bearer", plaintext] => plaintext,
            _ => return Err(AuthError::InvalidCredentialFormat),
        };
        if !token::is_valid_plaintext(plaintext) {
            return Err(AuthError::InvalidCredentialFormat);
        }

        let user_id = self.lookup(plaintext, Scope::Authentication).await?;
        let user = match self.users.find_user(user_id).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(AuthError::InvalidOrExpiredCredential),
            Err(e) => return Err(e.into()),
        };

        Ok(Identity::Authenticated {
            user_id: user.id,
            activated: user.activated,
        })
    }

    /// Issue and persist a new token. The returned plaintext is not stored.
    pub async fn issue(
        &self,
        user_id: i64,
        ttl: Duration,
        scope: Scope,
    ) -> Result<IssuedToken, AuthError> {
        let issued = token::generate(user_id, ttl, scope);
        self.tokens.insert_token(issued.token.clone()).await?;
        Ok(issued)
    }

    /// Redeem an activation token: activate its user and delete every
    /// activation token that user holds.
    pub async fn activate(&self, plaintext: &str) -> Result<User, AuthError> {
        if !token::is_valid_plaintext(plaintext) {
            return Err(AuthError::InvalidCredentialFormat);
        }

        let user_id = self.lookup(plaintext, Scope::Activation).await?;
        let user = match self.users.set_activated(user_id).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(AuthError::InvalidOrExpiredCredential),
            Err(e) => return Err(e.into()),
        };
        self.tokens
            .delete_tokens_for_user(user_id, Scope::Activation)
            .await?;
        Ok(user)
    }

    /// Delete all of a user's tokens in `scope`.
    pub async fn revoke_all(&self, user_id: i64, scope: Scope) -> Result<u64, AuthError> {
        Ok(self.tokens.delete_tokens_for_user(user_id, scope).await?)
    }

    async fn lookup(&self, plaintext: &str, scope: Scope) -> Result<i64, AuthError> {
        let hash = TokenHash::of(plaintext);
        match self.tokens.find_token_by_hash(&hash, scope).await? {
            Some(token) if !token.is_expired_at(SystemTime::now()) => Ok(token.user_id),
            _ => Err(AuthError::InvalidOrExpiredCredential),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryStore;
    use crate::auth::token::AuthToken;
    use async_trait::async_trait;

    fn setup() -> (TokenAuthenticator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(User {
            id: 1,
            name: "alice".into(),
            activated: false,
        });
        (TokenAuthenticator::new(store.clone(), store.clone()), store)
    }

    #[tokio::test]
    async fn missing_or_empty_header_is_anonymous() {
        let (auth, _) = setup();
        assert_eq!(auth.resolve(None).await.unwrap(), Identity::Anonymous);
        assert_eq!(auth.resolve(Some("")).await.unwrap(), Identity::Anonymous);
    }

    #[tokio::test]
    async fn malformed_headers_are_rejected() {
        let (auth, _) = setup();
        for header in [
            "Basic abcdefghijklmnopqrstuv",
            "Bearer",
            "Bearer  abcdefghijklmnopqrstuv",
            "bearer abcdefghijklmnopqrstuv",
            "Bearer tooshort",
            "Bearer abcdefghijklmnopqrst+/",
        ] {
            assert!(
                matches!(
                    auth.resolve(Some(header)).await,
                    Err(AuthError::InvalidCredentialFormat)
                ),
                "{header}"
            );
        }
    }

    #[tokio::test]
    async fn valid_token_resolves_user() {
        let (auth, _) = setup();
        let issued = auth
            .issue(1, Duration::from_secs(60), Scope::Authentication)
            .await
            .unwrap();

        let header = format!("Bearer {}", issued.plaintext);
        assert_eq!(
            auth.resolve(Some(&header)).await.unwrap(),
            Identity::Authenticated {
                user_id: 1,
                activated: false
            }
        );
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let (auth, _) = setup();
        let result = auth.resolve(Some("Bearer abcdefghijklmnopqrstuv")).await;
        assert!(matches!(result, Err(AuthError::InvalidOrExpiredCredential)));
    }

    #[tokio::test]
    async fn activation_token_does_not_authenticate() {
        let (auth, _) = setup();
        let issued = auth
            .issue(1, Duration::from_secs(60), Scope::Activation)
            .await
            .unwrap();
        let result = auth
            .resolve(Some(&format!("Bearer {}", issued.plaintext)))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidOrExpiredCredential)));
    }

    #[tokio::test]
    async fn zero_ttl_token_expires() {
        let (auth, _) = setup();
        let issued = auth
            .issue(1, Duration::ZERO, Scope::Authentication)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let result = auth
            .resolve(Some(&format!("Bearer {}", issued.plaintext)))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidOrExpiredCredential)));
    }

    #[tokio::test]
    async fn same_token_flips_only_at_expiry() {
        let (auth, _) = setup();
        let issued = auth
            .issue(1, Duration::from_millis(100), Scope::Authentication)
            .await
            .unwrap();
        let header = format!("Bearer {}", issued.plaintext);

        assert_eq!(
            auth.resolve(Some(&header)).await.unwrap(),
            Identity::Authenticated {
                user_id: 1,
                activated: false
            }
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        let result = auth.resolve(Some(&header)).await;
        assert!(matches!(result, Err(AuthError::InvalidOrExpiredCredential)));
    }

    #[tokio::test]
    async fn activation_marks_user_and_deletes_tokens() {
        let (auth, store) = setup();
        let first = auth
            .issue(1, Duration::from_secs(60), Scope::Activation)
            .await
            .unwrap();
        auth.issue(1, Duration::from_secs(60), Scope::Activation)
            .await
            .unwrap();
        auth.issue(1, Duration::from_secs(60), Scope::Authentication)
            .await
            .unwrap();

        let user = auth.activate(&first.plaintext).await.unwrap();
        assert!(user.activated);
        assert_eq!(store.token_count(), 1);

        let again = auth.activate(&first.plaintext).await;
        assert!(matches!(again, Err(AuthError::InvalidOrExpiredCredential)));
    }

    #[tokio::test]
    async fn revoke_all_removes_scope() {
        let (auth, store) = setup();
        auth.issue(1, Duration::from_secs(60), Scope::Authentication)
            .await
            .unwrap();
        auth.issue(1, Duration::from_secs(60), Scope::Authentication)
            .await
            .unwrap();
        assert_eq!(auth.revoke_all(1, Scope::Authentication).await.unwrap(), 2);
        assert_eq!(store.token_count(), 0);
    }

    struct FailingStore;

    #[async_trait]
    impl TokenStore for FailingStore {
        async fn find_token_by_hash(
            &self,
            _hash: &TokenHash,
            _scope: Scope,
        ) -> Result<Option<AuthToken>, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn insert_token(&self, _token: AuthToken) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn delete_tokens_for_user(&self, _: i64, _: Scope) -> Result<u64, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_is_surfaced() {
        let auth = TokenAuthenticator::new(Arc::new(FailingStore), Arc::new(MemoryStore::new()));
        let result = auth.resolve(Some("Bearer abcdefghijklmnopqrstuv")).await;
        assert!(matches!(result, Err(AuthError::Store(StoreError::Backend(_)))));
    }
}
