use chrono::{DateTime, Duration, Utc};

use crate::cache::{CREDENTIAL_KEY, CacheEntry, CacheStore};
use crate::client::UpstreamClient;
use crate::config::ClientCredentials;
use crate::domain::Credential;
use crate::error::RetrieverError;

/// Access token persisted across runs. An expired token is fatal; it is never refreshed.
pub struct CredentialCache<'a, K: CacheStore> {
    store: &'a K,
    credentials: &'a ClientCredentials,
}

impl<'a, K: CacheStore> CredentialCache<'a, K> {
    pub fn new(store: &'a K, credentials: &'a ClientCredentials) -> Self {
        Self { store, credentials }
    }

    pub fn get_token<C: UpstreamClient>(
        &self,
        client: &C,
        now: DateTime<Utc>,
    ) -> Result<Credential, RetrieverError> {
        if let Some(entry) = self.store.get(CREDENTIAL_KEY)? {
            let credential: Credential = entry.decode()?;
            if credential.is_expired(now) {
                return Err(RetrieverError::ExpiredToken {
                    expires_at: credential.expires_at.to_rfc3339(),
                });
            }
            tracing::debug!(expires_at = %credential.expires_at, "loaded cached credential");
            return Ok(credential);
        }

        let token = client.authenticate(self.credentials)?;
        let expires_at = Duration::try_seconds(token.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| RetrieverError::Upstream {
                endpoint: "connect/token".to_string(),
                status: 200,
                message: format!("token lifetime out of range: {}s", token.expires_in),
            })?;
        let credential = Credential {
            access_token: token.access_token,
            token_type: token.token_type,
            created_at: now,
            expires_at,
        };
        self.store.put(
            CREDENTIAL_KEY,
            &CacheEntry::new(&credential, Some(credential.expires_at))?,
        )?;
        tracing::debug!(expires_at = %credential.expires_at, "authenticated against upstream API");
        Ok(credential)
    }

    pub fn clear(&self) -> Result<bool, RetrieverError> {
        self.store.remove(CREDENTIAL_KEY)
    }
}
