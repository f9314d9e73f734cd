// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Short-lived access-credential cache for automated providers.
//!
//! OAuth client-credentials tokens are obtained once and shared across
//! calls; the cache expires them a safety margin before the provider does,
//! so an in-flight request never carries a token about to lapse. The cache
//! is an explicit value handed to the provider client, not ambient state,
//! which keeps it substitutable in tests.

use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Seconds shaved off the provider-reported lifetime.
const EXPIRY_SAFETY_MARGIN_SECS: u64 = 60;

/// Floor for the effective lifetime, matching the shortest token the
/// providers hand out.
const MIN_TTL_SECS: u64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Single-entry token cache with a defined expiry policy.
#[derive(Debug, Default)]
pub struct TokenCache {
    inner: RwLock<Option<CachedToken>>,
}

/// Effective time-to-live for a token the provider says lives
/// `expires_in_secs`: the reported lifetime minus the safety margin, but
/// never below the floor.
pub(crate) fn effective_ttl(expires_in_secs: u64) -> Duration {
    Duration::from_secs(
        expires_in_secs
            .saturating_sub(EXPIRY_SAFETY_MARGIN_SECS)
            .max(MIN_TTL_SECS),
    )
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token if it has not reached its effective expiry.
    pub async fn get(&self) -> Option<String> {
        let guard = self.inner.read().await;
        guard
            .as_ref()
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.token.clone())
    }

    /// Cache a freshly obtained token.
    pub async fn store(&self, token: impl Into<String>, expires_in_secs: u64) {
        let cached = CachedToken {
            token: token.into(),
            expires_at: Instant::now() + effective_ttl(expires_in_secs),
        };
        *self.inner.write().await = Some(cached);
    }

    /// Drop the cached token (e.g. after the provider rejected it).
    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_applies_safety_margin_with_floor() {
        assert_eq!(effective_ttl(3600), Duration::from_secs(3540));
        assert_eq!(effective_ttl(90), Duration::from_secs(60));
        assert_eq!(effective_ttl(0), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn fresh_cache_is_empty_and_store_round_trips() {
        let cache = TokenCache::new();
        assert!(cache.get().await.is_none());

        cache.store("tok-1", 3600).await;
        assert_eq!(cache.get().await.as_deref(), Some("tok-1"));

        cache.clear().await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn newer_token_replaces_older() {
        let cache = TokenCache::new();
        cache.store("tok-1", 3600).await;
        cache.store("tok-2", 3600).await;
        assert_eq!(cache.get().await.as_deref(), Some("tok-2"));
    }
}
