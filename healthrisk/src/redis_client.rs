use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::references::{ReferenceKey, TitleLookup};

#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_tokio_connection_manager().await?;
        Ok(Self { connection })
    }

    pub async fn set_with_expiry<T: Serialize>(&self, key: &str, value: &T, expiry_secs: u64) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key, json, expiry_secs).await?;
        Ok(())
    }

    pub async fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.clone();
        let result: Option<String> = conn.get(key).await?;
        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

/// Short-lived store for resolved reference titles.
#[async_trait]
pub trait TitleCache: Send + Sync {
    async fn cached_title(&self, key: &str) -> Result<Option<String>>;
    async fn store_title(&self, key: &str, title: &str, ttl_secs: u64) -> Result<()>;
}

#[async_trait]
impl TitleCache for RedisClient {
    async fn cached_title(&self, key: &str) -> Result<Option<String>> {
        self.get(key).await
    }

    async fn store_title(&self, key: &str, title: &str, ttl_secs: u64) -> Result<()> {
        self.set_with_expiry(key, &title, ttl_secs).await
    }
}

pub fn title_cache_key(key: &ReferenceKey) -> String {
    format!("ref_title:{}", key)
}

/// Title lookup that consults the cache before `inner`. Cache failures are
/// logged and fall through to `inner`; missing documents are not cached.
pub struct CachedTitleLookup<L> {
    cache: Arc<dyn TitleCache>,
    inner: L,
    ttl_secs: u64,
}

impl<L> CachedTitleLookup<L> {
    pub fn new(cache: Arc<dyn TitleCache>, inner: L, ttl_secs: u64) -> Self {
        Self {
            cache,
            inner,
            ttl_secs,
        }
    }
}

#[async_trait]
impl<L: TitleLookup> TitleLookup for CachedTitleLookup<L> {
    async fn get_title(&self, key: &ReferenceKey) -> Result<Option<String>> {
        let cache_key = title_cache_key(key);
        match self.cache.cached_title(&cache_key).await {
            Ok(Some(title)) => {
                debug!("Title cache hit for {}", key);
                return Ok(Some(title));
            }
            Ok(None) => {}
            Err(e) => warn!("Title cache read failed for {}: {}", key, e),
        }

        let title = self.inner.get_title(key).await?;
        if let Some(title) = &title {
            if let Err(e) = self.cache.store_title(&cache_key, title, self.ttl_secs).await {
                warn!("Title cache write failed for {}: {}", key, e);
            }
        }
        Ok(title)
    }
}
