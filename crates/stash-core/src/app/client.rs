//! CollectionClient - 外部 blob store への collection 単位のファサード
//!
//! # 責務
//! - 全ての呼び出しにタイムアウトをかける（超過は Unavailable）
//! - 冪等な読み取り（list / head / get）だけ有界リトライ
//! - list のページングを隠蔽して 1 本の Vec にまとめる
//!
//! 状態は持たない。起動時に collection ごとに 1 つ作って使い回す。

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::ClientConfig;
use crate::domain::{
    BlobMetadata, Collection, Fetched, Listing, ObjectHead, StoreError, StoredObject,
};
use crate::ports::BlobStore;

#[derive(Clone)]
pub struct CollectionClient {
    collection: Collection,
    store: Arc<dyn BlobStore>,
    config: ClientConfig,
}

impl CollectionClient {
    pub fn new(collection: Collection, store: Arc<dyn BlobStore>, config: ClientConfig) -> Self {
        Self {
            collection,
            store,
            config,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Every entry currently visible, following pagination.
    /// Keys whose metadata could not be read come back in `unreadable`.
    pub async fn list(&self) -> Result<Listing, StoreError> {
        let mut all = Listing::default();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page_size = self.config.page_size;
            let page = self
                .read_with_retry("list", cursor.as_deref().unwrap_or(""), || {
                    self.store.list_page(cursor.clone(), page_size)
                })
                .await?;
            pages += 1;
            all.entries.extend(page.entries);
            all.unreadable.extend(page.unreadable);

            match page.next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(StoreError::Unavailable(format!(
                        "pagination did not advance past {next:?}"
                    )));
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(
            collection = %self.collection,
            entries = all.entries.len(),
            unreadable = all.unreadable.len(),
            pages,
            "listed collection"
        );
        Ok(all)
    }

    pub async fn get_metadata(&self, key: &str) -> Result<ObjectHead, StoreError> {
        self.read_with_retry("head", key, || self.store.head(key)).await
    }

    pub async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        match self.get_if_none_match(key, None).await? {
            Fetched::Object(obj) => Ok(obj),
            // unconditional reads never produce NotModified
            Fetched::NotModified(_) => Err(StoreError::Unavailable(format!(
                "store answered an unconditional read of {key} with not-modified"
            ))),
        }
    }

    /// Conditional read against the caller's validator.
    pub async fn get_if_none_match(
        &self,
        key: &str,
        if_none_match: Option<&str>,
    ) -> Result<Fetched, StoreError> {
        self.read_with_retry("get", key, || self.store.get(key, if_none_match))
            .await
    }

    /// Single attempt. A missing key is success.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.timed("delete", key, self.store.delete(key)).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Seeds fixtures and serves upstream writers; the sweep never calls it.
    pub async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: BlobMetadata,
    ) -> Result<String, StoreError> {
        self.timed("put", key, self.store.put(key, data, metadata))
            .await
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.timed("health_check", "", self.store.health_check())
            .await
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        key: &str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "{op} {}/{key} timed out after {:?}",
                self.collection, self.config.call_timeout
            ))),
        }
    }

    async fn read_with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        key: &str,
        f: F,
    ) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let policy = &self.config.retry;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.timed(op, key, f()).await {
                Err(e) if e.is_retryable() && policy.should_retry(attempts) => {
                    let delay = policy.next_delay(attempts);
                    tracing::warn!(
                        collection = %self.collection,
                        op,
                        key,
                        attempts,
                        ?delay,
                        error = %e,
                        "store read failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

impl std::fmt::Debug for CollectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionClient")
            .field("collection", &self.collection)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
