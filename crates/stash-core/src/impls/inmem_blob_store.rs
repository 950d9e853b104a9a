//! InMemoryBlobStore - 開発・テスト用の blob store
//!
//! # 学習ポイント
//! - tokio::sync::RwLock による読み取り並行
//! - BTreeMap で key 順のページングを実現（cursor = 最後に返した key）
//! - 障害注入（到達不能 / 特定 key の delete 失敗 / 遅延）でテストを書きやすくする

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::domain::{BlobMetadata, Fetched, ListedEntry, ObjectHead, Page, StoreError, StoredObject};
use crate::ports::BlobStore;

#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    metadata: BlobMetadata,
    etag: String,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    /// Remaining read calls (list/head/get) that fail with `Unavailable`.
    failing_reads: AtomicU32,
    failing_deletes: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
}

/// InMemoryBlobStore は 1 collection 分のエントリをメモリに保持
///
/// # 使用例
/// ```ignore
/// let store = InMemoryBlobStore::new().with_page_size(2);
/// store.put("a", Bytes::from_static(b"hi"), BlobMetadata::new()).await?;
/// store.fail_delete_for("a");
/// ```
#[derive(Debug)]
pub struct InMemoryBlobStore {
    entries: RwLock<BTreeMap<String, Entry>>,
    max_page_size: usize,
    faults: Faults,
    delete_calls: AtomicU64,
    get_calls: AtomicU64,
    head_calls: AtomicU64,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            max_page_size: usize::MAX,
            faults: Faults::default(),
            delete_calls: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
            head_calls: AtomicU64::new(0),
        }
    }

    /// Cap every page at `n` entries regardless of the requested limit.
    pub fn with_page_size(mut self, n: usize) -> Self {
        self.max_page_size = n.max(1);
        self
    }

    /// Make every call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The next `n` read calls fail with `Unavailable`.
    pub fn fail_next_reads(&self, n: u32) {
        self.faults.failing_reads.store(n, Ordering::SeqCst);
    }

    pub fn fail_delete_for(&self, key: impl Into<String>) {
        self.faults
            .failing_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into());
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.faults.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> u64 {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let latency = *self.faults.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unreachable".into()));
        }
        Ok(())
    }

    async fn enter_read(&self) -> Result<(), StoreError> {
        self.enter().await?;
        let consumed = self
            .faults
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(StoreError::Unavailable("injected transient read failure".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn list_page(&self, cursor: Option<String>, limit: usize) -> Result<Page, StoreError> {
        self.enter_read().await?;
        let limit = limit.clamp(1, self.max_page_size);
        let entries = self.entries.read().await;

        let lower = match &cursor {
            Some(c) => Bound::Excluded(c.clone()),
            None => Bound::Unbounded,
        };
        let mut range = entries.range((lower, Bound::Unbounded));
        let page: Vec<ListedEntry> = range
            .by_ref()
            .take(limit)
            .map(|(key, entry)| ListedEntry {
                key: key.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect();

        let next_cursor = match range.next() {
            Some(_) => page.last().map(|e| e.key.clone()),
            None => None,
        };
        Ok(Page {
            entries: page,
            unreadable: Vec::new(),
            next_cursor,
        })
    }

    async fn head(&self, key: &str) -> Result<ObjectHead, StoreError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.enter_read().await?;
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map(|e| ObjectHead {
                metadata: e.metadata.clone(),
                etag: Some(e.etag.clone()),
            })
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn get(&self, key: &str, if_none_match: Option<&str>) -> Result<Fetched, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.enter_read().await?;
        let entries = self.entries.read().await;
        let entry = entries
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if if_none_match == Some(entry.etag.as_str()) {
            return Ok(Fetched::NotModified(ObjectHead {
                metadata: entry.metadata.clone(),
                etag: Some(entry.etag.clone()),
            }));
        }
        Ok(Fetched::Object(StoredObject {
            data: entry.data.clone(),
            metadata: entry.metadata.clone(),
            etag: Some(entry.etag.clone()),
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let injected = self
            .faults
            .failing_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key);
        if injected {
            return Err(StoreError::Unavailable(format!("injected delete failure for {key}")));
        }
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: BlobMetadata,
    ) -> Result<String, StoreError> {
        self.enter().await?;
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let etag = Ulid::new().to_string();
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                data,
                metadata,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.enter().await
    }
}
