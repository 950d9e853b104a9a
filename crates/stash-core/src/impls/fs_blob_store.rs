//! FsBlobStore - ローカルディレクトリを使う blob store
//!
//! 1 collection = 1 ディレクトリ。
//! - `<key>.<etag>.bin`: payload（書き込みごとに別ファイル）
//! - `<key>.meta.json`: `{ "metadata": {...}, "etag": "..." }`
//!
//! sidecar の rename が唯一の commit。sidecar が指す etag の payload だけが見える。
//! 古い payload は commit 後に掃除する。

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::domain::{
    BlobMetadata, Fetched, ListedEntry, ObjectHead, Page, StoreError, StoredObject,
    UnreadableEntry,
};
use crate::ports::BlobStore;

const DATA_SUFFIX: &str = ".bin";
const META_SUFFIX: &str = ".meta.json";
const MAX_KEY_LEN: usize = 200;

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    metadata: BlobMetadata,
    etag: String,
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) the directory backing one collection.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, key: &str, etag: &str) -> PathBuf {
        self.root.join(format!("{key}.{etag}{DATA_SUFFIX}"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{META_SUFFIX}"))
    }

    async fn read_sidecar(&self, key: &str) -> Result<Sidecar, StoreError> {
        let raw = tokio::fs::read(self.meta_path(key))
            .await
            .map_err(|e| io_error(key, e))?;
        serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    async fn read_payload(&self, key: &str, etag: &str) -> Result<Bytes, StoreError> {
        tokio::fs::read(self.data_path(key, etag))
            .await
            .map(Bytes::from)
            .map_err(|e| io_error(key, e))
    }

    async fn sorted_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.root.display())))?;
        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        {
            let name = entry.file_name();
            if let Some(name) = name.to_str()
                && let Some(key) = name.strip_suffix(META_SUFFIX)
                && validate_key(key).is_ok()
            {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Payload files of `key` other than the one for `keep`.
    async fn stale_payloads(&self, key: &str, keep: Option<&str>) -> Result<Vec<PathBuf>, StoreError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.root.display())))?;
        let prefix = format!("{key}.");
        let mut stale = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(etag) = name
                .to_str()
                .and_then(|n| n.strip_prefix(prefix.as_str()))
                .and_then(|rest| rest.strip_suffix(DATA_SUFFIX))
            else {
                continue;
            };
            // "<key>.<other>.<etag>.bin" は別キーの payload
            if Ulid::from_string(etag).is_ok() && keep != Some(etag) {
                stale.push(entry.path());
            }
        }
        Ok(stale)
    }

    async fn remove_payloads(&self, key: &str, keep: Option<&str>) -> Result<(), StoreError> {
        for path in self.stale_payloads(key, keep).await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(key, e)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn list_page(&self, cursor: Option<String>, limit: usize) -> Result<Page, StoreError> {
        let keys = self.sorted_keys().await?;
        let start = match &cursor {
            Some(c) => keys.partition_point(|k| k <= c),
            None => 0,
        };
        let limit = limit.max(1);
        let window = &keys[start..keys.len().min(start.saturating_add(limit))];

        let mut page = Page::default();
        for key in window {
            match self.read_sidecar(key).await {
                Ok(sidecar) => page.entries.push(ListedEntry {
                    key: key.clone(),
                    metadata: sidecar.metadata,
                }),
                // deleted between read_dir and read
                Err(StoreError::NotFound(_)) => continue,
                Err(error) => page.unreadable.push(UnreadableEntry {
                    key: key.clone(),
                    error,
                }),
            }
        }

        if start + window.len() < keys.len() {
            page.next_cursor = window.last().cloned();
        }
        Ok(page)
    }

    async fn head(&self, key: &str) -> Result<ObjectHead, StoreError> {
        validate_key(key)?;
        let sidecar = self.read_sidecar(key).await?;
        Ok(ObjectHead {
            metadata: sidecar.metadata,
            etag: Some(sidecar.etag),
        })
    }

    async fn get(&self, key: &str, if_none_match: Option<&str>) -> Result<Fetched, StoreError> {
        validate_key(key)?;
        let mut sidecar = self.read_sidecar(key).await?;
        let mut retried = false;
        loop {
            if if_none_match == Some(sidecar.etag.as_str()) {
                return Ok(Fetched::NotModified(ObjectHead {
                    metadata: sidecar.metadata,
                    etag: Some(sidecar.etag),
                }));
            }
            match self.read_payload(key, &sidecar.etag).await {
                Ok(data) => {
                    return Ok(Fetched::Object(StoredObject {
                        data,
                        metadata: sidecar.metadata,
                        etag: Some(sidecar.etag),
                    }));
                }
                // 上書きされて古い payload が掃除された直後。sidecar を読み直す
                Err(StoreError::NotFound(_)) if !retried => {
                    retried = true;
                    let fresh = self.read_sidecar(key).await?;
                    if fresh.etag == sidecar.etag {
                        return Err(StoreError::Corrupt {
                            key: key.to_string(),
                            message: format!("payload for etag {} is missing", sidecar.etag),
                        });
                    }
                    sidecar = fresh;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        match tokio::fs::remove_file(self.meta_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(key, e)),
        }
        self.remove_payloads(key, None).await
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: BlobMetadata,
    ) -> Result<String, StoreError> {
        validate_key(key)?;
        let etag = Ulid::new().to_string();
        let sidecar = serde_json::to_vec_pretty(&Sidecar {
            metadata,
            etag: etag.clone(),
        })
        .map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let tmp_data = self.root.join(format!(".{key}.{etag}{DATA_SUFFIX}"));
        let tmp_meta = self.root.join(format!(".{key}.{etag}{META_SUFFIX}"));
        let data_path = self.data_path(key, &etag);

        tokio::fs::write(&tmp_data, &data)
            .await
            .map_err(|e| io_error(key, e))?;
        tokio::fs::rename(&tmp_data, &data_path)
            .await
            .map_err(|e| io_error(key, e))?;

        // commit
        let committed = async {
            tokio::fs::write(&tmp_meta, &sidecar).await?;
            tokio::fs::rename(&tmp_meta, self.meta_path(key)).await
        }
        .await;
        if let Err(e) = committed {
            // 未 commit の payload は誰からも参照されない
            let _ = tokio::fs::remove_file(&tmp_meta).await;
            let _ = tokio::fs::remove_file(&data_path).await;
            return Err(io_error(key, e));
        }

        if let Err(e) = self.remove_payloads(key, Some(&etag)).await {
            tracing::warn!(key, error = %e, "failed to remove superseded payloads");
        }
        Ok(etag)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) => Err(StoreError::Unavailable(format!("{}: {e}", self.root.display()))),
        }
    }
}

/// Keys become file names, so anything that could escape the directory or
/// collide with temp files is rejected.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn io_error(key: &str, e: io::Error) -> StoreError {
    match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
        _ => StoreError::Unavailable(format!("{key}: {e}")),
    }
}
