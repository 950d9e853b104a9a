//! BlobStore port - 外部 blob ストレージ（1 collection 分の key 空間）
//!
//! このクレートはストレージエンジンを実装しない。外部ストアのクライアントとして
//! この trait を介してのみアクセスする。
//!
//! # 実装
//! - **InMemoryBlobStore**: 開発・テスト用
//! - **FsBlobStore**: ローカルディレクトリ

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{BlobMetadata, Fetched, ObjectHead, Page, StoreError};

/// BlobStore は 1 つの collection の key 空間を扱う
///
/// # 設計原則
/// - list はページング（cursor）で返す。全件の統合は CollectionClient の責務
/// - delete は冪等（存在しない key でも Ok）
/// - put のたびに etag が変わる
/// - タイムアウトとリトライは呼び出し側（CollectionClient）で扱う
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Keys in ascending order, starting strictly after `cursor`.
    async fn list_page(&self, cursor: Option<String>, limit: usize) -> Result<Page, StoreError>;

    async fn head(&self, key: &str) -> Result<ObjectHead, StoreError>;

    /// Full read. When `if_none_match` equals the current etag the store
    /// answers `Fetched::NotModified` without the payload.
    async fn get(&self, key: &str, if_none_match: Option<&str>) -> Result<Fetched, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Returns the newly assigned etag.
    async fn put(&self, key: &str, data: Bytes, metadata: BlobMetadata)
    -> Result<String, StoreError>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
