//! Impls - BlobStore port の実装
//!
//! # 含まれる実装
//! - **InMemoryBlobStore**: 開発・テスト用（障害注入つき）
//! - **FsBlobStore**: ローカルディレクトリ
//!
//! リモートのオブジェクトストア実装は別クレートに置く想定。

pub mod fs_blob_store;
pub mod inmem_blob_store;

pub use self::fs_blob_store::FsBlobStore;
pub use self::inmem_blob_store::InMemoryBlobStore;
