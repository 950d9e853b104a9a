//! stash-core
//!
//! Blob retention for the `shares` / `assets` collections.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（collection, entry, retention, report, errors）
//! - **ports**: 抽象化レイヤー（BlobStore, Clock）
//! - **impls**: BlobStore の実装（InMemory, Fs）
//! - **app**: CollectionClient, RetrievalService, SweepCoordinator, GcLoop
//! - **http**: axum ルーター
//! - **config**: 実行時設定

pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod impls;
pub mod ports;

pub use app::{CollectionClient, GcLoop, RetrievalService, SweepCoordinator};
pub use config::StashConfig;
pub use domain::{BlobMetadata, Collection, SweepReport};
