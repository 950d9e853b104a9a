//! App - アプリケーション層
//!
//! ports を組み合わせて読み取り経路と sweep を実装する。
//!
//! # 主要コンポーネント
//! - **CollectionClient**: collection 単位のストアファサード（timeout / retry / pagination）
//! - **RetrievalService**: id 指定の読み取り（GET / HEAD / OPTIONS）
//! - **SweepCoordinator**: 期限切れ blob の削除と集計
//! - **GcLoop**: 定期 sweep のトリガー

pub mod client;
pub mod gc_loop;
pub mod retrieval;
pub mod retry;
pub mod sweep;

pub use self::client::CollectionClient;
pub use self::gc_loop::GcLoop;
pub use self::retrieval::{ObjectResponse, RetrievalService};
pub use self::retry::RetryPolicy;
pub use self::sweep::SweepCoordinator;
