//! Ports - 抽象化レイヤー
//!
//! 外部システム（blob storage, 時刻）へのインターフェース。
//! app 層はこれらの trait だけに依存する。

pub mod blob_store;
pub mod clock;

pub use self::blob_store::BlobStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
