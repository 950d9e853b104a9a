//! Collection - ストアのキー空間（shares / assets）

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Collection は blob store の名前付きパーティション
///
/// 各 collection は独立した key 空間を持つ。
/// retention policy は collection ごとに期限なしエントリの扱いが異なる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Shares,
    Assets,
}

impl Collection {
    /// Sweep order.
    pub const ALL: [Collection; 2] = [Collection::Shares, Collection::Assets];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Shares => "shares",
            Collection::Assets => "assets",
        }
    }

    /// Singular noun used in user-facing messages ("Missing asset id").
    pub fn singular(&self) -> &'static str {
        match self {
            Collection::Shares => "share",
            Collection::Assets => "asset",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collection: {0} (expected `shares` or `assets`)")]
pub struct UnknownCollection(pub String);

impl FromStr for Collection {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shares" | "share" => Ok(Collection::Shares),
            "assets" | "asset" => Ok(Collection::Assets),
            other => Err(UnknownCollection(other.to_string())),
        }
    }
}
