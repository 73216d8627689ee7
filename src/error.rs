//! 錯誤類型定義。
//!
//! 整個服務共用一個錯誤列舉，各層依種類決定重試與對外回應策略：
//! 暫時性抓取失敗可由服務層重試，404 與解析錯誤則直接回報。

use std::sync::Arc;

use thiserror::Error;

/// 服務層與解析層共用的錯誤列舉。
///
/// 變體刻意只攜帶字串描述，讓整個列舉可以 `Clone`，
/// 以便 single-flight 把同一個結果發布給所有等待者。
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// 網路層或上游 5xx 造成的暫時性失敗，可重試。
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// 上游回應 404，資料不存在（含 MOPS 的「查無資料」頁）。
    #[error("not found: {0}")]
    NotFound(String),

    /// 上游回應 4xx（404 除外），不可重試。
    #[error("client error {status}: {url}")]
    Client { status: u16, url: String },

    /// XBRL ZIP 無法解開或找不到 instance 文件。
    #[error("malformed xbrl package: {0}")]
    MalformedPackage(String),

    /// XML / HTML 解析失敗，或表格列解析失敗率超過門檻。
    #[error("parse failure: {0}")]
    Parse(String),

    /// Taxonomy 解析失敗。呼叫端應降級為警告後繼續。
    #[error("taxonomy resolution failure: {0}")]
    Taxonomy(String),

    /// 資料庫存取失敗。服務層記錄後仍回傳新解析的結果。
    #[error("storage failure: {0}")]
    Storage(String),

    /// 操作被取消。不轉換、原樣往外傳。
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// 此錯誤是否值得由服務層重試。
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientFetch(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(why: sqlx::Error) -> Self {
        Error::Storage(why.to_string())
    }
}

impl From<Arc<Error>> for Error {
    fn from(shared: Arc<Error>) -> Self {
        shared.as_ref().clone()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient() {
        assert!(Error::TransientFetch("timeout".to_string()).is_transient());
        assert!(!Error::NotFound("t21sc03_113_12_0.html".to_string()).is_transient());
        assert!(!Error::Parse("bad xml".to_string()).is_transient());
    }
}
