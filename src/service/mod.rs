//! # 服務層（read-through cache façade）
//!
//! 每個端點一個服務，統一的讀取流程：
//! 1. 非強制更新時先查資料庫，命中即回
//! 2. 未命中走上游抓取與解析（暫時性失敗重試兩次，間隔 1 秒與 4 秒）
//! 3. 寫入資料庫；寫入失敗記錄後仍回傳新解析的結果
//!
//! 同鍵的並行請求以 [`single_flight::SingleFlight`] 合流，
//! 每個鍵同時最多一次上游抓取。

use std::time::Duration;

use tokio_retry::RetryIf;

use crate::error::{Error, Result};

pub mod disclosure;
pub mod dividend;
pub mod financial;
pub mod insiders;
pub mod revenue;
pub mod single_flight;

/// 暫時性失敗的重試節奏：1 秒、4 秒
const BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(4)];

/// 只對 TransientFetch 重試，其餘錯誤直接回報
pub(crate) async fn with_transient_retry<T, A, Fut>(action: A) -> Result<T>
where
    A: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    RetryIf::spawn(BACKOFF.iter().copied(), action, |why: &Error| {
        why.is_transient()
    })
    .await
}
