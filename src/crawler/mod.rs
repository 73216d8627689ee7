//! # 資料採集模組 (Crawler Module)
//!
//! 負責從公開資訊觀測站（MOPS）採集上市櫃公司的申報資料，
//! 包含 XBRL 財報封裝下載與四個 HTML/AJAX 端點的表格爬蟲。
//!
//! ## 主要功能
//!
//! - **XBRL 下載**：`t164sb01` FileDownLoad 端點，回傳 ZIP 或 iXBRL
//! - **月營收**：`/nas/t21/` 靜態彙總頁（Big5 編碼）
//! - **董監質押**：`ajax_stapap1`
//! - **股利分派**：`ajax_t05st09_2`（支援季配息）
//! - **資金貸放與背書保證**：`ajax_t05st11`
//!
//! 所有爬蟲的 `parse` 都是 HTML 加查詢脈絡的純函數，
//! 容忍個別列解析失敗，失敗率超過 25% 才整批作廢。

pub mod mops;
