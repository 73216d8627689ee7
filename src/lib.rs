//! # mops_crawler
//!
//! 台灣上市櫃公司財務資料的 read-through 快取服務。
//!
//! 從公開資訊觀測站（MOPS）擷取兩類申報資料：
//! - XBRL 財報封裝：解開 ZIP、萃取 iXBRL facts 與 linkbase，組出階層報表
//! - HTML / AJAX 表格：月營收、董監質押、股利分派、資金貸放與背書保證
//!
//! 解析結果存進 PostgreSQL；同一查詢鍵的後續請求直接回快取，
//! `force_refresh` 才重新抓取。

use std::sync::Arc;

use crate::{
    crawler::mops::MopsEndpoints,
    database::PostgresSQL,
    error::Result,
    service::{
        disclosure::DisclosureService, dividend::DividendService, financial::FinancialService,
        insiders::InsiderService, revenue::RevenueService,
    },
    util::http::HttpFetcher,
    xbrl::{backend::ParserStack, taxonomy::TaxonomyResolver},
};

pub mod config;
pub mod crawler;
pub mod database;
pub mod declare;
pub mod error;
pub mod logging;
pub mod service;
pub mod statement;
pub mod util;
pub mod web;
pub mod xbrl;

/// 組合根：所有元件在這裡各建構一次後往下傳。
///
/// 抓取器、解析堆疊、taxonomy 快取與連線池都是實例狀態，
/// 不放模組層級單例；測試可以用自己的設定建出獨立的一組。
pub struct AppContext {
    pub financial: FinancialService,
    pub revenue: RevenueService,
    pub insiders: InsiderService,
    pub dividend: DividendService,
    pub disclosure: DisclosureService,
}

impl AppContext {
    pub fn new(settings: &config::App) -> Result<AppContext> {
        let fetcher = Arc::new(HttpFetcher::new(settings)?);
        let endpoints = Arc::new(MopsEndpoints::new(settings));
        let db = Arc::new(PostgresSQL::new(settings)?);
        let parser = Arc::new(ParserStack::new());
        let taxonomy = Arc::new(TaxonomyResolver::new(Arc::clone(&fetcher), settings));

        Ok(AppContext {
            financial: FinancialService::new(
                Arc::clone(&fetcher),
                Arc::clone(&endpoints),
                Arc::clone(&db),
                parser,
                taxonomy,
            ),
            revenue: RevenueService::new(
                Arc::clone(&fetcher),
                Arc::clone(&endpoints),
                Arc::clone(&db),
            ),
            insiders: InsiderService::new(
                Arc::clone(&fetcher),
                Arc::clone(&endpoints),
                Arc::clone(&db),
            ),
            dividend: DividendService::new(
                Arc::clone(&fetcher),
                Arc::clone(&endpoints),
                Arc::clone(&db),
            ),
            disclosure: DisclosureService::new(fetcher, endpoints, db),
        })
    }
}
