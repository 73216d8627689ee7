use std::sync::Arc;

use futures::FutureExt;

use crate::{
    crawler::mops::{revenue, MopsEndpoints},
    database::{
        table::revenue::{self as revenue_table, MonthlyRevenue},
        PostgresSQL,
    },
    declare::Market,
    error::Result,
    logging,
    service::{single_flight::SingleFlight, with_transient_retry},
    util::http::HttpFetcher,
};

/// 月營收服務。以 (年, 月, 市場) 為快取單位，整頁入庫後再按股號過濾。
pub struct RevenueService {
    fetcher: Arc<HttpFetcher>,
    endpoints: Arc<MopsEndpoints>,
    db: Arc<PostgresSQL>,
    flights: SingleFlight<(i32, i32, Market), Vec<MonthlyRevenue>>,
}

impl RevenueService {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        endpoints: Arc<MopsEndpoints>,
        db: Arc<PostgresSQL>,
    ) -> Self {
        RevenueService {
            fetcher,
            endpoints,
            db,
            flights: SingleFlight::new(),
        }
    }

    /// 取得月營收；`stock_id` 提供時只回傳該公司的列。
    pub async fn get_monthly_revenue(
        &self,
        stock_id: Option<&str>,
        year: i32,
        month: i32,
        market: Market,
        force_refresh: bool,
    ) -> Result<Vec<MonthlyRevenue>> {
        if !force_refresh {
            match revenue_table::fetch(&self.db, year, month, market).await {
                Ok(cached) if !cached.is_empty() => {
                    logging::info_file_async(format!(
                        "Cache hit for revenue {}/{} {}",
                        year,
                        month,
                        market.code()
                    ));
                    return Ok(filter_rows(cached, stock_id));
                }
                Ok(_) => {}
                Err(why) => {
                    logging::warn_file_async(format!(
                        "Revenue cache lookup failed for {}/{} {}, falling back to MOPS: {}",
                        year,
                        month,
                        market.code(),
                        why
                    ));
                }
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let endpoints = Arc::clone(&self.endpoints);
        let db = Arc::clone(&self.db);

        let rows = self
            .flights
            .run((year, month, market), move || {
                async move {
                    let rows = with_transient_retry(|| {
                        revenue::visit(&fetcher, &endpoints, year, month, market)
                    })
                    .await?;

                    if let Err(why) = revenue_table::save_rows(&db, &rows).await {
                        logging::error_file_async(format!(
                            "Failed to cache revenue {}/{} {} (non-fatal): {}",
                            year,
                            month,
                            market.code(),
                            why
                        ));
                    }

                    Ok(rows)
                }
                .boxed()
            })
            .await?;

        Ok(filter_rows(rows, stock_id))
    }
}

fn filter_rows(rows: Vec<MonthlyRevenue>, stock_id: Option<&str>) -> Vec<MonthlyRevenue> {
    match stock_id {
        Some(stock_id) => rows
            .into_iter()
            .filter(|row| row.stock_id == stock_id)
            .collect(),
        None => rows,
    }
}
