use std::sync::Arc;

use futures::FutureExt;

use crate::{
    crawler::mops::{dividend, MopsEndpoints},
    database::{
        table::dividend::{self as dividend_table, DividendRecord},
        PostgresSQL,
    },
    error::Result,
    logging,
    service::{single_flight::SingleFlight, with_transient_retry},
    util::http::HttpFetcher,
};

/// 股利分派服務
pub struct DividendService {
    fetcher: Arc<HttpFetcher>,
    endpoints: Arc<MopsEndpoints>,
    db: Arc<PostgresSQL>,
    flights: SingleFlight<(String, i32, i32, i32), Vec<DividendRecord>>,
}

impl DividendService {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        endpoints: Arc<MopsEndpoints>,
        db: Arc<PostgresSQL>,
    ) -> Self {
        DividendService {
            fetcher,
            endpoints,
            db,
            flights: SingleFlight::new(),
        }
    }

    /// 取得股利分派。`query_type`：1=董事會決議年度、2=股利所屬年度。
    pub async fn get_dividend(
        &self,
        stock_id: &str,
        year_start: i32,
        year_end: i32,
        query_type: i32,
        force_refresh: bool,
    ) -> Result<Vec<DividendRecord>> {
        if !force_refresh {
            match dividend_table::fetch(&self.db, stock_id, year_start, year_end).await {
                Ok(cached) if !cached.is_empty() => {
                    logging::info_file_async(format!(
                        "Cache hit for dividends {} {}~{}",
                        stock_id, year_start, year_end
                    ));
                    return Ok(cached);
                }
                Ok(_) => {}
                Err(why) => {
                    logging::warn_file_async(format!(
                        "Dividend cache lookup failed for {} {}~{}, falling back to MOPS: {}",
                        stock_id, year_start, year_end, why
                    ));
                }
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let endpoints = Arc::clone(&self.endpoints);
        let db = Arc::clone(&self.db);
        let stock = stock_id.to_string();

        self.flights
            .run(
                (stock_id.to_string(), year_start, year_end, query_type),
                move || {
                    async move {
                        let rows = with_transient_retry(|| {
                            dividend::visit(
                                &fetcher,
                                &endpoints,
                                &stock,
                                year_start,
                                year_end,
                                query_type,
                            )
                        })
                        .await?;

                        if let Err(why) = dividend_table::save_rows(&db, &rows).await {
                            logging::error_file_async(format!(
                                "Failed to cache dividends {} {}~{} (non-fatal): {}",
                                stock, year_start, year_end, why
                            ));
                        }

                        Ok(rows)
                    }
                    .boxed()
                },
            )
            .await
    }
}
