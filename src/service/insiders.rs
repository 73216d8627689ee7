use std::sync::Arc;

use futures::FutureExt;

use crate::{
    crawler::mops::{pledge, MopsEndpoints},
    database::{
        table::share_pledge::{self, SharePledge},
        PostgresSQL,
    },
    declare::Market,
    error::Result,
    logging,
    service::{single_flight::SingleFlight, with_transient_retry},
    util::http::HttpFetcher,
};

/// 董監事質押服務
pub struct InsiderService {
    fetcher: Arc<HttpFetcher>,
    endpoints: Arc<MopsEndpoints>,
    db: Arc<PostgresSQL>,
    flights: SingleFlight<(String, i32, i32, Market), Vec<SharePledge>>,
}

impl InsiderService {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        endpoints: Arc<MopsEndpoints>,
        db: Arc<PostgresSQL>,
    ) -> Self {
        InsiderService {
            fetcher,
            endpoints,
            db,
            flights: SingleFlight::new(),
        }
    }

    pub async fn get_share_pledging(
        &self,
        stock_id: &str,
        year: i32,
        month: i32,
        market: Market,
        force_refresh: bool,
    ) -> Result<Vec<SharePledge>> {
        if !force_refresh {
            match share_pledge::fetch(&self.db, stock_id, year, month).await {
                Ok(cached) if !cached.is_empty() => {
                    logging::info_file_async(format!(
                        "Cache hit for pledging {} {}-{:02}",
                        stock_id, year, month
                    ));
                    return Ok(cached);
                }
                Ok(_) => {}
                Err(why) => {
                    logging::warn_file_async(format!(
                        "Pledging cache lookup failed for {} {}-{:02}, falling back to MOPS: {}",
                        stock_id, year, month, why
                    ));
                }
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let endpoints = Arc::clone(&self.endpoints);
        let db = Arc::clone(&self.db);
        let stock = stock_id.to_string();

        self.flights
            .run((stock_id.to_string(), year, month, market), move || {
                async move {
                    let rows = with_transient_retry(|| {
                        pledge::visit(&fetcher, &endpoints, &stock, year, month, market)
                    })
                    .await?;

                    if let Err(why) = share_pledge::save_rows(&db, &rows).await {
                        logging::error_file_async(format!(
                            "Failed to cache pledging {} {}-{:02} (non-fatal): {}",
                            stock, year, month, why
                        ));
                    }

                    Ok(rows)
                }
                .boxed()
            })
            .await
    }
}
