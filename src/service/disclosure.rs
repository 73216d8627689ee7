use std::sync::Arc;

use futures::FutureExt;

use crate::{
    crawler::mops::{disclosure, MopsEndpoints},
    database::{
        table::disclosure::{self as disclosure_table, DisclosureReport},
        PostgresSQL,
    },
    declare::Market,
    error::Result,
    logging,
    service::{single_flight::SingleFlight, with_transient_retry},
    util::http::HttpFetcher,
};

/// 資金貸放與背書保證揭露服務
pub struct DisclosureService {
    fetcher: Arc<HttpFetcher>,
    endpoints: Arc<MopsEndpoints>,
    db: Arc<PostgresSQL>,
    flights: SingleFlight<(String, i32, i32, Market), DisclosureReport>,
}

impl DisclosureService {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        endpoints: Arc<MopsEndpoints>,
        db: Arc<PostgresSQL>,
    ) -> Self {
        DisclosureService {
            fetcher,
            endpoints,
            db,
            flights: SingleFlight::new(),
        }
    }

    pub async fn get_disclosure(
        &self,
        stock_id: &str,
        year: i32,
        month: i32,
        market: Market,
        force_refresh: bool,
    ) -> Result<DisclosureReport> {
        if !force_refresh {
            match disclosure_table::fetch(&self.db, stock_id, year, month).await {
                Ok(Some(cached)) => {
                    logging::info_file_async(format!(
                        "Cache hit for disclosure {} {}-{:02}",
                        stock_id, year, month
                    ));
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(why) => {
                    logging::warn_file_async(format!(
                        "Disclosure cache lookup failed for {} {}-{:02}, falling back to MOPS: {}",
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
                    let report = with_transient_retry(|| {
                        disclosure::visit(&fetcher, &endpoints, &stock, year, month, market)
                    })
                    .await?;

                    if let Err(why) = disclosure_table::save_report(&db, &report).await {
                        logging::error_file_async(format!(
                            "Failed to cache disclosure {} {}-{:02} (non-fatal): {}",
                            stock, year, month, why
                        ));
                    }

                    Ok(report)
                }
                .boxed()
            })
            .await
    }
}
