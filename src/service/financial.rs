use std::sync::Arc;

use futures::FutureExt;

use crate::{
    crawler::mops::{xbrl, MopsEndpoints},
    database::{table::financial_report, PostgresSQL},
    declare::{Quarter, StatementKey},
    error::Result,
    logging,
    service::{single_flight::SingleFlight, with_transient_retry},
    statement::{builder, FinancialStatement},
    util::http::HttpFetcher,
    xbrl::{backend::ParserStack, taxonomy, taxonomy::TaxonomyResolver},
};

/// 財務報表服務：下載 XBRL 封裝、解析、建構報表並快取。
pub struct FinancialService {
    fetcher: Arc<HttpFetcher>,
    endpoints: Arc<MopsEndpoints>,
    db: Arc<PostgresSQL>,
    parser: Arc<ParserStack>,
    taxonomy: Arc<TaxonomyResolver>,
    flights: SingleFlight<StatementKey, FinancialStatement>,
}

impl FinancialService {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        endpoints: Arc<MopsEndpoints>,
        db: Arc<PostgresSQL>,
        parser: Arc<ParserStack>,
        taxonomy: Arc<TaxonomyResolver>,
    ) -> Self {
        FinancialService {
            fetcher,
            endpoints,
            db,
            parser,
            taxonomy,
            flights: SingleFlight::new(),
        }
    }

    /// 取得財務報表。
    ///
    /// 未強制更新時先讀快取；未命中或強制更新時走上游，
    /// 解析結果寫回資料庫（寫入失敗不影響回傳）。
    pub async fn get_financial_statement(
        &self,
        key: StatementKey,
        force_refresh: bool,
    ) -> Result<FinancialStatement> {
        if !force_refresh {
            match financial_report::get_report(&self.db, &key).await {
                Ok(Some(cached)) => {
                    logging::info_file_async(format!("Cache hit for {}", key));
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(why) => {
                    logging::warn_file_async(format!(
                        "Cache lookup failed for {}, falling back to MOPS: {}",
                        key, why
                    ));
                }
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let endpoints = Arc::clone(&self.endpoints);
        let db = Arc::clone(&self.db);
        let parser = Arc::clone(&self.parser);
        let resolver = Arc::clone(&self.taxonomy);
        let flight_key = key.clone();

        self.flights
            .run(key, move || {
                async move {
                    let content = with_transient_retry(|| {
                        xbrl::download(
                            &fetcher,
                            &endpoints,
                            &flight_key.stock_id,
                            flight_key.year,
                            flight_key.quarter,
                        )
                    })
                    .await?;

                    let archive = parser.sniff(&content)?;
                    let mut package = parser.parse_archive(&archive)?;

                    // 封裝內沒有 presentation linkbase 時向 taxonomy 快取要一份
                    if package.presentation.is_empty() {
                        let refs = taxonomy::schema_refs(archive.instance_bytes());
                        if !refs.is_empty() {
                            let resolved = resolver.resolve_linkbases(&refs).await;
                            package.calculation.merge(resolved.calculation);
                            package.presentation.merge(resolved.presentation);
                            package.labels.merge(resolved.labels);
                        }
                    }

                    let statement = builder::build(&package, &flight_key);

                    if let Err(why) = financial_report::save_report(&db, &statement).await {
                        logging::error_file_async(format!(
                            "Failed to cache statement {} (non-fatal): {}",
                            flight_key, why
                        ));
                    }

                    Ok(statement)
                }
                .boxed()
            })
            .await
    }

    /// 直接取回 XBRL 封裝原始位元組（不經快取）
    pub async fn download_xbrl_zip(
        &self,
        stock_id: &str,
        year: i32,
        quarter: Quarter,
    ) -> Result<Vec<u8>> {
        with_transient_retry(|| xbrl::download(&self.fetcher, &self.endpoints, stock_id, year, quarter))
            .await
    }
}
