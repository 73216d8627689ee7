use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

use crate::{
    crawler::mops::{self, MopsEndpoints, RowTally},
    database::table::disclosure::{CrossCompanyGuarantee, DisclosureReport, DisclosureRow},
    declare::Market,
    error::{Error, Result},
    util::{
        http::HttpFetcher,
        text::{parse_financial_value, TextEncoding},
    },
};

const AJAX_ENDPOINT: &str = "ajax_t05st11";

/// 「本資料由　(上市公司) 台積電　公司提供」→ 台積電
static PROVIDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\)\s*(.+?)\s*公司").expect("provider pattern"));

/// 查詢資金貸放與背書保證揭露
pub async fn visit(
    fetcher: &HttpFetcher,
    endpoints: &MopsEndpoints,
    stock_id: &str,
    year: i32,
    month: i32,
    market: Market,
) -> Result<DisclosureReport> {
    let mut params: HashMap<&str, String> = HashMap::new();
    params.insert("encodeURIComponent", "1".to_string());
    params.insert("step", "1".to_string());
    params.insert("firstin", "1".to_string());
    params.insert("off", "1".to_string());
    params.insert("TYPEK", market.code().to_string());
    params.insert("year", year.to_string());
    params.insert("month", month.to_string());
    params.insert("co_id", stock_id.to_string());

    let url = endpoints.ajax(AJAX_ENDPOINT);
    let text = fetcher
        .post_form_text(&url, &params, TextEncoding::Utf8)
        .await?;

    if mops::no_data(&text) {
        return Err(Error::NotFound(format!(
            "{} {}-{:02} disclosure",
            stock_id, year, month
        )));
    }

    parse(&text, stock_id, year, month)
}

/// 解析揭露頁：資金貸放、背書保證與對大陸地區背書保證三個列集，
/// 加上「本公司與子公司間背書保證」的兩個 scalar。
pub fn parse(html: &str, stock_id: &str, year: i32, month: i32) -> Result<DisclosureReport> {
    let document = Html::parse_document(html);
    let tables = mops::extract_tables(&document);
    let mut tally = RowTally::new();

    let mut report = DisclosureReport {
        stock_id: stock_id.to_string(),
        company_name: extract_company_name(&tables),
        year,
        month,
        funds_lending: Vec::new(),
        endorsement_guarantee: Vec::new(),
        china_guarantee: Vec::new(),
        cross_company: None,
    };

    for table in &tables {
        let table_text: String = table
            .iter()
            .flat_map(|cells| cells.iter())
            .cloned()
            .collect();

        if table_text.contains("本公司與子公司間") {
            if let Some(cross) = parse_cross_company(table) {
                report.cross_company = Some(cross);
            }
            continue;
        }

        let is_china = table_text.contains("大陸");

        for cells in table {
            let Some(first) = cells.first() else {
                continue;
            };

            if first.contains("資金貸放餘額") {
                tally.discovered();
                let Some(row) = lending_row(first, cells) else {
                    tally.skip("disclosure", format!("{}: '{}'", stock_id, first));
                    continue;
                };
                report.funds_lending.push(row);
            } else if first.contains("背書保證資訊") {
                tally.discovered();
                let parsed = if is_china {
                    china_row(first, cells)
                } else {
                    endorsement_row(first, cells)
                };
                let Some(row) = parsed else {
                    tally.skip("disclosure", format!("{}: '{}'", stock_id, first));
                    continue;
                };
                if is_china {
                    report.china_guarantee.push(row);
                } else {
                    report.endorsement_guarantee.push(row);
                }
            }
        }
    }

    tally.ensure_within_threshold("disclosure")?;
    Ok(report)
}

fn lending_row(first: &str, cells: &[String]) -> Option<DisclosureRow> {
    if cells.len() < 2 {
        return None;
    }

    Some(DisclosureRow {
        entity: entity_of(first),
        has_balance: has_balance(first),
        current_month: cells.get(1).and_then(|cell| parse_financial_value(Some(cell))),
        previous_month: cells.get(2).and_then(|cell| parse_financial_value(Some(cell))),
        max_limit: cells.get(3).and_then(|cell| parse_financial_value(Some(cell))),
        accumulated_balance: None,
    })
}

fn endorsement_row(first: &str, cells: &[String]) -> Option<DisclosureRow> {
    if cells.len() < 2 {
        return None;
    }

    Some(DisclosureRow {
        entity: entity_of(first),
        has_balance: has_balance(first),
        current_month: cells.get(1).and_then(|cell| parse_financial_value(Some(cell))),
        previous_month: None,
        max_limit: cells.get(3).and_then(|cell| parse_financial_value(Some(cell))),
        accumulated_balance: cells.get(2).and_then(|cell| parse_financial_value(Some(cell))),
    })
}

/// 對大陸地區背書保證：本月增減與累計餘額，沒有額度欄
fn china_row(first: &str, cells: &[String]) -> Option<DisclosureRow> {
    if cells.len() < 2 {
        return None;
    }

    Some(DisclosureRow {
        entity: entity_of(first),
        has_balance: has_balance(first),
        current_month: cells.get(1).and_then(|cell| parse_financial_value(Some(cell))),
        previous_month: None,
        max_limit: None,
        accumulated_balance: cells.get(2).and_then(|cell| parse_financial_value(Some(cell))),
    })
}

fn parse_cross_company(table: &[Vec<String>]) -> Option<CrossCompanyGuarantee> {
    let mut parent_to_subsidiary = None;
    let mut subsidiary_to_parent = None;

    for cells in table {
        let Some(first) = cells.first() else {
            continue;
        };
        if first.contains("本公司對子公司") {
            parent_to_subsidiary = cells.get(1).and_then(|cell| parse_financial_value(Some(cell)));
        } else if first.contains("子公司對本公司") {
            subsidiary_to_parent = cells.get(1).and_then(|cell| parse_financial_value(Some(cell)));
        }
    }

    if parent_to_subsidiary.is_none() && subsidiary_to_parent.is_none() {
        return None;
    }

    Some(CrossCompanyGuarantee {
        parent_to_subsidiary,
        subsidiary_to_parent,
    })
}

fn entity_of(first: &str) -> String {
    if first.contains("本公司") {
        "本公司".to_string()
    } else {
        "子公司".to_string()
    }
}

fn has_balance(first: &str) -> bool {
    first.contains('有') && !first.contains('無')
}

fn extract_company_name(tables: &[Vec<Vec<String>>]) -> String {
    for table in tables {
        for cells in table {
            for cell in cells {
                if cell.contains("公司提供") {
                    if let Some(captures) = PROVIDER_RE.captures(cell) {
                        return captures[1].to_string();
                    }
                }
            }
        }
    }
    String::new()
}
