use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

use crate::{
    crawler::mops::{self, MopsEndpoints, RowTally},
    database::table::dividend::DividendRecord,
    error::{Error, Result},
    util::{
        http::HttpFetcher,
        text::{parse_financial_value, TextEncoding},
    },
};

const AJAX_ENDPOINT: &str = "ajax_t05st09_2";

/// 「113年第1季」→ 年與季；「112年年度」→ 年，季為 None
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{2,4})年").expect("year pattern"));
static QUARTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"第(\d)季").expect("quarter pattern"));

/// 查詢股利分派。`query_type`：1=董事會決議年度、2=股利所屬年度。
pub async fn visit(
    fetcher: &HttpFetcher,
    endpoints: &MopsEndpoints,
    stock_id: &str,
    year_start: i32,
    year_end: i32,
    query_type: i32,
) -> Result<Vec<DividendRecord>> {
    let mut params: HashMap<&str, String> = HashMap::new();
    params.insert("encodeURIComponent", "1".to_string());
    params.insert("step", "1".to_string());
    params.insert("firstin", "1".to_string());
    params.insert("off", "1".to_string());
    params.insert("isnew", "false".to_string());
    params.insert("co_id", stock_id.to_string());
    params.insert("date1", year_start.to_string());
    params.insert("date2", year_end.to_string());
    params.insert("qryType", query_type.to_string());

    let url = endpoints.ajax(AJAX_ENDPOINT);
    let text = fetcher
        .post_form_text(&url, &params, TextEncoding::Utf8)
        .await?;

    if mops::no_data(&text) {
        return Err(Error::NotFound(format!(
            "{} {}~{} dividends",
            stock_id, year_start, year_end
        )));
    }

    parse(&text, stock_id)
}

/// 解析股利分派表。
///
/// 目標表格以「股利所屬期間」「現金股利」辨識；
/// 一列一期，年度配息的季度為 None。
/// 現金與股票股利同時缺值視為必填欄位失敗，計入略過統計。
pub fn parse(html: &str, stock_id: &str) -> Result<Vec<DividendRecord>> {
    let document = Html::parse_document(html);
    let mut records = Vec::new();
    let mut tally = RowTally::new();

    for table in mops::extract_tables(&document) {
        let table_text: String = table
            .iter()
            .flat_map(|cells| cells.iter())
            .cloned()
            .collect();
        if !table_text.contains("股利所屬期間") && !table_text.contains("現金股利") {
            continue;
        }

        for cells in &table {
            if cells.len() < 8 {
                continue;
            }

            let first = cells[0].trim();
            if first.is_empty() || first.contains("股利") || first.contains("期間") {
                continue;
            }

            let period = cells[1].trim();
            let Some(year) = extract_year(period) else {
                continue;
            };

            tally.discovered();

            let cash_dividend = parse_financial_value(Some(&cells[6]));
            let stock_dividend = parse_financial_value(Some(&cells[7]));
            if cash_dividend.is_none() && stock_dividend.is_none() {
                tally.skip(
                    "dividend",
                    format!("{} {}: '{}' / '{}'", stock_id, period, cells[6], cells[7]),
                );
                continue;
            }

            let board_resolution_date = cells
                .get(2)
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty() && *cell != "-")
                .map(|cell| cell.to_string());

            records.push(DividendRecord {
                stock_id: stock_id.to_string(),
                year,
                quarter: extract_quarter(period),
                cash_dividend,
                stock_dividend,
                board_resolution_date,
            });
        }
    }

    tally.ensure_within_threshold("dividend")?;
    Ok(records)
}

fn extract_year(period: &str) -> Option<i32> {
    YEAR_RE
        .captures(period)
        .and_then(|captures| captures[1].parse().ok())
}

fn extract_quarter(period: &str) -> Option<i32> {
    QUARTER_RE
        .captures(period)
        .and_then(|captures| captures[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;

    const FIXTURE: &str = r#"<html><body>
<table>
  <tr><td>股利年度</td><td>股利所屬期間</td><td>董事會決議日期</td><td>股東會日期</td>
      <td>期別</td><td>盈餘分配</td><td>現金股利</td><td>股票股利</td></tr>
  <tr><td>112</td><td>112年第1季</td><td>112/05/09</td><td>-</td><td>1</td><td>盈餘</td><td>3.00</td><td>0.00</td></tr>
  <tr><td>112</td><td>112年第2季</td><td>112/08/08</td><td>-</td><td>2</td><td>盈餘</td><td>3.00</td><td>0.00</td></tr>
  <tr><td>112</td><td>112年第3季</td><td>112/11/14</td><td>-</td><td>3</td><td>盈餘</td><td>3.50</td><td>0.00</td></tr>
  <tr><td>112</td><td>112年第4季</td><td>113/02/15</td><td>-</td><td>4</td><td>盈餘</td><td>3.50</td><td>0.00</td></tr>
</table>
</body></html>"#;

    /// 季配息公司一年四列，現金股利合計 13.0
    #[test]
    fn test_parse_quarterly_dividends() {
        let records = parse(FIXTURE, "2330").unwrap();
        assert_eq!(records.len(), 4);

        let quarters: Vec<Option<i32>> = records.iter().map(|record| record.quarter).collect();
        assert_eq!(quarters, vec![Some(1), Some(2), Some(3), Some(4)]);
        assert!(records.iter().all(|record| record.year == 112));

        let total_cash: Decimal = records
            .iter()
            .filter_map(|record| record.cash_dividend)
            .sum();
        assert!((total_cash - dec!(13.0)).abs() < dec!(0.0005));

        assert_eq!(
            records[0].board_resolution_date.as_deref(),
            Some("112/05/09")
        );
    }

    #[test]
    fn test_parse_annual_dividend() {
        let html = r#"<table>
  <tr><td>年度</td><td>股利所屬期間</td><td>董事會決議日期</td><td>x</td><td>x</td><td>x</td><td>現金股利</td><td>股票股利</td></tr>
  <tr><td>101</td><td>101年年度</td><td>102/02/05</td><td>x</td><td>x</td><td>x</td><td>3.00</td><td>0.00</td></tr>
</table>"#;
        let records = parse(html, "2330").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].year, 101);
        assert_eq!(records[0].quarter, None);
    }

    #[test]
    fn test_extract_period() {
        assert_eq!(extract_year("113年第1季"), Some(113));
        assert_eq!(extract_quarter("113年第1季"), Some(1));
        assert_eq!(extract_year("112年年度"), Some(112));
        assert_eq!(extract_quarter("112年年度"), None);
        assert_eq!(extract_year("不適用"), None);
    }
}
