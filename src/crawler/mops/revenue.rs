use scraper::Html;

use crate::{
    crawler::mops::{self, MopsEndpoints, RowTally},
    database::table::revenue::MonthlyRevenue,
    declare::Market,
    error::{Error, Result},
    util::{
        http::HttpFetcher,
        text::{parse_financial_value, TextEncoding},
    },
};

/// 下載月營收彙總表。
///
/// 同一市場有國內（0）與國外（1）兩張頁，合併回傳；
/// 兩張都抓不到資料時回報 NotFound。
pub async fn visit(
    fetcher: &HttpFetcher,
    endpoints: &MopsEndpoints,
    year: i32,
    month: i32,
    market: Market,
) -> Result<Vec<MonthlyRevenue>> {
    let mut revenues = Vec::with_capacity(1024);
    let mut last_not_found: Option<Error> = None;

    for company_type in 0..2 {
        let url = endpoints.revenue_page(market, year, month, company_type);

        match fetcher.get_text(&url, TextEncoding::Big5).await {
            Ok(text) => {
                if mops::no_data(&text) {
                    last_not_found = Some(Error::NotFound(url));
                    continue;
                }
                revenues.extend(parse(&text, year, month, market)?);
            }
            Err(Error::NotFound(url)) => {
                last_not_found = Some(Error::NotFound(url));
            }
            Err(why) => return Err(why),
        }
    }

    if revenues.is_empty() {
        if let Some(not_found) = last_not_found {
            return Err(not_found);
        }
    }

    Ok(revenues)
}

/// 解析月營收 HTML（每個產業一張表）。
///
/// 資料列以「股號長相」辨識：4~6 碼英數、首碼為數字；
/// 標題與合計列無聲略過，股號合法但必填欄位解析失敗的列計入略過統計。
pub fn parse(html: &str, year: i32, month: i32, market: Market) -> Result<Vec<MonthlyRevenue>> {
    let document = Html::parse_document(html);
    let mut revenues = Vec::with_capacity(1024);
    let mut tally = RowTally::new();

    for table in mops::extract_tables(&document) {
        for cells in table {
            if cells.len() < 10 {
                continue;
            }

            let stock_id = cells[0].trim();
            if !looks_like_stock_id(stock_id) {
                continue;
            }

            tally.discovered();

            // 當月營收是必填欄位
            let Some(revenue) = parse_financial_value(Some(&cells[2])) else {
                tally.skip(
                    "revenue",
                    format!("{} {}/{}: monthly revenue '{}'", stock_id, year, month, cells[2]),
                );
                continue;
            };

            let comment = cells
                .get(10)
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty() && *cell != "-")
                .map(|cell| cell.to_string());

            revenues.push(MonthlyRevenue {
                stock_id: stock_id.to_string(),
                company_name: cells[1].trim().to_string(),
                year,
                month,
                market,
                revenue: Some(revenue),
                revenue_last_month: parse_financial_value(Some(&cells[3])),
                revenue_last_year: parse_financial_value(Some(&cells[4])),
                mom_change: parse_financial_value(Some(&cells[5])),
                yoy_change: parse_financial_value(Some(&cells[6])),
                accumulated_revenue: parse_financial_value(Some(&cells[7])),
                accumulated_last_year: parse_financial_value(Some(&cells[8])),
                accumulated_yoy_change: parse_financial_value(Some(&cells[9])),
                comment,
            });
        }
    }

    tally.ensure_within_threshold("monthly revenue")?;
    Ok(revenues)
}

/// 4~6 碼英數且首碼為數字
fn looks_like_stock_id(candidate: &str) -> bool {
    (4..=6).contains(&candidate.len())
        && candidate.chars().all(|c| c.is_ascii_alphanumeric())
        && candidate
            .chars()
            .next()
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const FIXTURE: &str = r#"<html><body><center>
<table>
  <tr><th>公司代號</th><th>公司名稱</th><th>當月營收</th><th>上月營收</th><th>去年當月營收</th>
      <th>上月比較增減(%)</th><th>去年同月增減(%)</th><th>當月累計營收</th><th>去年累計營收</th>
      <th>前期比較增減(%)</th><th>備註</th></tr>
  <tr><td>2330</td><td>台積電</td><td>278,163,107</td><td>276,058,180</td><td>176,299,866</td>
      <td>0.76</td><td>57.77</td><td>2,894,307,699</td><td>2,161,735,841</td><td>33.89</td><td>-</td></tr>
  <tr><td>2317</td><td>鴻海</td><td>654,834,518</td><td>672,526,672</td><td>461,307,469</td>
      <td>-2.63</td><td>41.95</td><td>6,859,559,149</td><td>6,162,221,416</td><td>11.32</td><td>-</td></tr>
  <tr><td>9999</td><td>壞資料公司</td><td>—</td><td>1</td><td>1</td>
      <td>0</td><td>0</td><td>1</td><td>1</td><td>0</td><td>-</td></tr>
  <tr><td>合計</td><td></td><td>933,000,000</td><td>948,584,852</td><td>637,607,335</td>
      <td>-1.64</td><td>46.33</td><td>9,753,866,848</td><td>8,323,957,257</td><td>17.17</td><td></td></tr>
</table>
</center></body></html>"#;

    #[test]
    fn test_parse_revenue_rows() {
        let rows = parse(FIXTURE, 113, 12, Market::Listed).unwrap();
        assert_eq!(rows.len(), 2);

        let tsmc = rows.iter().find(|row| row.stock_id == "2330").unwrap();
        assert_eq!(tsmc.company_name, "台積電");
        assert_eq!(tsmc.revenue, Some(dec!(278163107)));
        assert_eq!(tsmc.yoy_change, Some(dec!(57.77)));
        assert_eq!(tsmc.accumulated_revenue, Some(dec!(2894307699)));
        assert_eq!(tsmc.comment, None);
    }

    #[test]
    fn test_parse_skips_summary_and_bad_rows() {
        let rows = parse(FIXTURE, 113, 12, Market::Listed).unwrap();
        // 合計列與營收為全形破折號的列都不應出現
        assert!(rows.iter().all(|row| row.stock_id != "合計"));
        assert!(rows.iter().all(|row| row.stock_id != "9999"));
    }

    #[test]
    fn test_parse_fails_on_systemic_drift() {
        // 三列裡兩列的必填欄位壞掉，超過 25% 門檻
        let drifted = r#"<table>
  <tr><td>2330</td><td>A</td><td>—</td><td>1</td><td>1</td><td>0</td><td>0</td><td>1</td><td>1</td><td>0</td></tr>
  <tr><td>2317</td><td>B</td><td>—</td><td>1</td><td>1</td><td>0</td><td>0</td><td>1</td><td>1</td><td>0</td></tr>
  <tr><td>2454</td><td>C</td><td>100</td><td>1</td><td>1</td><td>0</td><td>0</td><td>1</td><td>1</td><td>0</td></tr>
</table>"#;
        assert!(matches!(
            parse(drifted, 113, 12, Market::Listed),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_looks_like_stock_id() {
        assert!(looks_like_stock_id("2330"));
        assert!(looks_like_stock_id("00878"));
        assert!(!looks_like_stock_id("合計"));
        assert!(!looks_like_stock_id("330"));
        assert!(!looks_like_stock_id("A2330"));
    }
}
