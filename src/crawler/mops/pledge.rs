use std::collections::HashMap;

use scraper::Html;

use crate::{
    crawler::mops::{self, MopsEndpoints, RowTally},
    database::table::share_pledge::SharePledge,
    declare::Market,
    error::{Error, Result},
    util::{
        http::HttpFetcher,
        text::{parse_financial_value, parse_percentage, TextEncoding},
    },
};

const AJAX_ENDPOINT: &str = "ajax_stapap1";

/// 查詢單一公司的董監事質押明細
pub async fn visit(
    fetcher: &HttpFetcher,
    endpoints: &MopsEndpoints,
    stock_id: &str,
    year: i32,
    month: i32,
    market: Market,
) -> Result<Vec<SharePledge>> {
    let month_padded = format!("{:02}", month);
    let mut params: HashMap<&str, String> = HashMap::new();
    params.insert("encodeURIComponent", "1".to_string());
    params.insert("step", "1".to_string());
    params.insert("firstin", "1".to_string());
    params.insert("off", "1".to_string());
    params.insert("TYPEK", market.code().to_string());
    params.insert("year", year.to_string());
    params.insert("month", month_padded);
    params.insert("co_id", stock_id.to_string());

    let url = endpoints.ajax(AJAX_ENDPOINT);
    let text = fetcher
        .post_form_text(&url, &params, TextEncoding::Utf8)
        .await?;

    if mops::no_data(&text) {
        return Err(Error::NotFound(format!(
            "{} {}-{:02} pledging",
            stock_id, year, month
        )));
    }

    parse(&text, stock_id, year, month)
}

/// 解析質押明細表。
///
/// 職稱欄附帶「本人 / 配偶」，拆出 relationship；
/// 目前持股是必填欄位，解析失敗的列計入略過統計。
pub fn parse(html: &str, stock_id: &str, year: i32, month: i32) -> Result<Vec<SharePledge>> {
    let document = Html::parse_document(html);
    let tables = mops::extract_tables(&document);

    let company_name = extract_company_name(&tables, stock_id);
    let mut details = Vec::new();
    let mut tally = RowTally::new();

    for table in &tables {
        if !is_detail_table(table) {
            continue;
        }

        for cells in table {
            if cells.len() < 6 {
                continue;
            }

            let raw_title = cells[0].trim();
            if raw_title.is_empty() || raw_title.contains("職稱") || raw_title.contains("持股") {
                continue;
            }

            let name = cells[1].trim();
            if name.is_empty() || name == "姓名" {
                continue;
            }

            tally.discovered();

            let (title, relationship) = split_relationship(raw_title);

            let Some(current_shares) = parse_financial_value(Some(&cells[3])) else {
                tally.skip(
                    "pledge",
                    format!("{} {}: current shares '{}'", stock_id, name, cells[3]),
                );
                continue;
            };

            details.push(SharePledge {
                stock_id: stock_id.to_string(),
                company_name: company_name.clone(),
                year,
                month,
                title,
                relationship,
                name: name.to_string(),
                shares_at_election: parse_financial_value(Some(&cells[2])),
                current_shares: Some(current_shares),
                pledged_shares: parse_financial_value(Some(&cells[4])),
                pledge_ratio: parse_percentage(Some(&cells[5])),
            });
        }
    }

    tally.ensure_within_threshold("share pledging")?;
    Ok(details)
}

/// 明細表以標題列的「職稱」「姓名」辨識
fn is_detail_table(table: &[Vec<String>]) -> bool {
    table.iter().any(|cells| {
        cells
            .first()
            .map(|cell| cell.contains("職稱"))
            .unwrap_or(false)
            && cells.iter().any(|cell| cell.contains("姓名"))
    })
}

/// 「董事長 本人」→ ("董事長", "本人")
fn split_relationship(raw_title: &str) -> (String, String) {
    let compact: String = raw_title.split_whitespace().collect();

    if let Some(title) = compact.strip_suffix("配偶") {
        return (title.to_string(), "配偶".to_string());
    }

    let title = compact.strip_suffix("本人").unwrap_or(&compact);
    (title.to_string(), "本人".to_string())
}

/// 第一張表的首格通常是「2330台灣積體電路製造股份有限公司」
fn extract_company_name(tables: &[Vec<Vec<String>>], stock_id: &str) -> String {
    for table in tables {
        for cells in table {
            if let Some(first) = cells.first() {
                let compact: String = first.split_whitespace().collect();
                if let Some(name) = compact.strip_prefix(stock_id) {
                    if !name.is_empty() {
                        return name.to_string();
                    }
                }
            }
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const FIXTURE: &str = r#"<html><body>
<table><tr><td>2330台灣積體電路製造股份有限公司</td></tr></table>
<table>
  <tr><td>職稱</td><td>姓名</td><td>選任時持股</td><td>目前持股</td><td>設質股數</td><td>設質比例</td></tr>
  <tr><td>董事長 本人</td><td>魏哲家</td><td>6,394,698</td><td>6,394,698</td><td>1,600,000</td><td>25.02%</td></tr>
  <tr><td>董事 本人</td><td>劉德音</td><td>12,118,784</td><td>12,118,784</td><td>0</td><td>0.00%</td></tr>
  <tr><td>董事 配偶</td><td>某配偶</td><td>1,000</td><td>1,000</td><td>0</td><td>0.00%</td></tr>
</table>
</body></html>"#;

    #[test]
    fn test_parse_pledging_details() {
        let rows = parse(FIXTURE, "2330", 113, 12).unwrap();
        assert_eq!(rows.len(), 3);

        let chairman = rows
            .iter()
            .find(|row| row.name == "魏哲家")
            .expect("chairman row");
        assert!(chairman.title.contains("董事長"));
        assert_eq!(chairman.relationship, "本人");
        assert_eq!(chairman.pledged_shares, Some(dec!(1600000)));
        assert_eq!(chairman.company_name, "台灣積體電路製造股份有限公司");

        // 設質比例與 25.02 的誤差在 0.005 內
        let ratio = chairman.pledge_ratio.unwrap();
        assert!((ratio - dec!(25.02)).abs() < dec!(0.005));

        let spouse = rows.iter().find(|row| row.name == "某配偶").unwrap();
        assert_eq!(spouse.relationship, "配偶");
        assert_eq!(spouse.title, "董事");
    }

    #[test]
    fn test_split_relationship() {
        assert_eq!(
            split_relationship("董事長 本人"),
            ("董事長".to_string(), "本人".to_string())
        );
        assert_eq!(
            split_relationship("獨立董事本人"),
            ("獨立董事".to_string(), "本人".to_string())
        );
        assert_eq!(
            split_relationship("董事 配偶"),
            ("董事".to_string(), "配偶".to_string())
        );
    }
}
