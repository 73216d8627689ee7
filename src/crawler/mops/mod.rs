use scraper::{ElementRef, Html, Selector};

use crate::{
    config,
    declare::Market,
    error::{Error, Result},
    logging,
};

pub mod disclosure;
pub mod dividend;
pub mod pledge;
pub mod revenue;
pub mod xbrl;

/// MOPS 各端點的 URL 組裝
pub struct MopsEndpoints {
    base_url: String,
}

impl MopsEndpoints {
    pub fn new(settings: &config::App) -> Self {
        MopsEndpoints {
            base_url: settings.mops.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn ajax(&self, endpoint: &str) -> String {
        format!("{}/mops/web/{}", self.base_url, endpoint)
    }

    /// 靜態月營收彙總頁，民國年，company_type 0=國內 1=國外
    pub fn revenue_page(&self, market: Market, year: i32, month: i32, company_type: i32) -> String {
        format!(
            "{}/nas/t21/{}/t21sc03_{}_{}_{}.html",
            self.base_url,
            market.code(),
            year,
            month,
            company_type
        )
    }

    /// XBRL 財報封裝下載（西元年），report_id C=合併報表
    pub fn xbrl_download(&self, stock_id: &str, western_year: i32, quarter: i32) -> String {
        format!(
            "{}/server-java/FileDownLoad?functionName=t164sb01&step=9&co_id={}&year={}&season={}&report_id=C",
            self.base_url, stock_id, western_year, quarter
        )
    }
}

/// MOPS 以 200 回應的「查無資料」頁
pub(super) fn no_data(html: &str) -> bool {
    html.contains("查無資料") || html.contains("查無符合資料")
}

/// 把文件裡每個 table 轉成列與儲存格的文字矩陣。
///
/// MOPS 頁面常見巢狀表格；只收直接隸屬於該 table 的列，
/// 避免外層表格重複吃進內層的列。
pub(super) fn extract_tables(document: &Html) -> Vec<Vec<Vec<String>>> {
    let table_selector = Selector::parse("table").expect("table selector");
    let row_selector = Selector::parse("tr").expect("tr selector");
    let cell_selector = Selector::parse("td, th").expect("cell selector");

    let mut tables = Vec::new();

    for table in document.select(&table_selector) {
        let mut rows = Vec::new();

        for row in table.select(&row_selector) {
            if nearest_ancestor(&row, "table") != Some(table.id()) {
                continue;
            }

            let mut cells = Vec::new();
            for cell in row.select(&cell_selector) {
                if nearest_ancestor(&cell, "tr") != Some(row.id()) {
                    continue;
                }
                cells.push(cell_text(&cell));
            }

            if !cells.is_empty() {
                rows.push(cells);
            }
        }

        if !rows.is_empty() {
            tables.push(rows);
        }
    }

    tables
}

fn nearest_ancestor(element: &ElementRef<'_>, name: &str) -> Option<ego_tree::NodeId> {
    element.ancestors().find_map(|node| {
        ElementRef::wrap(node)
            .filter(|ancestor| ancestor.value().name() == name)
            .map(|ancestor| ancestor.id())
    })
}

/// 儲存格文字：合併子節點、去除全形空白與多餘空白
fn cell_text(cell: &ElementRef<'_>) -> String {
    let raw: String = cell.text().collect();
    raw.replace(['\u{a0}', '\u{3000}'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 表格列解析的成功 / 略過統計。
///
/// 個別列解析失敗只略過並記警告；
/// 略過數超過發現列數的 25% 時整批視為格式漂移，回報解析錯誤。
pub(super) struct RowTally {
    discovered: usize,
    skipped: usize,
}

impl RowTally {
    pub(super) fn new() -> Self {
        RowTally {
            discovered: 0,
            skipped: 0,
        }
    }

    pub(super) fn discovered(&mut self) {
        self.discovered += 1;
    }

    pub(super) fn skip(&mut self, what: &str, detail: String) {
        self.skipped += 1;
        logging::warn_file_async(format!("Skipped unparsable {} row: {}", what, detail));
    }

    pub(super) fn ensure_within_threshold(&self, what: &str) -> Result<()> {
        if self.discovered > 0 && self.skipped * 4 > self.discovered {
            return Err(Error::Parse(format!(
                "{}: skipped {} of {} discovered rows",
                what, self.skipped, self.discovered
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tables_handles_nesting() {
        let html = r#"<html><body>
<table>
  <tr><td>outer-a</td><td><table><tr><td>inner</td></tr></table></td></tr>
  <tr><td>outer-b</td><td>x</td></tr>
</table>
</body></html>"#;
        let document = Html::parse_document(html);
        let tables = extract_tables(&document);

        assert_eq!(tables.len(), 2);
        // 外層表格不應吃進內層的列
        assert_eq!(tables[0].len(), 2);
        assert_eq!(tables[0][1][0], "outer-b");
        assert_eq!(tables[1][0][0], "inner");
    }

    #[test]
    fn test_cell_text_normalizes_whitespace() {
        let html = "<table><tr><td>  董事長\u{3000}本人 </td></tr></table>";
        let document = Html::parse_document(html);
        let tables = extract_tables(&document);
        assert_eq!(tables[0][0][0], "董事長 本人");
    }

    #[test]
    fn test_row_tally_threshold() {
        let mut tally = RowTally::new();
        for _ in 0..4 {
            tally.discovered();
        }
        tally.skip("test", "row 1".to_string());
        assert!(tally.ensure_within_threshold("test").is_ok());

        tally.skip("test", "row 2".to_string());
        assert!(tally.ensure_within_threshold("test").is_err());
    }

    #[test]
    fn test_no_data_detection() {
        assert!(no_data("<html><body>查無資料</body></html>"));
        assert!(no_data("<html>查無符合資料</html>"));
        assert!(!no_data("<html><table></table></html>"));
    }
}
