use crate::{
    crawler::mops::MopsEndpoints,
    declare::Quarter,
    error::{Error, Result},
    logging,
    util::http::HttpFetcher,
};

/// 下載 XBRL 財報封裝（ZIP 或 iXBRL HTML）。
///
/// MOPS 對不存在的報表會以 200 回應錯誤頁；
/// 內容既不是 ZIP 也沒有 iXBRL 標記時視為查無資料。
pub async fn download(
    fetcher: &HttpFetcher,
    endpoints: &MopsEndpoints,
    stock_id: &str,
    year: i32,
    quarter: Quarter,
) -> Result<Vec<u8>> {
    let western_year = year + 1911;
    let url = endpoints.xbrl_download(stock_id, western_year, quarter.serial());

    let content = fetcher.get_bytes(&url).await?;

    if content.starts_with(b"PK") {
        logging::info_file_async(format!(
            "Downloaded XBRL zip for {} {}Q{} ({} bytes)",
            stock_id,
            year,
            quarter.serial(),
            content.len()
        ));
        return Ok(content);
    }

    if is_ixbrl(&content) {
        logging::info_file_async(format!(
            "Downloaded iXBRL for {} {}Q{} ({} bytes)",
            stock_id,
            year,
            quarter.serial(),
            content.len()
        ));
        return Ok(content);
    }

    Err(Error::NotFound(format!(
        "{} {}Q{}: MOPS returned neither zip nor iXBRL",
        stock_id,
        year,
        quarter.serial()
    )))
}

fn is_ixbrl(content: &[u8]) -> bool {
    contains(content, b"ix:nonFraction") || contains(content, b"ix:nonNumeric")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ixbrl() {
        assert!(is_ixbrl(b"<html><ix:nonFraction>1</ix:nonFraction></html>"));
        assert!(!is_ixbrl(b"<html><body>error page</body></html>"));
    }
}
