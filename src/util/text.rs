use std::str::FromStr;

use anyhow::{anyhow, Result};
use encoding::{DecoderTrap, Encoding};
use rust_decimal::Decimal;

/// MOPS 用來表示「無資料」的字串：半形、全形破折號與 en-dash
const NULL_MARKERS: &[&str] = &["-", "—", "–"];

/// 解析財報數值字串。
///
/// 這是全系統唯一的數值解析入口，規則依序為：
/// 1. 輸入不存在 → `None`
/// 2. 去除前後空白、移除千分位逗號
/// 3. 空字串或破折號（半形/全形/en-dash）→ `None`
/// 4. 以 `Decimal` 解析，失敗 → `None`
///
/// 永不回傳錯誤；呼叫端把 `None` 當作「缺值」處理。
///
/// # Example
///
/// ```
/// use mops_crawler::util::text::parse_financial_value;
/// use rust_decimal::Decimal;
///
/// assert_eq!(
///     parse_financial_value(Some("1,234,567")),
///     Some(Decimal::from(1234567))
/// );
/// assert_eq!(parse_financial_value(Some("—")), None);
/// ```
pub fn parse_financial_value(input: Option<&str>) -> Option<Decimal> {
    let raw = input?;
    let cleaned = raw.trim().replace(',', "");

    if cleaned.is_empty() || NULL_MARKERS.contains(&cleaned.as_str()) {
        return None;
    }

    Decimal::from_str(&cleaned).ok()
}

/// 解析百分比字串（例："25.02%"），移除百分號後走 [`parse_financial_value`]。
pub fn parse_percentage(input: Option<&str>) -> Option<Decimal> {
    let cleaned = input?.replace('%', "");
    parse_financial_value(Some(&cleaned))
}

/// Converts a Big5 encoded `&[u8]` to a UTF-8 `String`.
///
/// 使用 BIG5_2003 解碼後重新以 UTF-8 驗證，任一步失敗即回傳錯誤。
pub fn big5_2_utf8(data: &[u8]) -> Result<String> {
    let big5 = encoding::all::BIG5_2003
        .decode(data, DecoderTrap::Ignore)
        .map_err(|why| anyhow!(format!("Failed to BIG5_2003.decode because {:?}", why)))?;

    encoding::all::UTF_8
        .decode(big5.as_bytes(), DecoderTrap::Ignore)
        .map_err(|why| anyhow!(format!("Failed to UTF_8.decode because {:?}", why)))
}

/// 回應內文的預期編碼。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TextEncoding {
    Big5,
    Utf8,
}

impl TextEncoding {
    fn other(self) -> Self {
        match self {
            TextEncoding::Big5 => TextEncoding::Utf8,
            TextEncoding::Utf8 => TextEncoding::Big5,
        }
    }

    fn decode(self, data: &[u8]) -> String {
        let codec: &dyn Encoding = match self {
            TextEncoding::Big5 => encoding::all::BIG5_2003,
            TextEncoding::Utf8 => encoding::all::UTF_8,
        };

        codec
            .decode(data, DecoderTrap::Replace)
            .unwrap_or_default()
    }
}

/// 以提示的編碼解碼，當替代字元比例達總位元組數的 1% 時改用另一種編碼。
///
/// MOPS 的靜態月營收頁是 Big5，AJAX 端點是 UTF-8，但兩者偶有例外，
/// 因此以替代字元比例做自動回退。
pub fn decode_with_fallback(data: &[u8], hint: TextEncoding) -> String {
    if data.is_empty() {
        return String::new();
    }

    let decoded = hint.decode(data);
    let replacements = decoded.chars().filter(|c| *c == '\u{FFFD}').count();

    if replacements * 100 >= data.len() {
        let fallback = hint.other().decode(data);
        let fallback_replacements = fallback.chars().filter(|c| *c == '\u{FFFD}').count();
        if fallback_replacements < replacements {
            return fallback;
        }
    }

    decoded
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_parse_financial_value() {
        assert_eq!(parse_financial_value(None), None);
        assert_eq!(parse_financial_value(Some("")), None);
        assert_eq!(parse_financial_value(Some("  ")), None);
        assert_eq!(parse_financial_value(Some("-")), None);
        assert_eq!(parse_financial_value(Some("—")), None);
        assert_eq!(parse_financial_value(Some("–")), None);
        assert_eq!(parse_financial_value(Some("不適用")), None);
        assert_eq!(
            parse_financial_value(Some("1,234,567")),
            Some(dec!(1234567))
        );
        assert_eq!(
            parse_financial_value(Some(" -1,234.56 ")),
            Some(dec!(-1234.56))
        );
        assert_eq!(parse_financial_value(Some("0.00")), Some(dec!(0.00)));
    }

    /// parse(format(parse(x))) == parse(x)
    #[test]
    fn test_parse_financial_value_idempotent() {
        for raw in ["1,234,567", "-42.5", "0", "278,163,107", "13.0000"] {
            let first = parse_financial_value(Some(raw)).unwrap();
            let second = parse_financial_value(Some(&first.to_string())).unwrap();
            assert_eq!(first, second, "not idempotent for {}", raw);
        }
    }

    #[test]
    fn test_parse_percentage() {
        assert_eq!(parse_percentage(Some("25.02%")), Some(dec!(25.02)));
        assert_eq!(parse_percentage(Some("-")), None);
    }

    #[test]
    fn test_big5_round_trip() {
        // "台積電" in Big5
        let big5_bytes: &[u8] = &[0xA5, 0x78, 0xBF, 0x6E, 0xB9, 0x71];
        let utf8 = big5_2_utf8(big5_bytes).unwrap();
        assert_eq!(utf8, "台積電");
    }

    #[test]
    fn test_decode_with_fallback_detects_big5() {
        let big5_bytes: &[u8] = &[0xA5, 0x78, 0xBF, 0x6E, 0xB9, 0x71];
        // 提示給錯（UTF-8），替代字元比例過高時應回退到 Big5
        let decoded = decode_with_fallback(big5_bytes, TextEncoding::Utf8);
        assert_eq!(decoded, "台積電");
    }

    #[test]
    fn test_decode_with_fallback_keeps_clean_utf8() {
        let text = "公司代號 2330";
        let decoded = decode_with_fallback(text.as_bytes(), TextEncoding::Utf8);
        assert_eq!(decoded, text);
    }
}
