//! Instance 文件解析：facts、contexts 與 units 的萃取。
//!
//! 兩條路徑：
//! - [`parse_xml_instance`]：傳統 `<xbrli:xbrl>` 純 XML instance
//! - [`parse_inline_instance`]：iXBRL，facts 內嵌在 HTML 的
//!   `ix:nonFraction` / `ix:nonNumeric` 元素，HTML 解析器會把
//!   標籤與屬性轉成小寫，兩種拼法都要接受
//!
//! 數值型 fact 在這裡就套用 iXBRL 的 sign / scale 轉換：
//! `final = parsed × (sign == "-" ? −1 : 1) × 10^scale`。

use chrono::NaiveDate;
use hashbrown::HashMap;
use quick_xml::{events::Event, Reader};
use rust_decimal::Decimal;
use scraper::{ElementRef, Html};

use crate::{
    error::{Error, Result},
    util::text::parse_financial_value,
    xbrl::{Period, XbrlContext, XbrlFact},
};

/// facts + contexts + units（unit id → 計價單位）
pub type InstanceParts = (
    Vec<XbrlFact>,
    HashMap<String, XbrlContext>,
    HashMap<String, String>,
);

/// 套用 iXBRL 的 scale 指數（可為負）
pub fn apply_scale(value: Decimal, scale: i32) -> Decimal {
    let mut scaled = value;
    if scale >= 0 {
        for _ in 0..scale {
            scaled *= Decimal::TEN;
        }
    } else {
        for _ in 0..(-scale) {
            scaled /= Decimal::TEN;
        }
    }
    scaled
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = if trimmed.len() > 10 {
        &trimmed[..10]
    } else {
        trimmed
    };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn build_period(
    instant: Option<String>,
    start: Option<String>,
    end: Option<String>,
) -> Option<Period> {
    if let Some(instant) = instant.as_deref().and_then(parse_date) {
        return Some(Period::Instant(instant));
    }

    match (
        start.as_deref().and_then(parse_date),
        end.as_deref().and_then(parse_date),
    ) {
        (Some(start), Some(end)) => Some(Period::Duration { start, end }),
        _ => None,
    }
}

/// `iso4217:TWD` → `TWD`
fn measure_currency(raw: &str) -> String {
    raw.trim()
        .rsplit(':')
        .next()
        .unwrap_or(raw)
        .to_string()
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

// ---------------------------------------------------------------------------
// 傳統 XBRL instance（純 XML）
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ContextBuilder {
    id: String,
    entity: String,
    instant: Option<String>,
    start: Option<String>,
    end: Option<String>,
    scenario: String,
}

/// 文字事件要寫進哪個欄位
#[derive(PartialEq, Copy, Clone)]
enum TextTarget {
    FactValue,
    Entity,
    Instant,
    StartDate,
    EndDate,
    Measure,
    Scenario,
}

struct FactBuilder {
    concept: String,
    context_ref: String,
    unit_ref: Option<String>,
    decimals: Option<i32>,
    text: String,
}

/// 解析 `<xbrli:xbrl>` instance。
///
/// 任何帶 `contextRef` 屬性的元素都是 fact；facts 依文件順序回傳。
pub fn parse_xml_instance(content: &[u8]) -> Result<InstanceParts> {
    let mut facts = Vec::new();
    let mut contexts = HashMap::new();
    let mut units = HashMap::new();

    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut context: Option<ContextBuilder> = None;
    let mut fact: Option<FactBuilder> = None;
    let mut unit_id: Option<String> = None;
    let mut target: Option<TextTarget> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                let local = std::str::from_utf8(local_name_bytes(name.as_ref()))
                    .unwrap_or_default()
                    .to_string();

                match local.as_str() {
                    "context" => {
                        let mut builder = ContextBuilder::default();
                        if let Some(id) = attr(e.attributes(), "id") {
                            builder.id = id;
                        }
                        context = Some(builder);
                    }
                    "identifier" if context.is_some() => target = Some(TextTarget::Entity),
                    "instant" if context.is_some() => target = Some(TextTarget::Instant),
                    "startDate" if context.is_some() => target = Some(TextTarget::StartDate),
                    "endDate" if context.is_some() => target = Some(TextTarget::EndDate),
                    "scenario" | "segment" if context.is_some() => {
                        target = Some(TextTarget::Scenario)
                    }
                    "unit" => {
                        unit_id = attr(e.attributes(), "id");
                    }
                    "measure" if unit_id.is_some() => target = Some(TextTarget::Measure),
                    _ => {
                        if context.is_none() && unit_id.is_none() {
                            if let Some(context_ref) = attr(e.attributes(), "contextRef") {
                                fact = Some(FactBuilder {
                                    concept: local,
                                    context_ref,
                                    unit_ref: attr(e.attributes(), "unitRef"),
                                    decimals: attr(e.attributes(), "decimals")
                                        .and_then(|v| v.parse().ok()),
                                    text: String::new(),
                                });
                                target = Some(TextTarget::FactValue);
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                // 自閉合的 fact（申報值為空）
                if context.is_none() && unit_id.is_none() {
                    if let Some(context_ref) = attr(e.attributes(), "contextRef") {
                        let name = e.name();
                        let local = std::str::from_utf8(local_name_bytes(name.as_ref()))
                            .unwrap_or_default()
                            .to_string();
                        facts.push(finish_fact(
                            FactBuilder {
                                concept: local,
                                context_ref,
                                unit_ref: attr(e.attributes(), "unitRef"),
                                decimals: attr(e.attributes(), "decimals")
                                    .and_then(|v| v.parse().ok()),
                                text: String::new(),
                            },
                            None,
                            0,
                        ));
                    }
                }
            }
            Ok(Event::Text(ref t)) => {
                let Some(active) = target else {
                    buf.clear();
                    continue;
                };
                let Ok(text) = t.unescape() else {
                    buf.clear();
                    continue;
                };

                match active {
                    TextTarget::FactValue => {
                        if let Some(builder) = fact.as_mut() {
                            builder.text.push_str(&text);
                        }
                    }
                    TextTarget::Entity => {
                        if let Some(builder) = context.as_mut() {
                            builder.entity.push_str(text.trim());
                        }
                    }
                    TextTarget::Instant => {
                        if let Some(builder) = context.as_mut() {
                            builder.instant = Some(text.trim().to_string());
                        }
                    }
                    TextTarget::StartDate => {
                        if let Some(builder) = context.as_mut() {
                            builder.start = Some(text.trim().to_string());
                        }
                    }
                    TextTarget::EndDate => {
                        if let Some(builder) = context.as_mut() {
                            builder.end = Some(text.trim().to_string());
                        }
                    }
                    TextTarget::Scenario => {
                        if let Some(builder) = context.as_mut() {
                            builder.scenario.push_str(text.trim());
                        }
                    }
                    TextTarget::Measure => {
                        if let Some(id) = unit_id.as_ref() {
                            units.insert(id.clone(), measure_currency(&text));
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                let local = local_name_bytes(name.as_ref());

                match local {
                    b"context" => {
                        if let Some(builder) = context.take() {
                            let scenario = if builder.scenario.is_empty() {
                                None
                            } else {
                                Some(builder.scenario.clone())
                            };
                            contexts.insert(
                                builder.id.clone(),
                                XbrlContext {
                                    id: builder.id,
                                    entity: builder.entity,
                                    period: build_period(
                                        builder.instant,
                                        builder.start,
                                        builder.end,
                                    ),
                                    scenario,
                                },
                            );
                        }
                        target = None;
                    }
                    b"unit" => {
                        unit_id = None;
                        target = None;
                    }
                    _ => {
                        if let Some(builder) = fact.take() {
                            if local == builder.concept.as_bytes() {
                                facts.push(finish_fact(builder, None, 0));
                                target = None;
                            } else {
                                fact = Some(builder);
                            }
                        } else if matches!(
                            target,
                            Some(
                                TextTarget::Entity
                                    | TextTarget::Instant
                                    | TextTarget::StartDate
                                    | TextTarget::EndDate
                                    | TextTarget::Scenario
                                    | TextTarget::Measure
                            )
                        ) {
                            target = None;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(why) => {
                return Err(Error::Parse(format!(
                    "instance document at byte {}: {}",
                    reader.buffer_position(),
                    why
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok((facts, contexts, units))
}

fn finish_fact(builder: FactBuilder, sign: Option<&str>, scale: i32) -> XbrlFact {
    let text = builder.text.trim().to_string();
    let value = if builder.unit_ref.is_some() {
        parse_financial_value(Some(&text)).map(|parsed| {
            let signed = if sign == Some("-") { -parsed } else { parsed };
            apply_scale(signed, scale)
        })
    } else {
        None
    };

    XbrlFact {
        concept: builder.concept,
        context_ref: builder.context_ref,
        unit_ref: builder.unit_ref,
        value,
        text,
        decimals: builder.decimals,
        scale: if scale == 0 { None } else { Some(scale) },
    }
}

fn local_name_bytes(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(position) => &name[position + 1..],
        None => name,
    }
}

fn attr(attributes: quick_xml::events::attributes::Attributes<'_>, wanted: &str) -> Option<String> {
    for attribute in attributes.flatten() {
        let key = local_name_bytes(attribute.key.as_ref());
        if key.eq_ignore_ascii_case(wanted.as_bytes()) {
            return attribute.unescape_value().ok().map(|v| v.to_string());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// iXBRL（HTML 內嵌）
// ---------------------------------------------------------------------------

/// 解析 iXBRL HTML。
///
/// HTML 解析器會把 `contextRef` 轉成 `contextref`，
/// 這裡一律以小寫屬性名讀取並兼收原拼法。
pub fn parse_inline_instance(content: &[u8]) -> Result<InstanceParts> {
    let html = String::from_utf8_lossy(content);
    let document = Html::parse_document(&html);

    let mut facts = Vec::new();
    let mut contexts = HashMap::new();
    let mut units = HashMap::new();

    for node in document.root_element().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let name = element.value().name().to_lowercase();
        let local = local_part(&name);

        match local {
            "nonfraction" => {
                let Some(concept) = element_attr(&element, "name") else {
                    continue;
                };
                let Some(context_ref) = element_attr(&element, "contextref") else {
                    continue;
                };

                let text: String = element.text().collect::<String>().trim().to_string();
                let scale: i32 = element_attr(&element, "scale")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let sign = element_attr(&element, "sign");
                let unit_ref = element_attr(&element, "unitref");

                let value = parse_financial_value(Some(&text)).map(|parsed| {
                    let signed = if sign.as_deref() == Some("-") {
                        -parsed
                    } else {
                        parsed
                    };
                    apply_scale(signed, scale)
                });

                facts.push(XbrlFact {
                    concept: local_part(&concept).to_string(),
                    context_ref,
                    unit_ref,
                    value,
                    text,
                    decimals: element_attr(&element, "decimals").and_then(|v| v.parse().ok()),
                    scale: if scale == 0 { None } else { Some(scale) },
                });
            }
            "nonnumeric" => {
                let Some(concept) = element_attr(&element, "name") else {
                    continue;
                };
                let Some(context_ref) = element_attr(&element, "contextref") else {
                    continue;
                };

                facts.push(XbrlFact {
                    concept: local_part(&concept).to_string(),
                    context_ref,
                    unit_ref: None,
                    value: None,
                    text: element.text().collect::<String>().trim().to_string(),
                    decimals: None,
                    scale: None,
                });
            }
            "context" => {
                let Some(id) = element_attr(&element, "id") else {
                    continue;
                };

                let mut entity = String::new();
                let mut instant = None;
                let mut start = None;
                let mut end = None;
                let mut scenario = String::new();

                for inner in element.descendants() {
                    let Some(child) = ElementRef::wrap(inner) else {
                        continue;
                    };
                    let child_name = child.value().name().to_lowercase();
                    let text = child.text().collect::<String>().trim().to_string();

                    match local_part(&child_name) {
                        "identifier" => entity = text,
                        "instant" => instant = Some(text),
                        "startdate" => start = Some(text),
                        "enddate" => end = Some(text),
                        "scenario" | "segment" => scenario.push_str(&text),
                        _ => {}
                    }
                }

                contexts.insert(
                    id.clone(),
                    XbrlContext {
                        id,
                        entity,
                        period: build_period(instant, start, end),
                        scenario: if scenario.is_empty() {
                            None
                        } else {
                            Some(scenario)
                        },
                    },
                );
            }
            "unit" => {
                let Some(id) = element_attr(&element, "id") else {
                    continue;
                };

                for inner in element.descendants() {
                    let Some(child) = ElementRef::wrap(inner) else {
                        continue;
                    };
                    let child_name = child.value().name().to_lowercase();
                    if local_part(&child_name) == "measure" {
                        let text = child.text().collect::<String>();
                        units.insert(id.clone(), measure_currency(&text));
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Ok((facts, contexts, units))
}

/// 屬性名以不分大小寫比對：HTML 解析器會把 `contextRef` 轉成小寫，
/// 但來源偶有保留原拼法的片段
fn element_attr(element: &ElementRef<'_>, lower_name: &str) -> Option<String> {
    element
        .value()
        .attrs()
        .find(|(key, _)| key.eq_ignore_ascii_case(lower_name))
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_apply_scale() {
        assert_eq!(apply_scale(dec!(123), 3), dec!(123000));
        assert_eq!(apply_scale(dec!(2550), -2), dec!(25.50));
        assert_eq!(apply_scale(dec!(42), 0), dec!(42));
    }

    const XML_INSTANCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance" xmlns:tifrs="http://www.xbrl.org/tifrs">
  <xbrli:context id="AsOf20240930">
    <xbrli:entity><xbrli:identifier scheme="twse">2330</xbrli:identifier></xbrli:entity>
    <xbrli:period><xbrli:instant>2024-09-30</xbrli:instant></xbrli:period>
  </xbrli:context>
  <xbrli:context id="YTD2024Q3">
    <xbrli:entity><xbrli:identifier scheme="twse">2330</xbrli:identifier></xbrli:entity>
    <xbrli:period>
      <xbrli:startDate>2024-01-01</xbrli:startDate>
      <xbrli:endDate>2024-09-30</xbrli:endDate>
    </xbrli:period>
  </xbrli:context>
  <xbrli:unit id="TWD"><xbrli:measure>iso4217:TWD</xbrli:measure></xbrli:unit>
  <tifrs:Assets contextRef="AsOf20240930" unitRef="TWD" decimals="-3">5,982,442,324</tifrs:Assets>
  <tifrs:Revenue contextRef="YTD2024Q3" unitRef="TWD">2,025,846,521</tifrs:Revenue>
  <tifrs:CompanyName contextRef="AsOf20240930">台灣積體電路製造股份有限公司</tifrs:CompanyName>
</xbrli:xbrl>"#;

    #[test]
    fn test_parse_xml_instance() {
        let (facts, contexts, units) = parse_xml_instance(XML_INSTANCE.as_bytes()).unwrap();

        assert_eq!(facts.len(), 3);
        // 文件順序
        assert_eq!(facts[0].concept, "Assets");
        assert_eq!(facts[0].value, Some(dec!(5982442324)));
        assert_eq!(facts[0].decimals, Some(-3));
        assert_eq!(facts[1].concept, "Revenue");
        assert_eq!(facts[2].concept, "CompanyName");
        assert_eq!(facts[2].value, None);
        assert_eq!(facts[2].text, "台灣積體電路製造股份有限公司");

        assert_eq!(contexts.len(), 2);
        assert_eq!(
            contexts["AsOf20240930"].period,
            Some(Period::Instant(
                NaiveDate::from_ymd_opt(2024, 9, 30).unwrap()
            ))
        );
        assert_eq!(
            contexts["YTD2024Q3"].period,
            Some(Period::Duration {
                start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
            })
        );
        assert_eq!(contexts["AsOf20240930"].entity, "2330");

        assert_eq!(units["TWD"], "TWD");
    }

    const INLINE_INSTANCE: &str = r#"<!DOCTYPE html>
<html xmlns:ix="http://www.xbrl.org/2013/inlineXBRL">
<body>
<div style="display:none">
  <ix:header>
    <ix:resources>
      <xbrli:context id="AsOf20240930">
        <xbrli:entity><xbrli:identifier scheme="twse">2330</xbrli:identifier></xbrli:entity>
        <xbrli:period><xbrli:instant>2024-09-30</xbrli:instant></xbrli:period>
      </xbrli:context>
      <xbrli:unit id="TWD"><xbrli:measure>iso4217:TWD</xbrli:measure></xbrli:unit>
    </ix:resources>
  </ix:header>
</div>
<table>
  <tr><td>資產總計</td>
      <td><ix:nonFraction name="tifrs-bsci:Assets" contextRef="AsOf20240930" unitRef="TWD" scale="3" decimals="-3">5,982,442</ix:nonFraction></td></tr>
  <tr><td>庫藏股票</td>
      <td><ix:nonFraction name="tifrs-bsci:TreasuryShares" contextRef="AsOf20240930" unitRef="TWD" scale="0" sign="-">1,200</ix:nonFraction></td></tr>
  <tr><td>公司名稱</td>
      <td><ix:nonNumeric name="tifrs-bsci:CompanyName" contextRef="AsOf20240930">台積電</ix:nonNumeric></td></tr>
</table>
</body>
</html>"#;

    #[test]
    fn test_parse_inline_instance() {
        let (facts, contexts, units) = parse_inline_instance(INLINE_INSTANCE.as_bytes()).unwrap();

        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].concept, "Assets");
        // scale=3：5,982,442 → 5,982,442,000
        assert_eq!(facts[0].value, Some(dec!(5982442000)));
        assert_eq!(facts[1].concept, "TreasuryShares");
        // sign="-"：負值
        assert_eq!(facts[1].value, Some(dec!(-1200)));
        assert_eq!(facts[2].concept, "CompanyName");
        assert_eq!(facts[2].value, None);
        assert_eq!(facts[2].text, "台積電");

        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts["AsOf20240930"].entity, "2330");
        assert_eq!(units["TWD"], "TWD");
    }
}
