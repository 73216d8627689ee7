//! Linkbase 解析（calculation / presentation / label）。
//!
//! MOPS 的 linkbase 以 xlink 三層結構表達關係：
//! `loc`（xlink:label → schema 內的 concept）、arc（from label → to label）、
//! 以及 label linkbase 的文字資源。這裡先累積 loc 與 arc，
//! 到每個 extended link 結束時才把 label 解析回 concept local name。

use quick_xml::{events::attributes::Attributes, events::Event, Reader};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::{
    error::{Error, Result},
    xbrl::{
        CalculationArc, CalculationLinkbase, Label, LabelSet, PresentationArc,
        PresentationLinkbase,
    },
};
use hashbrown::HashMap;

const DEFAULT_WEIGHT: Decimal = dec!(1);
const DEFAULT_ORDER: Decimal = dec!(1);

/// 解析 Calculation Linkbase。
///
/// 回傳依 role 分組的 `from_concept → arcs`，arcs 依 order 升冪排序，
/// 同 order 依 to_concept 字典序。循環的封閉邊在回傳前被丟棄。
pub fn parse_calculation(content: &[u8]) -> Result<CalculationLinkbase> {
    let mut linkbase = CalculationLinkbase::default();
    let mut reader = xml_reader(content);
    let mut buf = Vec::new();

    let mut current: Option<ExtendedLink<RawArc>> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                match local_name(e.name().as_ref()) {
                    b"calculationLink" => {
                        current = Some(ExtendedLink::new(
                            attr_value(e.attributes(), b"role").unwrap_or_default(),
                        ));
                    }
                    b"loc" => {
                        if let Some(link) = current.as_mut() {
                            link.record_loc(e.attributes());
                        }
                    }
                    b"calculationArc" => {
                        if let Some(link) = current.as_mut() {
                            link.arcs.push(RawArc::from_attributes(e.attributes()));
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == b"calculationLink" {
                    if let Some(link) = current.take() {
                        let entry = linkbase.roles.entry(link.role.clone()).or_default();
                        for raw in &link.arcs {
                            let arc = CalculationArc {
                                from_concept: link.concept_of(&raw.from),
                                to_concept: link.concept_of(&raw.to),
                                weight: raw.weight,
                                order: raw.order,
                            };
                            entry.entry(arc.from_concept.clone()).or_default().push(arc);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(why) => {
                return Err(Error::Parse(format!(
                    "calculation linkbase at byte {}: {}",
                    reader.buffer_position(),
                    why
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    for arcs in linkbase.roles.values_mut() {
        for children in arcs.values_mut() {
            children.sort_by(|a, b| {
                a.order
                    .cmp(&b.order)
                    .then_with(|| a.to_concept.cmp(&b.to_concept))
            });
        }
    }

    linkbase.drop_cycles();
    Ok(linkbase)
}

/// 解析 Presentation Linkbase，規則同 calculation，另帶 preferredLabel。
pub fn parse_presentation(content: &[u8]) -> Result<PresentationLinkbase> {
    let mut linkbase = PresentationLinkbase::default();
    let mut reader = xml_reader(content);
    let mut buf = Vec::new();

    let mut current: Option<ExtendedLink<RawArc>> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                match local_name(e.name().as_ref()) {
                    b"presentationLink" => {
                        current = Some(ExtendedLink::new(
                            attr_value(e.attributes(), b"role").unwrap_or_default(),
                        ));
                    }
                    b"loc" => {
                        if let Some(link) = current.as_mut() {
                            link.record_loc(e.attributes());
                        }
                    }
                    b"presentationArc" => {
                        if let Some(link) = current.as_mut() {
                            link.arcs.push(RawArc::from_attributes(e.attributes()));
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == b"presentationLink" {
                    if let Some(link) = current.take() {
                        let entry = linkbase.roles.entry(link.role.clone()).or_default();
                        for raw in &link.arcs {
                            let arc = PresentationArc {
                                from_concept: link.concept_of(&raw.from),
                                to_concept: link.concept_of(&raw.to),
                                order: raw.order,
                                preferred_label: raw.preferred_label.clone(),
                            };
                            entry.entry(arc.from_concept.clone()).or_default().push(arc);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(why) => {
                return Err(Error::Parse(format!(
                    "presentation linkbase at byte {}: {}",
                    reader.buffer_position(),
                    why
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    for arcs in linkbase.roles.values_mut() {
        for children in arcs.values_mut() {
            children.sort_by(|a, b| {
                a.order
                    .cmp(&b.order)
                    .then_with(|| a.to_concept.cmp(&b.to_concept))
            });
        }
    }

    Ok(linkbase)
}

/// 解析 Label Linkbase，回傳中英文兩組 concept → labels。
///
/// 語言取自 `xml:lang`（zh / zh-TW 歸中文，en 歸英文），
/// role 全部保留，由報表建構器依 preferredLabel 與優先序挑選。
pub fn parse_labels(content: &[u8]) -> Result<LabelSet> {
    let mut labels = LabelSet::default();
    let mut reader = xml_reader(content);
    let mut buf = Vec::new();

    let mut locs: HashMap<String, String> = HashMap::new();
    let mut arcs: Vec<(String, String)> = Vec::new();
    let mut resources: HashMap<String, Vec<LabelResource>> = HashMap::new();
    let mut capturing: Option<LabelResource> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()) {
                b"loc" => {
                    record_loc(&mut locs, e.attributes());
                }
                b"labelArc" => {
                    record_label_arc(&mut arcs, e.attributes());
                }
                b"label" => {
                    capturing = Some(LabelResource {
                        label: attr_value(e.attributes(), b"label").unwrap_or_default(),
                        role: attr_value(e.attributes(), b"role").unwrap_or_default(),
                        lang: attr_value(e.attributes(), b"lang").unwrap_or_default(),
                        text: String::new(),
                    });
                }
                _ => {}
            },
            // 自閉合元素不會有對應的 End 事件；label 自閉合時沒有文字，直接略過
            Ok(Event::Empty(ref e)) => match local_name(e.name().as_ref()) {
                b"loc" => {
                    record_loc(&mut locs, e.attributes());
                }
                b"labelArc" => {
                    record_label_arc(&mut arcs, e.attributes());
                }
                _ => {}
            },
            Ok(Event::Text(ref t)) => {
                if let Some(resource) = capturing.as_mut() {
                    if let Ok(text) = t.unescape() {
                        resource.text.push_str(&text);
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == b"label" {
                    if let Some(resource) = capturing.take() {
                        resources
                            .entry(resource.label.clone())
                            .or_default()
                            .push(resource);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(why) => {
                return Err(Error::Parse(format!(
                    "label linkbase at byte {}: {}",
                    reader.buffer_position(),
                    why
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    for (from, to) in arcs {
        let Some(concept) = locs.get(&from) else {
            continue;
        };
        let Some(found) = resources.get(&to) else {
            continue;
        };

        for resource in found {
            let lang = resource.lang.to_lowercase();
            let entry = Label {
                role: resource.role.clone(),
                text: resource.text.clone(),
            };

            if lang.starts_with("zh") || lang.contains("tw") {
                labels.zh.entry(concept.clone()).or_default().push(entry);
            } else if lang.starts_with("en") {
                labels.en.entry(concept.clone()).or_default().push(entry);
            }
        }
    }

    Ok(labels)
}

struct LabelResource {
    label: String,
    role: String,
    lang: String,
    text: String,
}

fn record_loc(locs: &mut HashMap<String, String>, attributes: Attributes<'_>) {
    let mut label = None;
    let mut href = None;
    for attr in attributes.flatten() {
        match local_name(attr.key.as_ref()) {
            b"label" => label = attr.unescape_value().ok().map(|v| v.to_string()),
            b"href" => href = attr.unescape_value().ok().map(|v| v.to_string()),
            _ => {}
        }
    }

    if let (Some(label), Some(href)) = (label, href) {
        locs.insert(label, concept_from_href(&href));
    }
}

fn record_label_arc(arcs: &mut Vec<(String, String)>, attributes: Attributes<'_>) {
    let mut from = None;
    let mut to = None;
    for attr in attributes.flatten() {
        match local_name(attr.key.as_ref()) {
            b"from" => from = attr.unescape_value().ok().map(|v| v.to_string()),
            b"to" => to = attr.unescape_value().ok().map(|v| v.to_string()),
            _ => {}
        }
    }

    if let (Some(from), Some(to)) = (from, to) {
        arcs.push((from, to));
    }
}

/// 單一 extended link 的累積狀態：loc 對照表與尚未解析的 arcs
struct ExtendedLink<T> {
    role: String,
    locs: HashMap<String, String>,
    arcs: Vec<T>,
}

impl<T> ExtendedLink<T> {
    fn new(role: String) -> Self {
        ExtendedLink {
            role,
            locs: HashMap::new(),
            arcs: Vec::new(),
        }
    }

    fn record_loc(&mut self, attributes: Attributes<'_>) {
        let mut label = None;
        let mut href = None;
        for attr in attributes.flatten() {
            match local_name(attr.key.as_ref()) {
                b"label" => label = attr.unescape_value().ok().map(|v| v.to_string()),
                b"href" => href = attr.unescape_value().ok().map(|v| v.to_string()),
                _ => {}
            }
        }

        if let (Some(label), Some(href)) = (label, href) {
            self.locs.insert(label, concept_from_href(&href));
        }
    }

    /// 把 arc 端點的 xlink:label 還原成 concept local name；
    /// 找不到 loc 時退回對 label 本身做同樣的字尾切割
    fn concept_of(&self, label: &str) -> String {
        self.locs
            .get(label)
            .cloned()
            .unwrap_or_else(|| strip_prefix(label))
    }
}

/// 尚未解析端點的 arc
struct RawArc {
    from: String,
    to: String,
    weight: Decimal,
    order: Decimal,
    preferred_label: Option<String>,
}

impl RawArc {
    fn from_attributes(attributes: Attributes<'_>) -> Self {
        let mut raw = RawArc {
            from: String::new(),
            to: String::new(),
            weight: DEFAULT_WEIGHT,
            order: DEFAULT_ORDER,
            preferred_label: None,
        };

        for attr in attributes.flatten() {
            let Ok(value) = attr.unescape_value() else {
                continue;
            };
            match local_name(attr.key.as_ref()) {
                b"from" => raw.from = value.to_string(),
                b"to" => raw.to = value.to_string(),
                b"weight" => {
                    if let Ok(weight) = value.parse::<Decimal>() {
                        raw.weight = weight;
                    }
                }
                b"order" => {
                    if let Ok(order) = value.parse::<Decimal>() {
                        raw.order = order;
                    }
                }
                b"preferredLabel" => raw.preferred_label = Some(value.to_string()),
                _ => {}
            }
        }

        raw
    }
}

fn xml_reader(content: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    reader
}

/// 取 XML 名稱的 local part（丟掉命名空間前綴）
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(position) => &name[position + 1..],
        None => name,
    }
}

/// `schema.xsd#tifrs-bsci_Assets` → `Assets`
fn concept_from_href(href: &str) -> String {
    let fragment = href.rsplit('#').next().unwrap_or(href);
    strip_prefix(fragment)
}

/// taxonomy 的元素 id 慣例為 `前綴_LocalName`，取底線後的部分
fn strip_prefix(id: &str) -> String {
    match id.rsplit_once('_') {
        Some((_, local)) => local.to_string(),
        None => id.to_string(),
    }
}

fn attr_value(attributes: Attributes<'_>, name: &[u8]) -> Option<String> {
    for attr in attributes.flatten() {
        if local_name(attr.key.as_ref()) == name {
            return attr.unescape_value().ok().map(|v| v.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAL_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:calculationLink xlink:type="extended" xlink:role="http://www.xbrl.org/tifrs/role/StatementOfComprehensiveIncome">
    <link:loc xlink:type="locator" xlink:href="tifrs.xsd#tifrs-isci_GrossProfit" xlink:label="GrossProfit_loc"/>
    <link:loc xlink:type="locator" xlink:href="tifrs.xsd#tifrs-isci_Revenue" xlink:label="Revenue_loc"/>
    <link:loc xlink:type="locator" xlink:href="tifrs.xsd#tifrs-isci_CostOfSales" xlink:label="CostOfSales_loc"/>
    <link:calculationArc xlink:type="arc" xlink:from="GrossProfit_loc" xlink:to="CostOfSales_loc" weight="-1" order="2"/>
    <link:calculationArc xlink:type="arc" xlink:from="GrossProfit_loc" xlink:to="Revenue_loc" order="1"/>
  </link:calculationLink>
</link:linkbase>"#;

    #[test]
    fn test_parse_calculation() {
        let linkbase = parse_calculation(CAL_FIXTURE.as_bytes()).unwrap();
        let arcs = linkbase
            .role_matching("StatementOfComprehensiveIncome")
            .unwrap();

        let children = &arcs["GrossProfit"];
        assert_eq!(children.len(), 2);
        // order 升冪：Revenue (1) 在 CostOfSales (2) 前
        assert_eq!(children[0].to_concept, "Revenue");
        assert_eq!(children[0].weight, dec!(1)); // 預設 +1
        assert_eq!(children[1].to_concept, "CostOfSales");
        assert_eq!(children[1].weight, dec!(-1));
    }

    #[test]
    fn test_parse_calculation_empty() {
        let empty = r#"<?xml version="1.0"?><link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase"/>"#;
        let linkbase = parse_calculation(empty.as_bytes()).unwrap();
        assert!(linkbase.is_empty());
    }

    #[test]
    fn test_parse_calculation_rejects_invalid_xml() {
        assert!(matches!(
            parse_calculation(b"<linkbase><unclosed"),
            Err(Error::Parse(_))
        ));
    }

    const PRE_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:presentationLink xlink:type="extended" xlink:role="http://www.xbrl.org/tifrs/role/StatementOfFinancialPosition">
    <link:loc xlink:href="tifrs.xsd#tifrs-bsci_Assets" xlink:label="Assets_loc"/>
    <link:loc xlink:href="tifrs.xsd#tifrs-bsci_CurrentAssets" xlink:label="CurrentAssets_loc"/>
    <link:loc xlink:href="tifrs.xsd#tifrs-bsci_NoncurrentAssets" xlink:label="NoncurrentAssets_loc"/>
    <link:presentationArc xlink:from="Assets_loc" xlink:to="NoncurrentAssets_loc" order="2" preferredLabel="http://www.xbrl.org/2003/role/terseLabel"/>
    <link:presentationArc xlink:from="Assets_loc" xlink:to="CurrentAssets_loc" order="1"/>
  </link:presentationLink>
</link:linkbase>"#;

    #[test]
    fn test_parse_presentation() {
        let linkbase = parse_presentation(PRE_FIXTURE.as_bytes()).unwrap();
        let arcs = linkbase
            .role_matching("StatementOfFinancialPosition")
            .unwrap();

        let children = &arcs["Assets"];
        assert_eq!(children[0].to_concept, "CurrentAssets");
        assert_eq!(children[0].preferred_label, None);
        assert_eq!(children[1].to_concept, "NoncurrentAssets");
        assert_eq!(
            children[1].preferred_label.as_deref(),
            Some("http://www.xbrl.org/2003/role/terseLabel")
        );
    }

    const LAB_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink" xmlns:xml="http://www.w3.org/XML/1998/namespace">
  <link:labelLink xlink:role="http://www.xbrl.org/2003/role/link">
    <link:loc xlink:href="tifrs.xsd#tifrs-bsci_Assets" xlink:label="Assets_loc"/>
    <link:labelArc xlink:from="Assets_loc" xlink:to="Assets_lbl"/>
    <link:label xlink:label="Assets_lbl" xlink:role="http://www.xbrl.org/2003/role/label" xml:lang="zh-TW">資產總計</link:label>
    <link:label xlink:label="Assets_lbl" xlink:role="http://www.xbrl.org/2003/role/label" xml:lang="en">Total assets</link:label>
  </link:labelLink>
</link:linkbase>"#;

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels(LAB_FIXTURE.as_bytes()).unwrap();
        assert_eq!(labels.display_zh("Assets", None), Some("資產總計"));
        assert_eq!(labels.display_en("Assets", None), Some("Total assets"));
        assert_eq!(labels.display_zh("Liabilities", None), None);
    }
}
