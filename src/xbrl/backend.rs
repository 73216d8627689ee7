//! 解析後端抽象。
//!
//! 同一組萃取操作有兩個可互換的實作：
//! - [`InlineBackend`]：scraper，處理 facts 內嵌在 HTML 的 iXBRL
//! - [`XmlBackend`]：quick-xml，處理傳統 `<xbrli:xbrl>` instance
//!
//! [`ParserStack`] 依內容挑出可用的後端，單一操作失敗時換另一個再試。

use hashbrown::HashMap;

use crate::{
    error::{Error, Result},
    logging,
    xbrl::{
        instance, linkbase,
        package::{self, XbrlArchive, MAX_DOCUMENT_BYTES},
        CalculationLinkbase, LabelSet, PresentationLinkbase, XbrlContext, XbrlFact, XbrlPackage,
    },
};

/// XBRL 萃取操作的統一介面。
///
/// `check_available` 以內容判斷此後端能否處理該 instance；
/// facts / contexts / units 來自 instance 文件，
/// 三種 linkbase 則來自封裝內的輔助檔。
pub trait XbrlBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn check_available(&self, instance: &[u8]) -> bool;

    fn extract_facts(&self, instance: &[u8]) -> Result<Vec<XbrlFact>>;

    fn extract_contexts(&self, instance: &[u8]) -> Result<HashMap<String, XbrlContext>>;

    fn extract_units(&self, instance: &[u8]) -> Result<HashMap<String, String>>;

    fn extract_labels(&self, archive: &XbrlArchive) -> Result<LabelSet> {
        let mut labels = LabelSet::default();
        for path in &archive.label_paths {
            if let Some(content) = archive.files.get(path) {
                labels.merge(linkbase::parse_labels(content)?);
            }
        }
        Ok(labels)
    }

    fn extract_calculation(&self, archive: &XbrlArchive) -> Result<CalculationLinkbase> {
        let mut calculation = CalculationLinkbase::default();
        for path in &archive.calculation_paths {
            if let Some(content) = archive.files.get(path) {
                calculation.merge(linkbase::parse_calculation(content)?);
            }
        }
        Ok(calculation)
    }

    fn extract_presentation(&self, archive: &XbrlArchive) -> Result<PresentationLinkbase> {
        let mut presentation = PresentationLinkbase::default();
        for path in &archive.presentation_paths {
            if let Some(content) = archive.files.get(path) {
                presentation.merge(linkbase::parse_presentation(content)?);
            }
        }
        Ok(presentation)
    }
}

/// iXBRL 後端（HTML 內嵌 facts）
pub struct InlineBackend;

impl XbrlBackend for InlineBackend {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn check_available(&self, instance: &[u8]) -> bool {
        contains(instance, b"ix:nonFraction")
            || contains(instance, b"ix:nonNumeric")
            || contains(instance, b"ix:nonfraction")
            || contains(instance, b"ix:nonnumeric")
    }

    fn extract_facts(&self, instance: &[u8]) -> Result<Vec<XbrlFact>> {
        instance::parse_inline_instance(instance).map(|(facts, _, _)| facts)
    }

    fn extract_contexts(&self, instance: &[u8]) -> Result<HashMap<String, XbrlContext>> {
        instance::parse_inline_instance(instance).map(|(_, contexts, _)| contexts)
    }

    fn extract_units(&self, instance: &[u8]) -> Result<HashMap<String, String>> {
        instance::parse_inline_instance(instance).map(|(_, _, units)| units)
    }
}

/// 傳統 XBRL 後端（純 XML instance）
pub struct XmlBackend;

impl XbrlBackend for XmlBackend {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn check_available(&self, instance: &[u8]) -> bool {
        contains(instance, b"<xbrli:xbrl") || contains(instance, b"<xbrl")
    }

    fn extract_facts(&self, instance: &[u8]) -> Result<Vec<XbrlFact>> {
        instance::parse_xml_instance(instance).map(|(facts, _, _)| facts)
    }

    fn extract_contexts(&self, instance: &[u8]) -> Result<HashMap<String, XbrlContext>> {
        instance::parse_xml_instance(instance).map(|(_, contexts, _)| contexts)
    }

    fn extract_units(&self, instance: &[u8]) -> Result<HashMap<String, String>> {
        instance::parse_xml_instance(instance).map(|(_, _, units)| units)
    }
}

/// 兩個後端的組合。建構時固定順序，解析時依內容挑主後端，
/// 個別操作失敗時落到備援後端。
pub struct ParserStack {
    backends: Vec<Box<dyn XbrlBackend>>,
}

impl Default for ParserStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserStack {
    pub fn new() -> Self {
        ParserStack {
            backends: vec![Box::new(InlineBackend), Box::new(XmlBackend)],
        }
    }

    /// 內容嗅探：`PK` 開頭為 ZIP，帶 ix 標記為 iXBRL，其餘視為格式不明。
    pub fn sniff(&self, content: &[u8]) -> Result<XbrlArchive> {
        if content.len() > MAX_DOCUMENT_BYTES {
            return Err(Error::MalformedPackage(format!(
                "document of {} bytes exceeds the {} byte limit",
                content.len(),
                MAX_DOCUMENT_BYTES
            )));
        }

        if content.starts_with(b"PK") {
            return package::unpack(content);
        }

        if self
            .backends
            .iter()
            .any(|backend| backend.check_available(content))
        {
            return Ok(XbrlArchive::from_instance(content.to_vec()));
        }

        Err(Error::MalformedPackage(
            "unknown format - expected ZIP or iXBRL HTML".to_string(),
        ))
    }

    /// 解析整個封裝：facts / contexts / units / 三種 linkbase。
    ///
    /// context 無法解析的 facts 會被丟棄。
    pub fn parse_archive(&self, archive: &XbrlArchive) -> Result<XbrlPackage> {
        let instance = archive.instance_bytes();
        let (primary, secondary) = self.pick(instance)?;

        let mut parsed = XbrlPackage {
            facts: self.with_fallback(primary, secondary, |backend| {
                backend.extract_facts(instance)
            })?,
            contexts: self.with_fallback(primary, secondary, |backend| {
                backend.extract_contexts(instance)
            })?,
            units: self.with_fallback(primary, secondary, |backend| {
                backend.extract_units(instance)
            })?,
            calculation: self.with_fallback(primary, secondary, |backend| {
                backend.extract_calculation(archive)
            })?,
            presentation: self.with_fallback(primary, secondary, |backend| {
                backend.extract_presentation(archive)
            })?,
            labels: self.with_fallback(primary, secondary, |backend| {
                backend.extract_labels(archive)
            })?,
        };

        parsed.discard_orphan_facts();
        Ok(parsed)
    }

    /// 嗅探加解析的捷徑
    pub fn parse(&self, content: &[u8]) -> Result<XbrlPackage> {
        let archive = self.sniff(content)?;
        self.parse_archive(&archive)
    }

    fn pick(&self, instance: &[u8]) -> Result<(&dyn XbrlBackend, Option<&dyn XbrlBackend>)> {
        let mut available = self
            .backends
            .iter()
            .map(|backend| backend.as_ref())
            .filter(|backend| backend.check_available(instance));

        let primary = available.next().ok_or_else(|| {
            Error::Parse("no parser backend accepts this instance document".to_string())
        })?;

        Ok((primary, available.next()))
    }

    fn with_fallback<T>(
        &self,
        primary: &dyn XbrlBackend,
        secondary: Option<&dyn XbrlBackend>,
        operation: impl Fn(&dyn XbrlBackend) -> Result<T>,
    ) -> Result<T> {
        match operation(primary) {
            Ok(value) => Ok(value),
            Err(why) => {
                let Some(fallback) = secondary else {
                    return Err(why);
                };
                logging::warn_file_async(format!(
                    "Backend {} failed ({}), falling back to {}",
                    primary.name(),
                    why,
                    fallback.name()
                ));
                operation(fallback)
            }
        }
    }
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
    fn test_check_available() {
        assert!(InlineBackend.check_available(b"<html><ix:nonFraction name=\"a\"/></html>"));
        assert!(!InlineBackend.check_available(b"<xbrli:xbrl></xbrli:xbrl>"));
        assert!(XmlBackend.check_available(b"<?xml version=\"1.0\"?><xbrli:xbrl/>"));
        assert!(!XmlBackend.check_available(b"<html></html>"));
    }

    #[test]
    fn test_sniff_rejects_unknown_format() {
        let stack = ParserStack::new();
        assert!(matches!(
            stack.sniff(b"<html>plain page</html>"),
            Err(Error::MalformedPackage(_))
        ));
    }

    #[test]
    fn test_parse_inline_document() {
        let stack = ParserStack::new();
        let content = br#"<html>
<body>
<xbrli:context id="C1">
  <xbrli:entity><xbrli:identifier scheme="twse">2330</xbrli:identifier></xbrli:entity>
  <xbrli:period><xbrli:instant>2024-09-30</xbrli:instant></xbrli:period>
</xbrli:context>
<xbrli:unit id="TWD"><xbrli:measure>iso4217:TWD</xbrli:measure></xbrli:unit>
<ix:nonFraction name="t:Assets" contextRef="C1" unitRef="TWD">100</ix:nonFraction>
<ix:nonFraction name="t:Orphan" contextRef="Nope" unitRef="TWD">5</ix:nonFraction>
</body></html>"#;

        let parsed = stack.parse(content).unwrap();
        // orphan fact 的 context 不存在，應被丟棄
        assert_eq!(parsed.facts.len(), 1);
        assert_eq!(parsed.facts[0].concept, "Assets");
        assert_eq!(parsed.units["TWD"], "TWD");
    }
}
