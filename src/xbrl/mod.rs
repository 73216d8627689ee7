//! # XBRL 解析模組
//!
//! 從 MOPS 下載的財報封裝（ZIP 內含 iXBRL instance 與 linkbase 檔）
//! 解析出 facts、contexts、labels 與 calculation / presentation 關係，
//! 供報表建構器組出階層式財務報表。
//!
//! 兩種 instance 格式：
//! - iXBRL（2019 年後）：facts 以 `ix:nonFraction` / `ix:nonNumeric` 內嵌在 HTML
//! - 傳統 XBRL：`<xbrli:xbrl>` 根節點的純 XML
//!
//! 解析後端以 [`backend::XbrlBackend`] 抽象，兩個實作可互換。

use chrono::NaiveDate;
use hashbrown::HashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::logging;

pub mod backend;
pub mod instance;
pub mod linkbase;
pub mod package;
pub mod taxonomy;

/// Context 的報導期間：時點或起迄區間
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Instant(NaiveDate),
    Duration { start: NaiveDate, end: NaiveDate },
}

/// XBRL context：期間、申報主體與未解讀的 scenario/segment 原文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XbrlContext {
    pub id: String,
    pub entity: String,
    pub period: Option<Period>,
    /// scenario / segment 原始內容，保留但不解讀
    pub scenario: Option<String>,
}

impl XbrlContext {
    pub fn has_scenario(&self) -> bool {
        self.scenario
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }
}

/// 單一 fact。數值型 fact 的 `value` 已套用 iXBRL 的 sign 與 scale 轉換。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XbrlFact {
    /// concept 的 local name（不含命名空間前綴）
    pub concept: String,
    pub context_ref: String,
    pub unit_ref: Option<String>,
    /// 解析後的數值；文字型 fact 為 None
    pub value: Option<Decimal>,
    /// 申報原文
    pub text: String,
    pub decimals: Option<i32>,
    pub scale: Option<i32>,
}

/// Calculation arc：带權重的加總關係
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationArc {
    pub from_concept: String,
    pub to_concept: String,
    pub weight: Decimal,
    pub order: Decimal,
}

/// Presentation arc：顯示階層的親子關係
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationArc {
    pub from_concept: String,
    pub to_concept: String,
    pub order: Decimal,
    pub preferred_label: Option<String>,
}

/// 以 extended link role 分組的 arc 集合。
///
/// MOPS 的 linkbase 檔在同一個檔案裡涵蓋多張報表（多個 role），
/// 報表建構器以 role URI 的結尾挑出自己那張。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleArcs<T> {
    pub roles: HashMap<String, HashMap<String, Vec<T>>>,
}

impl<T> Default for RoleArcs<T> {
    fn default() -> Self {
        RoleArcs {
            roles: HashMap::new(),
        }
    }
}

impl<T: Clone> RoleArcs<T> {
    pub fn is_empty(&self) -> bool {
        self.roles.values().all(|arcs| arcs.is_empty())
    }

    /// 找出 role URI 以指定名稱結尾的那組 arcs
    pub fn role_matching(&self, role_name: &str) -> Option<&HashMap<String, Vec<T>>> {
        self.roles
            .iter()
            .find(|(uri, _)| role_uri_matches(uri, role_name))
            .map(|(_, arcs)| arcs)
    }

    /// 跨 role 合併成單一 map（role 內容重複時保留先出現者）
    pub fn merged(&self) -> HashMap<String, Vec<T>> {
        let mut merged: HashMap<String, Vec<T>> = HashMap::new();
        for arcs in self.roles.values() {
            for (parent, children) in arcs {
                merged
                    .entry(parent.clone())
                    .or_default()
                    .extend(children.iter().cloned());
            }
        }
        merged
    }

    pub fn merge(&mut self, other: RoleArcs<T>) {
        for (role, arcs) in other.roles {
            let entry = self.roles.entry(role).or_default();
            for (parent, children) in arcs {
                entry.entry(parent).or_default().extend(children);
            }
        }
    }
}

/// role URI 是否對應到指定的報表名稱。
///
/// MOPS 的 role URI 長相如
/// `http://www.xbrl.org/tifrs/fr/ci/cr/2024-03-31/role/StatementOfFinancialPosition`，
/// 以路徑最後一段比對。
pub fn role_uri_matches(uri: &str, role_name: &str) -> bool {
    uri.rsplit('/')
        .next()
        .map(|last| last == role_name)
        .unwrap_or(false)
}

pub type CalculationLinkbase = RoleArcs<CalculationArc>;
pub type PresentationLinkbase = RoleArcs<PresentationArc>;

impl CalculationLinkbase {
    /// concept → weight 的扁平映射，子項出現在多個親項下時保留先出現者
    pub fn weight_map(&self) -> HashMap<String, Decimal> {
        let mut weights: HashMap<String, Decimal> = HashMap::new();
        for arcs in self.roles.values() {
            for children in arcs.values() {
                for arc in children {
                    weights
                        .entry(arc.to_concept.clone())
                        .or_insert(arc.weight);
                }
            }
        }
        weights
    }

    /// 移除會構成循環的 arc。
    ///
    /// Calculation arcs 依規格必須是 DAG；
    /// 依親節點字典序走訪（結果可重現），偵測到循環時
    /// 丟棄「封閉循環的那一條」並記警告。
    pub fn drop_cycles(&mut self) {
        for (role, arcs) in self.roles.iter_mut() {
            let mut parents: Vec<String> = arcs.keys().cloned().collect();
            parents.sort();

            let mut kept: HashMap<String, Vec<CalculationArc>> = HashMap::new();

            for parent in parents {
                let Some(children) = arcs.get(&parent) else {
                    continue;
                };
                for arc in children {
                    if creates_cycle(&kept, &arc.from_concept, &arc.to_concept) {
                        logging::warn_file_async(format!(
                            "Dropping cycle-closing calculation arc {} -> {} in role {}",
                            arc.from_concept, arc.to_concept, role
                        ));
                        continue;
                    }
                    kept.entry(parent.clone()).or_default().push(arc.clone());
                }
            }

            *arcs = kept;
        }
    }
}

/// 加入 from → to 是否會讓圖出現循環（to 已可走回 from）
fn creates_cycle(
    arcs: &HashMap<String, Vec<CalculationArc>>,
    from: &str,
    to: &str,
) -> bool {
    if from == to {
        return true;
    }

    let mut stack = vec![to.to_string()];
    let mut visited = hashbrown::HashSet::new();

    while let Some(current) = stack.pop() {
        if current == from {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(children) = arcs.get(&current) {
            stack.extend(children.iter().map(|arc| arc.to_concept.clone()));
        }
    }

    false
}

/// 單一語言、單一 role 的標籤
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub role: String,
    pub text: String,
}

/// 中英文標籤集。保留每個 concept 的所有 role，由報表建構器挑選。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelSet {
    pub zh: HashMap<String, Vec<Label>>,
    pub en: HashMap<String, Vec<Label>>,
}

/// 挑選標籤時的 role 優先序（preferred label 缺席時適用）
const ROLE_PRIORITY: &[&str] = &["terseLabel", "label", "verboseLabel"];

impl LabelSet {
    pub fn is_empty(&self) -> bool {
        self.zh.is_empty() && self.en.is_empty()
    }

    /// 取出 concept 的顯示標籤。
    ///
    /// preferred label（來自 presentation arc）優先；
    /// 否則依 terseLabel > label > verboseLabel，最後任挑一個。
    pub fn display<'a>(
        labels: &'a HashMap<String, Vec<Label>>,
        concept: &str,
        preferred: Option<&str>,
    ) -> Option<&'a str> {
        let candidates = labels.get(concept)?;

        if let Some(preferred) = preferred {
            if let Some(label) = candidates
                .iter()
                .find(|label| label.role.ends_with(preferred))
            {
                return Some(&label.text);
            }
        }

        for role in ROLE_PRIORITY {
            if let Some(label) = candidates.iter().find(|l| l.role.ends_with(role)) {
                return Some(&label.text);
            }
        }

        candidates.first().map(|label| label.text.as_str())
    }

    pub fn display_zh(&self, concept: &str, preferred: Option<&str>) -> Option<&str> {
        Self::display(&self.zh, concept, preferred)
    }

    pub fn display_en(&self, concept: &str, preferred: Option<&str>) -> Option<&str> {
        Self::display(&self.en, concept, preferred)
    }

    pub fn merge(&mut self, other: LabelSet) {
        for (concept, labels) in other.zh {
            self.zh.entry(concept).or_default().extend(labels);
        }
        for (concept, labels) in other.en {
            self.en.entry(concept).or_default().extend(labels);
        }
    }
}

/// 解析完成的封裝：facts + contexts + 三種 linkbase 的整合結果
#[derive(Debug, Clone, Default)]
pub struct XbrlPackage {
    pub facts: Vec<XbrlFact>,
    pub contexts: HashMap<String, XbrlContext>,
    /// unit id → 計價單位（例："TWD"）
    pub units: HashMap<String, String>,
    pub calculation: CalculationLinkbase,
    pub presentation: PresentationLinkbase,
    pub labels: LabelSet,
}

impl XbrlPackage {
    /// 丟棄 context 無法解析的 facts（規格：此類 fact 視為無效）
    pub fn discard_orphan_facts(&mut self) {
        let before = self.facts.len();
        let contexts = &self.contexts;
        self.facts
            .retain(|fact| contexts.contains_key(&fact.context_ref));

        let dropped = before - self.facts.len();
        if dropped > 0 {
            logging::warn_file_async(format!(
                "Discarded {} facts with unresolved contextRef",
                dropped
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn arc(from: &str, to: &str, weight: Decimal) -> CalculationArc {
        CalculationArc {
            from_concept: from.to_string(),
            to_concept: to.to_string(),
            weight,
            order: dec!(1),
        }
    }

    #[test]
    fn test_role_uri_matches() {
        assert!(role_uri_matches(
            "http://www.xbrl.org/tifrs/fr/ci/cr/2024-03-31/role/StatementOfFinancialPosition",
            "StatementOfFinancialPosition"
        ));
        assert!(!role_uri_matches(
            "http://www.xbrl.org/tifrs/role/StatementOfCashFlows",
            "StatementOfFinancialPosition"
        ));
    }

    #[test]
    fn test_drop_cycles_keeps_dag() {
        let mut linkbase = CalculationLinkbase::default();
        let role = "http://example/role/StatementOfComprehensiveIncome".to_string();
        let mut arcs: HashMap<String, Vec<CalculationArc>> = HashMap::new();
        arcs.insert(
            "GrossProfit".to_string(),
            vec![arc("GrossProfit", "Revenue", dec!(1)), arc("GrossProfit", "CostOfSales", dec!(-1))],
        );
        // Revenue -> GrossProfit 封閉了循環，應被丟棄
        arcs.insert(
            "Revenue".to_string(),
            vec![arc("Revenue", "GrossProfit", dec!(1))],
        );
        linkbase.roles.insert(role.clone(), arcs);

        linkbase.drop_cycles();

        let kept = &linkbase.roles[&role];
        assert_eq!(kept["GrossProfit"].len(), 2);
        assert!(kept.get("Revenue").is_none() || kept["Revenue"].is_empty());
    }

    #[test]
    fn test_label_priority() {
        let mut labels = LabelSet::default();
        labels.zh.insert(
            "Revenue".to_string(),
            vec![
                Label {
                    role: "http://www.xbrl.org/2003/role/verboseLabel".to_string(),
                    text: "營業收入合計（詳細）".to_string(),
                },
                Label {
                    role: "http://www.xbrl.org/2003/role/label".to_string(),
                    text: "營業收入合計".to_string(),
                },
                Label {
                    role: "http://www.xbrl.org/2003/role/terseLabel".to_string(),
                    text: "營業收入".to_string(),
                },
            ],
        );

        assert_eq!(labels.display_zh("Revenue", None), Some("營業收入"));
        assert_eq!(
            labels.display_zh("Revenue", Some("verboseLabel")),
            Some("營業收入合計（詳細）")
        );
        assert_eq!(labels.display_zh("CostOfSales", None), None);
    }

    #[test]
    fn test_discard_orphan_facts() {
        let mut package = XbrlPackage::default();
        package.contexts.insert(
            "AsOf2024Q3".to_string(),
            XbrlContext {
                id: "AsOf2024Q3".to_string(),
                entity: "2330".to_string(),
                period: None,
                scenario: None,
            },
        );
        package.facts.push(XbrlFact {
            concept: "Assets".to_string(),
            context_ref: "AsOf2024Q3".to_string(),
            unit_ref: Some("TWD".to_string()),
            value: Some(dec!(100)),
            text: "100".to_string(),
            decimals: None,
            scale: None,
        });
        package.facts.push(XbrlFact {
            concept: "Liabilities".to_string(),
            context_ref: "Missing".to_string(),
            unit_ref: Some("TWD".to_string()),
            value: Some(dec!(40)),
            text: "40".to_string(),
            decimals: None,
            scale: None,
        });

        package.discard_orphan_facts();

        assert_eq!(package.facts.len(), 1);
        assert_eq!(package.facts[0].concept, "Assets");
    }
}
