//! 報表建構：facts + linkbases → 階層報表。
//!
//! 流程：
//! 1. 由 (民國年, 季度) 推出報導期間，挑出對應 context
//! 2. 以報表類型對應的 role 取出 presentation 樹
//! 3. 逐節點綁定 fact 原值，權重取自親節點的 calculation arc
//!
//! 值一律用申報原值，不從子項重算；calculation 關係只作為
//! 中繼資料保留，一致性驗證放在測試裡。

use chrono::NaiveDate;
use hashbrown::{HashMap, HashSet};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::{
    declare::StatementKey,
    statement::{FinancialStatement, StatementItem},
    xbrl::{LabelSet, Period, PresentationArc, XbrlContext, XbrlFact, XbrlPackage},
};

/// 遞迴深度上限，防止 presentation 資料異常時無限展開
const MAX_DEPTH: i32 = 20;

const DEFAULT_WEIGHT: Decimal = dec!(1);

/// 從解析完的封裝組出指定報表。
///
/// 找不到 role 時回傳 items 為空、`missing_role` 旗標立起的報表；
/// 完全沒有 presentation linkbase 時退回扁平 fact 清單。
pub fn build(package: &XbrlPackage, key: &StatementKey) -> FinancialStatement {
    let western_year = key.year + 1911;
    let period_end = NaiveDate::from_ymd_opt(
        western_year,
        key.quarter.month(),
        key.quarter.last_day(),
    )
    .expect("valid reporting period end");
    let fiscal_start =
        NaiveDate::from_ymd_opt(western_year, 1, 1).expect("valid fiscal year start");

    let context = select_context(package, key, period_end, fiscal_start);
    let bound = bind_facts(package, context);

    let mut statement = FinancialStatement {
        stock_id: key.stock_id.clone(),
        year: key.year,
        quarter: key.quarter,
        report_type: key.report_type,
        currency: currency_of(package, &bound),
        unit_scale: unit_scale_of(&bound),
        report_date: period_end,
        missing_role: false,
        flat_fallback: false,
        items: Vec::new(),
    };

    if package.presentation.is_empty() {
        statement.flat_fallback = true;
        statement.items = flat_items(package, &bound);
        return statement;
    }

    let Some(arcs) = package.presentation.role_matching(key.report_type.role()) else {
        statement.missing_role = true;
        return statement;
    };

    let weights = WeightLookup::new(package, key.report_type.role());
    let mut visited = HashSet::new();

    for root in root_concepts(arcs) {
        if visited.contains(&root) {
            continue;
        }
        visited.insert(root.clone());

        let children = build_children(&root, arcs, &bound, &package.labels, &weights, 1, &mut visited);
        statement.items.push(StatementItem {
            label_zh: label_zh(&package.labels, &root, None),
            label_en: label_en(&package.labels, &root, None),
            value: bound.get(root.as_str()).and_then(|fact| fact.value),
            weight: DEFAULT_WEIGHT,
            depth: 0,
            children,
            concept: root,
        });
    }

    statement
}

/// 依 §4.7 規則挑出報導 context：
/// 資產負債表取 instant == 期末日，其餘取 1/1 起至期末日的 duration。
/// 同分時偏好 entity 等於股號者，再偏好沒有 scenario/segment 者。
fn select_context<'a>(
    package: &'a XbrlPackage,
    key: &StatementKey,
    period_end: NaiveDate,
    fiscal_start: NaiveDate,
) -> Option<&'a XbrlContext> {
    let mut candidates: Vec<&XbrlContext> = package
        .contexts
        .values()
        .filter(|context| match &context.period {
            Some(Period::Instant(instant)) => {
                key.report_type.is_instant() && *instant == period_end
            }
            Some(Period::Duration { start, end }) => {
                !key.report_type.is_instant() && *end == period_end && *start == fiscal_start
            }
            None => false,
        })
        .collect();

    candidates.sort_by(|a, b| {
        let entity_a = a.entity == key.stock_id;
        let entity_b = b.entity == key.stock_id;
        entity_b
            .cmp(&entity_a)
            .then_with(|| a.has_scenario().cmp(&b.has_scenario()))
            .then_with(|| a.id.cmp(&b.id))
    });

    candidates.first().copied()
}

/// concept → fact（文件順序首見者優先）
fn bind_facts<'a>(
    package: &'a XbrlPackage,
    context: Option<&XbrlContext>,
) -> HashMap<&'a str, &'a XbrlFact> {
    let mut bound: HashMap<&str, &XbrlFact> = HashMap::new();

    let Some(context) = context else {
        return bound;
    };

    for fact in &package.facts {
        if fact.context_ref == context.id {
            bound.entry(fact.concept.as_str()).or_insert(fact);
        }
    }

    bound
}

/// 權重查詢：先找親子對應的 arc，再退到「任一親節點」的權重
struct WeightLookup {
    by_pair: HashMap<(String, String), Decimal>,
    by_child: HashMap<String, Decimal>,
}

impl WeightLookup {
    fn new(package: &XbrlPackage, role: &str) -> Self {
        let arcs = package
            .calculation
            .role_matching(role)
            .cloned()
            .unwrap_or_else(|| package.calculation.merged());

        let mut by_pair = HashMap::new();
        let mut by_child: HashMap<String, Decimal> = HashMap::new();

        for (parent, children) in &arcs {
            for arc in children {
                by_pair.insert((parent.clone(), arc.to_concept.clone()), arc.weight);
                by_child.entry(arc.to_concept.clone()).or_insert(arc.weight);
            }
        }

        WeightLookup { by_pair, by_child }
    }

    fn weight(&self, parent: &str, child: &str) -> Decimal {
        self.by_pair
            .get(&(parent.to_string(), child.to_string()))
            .or_else(|| self.by_child.get(child))
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }
}

/// presentation 樹根：只當過 from、沒當過 to 的 concepts
fn root_concepts(arcs: &HashMap<String, Vec<PresentationArc>>) -> Vec<String> {
    let mut children: HashSet<&str> = HashSet::new();
    for list in arcs.values() {
        for arc in list {
            children.insert(arc.to_concept.as_str());
        }
    }

    let mut roots: Vec<String> = arcs
        .keys()
        .filter(|parent| !children.contains(parent.as_str()))
        .cloned()
        .collect();
    roots.sort();
    roots
}

#[allow(clippy::too_many_arguments)]
fn build_children(
    parent: &str,
    arcs: &HashMap<String, Vec<PresentationArc>>,
    bound: &HashMap<&str, &XbrlFact>,
    labels: &LabelSet,
    weights: &WeightLookup,
    depth: i32,
    visited: &mut HashSet<String>,
) -> Vec<StatementItem> {
    let mut items = Vec::new();

    if depth > MAX_DEPTH {
        return items;
    }

    let Some(children) = arcs.get(parent) else {
        return items;
    };

    for arc in children {
        let concept = &arc.to_concept;
        if visited.contains(concept) {
            continue;
        }
        visited.insert(concept.clone());

        let preferred = arc.preferred_label.as_deref();
        let grand_children =
            build_children(concept, arcs, bound, labels, weights, depth + 1, visited);

        items.push(StatementItem {
            concept: concept.clone(),
            label_zh: label_zh(labels, concept, preferred),
            label_en: label_en(labels, concept, preferred),
            value: bound.get(concept.as_str()).and_then(|fact| fact.value),
            weight: weights.weight(parent, concept),
            depth,
            children: grand_children,
        });
    }

    items
}

fn label_zh(labels: &LabelSet, concept: &str, preferred: Option<&str>) -> String {
    labels
        .display_zh(concept, preferred)
        .unwrap_or(concept)
        .to_string()
}

fn label_en(labels: &LabelSet, concept: &str, preferred: Option<&str>) -> String {
    labels
        .display_en(concept, preferred)
        .unwrap_or(concept)
        .to_string()
}

/// 沒有 presentation linkbase 時的退路：綁定到的 facts 依 concept 排序攤平
fn flat_items(package: &XbrlPackage, bound: &HashMap<&str, &XbrlFact>) -> Vec<StatementItem> {
    let mut facts: Vec<&XbrlFact> = if bound.is_empty() {
        // 連 context 都挑不到時，退回全部 facts（concept 首見者優先）
        let mut seen = HashSet::new();
        package
            .facts
            .iter()
            .filter(|fact| seen.insert(fact.concept.as_str()))
            .collect()
    } else {
        bound.values().copied().collect()
    };

    facts.sort_by(|a, b| a.concept.cmp(&b.concept));

    facts
        .into_iter()
        .map(|fact| StatementItem {
            concept: fact.concept.clone(),
            label_zh: label_zh(&package.labels, &fact.concept, None),
            label_en: label_en(&package.labels, &fact.concept, None),
            value: fact.value,
            weight: DEFAULT_WEIGHT,
            depth: 0,
            children: Vec::new(),
        })
        .collect()
}

/// 第一個綁到的 fact 的 unit 決定幣別，預設 TWD
fn currency_of(package: &XbrlPackage, bound: &HashMap<&str, &XbrlFact>) -> String {
    for fact in bound.values() {
        if let Some(unit_ref) = fact.unit_ref.as_ref() {
            if let Some(currency) = package.units.get(unit_ref) {
                return currency.clone();
            }
        }
    }

    "TWD".to_string()
}

/// 申報倍率：取數值 facts 的 scale 眾數（10 的次方），沒有 scale 時依台灣慣例回 1000
fn unit_scale_of(bound: &HashMap<&str, &XbrlFact>) -> i64 {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for fact in bound.values() {
        if fact.value.is_some() {
            if let Some(scale) = fact.scale {
                *counts.entry(scale).or_default() += 1;
            }
        }
    }

    let Some((scale, _)) = counts
        .into_iter()
        .max_by_key(|(scale, count)| (*count, -*scale))
    else {
        return 1000;
    };

    10i64.pow(scale.clamp(0, 18) as u32)
}

#[cfg(test)]
mod tests {
    use crate::{
        declare::{Quarter, ReportType},
        xbrl::{CalculationArc, Label},
    };

    use super::*;

    fn context(id: &str, entity: &str, period: Period, scenario: Option<&str>) -> XbrlContext {
        XbrlContext {
            id: id.to_string(),
            entity: entity.to_string(),
            period: Some(period),
            scenario: scenario.map(|s| s.to_string()),
        }
    }

    fn fact(concept: &str, context_ref: &str, value: Decimal) -> XbrlFact {
        XbrlFact {
            concept: concept.to_string(),
            context_ref: context_ref.to_string(),
            unit_ref: Some("TWD".to_string()),
            value: Some(value),
            text: value.to_string(),
            decimals: None,
            scale: Some(3),
        }
    }

    fn presentation_arc(from: &str, to: &str, order: Decimal) -> PresentationArc {
        PresentationArc {
            from_concept: from.to_string(),
            to_concept: to.to_string(),
            order,
            preferred_label: None,
        }
    }

    fn calculation_arc(from: &str, to: &str, weight: Decimal, order: Decimal) -> CalculationArc {
        CalculationArc {
            from_concept: from.to_string(),
            to_concept: to.to_string(),
            weight,
            order,
        }
    }

    const ROLE: &str = "http://www.xbrl.org/tifrs/role/StatementOfComprehensiveIncome";

    /// 2330 113Q3 損益表形狀的小型封裝
    fn income_package() -> XbrlPackage {
        let mut package = XbrlPackage::default();

        let duration = Period::Duration {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
        };
        package.contexts.insert(
            "YTD".to_string(),
            context("YTD", "2330", duration.clone(), None),
        );
        package.contexts.insert(
            "YTD_Seg".to_string(),
            context("YTD_Seg", "2330", duration, Some("member")),
        );

        package.units.insert("TWD".to_string(), "TWD".to_string());

        package.facts = vec![
            fact("Revenue", "YTD", dec!(2025846521)),
            fact("CostOfSales", "YTD", dec!(857740662)),
            fact("GrossProfit", "YTD", dec!(1168105859)),
            fact("OperatingExpenses", "YTD", dec!(221710)),
            fact("OperatingIncome", "YTD", dec!(1167884149)),
            // 分部 context 的同名 fact 不應被綁定
            fact("Revenue", "YTD_Seg", dec!(1)),
        ];

        let mut pre: HashMap<String, Vec<PresentationArc>> = HashMap::new();
        pre.insert(
            "IncomeStatementAbstract".to_string(),
            vec![
                presentation_arc("IncomeStatementAbstract", "Revenue", dec!(1)),
                presentation_arc("IncomeStatementAbstract", "CostOfSales", dec!(2)),
                presentation_arc("IncomeStatementAbstract", "GrossProfit", dec!(3)),
                presentation_arc("IncomeStatementAbstract", "OperatingIncome", dec!(4)),
            ],
        );
        pre.insert(
            "OperatingIncome".to_string(),
            vec![presentation_arc("OperatingIncome", "OperatingExpenses", dec!(1))],
        );
        package.presentation.roles.insert(ROLE.to_string(), pre);

        let mut cal: HashMap<String, Vec<CalculationArc>> = HashMap::new();
        cal.insert(
            "GrossProfit".to_string(),
            vec![
                calculation_arc("GrossProfit", "Revenue", dec!(1), dec!(1)),
                calculation_arc("GrossProfit", "CostOfSales", dec!(-1), dec!(2)),
            ],
        );
        cal.insert(
            "OperatingIncome".to_string(),
            vec![
                calculation_arc("OperatingIncome", "GrossProfit", dec!(1), dec!(1)),
                calculation_arc("OperatingIncome", "OperatingExpenses", dec!(-1), dec!(2)),
            ],
        );
        package.calculation.roles.insert(ROLE.to_string(), cal);

        package.labels.zh.insert(
            "Revenue".to_string(),
            vec![Label {
                role: "http://www.xbrl.org/2003/role/label".to_string(),
                text: "營業收入合計".to_string(),
            }],
        );
        package.labels.en.insert(
            "Revenue".to_string(),
            vec![Label {
                role: "http://www.xbrl.org/2003/role/label".to_string(),
                text: "Total operating revenue".to_string(),
            }],
        );

        package
    }

    fn income_key() -> StatementKey {
        StatementKey::new("2330", 113, Quarter::Q3, ReportType::IncomeStatement)
    }

    #[test]
    fn test_build_income_statement() {
        let statement = build(&income_package(), &income_key());

        assert_eq!(
            statement.report_date,
            NaiveDate::from_ymd_opt(2024, 9, 30).unwrap()
        );
        assert!(!statement.missing_role);
        assert!(!statement.flat_fallback);
        assert_eq!(statement.currency, "TWD");
        assert_eq!(statement.unit_scale, 1000);

        assert_eq!(statement.items.len(), 1);
        let root = &statement.items[0];
        assert_eq!(root.concept, "IncomeStatementAbstract");
        assert_eq!(root.depth, 0);

        let revenue = &root.children[0];
        assert_eq!(revenue.concept, "Revenue");
        assert_eq!(revenue.label_zh, "營業收入合計");
        assert_eq!(revenue.label_en, "Total operating revenue");
        // 綁到的是無 scenario 的 YTD context，而非分部 context
        assert!(revenue.value.unwrap() > dec!(0));
        assert_eq!(revenue.value, Some(dec!(2025846521)));
        assert_eq!(revenue.depth, 1);

        let cost = &root.children[1];
        assert_eq!(cost.concept, "CostOfSales");
        assert_eq!(cost.weight, dec!(-1));
        // 無標籤時落回 concept 名稱
        assert_eq!(cost.label_zh, "CostOfSales");
    }

    /// P1：同一 concept 在樹中只出現一次
    #[test]
    fn test_concepts_unique_in_tree() {
        let statement = build(&income_package(), &income_key());

        let mut seen = HashSet::new();
        for item in statement.flatten() {
            assert!(
                seen.insert(item.concept.clone()),
                "duplicate concept {}",
                item.concept
            );
        }
    }

    /// P2：|parent − Σ(weight × child)| ≤ max(1, |parent| × 1e-6)
    #[test]
    fn test_calculation_identity_within_tolerance() {
        let package = income_package();
        let statement = build(&package, &income_key());
        let values: HashMap<String, Decimal> = statement
            .flatten()
            .into_iter()
            .filter_map(|item| item.value.map(|value| (item.concept, value)))
            .collect();

        let arcs = package
            .calculation
            .role_matching(ReportType::IncomeStatement.role())
            .unwrap();

        for (parent, children) in arcs {
            let Some(parent_value) = values.get(parent) else {
                continue;
            };
            let mut sum = Decimal::ZERO;
            let mut complete = true;
            for arc in children {
                match values.get(&arc.to_concept) {
                    Some(child_value) => sum += arc.weight * child_value,
                    None => complete = false,
                }
            }
            if !complete {
                continue;
            }

            let tolerance =
                Decimal::ONE.max(parent_value.abs() * Decimal::new(1, 6));
            assert!(
                (parent_value - sum).abs() <= tolerance,
                "{}: {} vs {}",
                parent,
                parent_value,
                sum
            );
        }
    }

    #[test]
    fn test_missing_role_yields_empty_statement() {
        let package = income_package();
        let key = StatementKey::new("2330", 113, Quarter::Q3, ReportType::CashFlow);

        let statement = build(&package, &key);
        assert!(statement.missing_role);
        assert!(statement.items.is_empty());
    }

    #[test]
    fn test_flat_fallback_without_presentation() {
        let mut package = income_package();
        package.presentation.roles.clear();

        let statement = build(&package, &income_key());
        assert!(statement.flat_fallback);
        assert!(!statement.items.is_empty());
        // concept 排序
        let concepts: Vec<&str> = statement
            .items
            .iter()
            .map(|item| item.concept.as_str())
            .collect();
        let mut sorted = concepts.clone();
        sorted.sort();
        assert_eq!(concepts, sorted);
        assert!(statement.items.iter().all(|item| item.children.is_empty()));
    }

    #[test]
    fn test_balance_sheet_selects_instant_context() {
        let mut package = XbrlPackage::default();
        package.contexts.insert(
            "AsOf".to_string(),
            context(
                "AsOf",
                "2330",
                Period::Instant(NaiveDate::from_ymd_opt(2024, 9, 30).unwrap()),
                None,
            ),
        );
        package.contexts.insert(
            "YTD".to_string(),
            context(
                "YTD",
                "2330",
                Period::Duration {
                    start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    end: NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
                },
                None,
            ),
        );
        package.facts = vec![fact("Assets", "AsOf", dec!(100)), fact("Assets", "YTD", dec!(999))];

        let mut pre: HashMap<String, Vec<PresentationArc>> = HashMap::new();
        pre.insert(
            "BalanceSheetAbstract".to_string(),
            vec![presentation_arc("BalanceSheetAbstract", "Assets", dec!(1))],
        );
        package
            .presentation
            .roles
            .insert(
                "http://www.xbrl.org/tifrs/role/StatementOfFinancialPosition".to_string(),
                pre,
            );

        let key = StatementKey::new("2330", 113, Quarter::Q3, ReportType::BalanceSheet);
        let statement = build(&package, &key);

        let assets = &statement.items[0].children[0];
        assert_eq!(assets.value, Some(dec!(100)));
    }
}
