//! 財務報表輸出模型與建構器。

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::declare::{Quarter, ReportType};

pub mod builder;

/// 報表上的單一科目節點
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementItem {
    pub concept: String,
    pub label_zh: String,
    pub label_en: String,
    /// 申報原值；無對應 fact 時為 None
    pub value: Option<Decimal>,
    /// 對親節點的加減權重（來自 calculation arc，預設 +1）
    pub weight: Decimal,
    pub depth: i32,
    pub children: Vec<StatementItem>,
}

/// 組裝完成的財務報表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub stock_id: String,
    /// 民國年
    pub year: i32,
    pub quarter: Quarter,
    pub report_type: ReportType,
    pub currency: String,
    /// 申報單位的十次方倍率（台灣財報慣例為 1000）
    pub unit_scale: i64,
    pub report_date: NaiveDate,
    /// presentation linkbase 裡找不到這張報表的 role
    pub missing_role: bool,
    /// 完全沒有 presentation linkbase，items 為扁平清單
    pub flat_fallback: bool,
    pub items: Vec<StatementItem>,
}

impl FinancialStatement {
    /// 深度優先攤平成清單（子節點清空）
    pub fn flatten(&self) -> Vec<StatementItem> {
        let mut flattened = Vec::new();
        flatten_into(&self.items, &mut flattened);
        flattened
    }
}

fn flatten_into(items: &[StatementItem], result: &mut Vec<StatementItem>) {
    for item in items {
        let mut flat = item.clone();
        flat.children = Vec::new();
        result.push(flat);
        flatten_into(&item.children, result);
    }
}
