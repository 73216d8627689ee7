use std::fmt;

use serde::{Deserialize, Serialize};

/// 市場別（MOPS 端點的 TYPEK 參數）
#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum Market {
    /// 上市
    Listed,
    /// 上櫃
    OverTheCounter,
    /// 興櫃
    Emerging,
    /// 公開發行
    PublicIssue,
}

impl Market {
    pub fn code(&self) -> &'static str {
        match self {
            Market::Listed => "sii",
            Market::OverTheCounter => "otc",
            Market::Emerging => "rotc",
            Market::PublicIssue => "pub",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Market::Listed => "上市",
            Market::OverTheCounter => "上櫃",
            Market::Emerging => "興櫃",
            Market::PublicIssue => "公開發行",
        }
    }

    pub fn from_code(code: &str) -> Option<Market> {
        match code {
            "sii" => Some(Market::Listed),
            "otc" => Some(Market::OverTheCounter),
            "rotc" => Some(Market::Emerging),
            "pub" => Some(Market::PublicIssue),
            _ => None,
        }
    }

    pub fn iterator() -> impl Iterator<Item = Self> {
        [
            Self::Listed,
            Self::OverTheCounter,
            Self::Emerging,
            Self::PublicIssue,
        ]
        .iter()
        .copied()
    }
}

/// 季度
#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone, Serialize, Deserialize)]
#[repr(i32)]
pub enum Quarter {
    Q1 = 1,
    Q2 = 2,
    Q3 = 3,
    Q4 = 4,
}

impl Quarter {
    pub fn serial(&self) -> i32 {
        *self as i32
    }

    pub fn from(serial: i32) -> Option<Quarter> {
        match serial {
            1 => Some(Quarter::Q1),
            2 => Some(Quarter::Q2),
            3 => Some(Quarter::Q3),
            4 => Some(Quarter::Q4),
            _ => None,
        }
    }

    /// 該季財報的結帳月份
    pub fn month(&self) -> u32 {
        match self {
            Quarter::Q1 => 3,
            Quarter::Q2 => 6,
            Quarter::Q3 => 9,
            Quarter::Q4 => 12,
        }
    }

    /// 該季財報結帳月份的最後一天
    pub fn last_day(&self) -> u32 {
        match self {
            Quarter::Q1 | Quarter::Q4 => 31,
            Quarter::Q2 | Quarter::Q3 => 30,
        }
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.serial())
    }
}

/// 報表類型，對應 XBRL 的 statement role
#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    /// 資產負債表
    BalanceSheet,
    /// 綜合損益表
    IncomeStatement,
    /// 現金流量表
    CashFlow,
    /// 權益變動表
    EquityStatement,
}

impl ReportType {
    pub fn code(&self) -> &'static str {
        match self {
            ReportType::BalanceSheet => "balance_sheet",
            ReportType::IncomeStatement => "income_statement",
            ReportType::CashFlow => "cash_flow",
            ReportType::EquityStatement => "equity_statement",
        }
    }

    /// 報表對應的 XBRL role 名稱（以結尾比對 role URI）
    pub fn role(&self) -> &'static str {
        match self {
            ReportType::BalanceSheet => "StatementOfFinancialPosition",
            ReportType::IncomeStatement => "StatementOfComprehensiveIncome",
            ReportType::CashFlow => "StatementOfCashFlows",
            ReportType::EquityStatement => "StatementOfChangesInEquity",
        }
    }

    pub fn from_code(code: &str) -> Option<ReportType> {
        match code {
            "balance_sheet" => Some(ReportType::BalanceSheet),
            "income_statement" => Some(ReportType::IncomeStatement),
            "cash_flow" => Some(ReportType::CashFlow),
            "equity_statement" => Some(ReportType::EquityStatement),
            _ => None,
        }
    }

    /// 資產負債表是時點（instant）報表，其餘三張是期間（duration）報表
    pub fn is_instant(&self) -> bool {
        matches!(self, ReportType::BalanceSheet)
    }

    pub fn iterator() -> impl Iterator<Item = Self> {
        [
            Self::BalanceSheet,
            Self::IncomeStatement,
            Self::CashFlow,
            Self::EquityStatement,
        ]
        .iter()
        .copied()
    }
}

/// 財務報表的自然鍵：(股號, 民國年, 季度, 報表類型)
#[derive(PartialEq, Eq, Hash, Debug, Clone, Serialize, Deserialize)]
pub struct StatementKey {
    pub stock_id: String,
    /// 民國年
    pub year: i32,
    pub quarter: Quarter,
    pub report_type: ReportType,
}

impl StatementKey {
    pub fn new(stock_id: &str, year: i32, quarter: Quarter, report_type: ReportType) -> Self {
        StatementKey {
            stock_id: stock_id.to_string(),
            year,
            quarter,
            report_type,
        }
    }
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}{}-{}",
            self.stock_id,
            self.year,
            self.quarter,
            self.report_type.code()
        )
    }
}
