use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};

use crate::{
    database::PostgresSQL,
    error::{Error, Result},
};

/// 資金貸放或背書保證的單列。
///
/// 三個列集共用同一形狀：資金貸放用 current / previous / max_limit，
/// 背書保證用 current（本月增減）/ accumulated_balance / max_limit，
/// 對大陸地區背書保證用 current / accumulated_balance。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureRow {
    /// 本公司 / 子公司
    pub entity: String,
    pub has_balance: bool,
    /// 本月餘額或本月增減（千元）
    pub current_month: Option<Decimal>,
    /// 上月餘額（千元）
    pub previous_month: Option<Decimal>,
    /// 最高限額（千元）
    pub max_limit: Option<Decimal>,
    /// 累計餘額（千元）
    pub accumulated_balance: Option<Decimal>,
}

/// 本公司與子公司間背書保證
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossCompanyGuarantee {
    pub parent_to_subsidiary: Option<Decimal>,
    pub subsidiary_to_parent: Option<Decimal>,
}

/// 一家公司單月的揭露彙總：三個列集加上跨公司背書 scalar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureReport {
    pub stock_id: String,
    pub company_name: String,
    /// 民國年
    pub year: i32,
    pub month: i32,
    pub funds_lending: Vec<DisclosureRow>,
    pub endorsement_guarantee: Vec<DisclosureRow>,
    /// 對大陸地區背書保證（本月增減 / 累計餘額，無額度欄）
    pub china_guarantee: Vec<DisclosureRow>,
    pub cross_company: Option<CrossCompanyGuarantee>,
}

/// 讀回單月揭露。資料庫一列對應一個 entity，貸放與背書欄位併存。
pub async fn fetch(
    db: &PostgresSQL,
    stock_id: &str,
    year: i32,
    month: i32,
) -> Result<Option<DisclosureReport>> {
    let sql = r#"
SELECT
    stock_id, company_name, "year", "month", entity,
    lending_has_balance, lending_current_month, lending_previous_month, lending_max_limit,
    endorsement_has_balance, endorsement_current_month, endorsement_accumulated, endorsement_max_limit,
    china_has_balance, china_current_month, china_accumulated,
    cross_parent_to_subsidiary, cross_subsidiary_to_parent
FROM
    disclosure
WHERE
    stock_id = $1 AND "year" = $2 AND "month" = $3
ORDER BY
    entity DESC
"#;
    let rows = sqlx::query(sql)
        .bind(stock_id)
        .bind(year)
        .bind(month)
        .fetch_all(db.pool())
        .await?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut report = DisclosureReport {
        stock_id: stock_id.to_string(),
        company_name: String::new(),
        year,
        month,
        funds_lending: Vec::new(),
        endorsement_guarantee: Vec::new(),
        china_guarantee: Vec::new(),
        cross_company: None,
    };

    for row in rows {
        report.company_name = row.try_get("company_name").map_err(Error::from)?;
        let entity: String = row.try_get("entity").map_err(Error::from)?;

        let lending_has_balance: Option<bool> =
            row.try_get("lending_has_balance").map_err(Error::from)?;
        if let Some(has_balance) = lending_has_balance {
            report.funds_lending.push(DisclosureRow {
                entity: entity.clone(),
                has_balance,
                current_month: get_decimal(&row, "lending_current_month")?,
                previous_month: get_decimal(&row, "lending_previous_month")?,
                max_limit: get_decimal(&row, "lending_max_limit")?,
                accumulated_balance: None,
            });
        }

        let endorsement_has_balance: Option<bool> =
            row.try_get("endorsement_has_balance").map_err(Error::from)?;
        if let Some(has_balance) = endorsement_has_balance {
            report.endorsement_guarantee.push(DisclosureRow {
                entity: entity.clone(),
                has_balance,
                current_month: get_decimal(&row, "endorsement_current_month")?,
                previous_month: None,
                max_limit: get_decimal(&row, "endorsement_max_limit")?,
                accumulated_balance: get_decimal(&row, "endorsement_accumulated")?,
            });
        }

        let china_has_balance: Option<bool> =
            row.try_get("china_has_balance").map_err(Error::from)?;
        if let Some(has_balance) = china_has_balance {
            report.china_guarantee.push(DisclosureRow {
                entity: entity.clone(),
                has_balance,
                current_month: get_decimal(&row, "china_current_month")?,
                previous_month: None,
                max_limit: None,
                accumulated_balance: get_decimal(&row, "china_accumulated")?,
            });
        }

        let parent_to_subsidiary = get_decimal(&row, "cross_parent_to_subsidiary")?;
        let subsidiary_to_parent = get_decimal(&row, "cross_subsidiary_to_parent")?;
        if parent_to_subsidiary.is_some() || subsidiary_to_parent.is_some() {
            report.cross_company = Some(CrossCompanyGuarantee {
                parent_to_subsidiary,
                subsidiary_to_parent,
            });
        }
    }

    Ok(Some(report))
}

fn get_decimal(row: &PgRow, column: &str) -> Result<Option<Decimal>> {
    row.try_get(column).map_err(Error::from)
}

/// 單一交易內 upsert，自然鍵 (stock_id, year, month, entity)。
/// 跨公司 scalar 記在「本公司」那一列。
pub async fn save_report(db: &PostgresSQL, report: &DisclosureReport) -> Result<u64> {
    let sql = r#"
INSERT INTO disclosure (
    stock_id, "year", "month", entity, company_name,
    lending_has_balance, lending_current_month, lending_previous_month, lending_max_limit,
    endorsement_has_balance, endorsement_current_month, endorsement_accumulated, endorsement_max_limit,
    china_has_balance, china_current_month, china_accumulated,
    cross_parent_to_subsidiary, cross_subsidiary_to_parent, fetched_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, now())
ON CONFLICT (stock_id, "year", "month", entity) DO UPDATE SET
    company_name = EXCLUDED.company_name,
    lending_has_balance = EXCLUDED.lending_has_balance,
    lending_current_month = EXCLUDED.lending_current_month,
    lending_previous_month = EXCLUDED.lending_previous_month,
    lending_max_limit = EXCLUDED.lending_max_limit,
    endorsement_has_balance = EXCLUDED.endorsement_has_balance,
    endorsement_current_month = EXCLUDED.endorsement_current_month,
    endorsement_accumulated = EXCLUDED.endorsement_accumulated,
    endorsement_max_limit = EXCLUDED.endorsement_max_limit,
    china_has_balance = EXCLUDED.china_has_balance,
    china_current_month = EXCLUDED.china_current_month,
    china_accumulated = EXCLUDED.china_accumulated,
    cross_parent_to_subsidiary = EXCLUDED.cross_parent_to_subsidiary,
    cross_subsidiary_to_parent = EXCLUDED.cross_subsidiary_to_parent,
    fetched_at = now();
"#;

    let entities: Vec<String> = {
        let mut entities: Vec<String> = report
            .funds_lending
            .iter()
            .chain(report.endorsement_guarantee.iter())
            .chain(report.china_guarantee.iter())
            .map(|row| row.entity.clone())
            .collect();
        entities.sort();
        entities.dedup();
        entities
    };

    let mut tx = db.tx().await?;
    let mut affected = 0;

    for entity in entities {
        let lending = report.funds_lending.iter().find(|row| row.entity == entity);
        let endorsement = report
            .endorsement_guarantee
            .iter()
            .find(|row| row.entity == entity);
        let china = report
            .china_guarantee
            .iter()
            .find(|row| row.entity == entity);
        let cross = if entity == "本公司" {
            report.cross_company.as_ref()
        } else {
            None
        };

        let result = sqlx::query(sql)
            .bind(&report.stock_id)
            .bind(report.year)
            .bind(report.month)
            .bind(&entity)
            .bind(&report.company_name)
            .bind(lending.map(|row| row.has_balance))
            .bind(lending.and_then(|row| row.current_month))
            .bind(lending.and_then(|row| row.previous_month))
            .bind(lending.and_then(|row| row.max_limit))
            .bind(endorsement.map(|row| row.has_balance))
            .bind(endorsement.and_then(|row| row.current_month))
            .bind(endorsement.and_then(|row| row.accumulated_balance))
            .bind(endorsement.and_then(|row| row.max_limit))
            .bind(china.map(|row| row.has_balance))
            .bind(china.and_then(|row| row.current_month))
            .bind(china.and_then(|row| row.accumulated_balance))
            .bind(cross.and_then(|cross| cross.parent_to_subsidiary))
            .bind(cross.and_then(|cross| cross.subsidiary_to_parent))
            .execute(&mut *tx)
            .await?;
        affected += result.rows_affected();
    }

    tx.commit().await?;
    Ok(affected)
}
