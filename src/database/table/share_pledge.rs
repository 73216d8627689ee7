use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};

use crate::{
    database::PostgresSQL,
    error::{Error, Result},
};

/// 董監事持股質押明細（一人一列）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePledge {
    pub stock_id: String,
    pub company_name: String,
    /// 民國年
    pub year: i32,
    pub month: i32,
    /// 職稱（董事長、獨立董事…）
    pub title: String,
    /// 本人 / 配偶
    pub relationship: String,
    pub name: String,
    /// 選任時持股
    pub shares_at_election: Option<Decimal>,
    /// 目前持股
    pub current_shares: Option<Decimal>,
    /// 設質股數
    pub pledged_shares: Option<Decimal>,
    /// 設質比例 (%)
    pub pledge_ratio: Option<Decimal>,
}

pub async fn fetch(
    db: &PostgresSQL,
    stock_id: &str,
    year: i32,
    month: i32,
) -> Result<Vec<SharePledge>> {
    let sql = r#"
SELECT
    stock_id, company_name, "year", "month", title, relationship, "name",
    shares_at_election, current_shares, pledged_shares, pledge_ratio
FROM
    share_pledge
WHERE
    stock_id = $1 AND "year" = $2 AND "month" = $3
ORDER BY
    title, "name"
"#;
    sqlx::query(sql)
        .bind(stock_id)
        .bind(year)
        .bind(month)
        .try_map(|row: PgRow| {
            Ok(SharePledge {
                stock_id: row.try_get("stock_id")?,
                company_name: row.try_get("company_name")?,
                year: row.try_get("year")?,
                month: row.try_get("month")?,
                title: row.try_get("title")?,
                relationship: row.try_get("relationship")?,
                name: row.try_get("name")?,
                shares_at_election: row.try_get("shares_at_election")?,
                current_shares: row.try_get("current_shares")?,
                pledged_shares: row.try_get("pledged_shares")?,
                pledge_ratio: row.try_get("pledge_ratio")?,
            })
        })
        .fetch_all(db.pool())
        .await
        .map_err(Error::from)
}

/// 單一交易內批次 upsert，自然鍵 (stock_id, year, month, title, name)。
pub async fn save_rows(db: &PostgresSQL, rows: &[SharePledge]) -> Result<u64> {
    let sql = r#"
INSERT INTO share_pledge (
    stock_id, "year", "month", title, "name", relationship, company_name,
    shares_at_election, current_shares, pledged_shares, pledge_ratio, fetched_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
ON CONFLICT (stock_id, "year", "month", title, "name") DO UPDATE SET
    relationship = EXCLUDED.relationship,
    company_name = EXCLUDED.company_name,
    shares_at_election = EXCLUDED.shares_at_election,
    current_shares = EXCLUDED.current_shares,
    pledged_shares = EXCLUDED.pledged_shares,
    pledge_ratio = EXCLUDED.pledge_ratio,
    fetched_at = now();
"#;

    let mut tx = db.tx().await?;
    let mut affected = 0;

    for row in rows {
        let result = sqlx::query(sql)
            .bind(&row.stock_id)
            .bind(row.year)
            .bind(row.month)
            .bind(&row.title)
            .bind(&row.name)
            .bind(&row.relationship)
            .bind(&row.company_name)
            .bind(row.shares_at_election)
            .bind(row.current_shares)
            .bind(row.pledged_shares)
            .bind(row.pledge_ratio)
            .execute(&mut *tx)
            .await?;
        affected += result.rows_affected();
    }

    tx.commit().await?;
    Ok(affected)
}
