use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};

use crate::{
    database::PostgresSQL,
    declare::Market,
    error::{Error, Result},
};

/// 月營收（千元），欄位對應 MOPS 彙總表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRevenue {
    pub stock_id: String,
    pub company_name: String,
    /// 民國年
    pub year: i32,
    pub month: i32,
    pub market: Market,
    /// 當月營收
    pub revenue: Option<Decimal>,
    /// 上月營收
    pub revenue_last_month: Option<Decimal>,
    /// 去年當月營收
    pub revenue_last_year: Option<Decimal>,
    /// 上月比較增減 (%)
    pub mom_change: Option<Decimal>,
    /// 去年同月增減 (%)
    pub yoy_change: Option<Decimal>,
    /// 當月累計營收
    pub accumulated_revenue: Option<Decimal>,
    /// 去年累計營收
    pub accumulated_last_year: Option<Decimal>,
    /// 前期比較增減 (%)
    pub accumulated_yoy_change: Option<Decimal>,
    /// 備註
    pub comment: Option<String>,
}

/// 查詢某年月、某市場的月營收列
pub async fn fetch(
    db: &PostgresSQL,
    year: i32,
    month: i32,
    market: Market,
) -> Result<Vec<MonthlyRevenue>> {
    let sql = r#"
SELECT
    stock_id, company_name, "year", "month", revenue, revenue_last_month,
    revenue_last_year, mom_change, yoy_change, accumulated_revenue,
    accumulated_last_year, accumulated_yoy_change, comment
FROM
    monthly_revenue
WHERE
    "year" = $1 AND "month" = $2 AND market = $3
ORDER BY
    stock_id
"#;
    sqlx::query(sql)
        .bind(year)
        .bind(month)
        .bind(market.code())
        .try_map(|row: PgRow| {
            Ok(MonthlyRevenue {
                stock_id: row.try_get("stock_id")?,
                company_name: row.try_get("company_name")?,
                year: row.try_get("year")?,
                month: row.try_get("month")?,
                market,
                revenue: row.try_get("revenue")?,
                revenue_last_month: row.try_get("revenue_last_month")?,
                revenue_last_year: row.try_get("revenue_last_year")?,
                mom_change: row.try_get("mom_change")?,
                yoy_change: row.try_get("yoy_change")?,
                accumulated_revenue: row.try_get("accumulated_revenue")?,
                accumulated_last_year: row.try_get("accumulated_last_year")?,
                accumulated_yoy_change: row.try_get("accumulated_yoy_change")?,
                comment: row.try_get("comment")?,
            })
        })
        .fetch_all(db.pool())
        .await
        .map_err(Error::from)
}

/// 單一交易內批次 upsert，自然鍵 (stock_id, year, month, market)，後寫者勝。
pub async fn save_rows(db: &PostgresSQL, rows: &[MonthlyRevenue]) -> Result<u64> {
    let sql = r#"
INSERT INTO monthly_revenue (
    stock_id, "year", "month", market, company_name, revenue,
    revenue_last_month, revenue_last_year, mom_change, yoy_change,
    accumulated_revenue, accumulated_last_year, accumulated_yoy_change,
    comment, fetched_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now())
ON CONFLICT (stock_id, "year", "month", market) DO UPDATE SET
    company_name = EXCLUDED.company_name,
    revenue = EXCLUDED.revenue,
    revenue_last_month = EXCLUDED.revenue_last_month,
    revenue_last_year = EXCLUDED.revenue_last_year,
    mom_change = EXCLUDED.mom_change,
    yoy_change = EXCLUDED.yoy_change,
    accumulated_revenue = EXCLUDED.accumulated_revenue,
    accumulated_last_year = EXCLUDED.accumulated_last_year,
    accumulated_yoy_change = EXCLUDED.accumulated_yoy_change,
    comment = EXCLUDED.comment,
    fetched_at = now();
"#;

    let mut tx = db.tx().await?;
    let mut affected = 0;

    for row in rows {
        let result = sqlx::query(sql)
            .bind(&row.stock_id)
            .bind(row.year)
            .bind(row.month)
            .bind(row.market.code())
            .bind(&row.company_name)
            .bind(row.revenue)
            .bind(row.revenue_last_month)
            .bind(row.revenue_last_year)
            .bind(row.mom_change)
            .bind(row.yoy_change)
            .bind(row.accumulated_revenue)
            .bind(row.accumulated_last_year)
            .bind(row.accumulated_yoy_change)
            .bind(&row.comment)
            .execute(&mut *tx)
            .await?;
        affected += result.rows_affected();
    }

    tx.commit().await?;
    Ok(affected)
}
