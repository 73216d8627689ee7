use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};

use crate::{
    database::PostgresSQL,
    error::{Error, Result},
};

/// 股利分派一期一列。季配息公司一年四列，年度配息 `quarter` 為 `None`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DividendRecord {
    pub stock_id: String,
    /// 股利所屬年度（民國年）
    pub year: i32,
    /// 所屬季度，年度股利為 None（資料庫以 0 儲存）
    pub quarter: Option<i32>,
    /// 現金股利（元/股）
    pub cash_dividend: Option<Decimal>,
    /// 股票股利（元/股）
    pub stock_dividend: Option<Decimal>,
    /// 董事會決議日（MOPS 原文，民國紀年）
    pub board_resolution_date: Option<String>,
}

pub async fn fetch(
    db: &PostgresSQL,
    stock_id: &str,
    year_start: i32,
    year_end: i32,
) -> Result<Vec<DividendRecord>> {
    let sql = r#"
SELECT
    stock_id, "year", quarter, cash_dividend, stock_dividend, board_resolution_date
FROM
    dividend
WHERE
    stock_id = $1 AND "year" BETWEEN $2 AND $3
ORDER BY
    "year", quarter
"#;
    sqlx::query(sql)
        .bind(stock_id)
        .bind(year_start)
        .bind(year_end)
        .try_map(|row: PgRow| {
            let quarter: i32 = row.try_get("quarter")?;
            Ok(DividendRecord {
                stock_id: row.try_get("stock_id")?,
                year: row.try_get("year")?,
                quarter: if quarter == 0 { None } else { Some(quarter) },
                cash_dividend: row.try_get("cash_dividend")?,
                stock_dividend: row.try_get("stock_dividend")?,
                board_resolution_date: row.try_get("board_resolution_date")?,
            })
        })
        .fetch_all(db.pool())
        .await
        .map_err(Error::from)
}

/// 單一交易內批次 upsert，自然鍵 (stock_id, year, quarter)。
pub async fn save_rows(db: &PostgresSQL, rows: &[DividendRecord]) -> Result<u64> {
    let sql = r#"
INSERT INTO dividend (
    stock_id, "year", quarter, cash_dividend, stock_dividend,
    board_resolution_date, fetched_at)
VALUES ($1, $2, $3, $4, $5, $6, now())
ON CONFLICT (stock_id, "year", quarter) DO UPDATE SET
    cash_dividend = EXCLUDED.cash_dividend,
    stock_dividend = EXCLUDED.stock_dividend,
    board_resolution_date = EXCLUDED.board_resolution_date,
    fetched_at = now();
"#;

    let mut tx = db.tx().await?;
    let mut affected = 0;

    for row in rows {
        let result = sqlx::query(sql)
            .bind(&row.stock_id)
            .bind(row.year)
            .bind(row.quarter.unwrap_or(0))
            .bind(row.cash_dividend)
            .bind(row.stock_dividend)
            .bind(&row.board_resolution_date)
            .execute(&mut *tx)
            .await?;
        affected += result.rows_affected();
    }

    tx.commit().await?;
    Ok(affected)
}
