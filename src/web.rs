//! HTTP 路由層。
//!
//! 只做兩件事：把查詢參數轉成服務層的型別化呼叫、
//! 把錯誤種類對應到 HTTP 狀態碼。不含任何抓取或解析邏輯。

use rocket::{get, http::Status, response::status::Custom, routes, serde::json::Json, Route, State};

use crate::{
    database::table::{
        disclosure::DisclosureReport, dividend::DividendRecord, revenue::MonthlyRevenue,
        share_pledge::SharePledge,
    },
    declare::{Market, Quarter, ReportType, StatementKey},
    error::Error,
    statement::FinancialStatement,
    AppContext,
};

type ApiResult<T> = Result<Json<T>, Custom<String>>;

pub fn routes() -> Vec<Route> {
    routes![
        financial_statement,
        monthly_revenue,
        share_pledging,
        dividends,
        disclosure,
        xbrl_download
    ]
}

/// NotFound → 404、上游資料無效 → 502、暫時性失敗 → 503、其餘 → 500
fn to_custom(why: Error) -> Custom<String> {
    let status = match &why {
        Error::NotFound(_) => Status::NotFound,
        Error::MalformedPackage(_) | Error::Parse(_) => Status::BadGateway,
        Error::TransientFetch(_) => Status::ServiceUnavailable,
        _ => Status::InternalServerError,
    };
    Custom(status, why.to_string())
}

fn bad_request(message: &str) -> Custom<String> {
    Custom(Status::BadRequest, message.to_string())
}

#[get("/financial/<stock_id>?<year>&<quarter>&<report_type>&<format>&<force_refresh>")]
async fn financial_statement(
    context: &State<AppContext>,
    stock_id: &str,
    year: i32,
    quarter: i32,
    report_type: &str,
    format: Option<&str>,
    force_refresh: Option<bool>,
) -> ApiResult<FinancialStatement> {
    let quarter = Quarter::from(quarter).ok_or_else(|| bad_request("quarter must be 1..4"))?;
    let report_type =
        ReportType::from_code(report_type).ok_or_else(|| bad_request("unknown report_type"))?;

    let key = StatementKey::new(stock_id, year, quarter, report_type);
    let mut statement = context
        .financial
        .get_financial_statement(key, force_refresh.unwrap_or(false))
        .await
        .map_err(to_custom)?;

    if format == Some("flat") {
        statement.items = statement.flatten();
    }

    Ok(Json(statement))
}

#[get("/revenue?<stock_id>&<year>&<month>&<market>&<force_refresh>")]
async fn monthly_revenue(
    context: &State<AppContext>,
    stock_id: Option<&str>,
    year: i32,
    month: i32,
    market: Option<&str>,
    force_refresh: Option<bool>,
) -> ApiResult<Vec<MonthlyRevenue>> {
    let market = parse_market(market)?;

    context
        .revenue
        .get_monthly_revenue(stock_id, year, month, market, force_refresh.unwrap_or(false))
        .await
        .map(Json)
        .map_err(to_custom)
}

#[get("/insiders/<stock_id>/pledging?<year>&<month>&<market>&<force_refresh>")]
async fn share_pledging(
    context: &State<AppContext>,
    stock_id: &str,
    year: i32,
    month: i32,
    market: Option<&str>,
    force_refresh: Option<bool>,
) -> ApiResult<Vec<SharePledge>> {
    let market = parse_insider_market(market)?;

    context
        .insiders
        .get_share_pledging(stock_id, year, month, market, force_refresh.unwrap_or(false))
        .await
        .map(Json)
        .map_err(to_custom)
}

#[get("/dividend/<stock_id>?<year_start>&<year_end>&<query_type>&<force_refresh>")]
async fn dividends(
    context: &State<AppContext>,
    stock_id: &str,
    year_start: i32,
    year_end: Option<i32>,
    query_type: Option<i32>,
    force_refresh: Option<bool>,
) -> ApiResult<Vec<DividendRecord>> {
    let query_type = query_type.unwrap_or(2);
    if !(1..=2).contains(&query_type) {
        return Err(bad_request("query_type must be 1 or 2"));
    }

    context
        .dividend
        .get_dividend(
            stock_id,
            year_start,
            year_end.unwrap_or(year_start),
            query_type,
            force_refresh.unwrap_or(false),
        )
        .await
        .map(Json)
        .map_err(to_custom)
}

#[get("/disclosure/<stock_id>?<year>&<month>&<market>&<force_refresh>")]
async fn disclosure(
    context: &State<AppContext>,
    stock_id: &str,
    year: i32,
    month: i32,
    market: Option<&str>,
    force_refresh: Option<bool>,
) -> ApiResult<DisclosureReport> {
    let market = parse_insider_market(market)?;

    context
        .disclosure
        .get_disclosure(stock_id, year, month, market, force_refresh.unwrap_or(false))
        .await
        .map(Json)
        .map_err(to_custom)
}

#[get("/xbrl/<stock_id>?<year>&<quarter>")]
async fn xbrl_download(
    context: &State<AppContext>,
    stock_id: &str,
    year: i32,
    quarter: i32,
) -> Result<Vec<u8>, Custom<String>> {
    let quarter = Quarter::from(quarter).ok_or_else(|| bad_request("quarter must be 1..4"))?;

    context
        .financial
        .download_xbrl_zip(stock_id, year, quarter)
        .await
        .map_err(to_custom)
}

fn parse_market(market: Option<&str>) -> Result<Market, Custom<String>> {
    match market {
        None => Ok(Market::Listed),
        Some(code) => Market::from_code(code)
            .ok_or_else(|| bad_request("market must be one of sii/otc/rotc/pub")),
    }
}

/// 質押與揭露端點只收上市/上櫃（MOPS 的 TYPEK 只有這兩種）
fn parse_insider_market(market: Option<&str>) -> Result<Market, Custom<String>> {
    match parse_market(market)? {
        market @ (Market::Listed | Market::OverTheCounter) => Ok(market),
        _ => Err(bad_request("market must be sii or otc")),
    }
}
